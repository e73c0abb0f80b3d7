//! Blocking client for the node-side bridge exposing the [`Mining`]
//! capability over a local unix socket.
//!
//! The node process itself (and whatever RPC machinery it uses
//! internally) is an external collaborator; this module only defines the
//! daemon's side of the socket: length-prefixed little-endian frames,
//! `method:u8` plus arguments encoded with the same binary conventions as
//! the wire protocol. Block templates are referenced by `u64` handles the
//! bridge hands out.
//!
//! Frame layout: `length:u32-LE ‖ body`. Requests are
//! `method:u8 ‖ args`; responses are `status:u8 ‖ payload` with status 0
//! for success.

use crate::{
    error::Error,
    mining::{BlockCreateOptions, BlockRef, BlockTemplate, BlockWaitOptions, Mining, MiningError},
};
use binary_sv2::Reader;
use bitcoin::{consensus, hashes::Hash, Block, BlockHash};
use std::{
    io::{Read, Write},
    os::unix::net::UnixStream,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::info;

const METHOD_IS_IBD: u8 = 0x01;
const METHOD_GET_TIP: u8 = 0x02;
const METHOD_WAIT_TIP_CHANGED: u8 = 0x03;
const METHOD_CREATE_NEW_BLOCK: u8 = 0x04;
const METHOD_GET_BLOCK: u8 = 0x05;
const METHOD_GET_TX_FEES: u8 = 0x06;
const METHOD_GET_MERKLE_PATH: u8 = 0x07;
const METHOD_WAIT_NEXT: u8 = 0x08;
const METHOD_SUBMIT_SOLUTION: u8 = 0x09;
const METHOD_DESTROY_TEMPLATE: u8 = 0x0a;

/// Largest response frame the client accepts (a full block plus slack).
const MAX_FRAME_SIZE: u32 = 8 * 1024 * 1024;

/// Resolves `--ipcconnect` and connects. `unix` picks the default socket
/// in the datadir, `unix:<path>` an explicit one.
pub fn connect(address: &str, datadir: &Path) -> Result<IpcMining, Error> {
    let path = match address {
        "unix" => datadir.join("node.sock"),
        other => match other.strip_prefix("unix:") {
            Some(path) => path.into(),
            None => {
                return Err(Error::BadCliArgs(format!(
                    "unsupported -ipcconnect address '{}'; expected 'unix' or 'unix:<path>'",
                    address
                )))
            }
        },
    };
    let stream = UnixStream::connect(&path).map_err(|e| {
        Error::Upstream(format!("cannot connect to node at {}: {}", path.display(), e))
    })?;
    info!("Connected to node bridge at {}", path.display());
    Ok(IpcMining {
        conn: Arc::new(IpcConn {
            stream: Mutex::new(stream),
        }),
    })
}

struct IpcConn {
    stream: Mutex<UnixStream>,
}

impl IpcConn {
    /// One request/response round trip. The mutex serializes concurrent
    /// callers onto the single socket.
    fn call(&self, method: u8, args: &[u8]) -> Result<Vec<u8>, MiningError> {
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| MiningError::Unavailable("IPC connection poisoned".into()))?;

        let mut frame = Vec::with_capacity(5 + args.len());
        frame.extend_from_slice(&(1 + args.len() as u32).to_le_bytes());
        frame.push(method);
        frame.extend_from_slice(args);
        stream
            .write_all(&frame)
            .map_err(|e| MiningError::Unavailable(format!("IPC write failed: {}", e)))?;

        let mut len_bytes = [0u8; 4];
        stream
            .read_exact(&mut len_bytes)
            .map_err(|e| MiningError::Unavailable(format!("IPC read failed: {}", e)))?;
        let len = u32::from_le_bytes(len_bytes);
        if len == 0 || len > MAX_FRAME_SIZE {
            return Err(MiningError::Unavailable(format!(
                "IPC frame of {} bytes out of range",
                len
            )));
        }
        let mut body = vec![0u8; len as usize];
        stream
            .read_exact(&mut body)
            .map_err(|e| MiningError::Unavailable(format!("IPC read failed: {}", e)))?;

        match body[0] {
            0 => Ok(body.split_off(1)),
            status => Err(MiningError::Unavailable(format!(
                "IPC call 0x{:02x} failed with status {}",
                method, status
            ))),
        }
    }
}

fn read_block_ref(payload: &[u8]) -> Result<Option<BlockRef>, MiningError> {
    let mut reader = Reader::new(payload);
    let present = reader
        .read_bool()
        .map_err(|e| MiningError::Unavailable(format!("bad IPC payload: {}", e)))?;
    if !present {
        return Ok(None);
    }
    let hash = reader
        .read_bytes(32)
        .map_err(|e| MiningError::Unavailable(format!("bad IPC payload: {}", e)))?;
    let height = reader
        .read_u32()
        .map_err(|e| MiningError::Unavailable(format!("bad IPC payload: {}", e)))?;
    let mut raw = [0u8; 32];
    raw.copy_from_slice(hash);
    Ok(Some(BlockRef {
        hash: BlockHash::from_byte_array(raw),
        height: height as i32,
    }))
}

/// The `Mining` capability spoken over the bridge socket.
#[derive(Clone)]
pub struct IpcMining {
    conn: Arc<IpcConn>,
}

impl Mining for IpcMining {
    fn is_initial_block_download(&self) -> bool {
        match self.conn.call(METHOD_IS_IBD, &[]) {
            Ok(payload) => payload.first() == Some(&1),
            // When in doubt assume we are still syncing; the update
            // thread simply retries.
            Err(_) => true,
        }
    }

    fn get_tip(&self) -> Option<BlockRef> {
        let payload = self.conn.call(METHOD_GET_TIP, &[]).ok()?;
        read_block_ref(&payload).ok()?
    }

    fn wait_tip_changed(&self, current: BlockHash, timeout: Duration) -> Option<BlockRef> {
        let mut args = Vec::with_capacity(40);
        args.extend_from_slice(&current.to_byte_array());
        args.extend_from_slice(&(timeout.as_millis() as u64).to_le_bytes());
        let payload = self.conn.call(METHOD_WAIT_TIP_CHANGED, &args).ok()?;
        read_block_ref(&payload).ok()?
    }

    fn create_new_block(
        &self,
        options: BlockCreateOptions,
    ) -> Result<Arc<dyn BlockTemplate>, MiningError> {
        let mut args = Vec::with_capacity(17);
        args.push(options.use_mempool as u8);
        args.extend_from_slice(&(options.block_reserved_weight as u64).to_le_bytes());
        args.extend_from_slice(
            &(options.coinbase_output_max_additional_sigops as u64).to_le_bytes(),
        );
        let payload = self.conn.call(METHOD_CREATE_NEW_BLOCK, &args)?;
        if payload.len() != 8 {
            return Err(MiningError::Unavailable("short createNewBlock reply".into()));
        }
        let handle = u64::from_le_bytes(payload.try_into().expect("checked length"));
        Ok(Arc::new(IpcBlockTemplate {
            handle,
            conn: self.conn.clone(),
        }))
    }
}

struct IpcBlockTemplate {
    handle: u64,
    conn: Arc<IpcConn>,
}

impl IpcBlockTemplate {
    fn call(&self, method: u8, extra: &[u8]) -> Result<Vec<u8>, MiningError> {
        let mut args = Vec::with_capacity(8 + extra.len());
        args.extend_from_slice(&self.handle.to_le_bytes());
        args.extend_from_slice(extra);
        self.conn.call(method, &args)
    }
}

impl BlockTemplate for IpcBlockTemplate {
    fn get_block(&self) -> Block {
        // A bridge that hands out a template handle and then cannot
        // serve its block is broken beyond recovery for this session; the
        // update thread treats template errors as upstream failures
        // before ever calling this.
        let payload = self
            .call(METHOD_GET_BLOCK, &[])
            .unwrap_or_default();
        consensus::deserialize(&payload).unwrap_or_else(|_| Block {
            header: bitcoin::block::Header {
                version: bitcoin::block::Version::from_consensus(0),
                prev_blockhash: BlockHash::from_byte_array([0; 32]),
                merkle_root: bitcoin::TxMerkleNode::from_byte_array([0; 32]),
                time: 0,
                bits: bitcoin::CompactTarget::from_consensus(0),
                nonce: 0,
            },
            txdata: Vec::new(),
        })
    }

    fn get_tx_fees(&self) -> Vec<i64> {
        let payload = match self.call(METHOD_GET_TX_FEES, &[]) {
            Ok(payload) => payload,
            Err(_) => return Vec::new(),
        };
        let mut reader = Reader::new(&payload);
        let count = match reader.read_u32() {
            Ok(count) => count,
            Err(_) => return Vec::new(),
        };
        let mut fees = Vec::with_capacity(count.min(100_000) as usize);
        for _ in 0..count {
            match reader.read_u64() {
                Ok(fee) => fees.push(fee as i64),
                Err(_) => break,
            }
        }
        fees
    }

    fn get_coinbase_merkle_path(&self) -> Vec<[u8; 32]> {
        let payload = match self.call(METHOD_GET_MERKLE_PATH, &[]) {
            Ok(payload) => payload,
            Err(_) => return Vec::new(),
        };
        let mut reader = Reader::new(&payload);
        let count = match reader.read_u8() {
            Ok(count) => count,
            Err(_) => return Vec::new(),
        };
        let mut path = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match reader.read_bytes(32) {
                Ok(hash) => {
                    let mut raw = [0u8; 32];
                    raw.copy_from_slice(hash);
                    path.push(raw);
                }
                Err(_) => break,
            }
        }
        path
    }

    fn wait_next(&self, options: BlockWaitOptions) -> Option<Arc<dyn BlockTemplate>> {
        let mut extra = Vec::with_capacity(16);
        let timeout_ms = u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX);
        extra.extend_from_slice(&timeout_ms.to_le_bytes());
        extra.extend_from_slice(&options.fee_threshold.to_le_bytes());
        let payload = self.call(METHOD_WAIT_NEXT, &extra).ok()?;

        let mut reader = Reader::new(&payload);
        if !reader.read_bool().ok()? {
            return None;
        }
        let handle = reader.read_u64().ok()?;
        Some(Arc::new(IpcBlockTemplate {
            handle,
            conn: self.conn.clone(),
        }))
    }

    fn submit_solution(
        &self,
        version: u32,
        header_timestamp: u32,
        header_nonce: u32,
        coinbase_tx: Vec<u8>,
    ) -> bool {
        let mut extra = Vec::with_capacity(16 + coinbase_tx.len());
        extra.extend_from_slice(&version.to_le_bytes());
        extra.extend_from_slice(&header_timestamp.to_le_bytes());
        extra.extend_from_slice(&header_nonce.to_le_bytes());
        extra.extend_from_slice(&(coinbase_tx.len() as u32).to_le_bytes());
        extra.extend_from_slice(&coinbase_tx);
        match self.call(METHOD_SUBMIT_SOLUTION, &extra) {
            Ok(payload) => payload.first() == Some(&1),
            Err(_) => false,
        }
    }
}

impl Drop for IpcBlockTemplate {
    fn drop(&mut self) {
        let _ = self.call(METHOD_DESTROY_TEMPLATE, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use std::os::unix::net::UnixListener;

    // Minimal one-connection bridge answering GET_TIP and IS_IBD.
    fn serve_one(listener: UnixListener, tip: [u8; 32], height: u32) {
        let (mut stream, _) = listener.accept().unwrap();
        loop {
            let mut len_bytes = [0u8; 4];
            if stream.read_exact(&mut len_bytes).is_err() {
                return;
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).unwrap();

            let mut reply = vec![0u8];
            match body[0] {
                METHOD_IS_IBD => reply.push(0),
                METHOD_GET_TIP => {
                    reply.push(1);
                    reply.extend_from_slice(&tip);
                    reply.extend_from_slice(&height.to_le_bytes());
                }
                _ => reply[0] = 1,
            }
            let mut frame = (reply.len() as u32).to_le_bytes().to_vec();
            frame.extend_from_slice(&reply);
            stream.write_all(&frame).unwrap();
        }
    }

    #[test]
    fn get_tip_round_trip() {
        let dir = std::env::temp_dir().join(format!("sv2-tp-ipc-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let socket = dir.join("node.sock");
        let _ = std::fs::remove_file(&socket);
        let listener = UnixListener::bind(&socket).unwrap();

        let tip = [0x5au8; 32];
        let server = std::thread::spawn(move || serve_one(listener, tip, 812_345));

        let mining = connect("unix", &dir).unwrap();
        assert!(!mining.is_initial_block_download());
        let block_ref = mining.get_tip().unwrap();
        assert_eq!(block_ref.hash, BlockHash::from_byte_array(tip));
        assert_eq!(block_ref.height, 812_345);

        drop(mining);
        let _ = server.join();
        let _ = std::fs::remove_file(&socket);
    }

    #[test]
    fn unsupported_address_is_rejected() {
        assert!(matches!(
            connect("tcp://127.0.0.1", Path::new(".")),
            Err(Error::BadCliArgs(_))
        ));
    }
}
