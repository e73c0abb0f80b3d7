//! End-to-end tests: a real `Sv2TemplateProvider` on a loopback listener,
//! driven by a client built from the repo's own initiator-side transport.

use codec_sv2::{Initiator, Sv2NetMsg, Sv2Transport};
use const_sv2::{
    MESSAGE_TYPE_COINBASE_OUTPUT_CONSTRAINTS, MESSAGE_TYPE_NEW_TEMPLATE,
    MESSAGE_TYPE_REQUEST_TRANSACTION_DATA, MESSAGE_TYPE_SETUP_CONNECTION,
    MESSAGE_TYPE_SETUP_CONNECTION_ERROR, MESSAGE_TYPE_SETUP_CONNECTION_SUCCESS,
    MESSAGE_TYPE_SET_NEW_PREV_HASH, MESSAGE_TYPE_SUBMIT_SOLUTION,
};
use bitcoin::hashes::Hash;
use binary_sv2::{to_bytes, Decodable};
use common_messages_sv2::SetupConnectionSuccess;
use std::{
    io::{Read, Write},
    net::TcpStream,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::{Duration, Instant},
};
use template_distribution_sv2::{
    NewTemplate, RequestTransactionData, RequestTransactionDataError,
    RequestTransactionDataSuccess, SetNewPrevHash, SubmitSolution,
};
use template_provider::{
    mining::mock::MockMining, mining::Mining, Sv2TemplateProvider, Sv2TemplateProviderOptions,
};

static TEST_SEQ: AtomicU64 = AtomicU64::new(0);

fn test_datadir(tag: &str) -> PathBuf {
    let seq = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "sv2-tp-test-{}-{}-{}",
        tag,
        std::process::id(),
        seq
    ))
}

fn test_options(tag: &str) -> Sv2TemplateProviderOptions {
    Sv2TemplateProviderOptions {
        host: "127.0.0.1".to_string(),
        port: 0,
        fee_check_interval: Duration::from_secs(1),
        fee_delta: 1000,
        max_peers: 8,
        datadir: test_datadir(tag),
        cert_validity: None,
        is_test: true,
    }
}

/// The SetupConnection a stock mining client sends.
const SETUP_CONNECTION_BYTES: [u8; 82] = [
    0x02, 0x02, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x30, 0x2e, 0x30, 0x2e, 0x30,
    0x2e, 0x30, 0x61, 0x21, 0x07, 0x42, 0x69, 0x74, 0x6d, 0x61, 0x69, 0x6e, 0x08, 0x53, 0x39,
    0x69, 0x20, 0x31, 0x33, 0x2e, 0x35, 0x1c, 0x62, 0x72, 0x61, 0x69, 0x69, 0x6e, 0x73, 0x2d,
    0x6f, 0x73, 0x2d, 0x32, 0x30, 0x31, 0x38, 0x2d, 0x30, 0x39, 0x2d, 0x32, 0x32, 0x2d, 0x31,
    0x2d, 0x68, 0x61, 0x73, 0x68, 0x10, 0x73, 0x6f, 0x6d, 0x65, 0x2d, 0x64, 0x65, 0x76, 0x69,
    0x63, 0x65, 0x2d, 0x75, 0x75, 0x69, 0x64,
];

struct TestPeer {
    stream: TcpStream,
    transport: Sv2Transport,
}

impl TestPeer {
    /// Connects and completes the noise handshake against the provider.
    fn connect(tp: &Sv2TemplateProvider) -> Self {
        let addr = tp.local_addr().expect("provider is started");
        let stream = TcpStream::connect(addr).expect("connect to provider");
        stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .expect("set read timeout");

        let initiator = Initiator::new(
            noise_sv2::generate_key(),
            Some(tp.authority_pubkey()),
        );
        let transport = Sv2Transport::new_initiator(initiator).expect("initiator transport");

        let mut peer = Self { stream, transport };
        peer.flush();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !peer.transport.ready() {
            assert!(Instant::now() < deadline, "handshake timed out");
            peer.pump().expect("handshake transport error");
        }
        // Handshake message 3 is queued by the transport; push it out.
        peer.flush();
        peer
    }

    /// Like `connect` but expecting the handshake to fail.
    fn connect_expect_handshake_failure(tp: &Sv2TemplateProvider) -> codec_sv2::Error {
        let addr = tp.local_addr().expect("provider is started");
        let stream = TcpStream::connect(addr).expect("connect to provider");
        stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .expect("set read timeout");

        let initiator = Initiator::new(
            noise_sv2::generate_key(),
            Some(tp.authority_pubkey()),
        );
        let transport = Sv2Transport::new_initiator(initiator).expect("initiator transport");
        let mut peer = Self { stream, transport };
        peer.flush();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            assert!(Instant::now() < deadline, "expected handshake failure");
            match peer.pump() {
                Ok(()) => assert!(!peer.transport.ready(), "handshake unexpectedly succeeded"),
                Err(e) => return e,
            }
        }
    }

    /// Writes every byte the transport has queued.
    fn flush(&mut self) {
        loop {
            let (bytes, more) = self.transport.get_bytes_to_send(false);
            if bytes.is_empty() {
                break;
            }
            self.stream.write_all(bytes).expect("socket write");
            let n = bytes.len();
            self.transport.mark_bytes_sent(n);
            if !more {
                break;
            }
        }
    }

    /// One read from the socket into the transport.
    fn pump(&mut self) -> Result<(), codec_sv2::Error> {
        let mut buf = [0u8; 4096];
        match self.stream.read(&mut buf) {
            Ok(0) => panic!("provider closed the connection"),
            Ok(n) => self.transport.received_bytes(&buf[..n]).map(|_| ()),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(())
            }
            Err(e) => panic!("socket read failed: {}", e),
        }
    }

    fn send(&mut self, msg_type: u8, payload: Vec<u8>) {
        let msg = Sv2NetMsg::new(msg_type, payload);
        assert!(self.transport.set_message_to_send(&msg), "transport busy");
        self.flush();
    }

    /// Next message within `timeout`; panics if none arrives.
    fn recv(&mut self, timeout: Duration) -> Sv2NetMsg {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.transport.get_received_message() {
                return msg;
            }
            assert!(Instant::now() < deadline, "timed out waiting for a message");
            self.pump().expect("transport error");
        }
    }

    /// Asserts nothing arrives for `window`.
    fn expect_quiet(&mut self, window: Duration) {
        let deadline = Instant::now() + window;
        while Instant::now() < deadline {
            self.pump().expect("transport error");
            if let Some(msg) = self.transport.get_received_message() {
                panic!("unexpected message type 0x{:02x}", msg.msg_type);
            }
        }
    }

    /// Waits for the connection to be closed by the provider.
    fn expect_disconnect(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 4096];
        loop {
            assert!(Instant::now() < deadline, "expected a disconnect");
            match self.stream.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => {
                    // Flushed error messages may still arrive first.
                    let _ = self.transport.received_bytes(&buf[..n]);
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(_) => return,
            }
        }
    }

    /// Runs SetupConnection + CoinbaseOutputConstraints and returns the
    /// initial template pair.
    fn subscribe(&mut self) -> (NewTemplate, SetNewPrevHash) {
        self.send(MESSAGE_TYPE_SETUP_CONNECTION, SETUP_CONNECTION_BYTES.to_vec());
        let reply = self.recv(Duration::from_secs(5));
        assert_eq!(reply.msg_type, MESSAGE_TYPE_SETUP_CONNECTION_SUCCESS);
        let success = SetupConnectionSuccess::from_bytes(&reply.payload).unwrap();
        assert_eq!(success.used_version, 2);

        // max_additional_size = 1, max_sigops = 0
        self.send(
            MESSAGE_TYPE_COINBASE_OUTPUT_CONSTRAINTS,
            vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00],
        );

        let first = self.recv(Duration::from_secs(5));
        assert_eq!(first.msg_type, MESSAGE_TYPE_NEW_TEMPLATE);
        let new_template = NewTemplate::from_bytes(&first.payload).unwrap();
        assert!(new_template.future_template);

        let second = self.recv(Duration::from_secs(5));
        assert_eq!(second.msg_type, MESSAGE_TYPE_SET_NEW_PREV_HASH);
        let prev_hash = SetNewPrevHash::from_bytes(&second.payload).unwrap();
        assert_eq!(prev_hash.template_id, new_template.template_id);

        (new_template, prev_hash)
    }

    /// Receives the NewTemplate + SetNewPrevHash pair a tip change causes.
    fn recv_template_pair(&mut self) -> (NewTemplate, SetNewPrevHash) {
        let first = self.recv(Duration::from_secs(5));
        assert_eq!(first.msg_type, MESSAGE_TYPE_NEW_TEMPLATE);
        let new_template = NewTemplate::from_bytes(&first.payload).unwrap();
        let second = self.recv(Duration::from_secs(5));
        assert_eq!(second.msg_type, MESSAGE_TYPE_SET_NEW_PREV_HASH);
        let prev_hash = SetNewPrevHash::from_bytes(&second.payload).unwrap();
        assert_eq!(prev_hash.template_id, new_template.template_id);
        (new_template, prev_hash)
    }
}

fn start_provider(tag: &str) -> (Sv2TemplateProvider, MockMining) {
    start_provider_with(test_options(tag))
}

fn start_provider_with(
    options: Sv2TemplateProviderOptions,
) -> (Sv2TemplateProvider, MockMining) {
    let mock = MockMining::new();
    let mut tp =
        Sv2TemplateProvider::new(Arc::new(mock.clone()), options).expect("construct provider");
    tp.start().expect("start provider");
    (tp, mock)
}

#[test]
fn setup_and_initial_template() {
    let (tp, mock) = start_provider("setup");
    let mut peer = TestPeer::connect(&tp);

    let (new_template, prev_hash) = peer.subscribe();
    assert!(new_template.template_id > 0);
    // Coinbase-only template: empty merkle path, one required output.
    assert!(new_template.merkle_path.is_empty());
    assert_eq!(new_template.coinbase_tx_outputs_count, 1);
    assert_eq!(
        prev_hash.prev_hash.to_bytes(),
        mock.get_tip().unwrap().hash.to_byte_array()
    );
    assert_eq!(tp.template_count(), 1);
}

#[test]
fn expired_certificate_aborts_before_setup() {
    let mut options = test_options("expired-cert");
    options.cert_validity = Some(-1);
    let (tp, _mock) = start_provider_with(options);

    let error = TestPeer::connect_expect_handshake_failure(&tp);
    assert!(matches!(
        error,
        codec_sv2::Error::Noise(noise_sv2::Error::InvalidCertificate(_))
    ));
}

#[test]
fn submit_solution_reaches_the_node() {
    let (tp, mock) = start_provider("submit");
    let mut peer = TestPeer::connect(&tp);
    let (new_template, _) = peer.subscribe();

    // A minimal but well-formed coinbase so the solved-block archive can
    // deserialize it.
    let coinbase = bitcoin::Transaction {
        version: bitcoin::transaction::Version(2),
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: vec![bitcoin::TxIn {
            previous_output: bitcoin::OutPoint::null(),
            script_sig: bitcoin::ScriptBuf::new(),
            sequence: bitcoin::Sequence::MAX,
            witness: bitcoin::Witness::new(),
        }],
        output: vec![bitcoin::TxOut {
            value: bitcoin::Amount::from_sat(625_000_000),
            script_pubkey: bitcoin::ScriptBuf::new(),
        }],
    };
    let coinbase_bytes = bitcoin::consensus::serialize(&coinbase);

    let solution = SubmitSolution {
        template_id: new_template.template_id,
        version: 0x2000_0000,
        header_timestamp: 1_231_006_505,
        header_nonce: 0,
        coinbase_tx: coinbase_bytes.clone().try_into().unwrap(),
    };
    peer.send(MESSAGE_TYPE_SUBMIT_SOLUTION, to_bytes(&solution));

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let solutions = mock.solutions();
        if !solutions.is_empty() {
            assert_eq!(solutions.len(), 1);
            assert_eq!(solutions[0].version, 0x2000_0000);
            assert_eq!(solutions[0].header_timestamp, 1_231_006_505);
            assert_eq!(solutions[0].header_nonce, 0);
            assert_eq!(solutions[0].coinbase_tx, coinbase_bytes);
            break;
        }
        assert!(Instant::now() < deadline, "solution never reached the mock");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn tip_change_pushes_exactly_one_pair() {
    let (tp, mock) = start_provider("tip-change");
    let mut peer = TestPeer::connect(&tp);
    let (initial, _) = peer.subscribe();

    let new_tip = mock.trigger_new_tip();
    let (next, prev_hash) = peer.recv_template_pair();
    assert!(next.template_id > initial.template_id);
    assert!(next.future_template);
    assert_eq!(prev_hash.prev_hash.to_bytes(), new_tip.hash.to_byte_array());

    // Exactly one pair per tip change.
    peer.expect_quiet(Duration::from_millis(400));
    drop(tp);
}

#[test]
fn fee_delta_gates_template_updates() {
    let (tp, mock) = start_provider("fee-delta");
    let mut peer = TestPeer::connect(&tp);
    let (initial, _) = peer.subscribe();

    // 500 sat of new fees: below the 1000 sat delta, nothing is pushed.
    mock.trigger_fee_increase(1, 500);
    peer.expect_quiet(Duration::from_millis(400));

    // Another 600 sat crosses the threshold: one non-future NewTemplate,
    // no SetNewPrevHash.
    mock.trigger_fee_increase(1, 600);
    let update = peer.recv(Duration::from_secs(5));
    assert_eq!(update.msg_type, MESSAGE_TYPE_NEW_TEMPLATE);
    let update = NewTemplate::from_bytes(&update.payload).unwrap();
    assert!(update.template_id > initial.template_id);
    assert!(!update.future_template);
    // Two mempool transactions joined the template across the two bumps.
    assert_eq!(update.merkle_path.len(), 2);
    peer.expect_quiet(Duration::from_millis(400));
    drop(tp);
}

#[test]
fn request_transaction_data_success_and_errors() {
    let (tp, mock) = start_provider("req-tx-data");
    let mut peer = TestPeer::connect(&tp);
    let (initial, _) = peer.subscribe();

    // Grow the template so there is transaction data to request.
    mock.trigger_fee_increase(2, 600);
    let update = peer.recv(Duration::from_secs(5));
    assert_eq!(update.msg_type, MESSAGE_TYPE_NEW_TEMPLATE);
    let update = NewTemplate::from_bytes(&update.payload).unwrap();

    let request = RequestTransactionData {
        template_id: update.template_id,
    };
    peer.send(MESSAGE_TYPE_REQUEST_TRANSACTION_DATA, to_bytes(&request));
    let reply = peer.recv(Duration::from_secs(5));
    assert_eq!(
        reply.msg_type,
        const_sv2::MESSAGE_TYPE_REQUEST_TRANSACTION_DATA_SUCCESS
    );
    let success = RequestTransactionDataSuccess::from_bytes(&reply.payload).unwrap();
    assert_eq!(success.template_id, update.template_id);
    assert_eq!(success.transaction_list.len(), 2);
    // The witness reserved value rides along as excess data.
    assert_eq!(success.excess_data.len(), 32);

    // Unknown id.
    let request = RequestTransactionData { template_id: 9999 };
    peer.send(MESSAGE_TYPE_REQUEST_TRANSACTION_DATA, to_bytes(&request));
    let reply = peer.recv(Duration::from_secs(5));
    assert_eq!(
        reply.msg_type,
        const_sv2::MESSAGE_TYPE_REQUEST_TRANSACTION_DATA_ERROR
    );
    let error = RequestTransactionDataError::from_bytes(&reply.payload).unwrap();
    assert_eq!(error.error_code.as_utf8_or_hex(), "template-id-not-found");

    // Stale id: ask for the pre-tip-change template after the tip moved.
    mock.trigger_new_tip();
    let _pair = peer.recv_template_pair();
    let request = RequestTransactionData {
        template_id: initial.template_id,
    };
    peer.send(MESSAGE_TYPE_REQUEST_TRANSACTION_DATA, to_bytes(&request));
    let reply = peer.recv(Duration::from_secs(5));
    assert_eq!(
        reply.msg_type,
        const_sv2::MESSAGE_TYPE_REQUEST_TRANSACTION_DATA_ERROR
    );
    let error = RequestTransactionDataError::from_bytes(&reply.payload).unwrap();
    assert_eq!(error.error_code.as_utf8_or_hex(), "stale-template-id");
    drop(tp);
}

#[test]
fn constraints_before_setup_is_rejected() {
    let (tp, _mock) = start_provider("out-of-order");
    let mut peer = TestPeer::connect(&tp);

    peer.send(
        MESSAGE_TYPE_COINBASE_OUTPUT_CONSTRAINTS,
        vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00],
    );
    let reply = peer.recv(Duration::from_secs(5));
    assert_eq!(reply.msg_type, MESSAGE_TYPE_SETUP_CONNECTION_ERROR);
    peer.expect_disconnect(Duration::from_secs(5));
}

#[test]
fn provider_construction_and_teardown_is_repeatable() {
    // Repeated start/handshake/stop must not leak threads or sockets to
    // the point of failing later runs.
    for round in 0..3 {
        let (mut tp, _mock) = start_provider(&format!("lifecycle-{}", round));
        let mut peer = TestPeer::connect(&tp);
        let _ = peer.subscribe();
        tp.interrupt();
        tp.stop_threads();
    }
}

#[test]
fn authority_key_persists_across_restarts() {
    let options = test_options("key-persist");
    let datadir = options.datadir.clone();

    let (tp1, _mock1) = start_provider_with(options);
    let key1 = tp1.authority_pubkey();
    drop(tp1);

    let mut options = test_options("key-persist-2");
    options.datadir = datadir;
    let (tp2, _mock2) = start_provider_with(options);
    assert_eq!(key1, tp2.authority_pubkey());
}
