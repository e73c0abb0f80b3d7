//! The connection manager: accepts mining peers, drives every per-peer
//! session through its noise handshake and message lifecycle, and shuttles
//! messages between the sockets and the template-provider logic.
//!
//! All sockets and session state live on one dedicated OS thread
//! ("sv2-connman") running a current-thread tokio runtime; nothing here is
//! shared with other threads except the two channels: connection events
//! flow out to the update thread, template pushes flow in through the
//! bounded push queue.

use crate::{
    error::Error,
    messages::{ParseError, PeerMessage, TpMessage},
};
use codec_sv2::{Responder, Sv2NetMsg, Sv2Transport};
use common_messages_sv2::{Protocol, SetupConnectionError, SetupConnectionSuccess};
use const_sv2::SV2_PROTOCOL_VERSION;
use noise_sv2::Certificate;
use secp256k1::Keypair;
use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    io,
    net::SocketAddr,
    rc::Rc,
    time::Duration,
};
use template_distribution_sv2::{CoinbaseOutputConstraints, SubmitSolution};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Identifier of one accepted connection, unique per connman lifetime.
pub type ClientId = u64;

/// Largest read handed to the transport in one go.
const READ_CHUNK_SIZE: usize = 64 * 1024;
/// A peer whose pending outbound bytes exceed this is dropped as a slow
/// consumer; templates are never silently discarded for a live peer.
const MAX_SEND_BUFFER_SIZE: usize = 4 * 1024 * 1024;
/// A peer that has not completed the noise handshake within this long is
/// dropped.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the connection manager reports to the template-provider logic.
#[derive(Debug)]
pub enum ConnmanEvent {
    /// The peer finished `SetupConnection` + `CoinbaseOutputConstraints`
    /// and may now receive templates.
    Subscribed {
        client_id: ClientId,
        constraints: CoinbaseOutputConstraints,
    },
    RequestTransactionData {
        client_id: ClientId,
        template_id: u64,
    },
    SubmitSolution {
        client_id: ClientId,
        solution: SubmitSolution,
    },
    Disconnected {
        client_id: ClientId,
    },
}

/// One message addressed to one peer, queued by the update thread.
#[derive(Debug)]
pub struct PushMessage {
    pub client_id: ClientId,
    pub message: TpMessage,
}

pub struct ConnmanOptions {
    pub host: String,
    pub port: u16,
    pub max_peers: usize,
    pub static_key: Keypair,
    pub certificate: Certificate,
}

/// Handle to the reactor thread.
pub struct Sv2Connman {
    thread: Option<std::thread::JoinHandle<()>>,
    cancel: CancellationToken,
    local_addr: SocketAddr,
}

impl Sv2Connman {
    /// Binds the listener and spawns the reactor thread. Returns once the
    /// socket is bound (or failed to).
    pub fn start(
        options: ConnmanOptions,
        events: async_channel::Sender<ConnmanEvent>,
        push_queue: async_channel::Receiver<PushMessage>,
    ) -> Result<Self, Error> {
        let cancel = CancellationToken::new();
        let reactor_cancel = cancel.clone();
        let (bound_tx, bound_rx) = std::sync::mpsc::channel::<Result<SocketAddr, String>>();

        let thread = std::thread::Builder::new()
            .name("sv2-connman".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = bound_tx.send(Err(format!("cannot build reactor runtime: {}", e)));
                        return;
                    }
                };
                let local = task::LocalSet::new();
                local.block_on(&runtime, reactor(options, events, push_queue, reactor_cancel, bound_tx));
            })?;

        match bound_rx.recv() {
            Ok(Ok(local_addr)) => Ok(Self {
                thread: Some(thread),
                cancel,
                local_addr,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(Error::Bind(e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::Bind("reactor thread died during startup".into()))
            }
        }
    }

    /// Address the listener actually bound (relevant with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals shutdown; the reactor and every peer task wind down within
    /// one tick.
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    /// Joins the reactor thread. In-flight writes are abandoned.
    pub fn stop_threads(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Sv2Connman {
    fn drop(&mut self) {
        self.interrupt();
        self.stop_threads();
    }
}

type PeerMap = Rc<RefCell<HashMap<ClientId, mpsc::UnboundedSender<TpMessage>>>>;

async fn reactor(
    options: ConnmanOptions,
    events: async_channel::Sender<ConnmanEvent>,
    push_queue: async_channel::Receiver<PushMessage>,
    cancel: CancellationToken,
    bound_tx: std::sync::mpsc::Sender<Result<SocketAddr, String>>,
) {
    let listener = match TcpListener::bind((options.host.as_str(), options.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = bound_tx.send(Err(format!(
                "cannot bind {}:{}: {}",
                options.host, options.port, e
            )));
            return;
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            let _ = bound_tx.send(Err(format!("cannot read listener address: {}", e)));
            return;
        }
    };
    info!("Sv2 Template Provider listening on {}", local_addr);
    let _ = bound_tx.send(Ok(local_addr));

    let peers: PeerMap = Rc::new(RefCell::new(HashMap::new()));
    task::spawn_local(push_router(push_queue, peers.clone(), cancel.clone()));

    let mut next_id: ClientId = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                };
                if peers.borrow().len() >= options.max_peers {
                    warn!("dropping connection from {}: peer limit ({}) reached", peer_addr, options.max_peers);
                    continue;
                }
                next_id += 1;
                let id = next_id;
                debug!("New Sv2 client id={} from {}", id, peer_addr);

                let responder = Responder::new(options.static_key, options.certificate.clone());
                let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                peers.borrow_mut().insert(id, cmd_tx);

                let peers = peers.clone();
                let events = events.clone();
                let cancel = cancel.clone();
                task::spawn_local(async move {
                    let session = PeerSession::new(id, Sv2Transport::new_responder(responder));
                    client_task(session, stream, cmd_rx, events.clone(), cancel).await;
                    peers.borrow_mut().remove(&id);
                    debug!("Disconnecting client id={}", id);
                    let _ = events.try_send(ConnmanEvent::Disconnected { client_id: id });
                });
            }
        }
    }
}

/// Forwards pushes from the bounded cross-thread queue to the addressed
/// peer's own queue. Pushes for peers that disconnected meanwhile are
/// dropped here.
async fn push_router(
    push_queue: async_channel::Receiver<PushMessage>,
    peers: PeerMap,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            push = push_queue.recv() => {
                let push = match push {
                    Ok(push) => push,
                    Err(_) => break,
                };
                let sender = peers.borrow().get(&push.client_id).cloned();
                match sender {
                    Some(sender) => {
                        let _ = sender.send(push.message);
                    }
                    None => trace!(
                        "dropping push for departed client id={}",
                        push.client_id
                    ),
                }
            }
        }
    }
}

struct PeerSession {
    id: ClientId,
    transport: Sv2Transport,
    send_queue: VecDeque<TpMessage>,
    queued_bytes: usize,
    setup_received: bool,
    subscribed: bool,
    disconnect_after_flush: bool,
}

impl PeerSession {
    fn new(id: ClientId, transport: Sv2Transport) -> Self {
        Self {
            id,
            transport,
            send_queue: VecDeque::new(),
            queued_bytes: 0,
            setup_received: false,
            subscribed: false,
            disconnect_after_flush: false,
        }
    }

    fn push_msg(&mut self, msg: TpMessage) {
        self.queued_bytes += msg.payload_len();
        self.send_queue.push_back(msg);
    }

    fn pending_bytes(&self) -> usize {
        self.queued_bytes + self.transport.pending_send_len()
    }

    fn wants_write(&self) -> bool {
        self.transport.pending_send_len() > 0
            || (self.transport.ready() && !self.send_queue.is_empty())
    }

    fn flushed_out(&self) -> bool {
        self.disconnect_after_flush
            && self.send_queue.is_empty()
            && self.transport.pending_send_len() == 0
    }

    /// Feeds socket bytes into the transport and dispatches any complete
    /// messages. Returns false when the session must end.
    fn process_incoming(
        &mut self,
        data: &[u8],
        events: &async_channel::Sender<ConnmanEvent>,
    ) -> bool {
        let was_ready = self.transport.ready();
        match self.transport.received_bytes(data) {
            Ok(_) => {}
            Err(e) => {
                debug!("transport error from client id={}: {}", self.id, e);
                return false;
            }
        }
        if !was_ready && self.transport.ready() {
            debug!("Noise handshake complete, client id={}", self.id);
        }
        while let Some(msg) = self.transport.get_received_message() {
            if !self.handle_message(msg, events) {
                return false;
            }
        }
        true
    }

    /// The per-peer state machine of the Template Distribution protocol:
    /// `SetupConnection` must come first, `CoinbaseOutputConstraints`
    /// second; only then are data requests and solutions accepted.
    fn handle_message(
        &mut self,
        msg: Sv2NetMsg,
        events: &async_channel::Sender<ConnmanEvent>,
    ) -> bool {
        let parsed = match PeerMessage::parse(&msg) {
            Ok(parsed) => parsed,
            Err(ParseError::UnknownMessageType(t)) => {
                debug!("unknown message type 0x{:02x} from client id={}", t, self.id);
                return self.protocol_error("unexpected-message");
            }
            Err(ParseError::Decode(e)) => {
                debug!("undecodable message from client id={}: {}", self.id, e);
                return self.protocol_error("unexpected-message");
            }
        };

        match parsed {
            PeerMessage::SetupConnection(setup) => {
                if self.setup_received {
                    debug!("duplicate SetupConnection from client id={}", self.id);
                    return self.protocol_error("unexpected-message");
                }
                debug!("Received 0x00 {} from client id={}", setup, self.id);
                if setup.protocol != Protocol::TemplateDistributionProtocol {
                    return self.protocol_error("unsupported-protocol");
                }
                let used_version =
                    match setup.get_version(SV2_PROTOCOL_VERSION, SV2_PROTOCOL_VERSION) {
                        Some(version) => version,
                        None => return self.protocol_error("protocol-version-mismatch"),
                    };
                self.setup_received = true;
                debug!("Send 0x01 SetupConnection.Success to client id={}", self.id);
                self.push_msg(TpMessage::SetupConnectionSuccess(SetupConnectionSuccess {
                    used_version,
                    flags: 0,
                }));
                true
            }
            PeerMessage::CoinbaseOutputConstraints(constraints) => {
                if !self.setup_received {
                    debug!(
                        "CoinbaseOutputConstraints before SetupConnection, client id={}",
                        self.id
                    );
                    return self.protocol_error("unexpected-message");
                }
                debug!("Received 0x70 {} from client id={}", constraints, self.id);
                self.subscribed = true;
                let _ = events.try_send(ConnmanEvent::Subscribed {
                    client_id: self.id,
                    constraints,
                });
                true
            }
            PeerMessage::RequestTransactionData(request) => {
                if !self.subscribed {
                    return self.protocol_error("unexpected-message");
                }
                debug!("Received 0x73 {} from client id={}", request, self.id);
                let _ = events.try_send(ConnmanEvent::RequestTransactionData {
                    client_id: self.id,
                    template_id: request.template_id,
                });
                true
            }
            PeerMessage::SubmitSolution(solution) => {
                if !self.subscribed {
                    return self.protocol_error("unexpected-message");
                }
                debug!("Received 0x76 {} from client id={}", solution, self.id);
                let _ = events.try_send(ConnmanEvent::SubmitSolution {
                    client_id: self.id,
                    solution,
                });
                true
            }
        }
    }

    /// Queues a `SetupConnection.Error` while that is still meaningful to
    /// the peer, then schedules the disconnect. Post-subscription
    /// violations disconnect without a reply.
    fn protocol_error(&mut self, error_code: &str) -> bool {
        if !self.subscribed {
            if let Ok(error_code) = error_code.try_into() {
                self.push_msg(TpMessage::SetupConnectionError(SetupConnectionError {
                    flags: 0,
                    error_code,
                }));
                self.disconnect_after_flush = true;
                return true;
            }
        }
        false
    }

    /// Moves queued messages into the transport and transport bytes into
    /// the socket. Returns false on a write error.
    fn flush(&mut self, stream: &TcpStream) -> bool {
        if self.transport.ready() && self.transport.pending_send_len() == 0 {
            if let Some(next) = self.send_queue.front() {
                let net_msg = next.to_net_msg();
                if self.transport.set_message_to_send(&net_msg) {
                    let sent = self.send_queue.pop_front().expect("front exists");
                    self.queued_bytes -= sent.payload_len();
                } else {
                    debug!("transport refused message for client id={}", self.id);
                    return false;
                }
            }
        }

        let (bytes, _more) = self.transport.get_bytes_to_send(!self.send_queue.is_empty());
        if bytes.is_empty() {
            return true;
        }
        match stream.try_write(bytes) {
            Ok(n) => {
                self.transport.mark_bytes_sent(n);
                true
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(e) => {
                debug!("write error to client id={}: {}", self.id, e);
                false
            }
        }
    }
}

async fn client_task(
    mut session: PeerSession,
    stream: TcpStream,
    mut cmd_rx: mpsc::UnboundedReceiver<TpMessage>,
    events: async_channel::Sender<ConnmanEvent>,
    cancel: CancellationToken,
) {
    let handshake_deadline = tokio::time::Instant::now() + HANDSHAKE_TIMEOUT;
    let mut scratch = vec![0u8; READ_CHUNK_SIZE];

    loop {
        if session.flushed_out() {
            break;
        }
        let want_write = session.wants_write();

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(handshake_deadline), if !session.transport.ready() => {
                debug!("handshake timeout for client id={}", session.id);
                break;
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(msg) => session.push_msg(msg),
                    None => break,
                }
            }
            ready = stream.readable() => {
                if ready.is_err() {
                    break;
                }
                match stream.try_read(&mut scratch) {
                    Ok(0) => break,
                    Ok(n) => {
                        if !session.process_incoming(&scratch[..n], &events) {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        debug!("read error from client id={}: {}", session.id, e);
                        break;
                    }
                }
            }
            ready = stream.writable(), if want_write => {
                if ready.is_err() {
                    break;
                }
                if !session.flush(&stream) {
                    break;
                }
            }
        }

        if session.pending_bytes() > MAX_SEND_BUFFER_SIZE {
            warn!(
                "disconnecting slow consumer client id={} ({} bytes pending)",
                session.id,
                session.pending_bytes()
            );
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binary_sv2::to_bytes;
    use const_sv2::{
        MESSAGE_TYPE_COINBASE_OUTPUT_CONSTRAINTS, MESSAGE_TYPE_SETUP_CONNECTION,
    };
    use template_distribution_sv2::RequestTransactionDataSuccess;

    fn test_session() -> PeerSession {
        let authority = noise_sv2::generate_key();
        let responder = Responder::from_authority_kp(&authority, 3600);
        PeerSession::new(1, Sv2Transport::new_responder(responder))
    }

    fn setup_connection_msg() -> Sv2NetMsg {
        // protocol 2, versions 2..2, flags 1, empty strings, port 8442.
        let mut payload = vec![0x02, 0x02, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00];
        payload.push(0); // endpoint_host
        payload.extend_from_slice(&8442u16.to_le_bytes());
        payload.extend_from_slice(&[0, 0, 0, 0]); // vendor..device_id
        Sv2NetMsg::new(MESSAGE_TYPE_SETUP_CONNECTION, payload)
    }

    fn constraints_msg() -> Sv2NetMsg {
        Sv2NetMsg::new(
            MESSAGE_TYPE_COINBASE_OUTPUT_CONSTRAINTS,
            vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00],
        )
    }

    #[test]
    fn setup_then_constraints_subscribes() {
        let mut session = test_session();
        let (events_tx, events_rx) = async_channel::unbounded();

        assert!(session.handle_message(setup_connection_msg(), &events_tx));
        assert!(session.setup_received);
        assert!(!session.subscribed);
        // The success reply is queued for the peer.
        assert_eq!(session.send_queue.len(), 1);

        assert!(session.handle_message(constraints_msg(), &events_tx));
        assert!(session.subscribed);
        assert!(matches!(
            events_rx.try_recv(),
            Ok(ConnmanEvent::Subscribed { client_id: 1, .. })
        ));
    }

    #[test]
    fn constraints_before_setup_schedules_error_and_disconnect() {
        let mut session = test_session();
        let (events_tx, events_rx) = async_channel::unbounded();

        assert!(session.handle_message(constraints_msg(), &events_tx));
        assert!(session.disconnect_after_flush);
        assert!(!session.subscribed);
        assert!(events_rx.try_recv().is_err());
        assert!(matches!(
            session.send_queue.front(),
            Some(TpMessage::SetupConnectionError(_))
        ));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut session = test_session();
        let (events_tx, _events_rx) = async_channel::unbounded();

        let mut msg = setup_connection_msg();
        // min_version 3 is above what the provider speaks.
        msg.payload[1] = 0x03;
        msg.payload[3] = 0x03;
        assert!(session.handle_message(msg, &events_tx));
        assert!(!session.setup_received);
        assert!(session.disconnect_after_flush);
    }

    #[test]
    fn pending_byte_accounting_tracks_the_queue() {
        let mut session = test_session();

        // Roughly 1 MiB per queued reply; five of them cross the cap.
        let big = RequestTransactionDataSuccess {
            template_id: 1,
            excess_data: vec![0u8; 32].try_into().unwrap(),
            transaction_list: vec![binary_sv2::B016M::try_from(vec![0u8; 1_000_000]).unwrap()]
                .try_into()
                .unwrap(),
        };
        assert!(to_bytes(&big).len() > 1_000_000);

        for _ in 0..4 {
            session.push_msg(TpMessage::RequestTransactionDataSuccess(big.clone()));
        }
        assert!(session.pending_bytes() <= MAX_SEND_BUFFER_SIZE);
        session.push_msg(TpMessage::RequestTransactionDataSuccess(big));
        assert!(session.pending_bytes() > MAX_SEND_BUFFER_SIZE);
    }
}
