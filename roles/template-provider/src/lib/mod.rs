//! # Stratum v2 Template Provider
//!
//! Serves block construction templates to mining clients over the
//! encrypted Sv2 Template Distribution protocol. Template data comes from
//! a bitcoin node through the [`mining::Mining`] capability handed in at
//! construction; connected peers get a fresh template whenever the chain
//! tip advances or mempool fees improve past the configured delta.
//!
//! Runtime shape: [`connman::Sv2Connman`] owns the sockets on its own
//! reactor thread; the update thread created by
//! [`Sv2TemplateProvider::start`] owns all calls into the node and decides
//! what to push to whom. The two meet at the bounded push queue and the
//! connection-event channel, nothing else is shared except the
//! [`template_cache::TemplateCache`].

pub mod coinbase;
pub mod config;
pub mod connman;
pub mod error;
pub mod logging;
pub mod messages;
pub mod mining;
pub mod node_ipc;
pub mod template_cache;

pub use config::{Sv2TemplateProviderOptions, TemplateProviderConfig};
pub use error::Error;

use connman::{ClientId, ConnmanEvent, ConnmanOptions, PushMessage, Sv2Connman};
use messages::TpMessage;
use mining::{BlockCreateOptions, BlockRef, BlockTemplate, BlockWaitOptions, Mining};
use template_cache::{CachedTemplate, TemplateCache};

use noise_sv2::{formats::EncodedPublicKey, formats::EncodedSecretKey, Certificate};
use secp256k1::{Keypair, XOnlyPublicKey};
use std::{
    collections::{HashMap, VecDeque},
    fs,
    net::SocketAddr,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use template_distribution_sv2::{
    CoinbaseOutputConstraints, RequestTransactionDataError, SubmitSolution,
};
use tracing::{debug, error, info, trace, warn};

/// Capacity of the update-thread → reactor push queue.
const PUSH_QUEUE_SIZE: usize = 1024;
/// Per-peer FIFO cap on cached templates.
const MAX_PENDING_TEMPLATES_PER_PEER: usize = 20;
/// Slice used for interruptible blocking waits.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// The daemon: key material, the connection manager and the update thread.
pub struct Sv2TemplateProvider {
    mining: Arc<dyn Mining>,
    options: Sv2TemplateProviderOptions,
    authority_pubkey: XOnlyPublicKey,
    static_key: Keypair,
    certificate: Certificate,
    cache: Arc<TemplateCache>,
    interrupt_flag: Arc<AtomicBool>,
    connman: Option<Sv2Connman>,
    update_thread: Option<std::thread::JoinHandle<()>>,
}

impl Sv2TemplateProvider {
    /// Loads (or creates) the authority key, generates the per-process
    /// static key and signs the certificate binding the two.
    pub fn new(
        mining: Arc<dyn Mining>,
        options: Sv2TemplateProviderOptions,
    ) -> Result<Self, Error> {
        fs::create_dir_all(&options.datadir)?;
        let authority_key = load_or_create_authority_key(&options.datadir)?;
        let authority_pubkey = authority_key.x_only_public_key().0;

        // The static key deliberately does not persist: a restart gets a
        // fresh identity, the certificate re-binds it to the authority.
        let static_key = noise_sv2::generate_key();

        let now = unix_now();
        let valid_from = now.saturating_sub(3600);
        let valid_to = match options.cert_validity {
            None => u32::MAX,
            Some(secs) => (now as i64 + secs).clamp(0, u32::MAX as i64) as u32,
        };
        let certificate = Certificate::sign(
            0,
            valid_from,
            valid_to,
            &static_key.x_only_public_key().0,
            &authority_key,
        );

        info!(
            "Static key: {}",
            EncodedPublicKey(static_key.x_only_public_key().0)
        );
        info!(
            "Template Provider authority key: {}",
            EncodedPublicKey(authority_pubkey)
        );
        trace!("Certificate valid_from={} valid_to={}", valid_from, valid_to);

        Ok(Self {
            mining,
            options,
            authority_pubkey,
            static_key,
            certificate,
            cache: Arc::new(TemplateCache::new()),
            interrupt_flag: Arc::new(AtomicBool::new(false)),
            connman: None,
            update_thread: None,
        })
    }

    /// Binds the listener and starts the reactor and update threads.
    pub fn start(&mut self) -> Result<(), Error> {
        let (events_tx, events_rx) = async_channel::unbounded();
        let (push_tx, push_rx) = async_channel::bounded(PUSH_QUEUE_SIZE);

        let connman = Sv2Connman::start(
            ConnmanOptions {
                host: self.options.host.clone(),
                port: self.options.port,
                max_peers: self.options.max_peers,
                static_key: self.static_key,
                certificate: self.certificate.clone(),
            },
            events_tx,
            push_rx,
        )?;

        let update = UpdateLoop {
            mining: self.mining.clone(),
            cache: self.cache.clone(),
            options: self.options.clone(),
            events: events_rx,
            push: push_tx,
            interrupt: self.interrupt_flag.clone(),
            clients: HashMap::new(),
            next_template_id: 0,
            last_tip: None,
        };
        self.update_thread = Some(
            std::thread::Builder::new()
                .name("sv2".to_string())
                .spawn(move || update.run())?,
        );
        self.connman = Some(connman);
        Ok(())
    }

    /// Address of the bound listener, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connman.as_ref().map(|c| c.local_addr())
    }

    pub fn authority_pubkey(&self) -> XOnlyPublicKey {
        self.authority_pubkey
    }

    /// Number of templates currently cached. Test hook.
    pub fn template_count(&self) -> usize {
        self.cache.len()
    }

    /// Signals both threads to wind down.
    pub fn interrupt(&self) {
        self.interrupt_flag.store(true, Ordering::Relaxed);
        if let Some(connman) = &self.connman {
            connman.interrupt();
        }
    }

    /// Joins both threads.
    pub fn stop_threads(&mut self) {
        if let Some(thread) = self.update_thread.take() {
            let _ = thread.join();
        }
        if let Some(mut connman) = self.connman.take() {
            connman.interrupt();
            connman.stop_threads();
        }
    }
}

impl Drop for Sv2TemplateProvider {
    fn drop(&mut self) {
        self.interrupt();
        self.stop_threads();
    }
}

fn unix_now() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0) as u32
}

/// Loads `<datadir>/sv2_authority.key`, creating it on first run. A
/// present-but-corrupt key file refuses to start rather than silently
/// rotating the authority identity.
fn load_or_create_authority_key(datadir: &Path) -> Result<Keypair, Error> {
    let path = datadir.join("sv2_authority.key");
    if path.exists() {
        let content = fs::read_to_string(&path)?;
        let secret: EncodedSecretKey = content.trim().parse()?;
        debug!("Reading cached authority key from {}", path.display());
        Ok(secret.keypair())
    } else {
        let keypair = noise_sv2::generate_key();
        let encoded = EncodedSecretKey(keypair.secret_key()).to_string();
        if let Err(e) = fs::write(&path, encoded + "\n") {
            // Not critical: the daemon runs, clients just have to learn a
            // new authority key after the next restart.
            error!("Error writing authority key to {}: {}", path.display(), e);
        } else {
            debug!("Generated authority key, saved to {}", path.display());
        }
        Ok(keypair)
    }
}

/// Fee-check interval timer, monotonic.
struct Timer {
    interval: Duration,
    last_triggered: Instant,
}

impl Timer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_triggered: Instant::now(),
        }
    }

    fn trigger(&mut self) -> bool {
        if self.last_triggered.elapsed() >= self.interval {
            self.last_triggered = Instant::now();
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.last_triggered = Instant::now();
    }
}

/// Per-peer bookkeeping on the update thread. The reactor owns the peer
/// itself; this side only knows the id.
struct ClientState {
    constraints: CoinbaseOutputConstraints,
    best_template_id: u64,
    pending_templates: VecDeque<u64>,
    last_fees: i64,
    last_prev_hash: Option<bitcoin::BlockHash>,
}

impl ClientState {
    fn new(constraints: CoinbaseOutputConstraints) -> Self {
        Self {
            constraints,
            best_template_id: 0,
            pending_templates: VecDeque::new(),
            last_fees: 0,
            last_prev_hash: None,
        }
    }
}

/// The "sv2" update thread: owns every call into the `Mining` capability
/// and all decisions about what to push to which peer.
struct UpdateLoop {
    mining: Arc<dyn Mining>,
    cache: Arc<TemplateCache>,
    options: Sv2TemplateProviderOptions,
    events: async_channel::Receiver<ConnmanEvent>,
    push: async_channel::Sender<PushMessage>,
    interrupt: Arc<AtomicBool>,
    clients: HashMap<ClientId, ClientState>,
    next_template_id: u64,
    last_tip: Option<BlockRef>,
}

impl UpdateLoop {
    fn run(mut self) {
        // Serving templates during initial block download would only
        // produce stale work.
        while !self.interrupted() && self.mining.is_initial_block_download() {
            trace!("Waiting to come out of IBD");
            self.sleep_interruptible(Duration::from_secs(1));
        }

        self.last_tip = self.mining.get_tip();
        let mut timer = Timer::new(self.options.fee_check_interval);

        while !self.interrupted() {
            self.drain_events();

            match self.last_tip {
                Some(tip) => {
                    if let Some(new_tip) = self.mining.wait_tip_changed(tip.hash, INTERRUPT_POLL)
                    {
                        if new_tip.hash != tip.hash {
                            self.on_tip_changed(new_tip);
                            timer.reset();
                        }
                    }
                }
                None => {
                    self.last_tip = self.mining.get_tip();
                    self.sleep_interruptible(INTERRUPT_POLL);
                }
            }

            // -sv2interval: between tip changes, fee improvements are only
            // surfaced every fee_check_interval.
            if self.options.is_test || timer.trigger() {
                self.fee_check();
            }

            let pruned = self.cache.prune();
            if pruned > 0 {
                debug!("Pruned {} stale block template(s)", pruned);
            }
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    fn sleep_interruptible(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.interrupted() && Instant::now() < deadline {
            std::thread::sleep(INTERRUPT_POLL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                ConnmanEvent::Subscribed {
                    client_id,
                    constraints,
                } => {
                    info!(
                        "Client id={} subscribed (max_additional_size={}, max_sigops={})",
                        client_id,
                        constraints.coinbase_output_max_additional_size,
                        constraints.coinbase_output_max_additional_sigops
                    );
                    self.clients
                        .insert(client_id, ClientState::new(constraints));
                    trace!("Generate initial block template for client id={}", client_id);
                    if let Some(template) = self.create_block_with_backoff(client_id) {
                        self.send_template(client_id, template, true);
                    }
                }
                ConnmanEvent::RequestTransactionData {
                    client_id,
                    template_id,
                } => self.handle_request_transaction_data(client_id, template_id),
                ConnmanEvent::SubmitSolution { client_id, solution } => {
                    debug!(
                        "SubmitSolution from client id={}: id={} version={} timestamp={} nonce={}",
                        client_id,
                        solution.template_id,
                        solution.version,
                        solution.header_timestamp,
                        solution.header_nonce
                    );
                    self.handle_submit_solution(solution);
                }
                ConnmanEvent::Disconnected { client_id } => {
                    self.clients.remove(&client_id);
                }
            }
        }
    }

    /// A new tip: every subscribed peer gets a fresh template pair.
    fn on_tip_changed(&mut self, new_tip: BlockRef) {
        info!("New chain tip: {} height={}", new_tip.hash, new_tip.height);
        self.last_tip = Some(new_tip);
        self.cache.set_best_prev_hash(new_tip.hash);

        let client_ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for client_id in client_ids {
            if let Some(template) = self.create_block_with_backoff(client_id) {
                self.send_template(client_id, template, true);
            }
        }
    }

    /// Timer-gated fee check: asks the node whether each peer's current
    /// template can be improved by at least the configured delta.
    fn fee_check(&mut self) {
        let client_ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for client_id in client_ids {
            let best_template_id = match self.clients.get(&client_id) {
                Some(state) if state.best_template_id != 0 => state.best_template_id,
                _ => continue,
            };
            let cached = match self.cache.get(best_template_id) {
                Some(cached) => cached,
                None => continue,
            };
            trace!(
                "Check for fees rising by {} sat, client id={}",
                self.options.fee_delta,
                client_id
            );
            let better = cached.template.wait_next(BlockWaitOptions {
                timeout: Duration::ZERO,
                fee_threshold: self.options.fee_delta,
            });
            let better = match better {
                Some(better) => better,
                None => continue,
            };

            let prev_hash = better.get_block().header.prev_blockhash;
            if Some(prev_hash) != self.last_tip.map(|t| t.hash) {
                // The tip moved under us; handle it as a tip change so
                // every peer gets exactly one template pair.
                if let Some(new_tip) = self.mining.get_tip() {
                    self.on_tip_changed(new_tip);
                }
                return;
            }
            trace!("Fees improved, client id={}", client_id);
            self.send_template(client_id, better, false);
        }
    }

    /// Assembles a template for one client's constraints, retrying with
    /// backoff on upstream failures. Peers keep their last template while
    /// the node is unavailable.
    fn create_block_with_backoff(&self, client_id: ClientId) -> Option<Arc<dyn BlockTemplate>> {
        let constraints = self.clients.get(&client_id)?.constraints;
        // The node reserves at least 2000 weight units for its own
        // scaffolding; client outputs come on top.
        let options = BlockCreateOptions {
            use_mempool: true,
            block_reserved_weight: 2000
                + constraints.coinbase_output_max_additional_size as usize * 4,
            coinbase_output_max_additional_sigops: constraints.coinbase_output_max_additional_sigops
                as usize,
        };

        let mut delay = Duration::from_millis(250);
        loop {
            if self.interrupted() {
                return None;
            }
            match self.mining.create_new_block(options) {
                Ok(template) => return Some(template),
                Err(e) => {
                    warn!("createNewBlock failed ({}), retrying in {:?}", e, delay);
                    self.sleep_interruptible(delay);
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
            }
        }
    }

    /// Caches a template and queues `NewTemplate` (and, for future
    /// templates, `SetNewPrevHash`, in that order) to one peer.
    fn send_template(
        &mut self,
        client_id: ClientId,
        template: Arc<dyn BlockTemplate>,
        future_template: bool,
    ) {
        let block = template.get_block();
        let prev_hash = block.header.prev_blockhash;
        let fees: i64 = template.get_tx_fees().iter().sum();

        self.next_template_id += 1;
        let template_id = self.next_template_id;

        // Cache before sending: a fast client may reference the template
        // before this function returns.
        self.cache.insert(
            template_id,
            CachedTemplate {
                template: template.clone(),
                prev_hash,
                fees,
            },
        );
        self.cache.set_best_prev_hash(prev_hash);

        let merkle_path = template.get_coinbase_merkle_path();
        let new_template =
            match coinbase::new_template_message(&block, template_id, future_template, &merkle_path)
            {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("cannot announce template id={}: {}", template_id, e);
                    self.cache.remove(template_id);
                    return;
                }
            };

        debug!(
            "Send 0x71 NewTemplate id={} future={} to client id={}",
            template_id, future_template, client_id
        );
        self.push_to(client_id, TpMessage::NewTemplate(new_template));
        if future_template {
            debug!("Send 0x72 SetNewPrevHash to client id={}", client_id);
            self.push_to(
                client_id,
                TpMessage::SetNewPrevHash(coinbase::set_new_prev_hash_message(&block, template_id)),
            );
        }
        debug!("Template {} includes {} sat in fees", template_id, fees);

        if let Some(state) = self.clients.get_mut(&client_id) {
            state.best_template_id = template_id;
            state.last_fees = fees;
            state.last_prev_hash = Some(prev_hash);
            state.pending_templates.push_back(template_id);
            if state.pending_templates.len() > MAX_PENDING_TEMPLATES_PER_PEER {
                if let Some(evicted) = state.pending_templates.pop_front() {
                    trace!("Evicting template id={} (per-peer cap)", evicted);
                    self.cache.remove(evicted);
                }
            }
        }
    }

    fn handle_request_transaction_data(&mut self, client_id: ClientId, template_id: u64) {
        let error = |code: &str| {
            TpMessage::RequestTransactionDataError(RequestTransactionDataError {
                template_id,
                error_code: code.try_into().expect("valid error code"),
            })
        };

        let cached = match self.cache.get(template_id) {
            Some(cached) => cached,
            None => {
                debug!(
                    "Send 0x75 RequestTransactionData.Error (template-id-not-found: {}) to client id={}",
                    template_id, client_id
                );
                self.push_to(client_id, error("template-id-not-found"));
                return;
            }
        };

        if Some(cached.prev_hash) != self.cache.best_prev_hash() {
            debug!(
                "Send 0x75 RequestTransactionData.Error (stale-template-id) to client id={}",
                client_id
            );
            self.push_to(client_id, error("stale-template-id"));
            return;
        }

        let block = cached.template.get_block();
        match coinbase::request_transaction_data_success(&block, template_id) {
            Ok(success) => {
                debug!(
                    "Send 0x74 RequestTransactionData.Success to client id={}",
                    client_id
                );
                self.push_to(client_id, TpMessage::RequestTransactionDataSuccess(success));
            }
            Err(e) => {
                warn!(
                    "cannot serialize transaction data for template id={}: {}",
                    template_id, e
                );
                self.push_to(client_id, error("template-id-not-found"));
            }
        }
    }

    /// Forwards a solution to the node. No reply either way; the pool
    /// watches block propagation out of band. The template stays cached:
    /// several devices may solve the same template and the runner-up block
    /// is worth keeping.
    fn handle_submit_solution(&mut self, solution: SubmitSolution) {
        let cached = match self.cache.get(solution.template_id) {
            Some(cached) => cached,
            None => {
                debug!(
                    "Template with id={} is no longer in cache",
                    solution.template_id
                );
                return;
            }
        };

        let coinbase_tx = solution.coinbase_tx.clone().into_vec();
        let accepted = cached.template.submit_solution(
            solution.version,
            solution.header_timestamp,
            solution.header_nonce,
            coinbase_tx.clone(),
        );

        // Archive the solved block for post-mortem inspection, whatever
        // the node said.
        match coinbase::solved_block(
            &cached.template.get_block(),
            solution.version,
            solution.header_timestamp,
            solution.header_nonce,
            &coinbase_tx,
        ) {
            Ok(block) => {
                let hash = block.block_hash();
                let path = self.options.datadir.join(format!("{}.dat", hash));
                match fs::write(&path, bitcoin::consensus::serialize(&block)) {
                    Ok(()) => debug!(
                        "Wrote block {} to {} (submitted={})",
                        hash,
                        path.display(),
                        accepted
                    ),
                    Err(e) => error!("Failed to write block {}: {}", hash, e),
                }
            }
            Err(e) => warn!("cannot reconstruct solved block: {}", e),
        }
    }

    /// Queues a message for one peer. A full queue drops the push with a
    /// warning; the peer's next rebuild supersedes it anyway.
    fn push_to(&self, client_id: ClientId, message: TpMessage) {
        match self.push.try_send(PushMessage { client_id, message }) {
            Ok(()) => {}
            Err(async_channel::TrySendError::Full(push)) => {
                warn!(
                    "push queue full, dropping {} for client id={}",
                    push.message, push.client_id
                );
            }
            Err(async_channel::TrySendError::Closed(_)) => {
                trace!("push queue closed, reactor is gone");
            }
        }
    }
}
