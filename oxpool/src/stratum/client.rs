//! Per-connection client engine.
//!
//! This module contains the protocol state machine and the task plumbing
//! around it. A [`Client`] is created per accepted connection and driven by
//! [`Client::run`], which spawns the reader, processor, sender and
//! hash-monitor tasks and joins them on shutdown.
//!
//! The client only moves forward: `authorized` and `subscribed` go from
//! false to true exactly once, and the sole exit from any state is
//! cancellation. Work notifications are withheld until both flags are set.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, trace, warn};

use super::connection::{MessageReader, MessageWriter};
use super::error::{ClientError, ClientResult};
use super::messages::{self, ErrorCode, Message, StratumErr};
use crate::chain::ChainParams;
use crate::difficulty::{self, DifficultyInfo};
use crate::miner::{Miner, EXTRA_NONCE2_SIZE};
use crate::store::{self, Account, AcceptedWork, Job, PoolStore, Share, StoreError};
use crate::work;

/// Rolling deadline applied before each socket read. A miner idle past
/// this is presumed dead and disconnected.
pub const READ_DEADLINE: Duration = Duration::from_secs(4 * 60);

/// Divisor converting a sampled submission count into seconds per share.
/// Fixed independently of the configured monitor period.
const HASH_CALC_THRESHOLD_SECS: u64 = 20;

/// Depth of the outgoing message queue between processor and sender.
const OUT_QUEUE_DEPTH: usize = 64;

/// Request classes understood by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterClass {
    /// Mining protocol requests.
    Pool,
    /// Admin API requests.
    Api,
}

/// Capabilities the pool injects into each client.
///
/// Everything a client needs from the wider pool passes through here, so
/// the engine has no globals and tests can substitute recordings. The
/// client never holds a reference back into the pool; on shutdown it
/// reports its own id through [`remove_client`](PoolHandle::remove_client)
/// and the pool drops whatever registration it kept.
#[async_trait]
pub trait PoolHandle: Send + Sync {
    /// Hardware variant served by the endpoint this client dialed.
    fn miner(&self) -> Miner;

    /// Current work template as a hex-encoded header, if the chain state
    /// has produced one yet.
    fn current_work(&self) -> Option<String>;

    /// Forward a solved-block submission to the consensus daemon.
    /// Returns whether the daemon accepted it.
    async fn submit_work(&self, submission: &str) -> anyhow::Result<bool>;

    /// Whether the given address is within its request limit.
    fn within_limit(&self, ip: &str, class: LimiterClass) -> bool;

    /// Forget the client registered under `id`.
    fn remove_client(&self, id: &str);
}

/// Per-connection configuration and injected collaborators.
#[derive(Clone)]
pub struct ClientConfig {
    /// Active network being mined on.
    pub active_net: Arc<ChainParams>,

    /// Record store for accounts, jobs, shares and accepted work.
    pub store: Arc<dyn PoolStore>,

    /// Pool-wide capabilities.
    pub pool: Arc<dyn PoolHandle>,

    /// Solo mining mode: usernames are plain names and no shares are
    /// recorded.
    pub solo_pool: bool,

    /// Padding appended to the serialized header in getwork submissions.
    pub header_pad: Vec<u8>,

    /// Expected header evaluations per traversal of the nonce space.
    pub nonce_iterations: f64,

    /// Difficulty targets for this client's miner class.
    pub difficulty_info: Arc<DifficultyInfo>,

    /// Seconds between hash-rate monitor ticks.
    pub hash_calc_threshold: u64,
}

/// Mutable client state, guarded as a single envelope.
struct ClientState {
    name: String,
    account: String,
    authorized: bool,
    subscribed: bool,
    hash_rate: BigRational,
    /// Outgoing request id to method. The protocol currently sends miners
    /// no id-bearing requests, so this only ever identifies stray
    /// responses.
    requests: HashMap<u64, String>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            name: String::new(),
            account: String::new(),
            authorized: false,
            subscribed: false,
            hash_rate: BigRational::zero(),
            requests: HashMap::new(),
        }
    }
}

struct ClientCore {
    id: String,
    addr: SocketAddr,
    extra_nonce1: String,
    cfg: ClientConfig,
    state: RwLock<ClientState>,
    submissions: AtomicU64,
    shutdown: CancellationToken,
    out_tx: mpsc::Sender<Message>,
}

/// A pool client connection.
///
/// Cheap to clone; all clones share the connection state. The pool
/// typically keeps one clone in its registry (for hash-rate queries and
/// forced disconnects) while the supervisor drives [`run`](Self::run).
#[derive(Clone)]
pub struct Client {
    core: Arc<ClientCore>,
    out_rx: Arc<Mutex<Option<mpsc::Receiver<Message>>>>,
}

impl Client {
    /// Create a client for an accepted connection.
    pub fn new(addr: SocketAddr, cfg: ClientConfig) -> Self {
        let extra_nonce1 = hex::encode(rand::random::<[u8; 4]>());
        let id = format!("{}/{}", extra_nonce1, cfg.pool.miner());
        let (out_tx, out_rx) = mpsc::channel(OUT_QUEUE_DEPTH);

        let core = Arc::new(ClientCore {
            id,
            addr,
            extra_nonce1,
            cfg,
            state: RwLock::new(ClientState::new()),
            submissions: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            out_tx,
        });
        Self {
            core,
            out_rx: Arc::new(Mutex::new(Some(out_rx))),
        }
    }

    /// The client id, `extraNonce1/miner`.
    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.core.addr
    }

    pub fn extra_nonce1(&self) -> &str {
        &self.core.extra_nonce1
    }

    pub fn is_authorized(&self) -> bool {
        self.core.state.read().authorized
    }

    pub fn is_subscribed(&self) -> bool {
        self.core.state.read().subscribed
    }

    /// Worker name supplied at authorization.
    pub fn name(&self) -> String {
        self.core.state.read().name.clone()
    }

    /// Account id the client authorized against; empty in solo mode.
    pub fn account(&self) -> String {
        self.core.state.read().account.clone()
    }

    /// Smoothed hash-rate estimate.
    pub fn hash_rate(&self) -> BigRational {
        self.core.state.read().hash_rate.clone()
    }

    /// Pool-accepted submissions since the monitor last sampled.
    pub fn submissions(&self) -> u64 {
        self.core.submissions.load(Ordering::Relaxed)
    }

    /// Terminate the connection.
    pub fn cancel(&self) {
        self.core.shutdown.cancel();
    }

    /// Drive the connection until it terminates.
    ///
    /// Spawns the reader, processor, sender and hash-monitor tasks, waits
    /// for all of them to finish, then reports the client id back to the
    /// pool for removal. Any task cancelling the shared token brings the
    /// rest down.
    pub async fn run<S>(&self, stream: S) -> ClientResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let out_rx = self
            .out_rx
            .lock()
            .take()
            .ok_or(ClientError::Disconnected)?;

        let (read_half, write_half) = tokio::io::split(stream);
        let (read_tx, read_rx) = mpsc::channel(1);

        let tracker = TaskTracker::new();
        tracker.spawn(read_loop(
            self.core.clone(),
            MessageReader::new(read_half),
            read_tx,
        ));
        tracker.spawn(process_loop(self.core.clone(), read_rx));
        tracker.spawn(send_loop(
            self.core.clone(),
            MessageWriter::new(write_half),
            out_rx,
        ));
        tracker.spawn(monitor_loop(self.core.clone()));
        tracker.close();
        tracker.wait().await;

        self.core.cfg.pool.remove_client(&self.core.id);
        trace!(client = %self.core.id, "connection terminated");
        Ok(())
    }
}

impl ClientCore {
    /// Method of a request previously sent to the miner, if any.
    fn stratum_method(&self, id: u64) -> Option<String> {
        self.state.read().requests.get(&id).cloned()
    }

    /// Queue a message for the sender, waiting for room. A send failure
    /// means the sender is gone and the connection is coming down.
    async fn enqueue(&self, msg: Message) {
        if self.out_tx.send(msg).await.is_err() {
            self.shutdown.cancel();
        }
    }

    async fn refuse_authorize(&self, id: u64) {
        let err = StratumErr::new(ErrorCode::Unknown, None);
        self.enqueue(messages::authorize_response(id, false, Some(err)))
            .await;
    }

    async fn refuse_subscribe(&self, id: u64) {
        let err = StratumErr::new(ErrorCode::Unknown, None);
        self.enqueue(messages::subscribe_error(id, err)).await;
    }

    async fn refuse_submit(&self, id: u64, kind: ErrorCode) {
        let err = StratumErr::new(kind, None);
        self.enqueue(messages::submit_response(id, false, Some(err)))
            .await;
    }

    /// Process a `mining.authorize` request.
    ///
    /// In pool mode the username is `address.clientid`; the address is
    /// resolved to an account, created on first sight. In solo mode the
    /// whole username is the client name and no account exists.
    async fn handle_authorize(&self, id: u64, params: &Value, allowed: bool) {
        if !allowed {
            error!(client = %self.id, "unable to process authorize request, limit reached");
            self.refuse_authorize(id).await;
            return;
        }

        let username = match messages::parse_authorize(params) {
            Ok(username) => username,
            Err(e) => {
                error!(client = %self.id, error = %e, "unable to parse authorize request");
                self.refuse_authorize(id).await;
                return;
            }
        };

        if self.cfg.solo_pool {
            self.state.write().name = username;
        } else {
            let parts: Vec<&str> = username.split('.').collect();
            if parts.len() != 2 {
                error!(
                    client = %self.id,
                    username = %username,
                    "invalid username format, expected `address.clientid`"
                );
                self.refuse_authorize(id).await;
                return;
            }
            let address = parts[0].trim();
            let name = parts[1].trim();

            let account_id = match store::account_id(address, &self.cfg.active_net) {
                Ok(account_id) => account_id,
                Err(e) => {
                    error!(client = %self.id, error = %e, "unable to generate account id");
                    self.refuse_authorize(id).await;
                    return;
                }
            };

            // A missing account is expected on first authorization.
            match self.cfg.store.fetch_account(&account_id) {
                Ok(_) | Err(StoreError::NotFound) => {}
                Err(e) => {
                    error!(client = %self.id, error = %e, "unable to fetch account");
                    self.refuse_authorize(id).await;
                    return;
                }
            }

            let account = Account::new(account_id.clone(), address.to_string());
            if let Err(e) = self.cfg.store.create_account(&account) {
                error!(client = %self.id, error = %e, "unable to persist account");
                self.refuse_authorize(id).await;
                return;
            }

            let mut state = self.state.write();
            state.account = account_id;
            state.name = name.to_string();
        }

        self.state.write().authorized = true;
        self.enqueue(messages::authorize_response(id, true, None))
            .await;
    }

    /// Process a `mining.subscribe` request.
    ///
    /// The extranonce fields in the response depend on the hardware: the
    /// Antminer DR3/DR5 and Whatsminer D1 ignore the advertised
    /// extranonce2 size and expect extranonce1 pre-padded into the space
    /// they will echo back.
    async fn handle_subscribe(&self, id: u64, params: &Value, allowed: bool) {
        if !allowed {
            error!(client = %self.id, "unable to process subscribe request, limit reached");
            self.refuse_subscribe(id).await;
            return;
        }

        let notify_id = match messages::parse_subscribe(params) {
            Ok((_, notify_id)) => notify_id,
            Err(e) => {
                error!(client = %self.id, error = %e, "unable to parse subscribe request");
                self.refuse_subscribe(id).await;
                return;
            }
        };
        let notify_id = notify_id.unwrap_or_else(|| format!("mn{}", self.extra_nonce1));

        let resp = match self.cfg.pool.miner() {
            Miner::AntminerDR3 | Miner::AntminerDR5 => {
                // The DR3 and DR5 use an 8-byte extranonce2 regardless of
                // the advertised size and append extranonce1 to it in
                // mining.submit, so extranonce1 is returned padded to the
                // combined width.
                let padded = format!("{}{}", "0".repeat(16), self.extra_nonce1);
                messages::subscribe_response(id, &notify_id, &padded, 8)
            }
            Miner::WhatsminerD1 => {
                // The D1 does the same with a 4-byte extranonce2.
                let padded = format!("{}{}", "0".repeat(8), self.extra_nonce1);
                messages::subscribe_response(id, &notify_id, &padded, EXTRA_NONCE2_SIZE)
            }
            _ => messages::subscribe_response(
                id,
                &notify_id,
                &self.extra_nonce1,
                EXTRA_NONCE2_SIZE,
            ),
        };

        self.enqueue(resp).await;
        self.state.write().subscribed = true;
    }

    /// Send the client its pool difficulty.
    async fn set_difficulty(&self) {
        let difficulty = self.cfg.difficulty_info.difficulty.clone();
        self.enqueue(messages::set_difficulty(&difficulty)).await;
    }

    /// Process a `mining.submit` request.
    ///
    /// The solved header is reconstructed from the stored job and checked
    /// against the pool target, then the network target. Meeting the pool
    /// target earns a weighted share; meeting the network target sends the
    /// block upstream.
    async fn handle_submit(&self, id: u64, params: &Value, allowed: bool) {
        if !allowed {
            error!(client = %self.id, "unable to process submit request, limit reached");
            self.refuse_submit(id, ErrorCode::Unknown).await;
            return;
        }

        let submit = match messages::parse_submit(params, self.cfg.pool.miner()) {
            Ok(submit) => submit,
            Err(e) => {
                error!(client = %self.id, error = %e, "unable to parse submit request");
                self.refuse_submit(id, ErrorCode::Unknown).await;
                return;
            }
        };

        let job = match self.cfg.store.fetch_job(&submit.job_id) {
            Ok(job) => job,
            Err(e) => {
                error!(client = %self.id, job = %submit.job_id, error = %e, "unable to fetch job");
                self.refuse_submit(id, ErrorCode::Unknown).await;
                return;
            }
        };

        let header = match work::solved_header(
            &job.header,
            &self.extra_nonce1,
            &submit.extra_nonce2,
            &submit.ntime,
            &submit.nonce,
            self.cfg.pool.miner(),
        ) {
            Ok(header) => header,
            Err(e) => {
                error!(client = %self.id, error = %e, "unable to reconstruct solved header");
                self.refuse_submit(id, ErrorCode::Unknown).await;
                return;
            }
        };

        let diff_info = &self.cfg.difficulty_info;
        let target_net = BigRational::from_integer(difficulty::compact_to_big(header.bits()));
        if !target_net.is_positive() {
            error!(client = %self.id, bits = header.bits(), "block target difficulty is too low");
            self.refuse_submit(id, ErrorCode::Unknown).await;
            return;
        }

        let hash = header.block_hash();
        let hash_target = BigRational::from_integer(BigInt::from(difficulty::hash_to_big(&hash)));

        let net_diff = diff_info.pow_limit.clone() / target_net.clone();
        trace!(
            client = %self.id,
            network_difficulty = net_diff.to_f64().unwrap_or_default(),
            pool_difficulty = diff_info.difficulty.to_f64().unwrap_or_default(),
            "checking submission"
        );

        // Work above the pool target earns nothing.
        if hash_target > diff_info.target {
            error!(
                client = %self.id,
                "submitted work is not less than its corresponding pool target"
            );
            self.refuse_submit(id, ErrorCode::LowDifficultyShare).await;
            return;
        }
        self.submissions.fetch_add(1, Ordering::Relaxed);

        if !self.cfg.solo_pool {
            if let Err(e) = self.claim_weighted_share() {
                error!(client = %self.id, error = %e, "failed to persist weighted share");
                self.refuse_submit(id, ErrorCode::Unknown).await;
                return;
            }
        }

        // Meets the pool target but not the network target: an ordinary
        // share, nothing to send upstream.
        if hash_target > target_net {
            trace!(
                client = %self.id,
                "submitted work is not less than the network target difficulty"
            );
            self.enqueue(messages::submit_response(id, true, None)).await;
            return;
        }

        let submission = match work::submission_hex(&header, &self.cfg.header_pad) {
            Ok(submission) => submission,
            Err(e) => {
                error!(client = %self.id, error = %e, "unable to assemble work submission");
                self.refuse_submit(id, ErrorCode::Unknown).await;
                return;
            }
        };
        let accepted = match self.cfg.pool.submit_work(&submission).await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(client = %self.id, error = %e, "unable to submit work upstream");
                self.refuse_submit(id, ErrorCode::Unknown).await;
                return;
            }
        };

        if accepted {
            let account = self.state.read().account.clone();
            let accepted_work = AcceptedWork::new(
                header.block_hash_hex(),
                header.prev_block_hex(),
                header.height(),
                account,
                self.cfg.pool.miner().to_string(),
            );
            match self.cfg.store.create_accepted_work(&accepted_work) {
                Ok(()) => {
                    trace!(
                        client = %self.id,
                        block = %accepted_work.block_hash,
                        "work accepted by the network"
                    );
                }
                Err(StoreError::Exists) => {
                    trace!(
                        client = %self.id,
                        block = %accepted_work.block_hash,
                        "work already exists, ignoring"
                    );
                    self.refuse_submit(id, ErrorCode::DuplicateShare).await;
                }
                Err(e) => {
                    error!(client = %self.id, error = %e, "unable to persist accepted work");
                    self.refuse_submit(id, ErrorCode::Unknown).await;
                }
            }
        } else {
            trace!(client = %self.id, "work rejected by the network");
            self.enqueue(messages::submit_response(id, false, None)).await;
        }
    }

    /// Record a weighted share against the client's account.
    fn claim_weighted_share(&self) -> Result<(), StoreError> {
        if self.cfg.active_net.is_mainnet() && self.cfg.pool.miner() == Miner::Cpu {
            error!(client = %self.id, "cpu miners are reserved for simnet testing, skipping share");
            return Ok(());
        }
        let weight = self.cfg.pool.miner().share_weight();
        let account = self.state.read().account.clone();
        self.cfg.store.create_share(&Share::new(account, weight))
    }

    /// Push a timestamp-rolled copy of the current work to the client.
    fn update_work(&self, allowed: bool) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        self.update_work_at(allowed, now);
    }

    fn update_work_at(&self, allowed: bool, now: u32) {
        let (authorized, subscribed) = {
            let state = self.state.read();
            (state.authorized, state.subscribed)
        };
        if !authorized || !subscribed {
            return;
        }
        if !allowed {
            return;
        }
        let Some(current_work) = self.cfg.pool.current_work() else {
            return;
        };
        if current_work.is_empty() {
            return;
        }

        let rolled = match work::roll_timestamp(&current_work, now) {
            Ok(rolled) => rolled,
            Err(e) => {
                error!(client = %self.id, error = %e, "unable to roll work timestamp");
                return;
            }
        };
        let fields = match work::split_work(&rolled) {
            Ok(fields) => fields,
            Err(e) => {
                error!(client = %self.id, error = %e, "unable to split work");
                return;
            }
        };

        let job = Job::new(rolled, fields.height);
        if let Err(e) = self.cfg.store.create_job(&job) {
            error!(client = %self.id, error = %e, "failed to persist job");
            return;
        }

        let notif = messages::work_notification(
            &job.uuid,
            &fields.prev_block,
            &fields.gen_tx1,
            &fields.gen_tx2,
            &fields.block_version,
            &fields.nbits,
            &fields.ntime,
            true,
        );
        match self.out_tx.try_send(notif) {
            Ok(()) => {
                trace!(
                    client = %self.id,
                    height = fields.height,
                    "sent a timestamp-rolled current work"
                );
            }
            // A stale update is dropped, never queued behind a backlog.
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Fold a computed rate into the smoothed estimate.
    fn set_hash_rate(&self, hash: BigRational) {
        let mut state = self.state.write();
        let sum = state.hash_rate.clone() + hash;
        state.hash_rate = sum / BigRational::from_integer(BigInt::from(2));
    }
}

/// Convert a sampled submission count into a hash-rate estimate:
/// `difficulty * nonce_iterations / (threshold / submissions)`.
fn compute_hash_rate(
    difficulty: &BigRational,
    nonce_iterations: f64,
    submissions: u64,
) -> BigRational {
    let iterations = BigRational::from_float(nonce_iterations).unwrap_or_else(BigRational::zero);
    let average = BigRational::new(
        BigInt::from(HASH_CALC_THRESHOLD_SECS),
        BigInt::from(submissions),
    );
    difficulty.clone() * iterations / average
}

/// Reader task: frames inbound lines under the rolling deadline and hands
/// decoded messages to the processor.
async fn read_loop<R>(
    core: Arc<ClientCore>,
    mut reader: MessageReader<R>,
    read_tx: mpsc::Sender<Message>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    loop {
        let read = tokio::select! {
            _ = core.shutdown.cancelled() => break,
            read = tokio::time::timeout(READ_DEADLINE, reader.read_message()) => read,
        };
        let msg = match read {
            Err(_) => {
                warn!(client = %core.id, "read timed out");
                break;
            }
            Ok(Err(e)) => {
                error!(client = %core.id, error = %e, "failed to read message");
                break;
            }
            Ok(Ok(None)) => {
                trace!(client = %core.id, "connection closed by miner");
                break;
            }
            Ok(Ok(Some(msg))) => msg,
        };

        tokio::select! {
            _ = core.shutdown.cancelled() => break,
            sent = read_tx.send(msg) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    core.shutdown.cancel();
}

/// Processor task: the protocol state machine.
async fn process_loop(core: Arc<ClientCore>, mut read_rx: mpsc::Receiver<Message>) {
    let ip = core.addr.ip().to_string();
    loop {
        let msg = tokio::select! {
            _ = core.shutdown.cancelled() => break,
            msg = read_rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let allowed = core.cfg.pool.within_limit(&ip, LimiterClass::Pool);
        match msg {
            Message::Request {
                id: Some(id),
                method,
                params,
            } => match method.as_str() {
                messages::AUTHORIZE => {
                    core.handle_authorize(id, &params, allowed).await;
                    core.set_difficulty().await;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    core.update_work(allowed);
                }
                messages::SUBSCRIBE => core.handle_subscribe(id, &params, allowed).await,
                messages::SUBMIT => {
                    core.handle_submit(id, &params, allowed).await;
                    core.update_work(allowed);
                }
                other => {
                    error!(client = %core.id, method = %other, "unknown request method");
                    core.shutdown.cancel();
                }
            },
            Message::Request { id: None, method, .. } => {
                error!(client = %core.id, method = %method, "unexpected notification from miner");
                core.shutdown.cancel();
            }
            Message::Response { id, .. } => {
                match core.stratum_method(id) {
                    Some(method) => {
                        error!(client = %core.id, method = %method, "unexpected response from miner");
                    }
                    None => {
                        error!(client = %core.id, msg_id = id, "no request found for response");
                    }
                }
                core.shutdown.cancel();
            }
        }
    }
}

/// Sender task: drains the outgoing queue, rewriting work notifications
/// for the connected hardware before they hit the wire.
async fn send_loop<W>(
    core: Arc<ClientCore>,
    mut writer: MessageWriter<W>,
    mut out_rx: mpsc::Receiver<Message>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let msg = tokio::select! {
            _ = core.shutdown.cancelled() => break,
            msg = out_rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let msg = match prepare_outgoing(&core, msg) {
            Ok(Some(msg)) => msg,
            Ok(None) => continue,
            Err(e) => {
                error!(client = %core.id, error = %e, "unable to rewrite work notification");
                core.shutdown.cancel();
                continue;
            }
        };

        if let Err(e) = writer.write_message(&msg).await {
            error!(client = %core.id, error = %e, "message encoding error");
            core.shutdown.cancel();
        }
    }
}

/// Gate and rewrite an outgoing message.
///
/// Work notifications are dropped until the client is both authorized and
/// subscribed, and are rewritten per miner variant. Everything else passes
/// through verbatim.
fn prepare_outgoing(core: &ClientCore, msg: Message) -> Result<Option<Message>, ClientError> {
    let is_notify = matches!(
        &msg,
        Message::Request { id: None, method, .. } if method.as_str() == messages::NOTIFY
    );
    if !is_notify {
        return Ok(Some(msg));
    }

    let (authorized, subscribed) = {
        let state = core.state.read();
        (state.authorized, state.subscribed)
    };
    if !authorized || !subscribed {
        return Ok(None);
    }

    let Message::Request { params, .. } = &msg else {
        return Ok(Some(msg));
    };
    match rewrite_notify(params, core.cfg.pool.miner())? {
        Some(rewritten) => Ok(Some(rewritten)),
        None => Ok(Some(msg)),
    }
}

/// Rewrite `mining.notify` params for the connected hardware.
///
/// Returns `None` when the variant takes the notification verbatim. The
/// Antminer DR3/DR5 and Innosilicon D9 want `nBits`/`nTime` big-endian
/// and the previous-block hash word-reversed; the Whatsminer D1 wants
/// only the word reversal.
fn rewrite_notify(params: &Value, miner: Miner) -> Result<Option<Message>, ClientError> {
    if !miner.swaps_prev_block_words() {
        return Ok(None);
    }

    let notify = messages::parse_work_notification(params).map_err(ClientError::InvalidMessage)?;
    let prev_block = work::reverse_prev_block_words(&notify.prev_block)?;
    let (nbits, ntime) = if miner.flips_notify_endianness() {
        (
            work::hex_reversed(&notify.nbits)?,
            work::hex_reversed(&notify.ntime)?,
        )
    } else {
        (notify.nbits.clone(), notify.ntime.clone())
    };

    Ok(Some(messages::work_notification(
        &notify.job_id,
        &prev_block,
        &notify.gen_tx1,
        &notify.gen_tx2,
        &notify.block_version,
        &nbits,
        &ntime,
        notify.clean_job,
    )))
}

/// Hash-monitor task: periodically converts the submission count into a
/// smoothed hash-rate estimate.
async fn monitor_loop(core: Arc<ClientCore>) {
    let period = Duration::from_secs(core.cfg.hash_calc_threshold);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = core.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let submissions = core.submissions.swap(0, Ordering::Relaxed);
                if submissions == 0 {
                    continue;
                }
                let hash = compute_hash_rate(
                    &core.cfg.difficulty_info.difficulty,
                    core.cfg.nonce_iterations,
                    submissions,
                );
                core.set_hash_rate(hash);
            }
        }
    }
}
