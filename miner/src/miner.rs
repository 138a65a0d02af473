//! Miner side of a pool connection.
//!
//! A connected [`Miner`] runs two tokio tasks over one [`MiningConn`]: the
//! receive duty services `MineRequest`s one at a time, the heartbeat duty
//! reports progress with `StatusUpdate`s while a request is being mined. They
//! share [`MinerState`], whose fields are individually atomic; no decision
//! ever needs more than one of them.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::{hash, stream, Message, MiningConn, StreamResult};
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::config::MinerConfig;

/// How often a mining miner reports its progress to the pool.
pub const HEARTBEAT_FREQ: Duration = Duration::from_millis(1000);

#[derive(Debug, Default)]
pub struct MinerState {
    is_shutdown: AtomicBool,
    mining: AtomicBool,
    /// nonces evaluated for the current mine request
    num_processed: AtomicU64,
    /// artificial delay spent on every nonce
    speed: Duration,
    // wakes duties waiting on I/O or the ticker once shutdown is requested
    shutdown_signal: CancellationToken,
}

impl MinerState {
    pub fn new(speed: Duration) -> Self {
        Self { speed, ..Default::default() }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }

    pub fn num_processed(&self) -> u64 {
        self.num_processed.load(Ordering::SeqCst)
    }

    /// Marks the miner as shut down. Only the first call has an effect; the
    /// duties notice the flag on their own and close the connection.
    pub fn shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            debug!("shutting down");
            self.shutdown_signal.cancel();
        }
    }

    async fn shutdown_requested(&self) {
        self.shutdown_signal.cancelled().await
    }

    /// Returns the nonce in `[lower, upper)` with the smallest digest, the
    /// lowest such nonce on ties, or `0` for an empty range. `num_processed`
    /// restarts at zero and is bumped for every evaluated nonce. CPU bound and
    /// not interrupted by shutdown.
    pub fn mine(&self, data: &str, lower: u64, upper: u64) -> u64 {
        self.search(lower, upper, |nonce| hash(data, nonce))
    }

    fn search(&self, lower: u64, upper: u64, digest: impl Fn(u64) -> u64) -> u64 {
        self.num_processed.store(0, Ordering::SeqCst);
        let mut best: Option<(u64, u64)> = None;

        for nonce in lower..upper {
            if !self.speed.is_zero() {
                std::thread::sleep(self.speed);
            }

            let value = digest(nonce);
            // strictly smaller only, the first nonce reaching the minimum wins
            if best.map_or(true, |(_, best_value)| value < best_value) {
                best = Some((nonce, value));
            }
            self.num_processed.fetch_add(1, Ordering::SeqCst);
        }

        best.map(|(nonce, _)| nonce).unwrap_or_default()
    }

    fn begin_mining(&self) {
        // reset before raising the flag so a heartbeat never reports the
        // previous request's count
        self.num_processed.store(0, Ordering::SeqCst);
        self.mining.store(true, Ordering::SeqCst);
    }

    fn end_mining(&self) {
        self.mining.store(false, Ordering::SeqCst);
    }
}

pub struct Miner {
    state: Arc<MinerState>,
    duties: Vec<JoinHandle<()>>,
}

impl Miner {
    /// Connects to `config.pool` and starts the receive and heartbeat duties.
    pub async fn connect(config: &MinerConfig) -> StreamResult<Self> {
        let state = Arc::new(MinerState::new(config.speed()));

        let conn = Arc::new(stream::connect_miner(config.pool.as_str()).await?);
        info!("connected to pool {}", conn.peer());

        let receiver = tokio::spawn(receive_from_pool(state.clone(), conn.clone()));
        let heartbeat = tokio::spawn(send_heartbeats(state.clone(), conn, config.heartbeat()));

        Ok(Self { state, duties: vec![receiver, heartbeat] })
    }

    pub fn state(&self) -> &Arc<MinerState> {
        &self.state
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.is_shutdown()
    }

    pub fn is_mining(&self) -> bool {
        self.state.is_mining()
    }

    pub fn num_processed(&self) -> u64 {
        self.state.num_processed()
    }

    pub fn mine(&self, data: &str, lower: u64, upper: u64) -> u64 {
        self.state.mine(data, lower, upper)
    }

    /// Requests shutdown and returns immediately.
    pub fn shutdown(&self) {
        self.state.shutdown()
    }

    /// Waits until both duties have exited.
    pub async fn closed(self) {
        for duty in self.duties {
            if let Err(err) = duty.await {
                error!("miner duty failed: {err}");
            }
        }
    }
}

async fn receive_from_pool(state: Arc<MinerState>, conn: Arc<MiningConn>) {
    loop {
        if state.is_shutdown() {
            conn.close().await;
            return;
        }

        let res = tokio::select! {
            res = conn.recv_msg() => res,
            _ = state.shutdown_requested() => continue,
        };

        let msg = match res {
            Ok(msg) => msg,
            Err(err) if err.is_transport() => {
                error!("lost connection to pool {}: {err}", conn.peer());
                conn.close().await;
                return;
            }
            Err(err) => {
                error!("received error {err} when processing pool {}", conn.peer());
                continue;
            }
        };

        let (data, lower, upper) = match msg {
            Message::MineRequest { data, lower, upper } => (data, lower, upper),
            Message::Error { data } => {
                warn!("pool {} reported an error: {data}", conn.peer());
                continue;
            }
            other => {
                error!(
                    "received unexpected message of type {:?} from pool {}",
                    other.msg_type(),
                    conn.peer()
                );
                continue;
            }
        };

        debug!("mine request [{lower}, {upper}) for `{data}`");

        let Some(nonce) = mine_in_background(&state, &data, lower, upper).await else {
            continue;
        };

        let proof = Message::proof_of_work(data.as_str(), nonce, hash(&data, nonce));
        if let Err(err) = conn.send_msg(&proof).await {
            if err.is_transport() {
                error!("lost connection to pool {}: {err}", conn.peer());
                conn.close().await;
                return;
            }
            error!("fail to send proof of work: {err}");
        }
    }
}

/// Runs the search on the blocking pool so the heartbeat task keeps ticking.
async fn mine_in_background(
    state: &Arc<MinerState>,
    data: &str,
    lower: u64,
    upper: u64,
) -> Option<u64> {
    state.begin_mining();

    let start = Instant::now();
    let worker = state.clone();
    let data = data.to_string();
    let res = tokio::task::spawn_blocking(move || worker.mine(&data, lower, upper)).await;

    state.end_mining();

    match res {
        Ok(nonce) => {
            let elapsed = start.elapsed().as_secs_f64();
            info!(
                "mined {} nonces in {elapsed:.2}s, best nonce: {nonce}",
                state.num_processed()
            );
            Some(nonce)
        }
        Err(err) => {
            error!("mining task failed: {err}");
            None
        }
    }
}

async fn send_heartbeats(state: Arc<MinerState>, conn: Arc<MiningConn>, freq: Duration) {
    let mut ticker = time::interval_at(Instant::now() + freq, freq);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = state.shutdown_requested() => {}
            _ = conn.closed() => {
                debug!("heartbeat stopped, connection to {} closed", conn.peer());
                return;
            }
            _ = ticker.tick() => {}
        }

        if state.is_shutdown() {
            conn.close().await;
            return;
        }

        if !state.is_mining() {
            continue;
        }

        let update = Message::status_update(state.num_processed());
        trace!("heartbeat: {update:?}");
        if let Err(err) = conn.send_msg(&update).await {
            if err.is_transport() {
                warn!("fail to send heartbeat to {}: {err}", conn.peer());
                conn.close().await;
                return;
            }
            error!("fail to send heartbeat: {err}");
        }
    }
}
