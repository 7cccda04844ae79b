//! Proof-of-work miner.
//!
//! Workers never touch a ledger directly. Each one fetches the tip from its
//! node over the wire protocol, searches nonces on the blocking pool and
//! submits the result back with `submitblock`.

use crate::blockchain::{dynamic_difficulty, Block};
use crate::client::NodeClient;
use crate::config::MinerConfig;
use crate::error::{ChainError, Result};
use crate::pow::{digest, proof_satisfied, CanonicalBlock, Scratchpad};
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval_at, sleep};
use tracing::{debug, error, info, warn};

/// Delay after the node could not be reached.
pub const FETCH_BACKOFF: Duration = Duration::from_secs(5);
/// Delay after the node answered with something unparseable.
pub const PARSE_BACKOFF: Duration = Duration::from_secs(2);
pub const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub block: Block,
    pub attempts: u64,
}

/// Search nonces from 0 upward until the hash meets `difficulty`.
///
/// `on_progress` receives attempt counts in batches of `report_every`, plus
/// the remainder when a block is found. `cancel` is polled at every batch;
/// `None` means the search was cancelled or the nonce space ran out.
pub fn mine_block<F>(
    mut block: Block,
    difficulty: u32,
    report_every: u64,
    mut on_progress: F,
    cancel: &AtomicBool,
) -> Option<MinedBlock>
where
    F: FnMut(u64),
{
    let pad = Scratchpad::for_block(&block);
    let canonical = CanonicalBlock::new(&block);
    let report_every = report_every.max(1);
    let mut pending = 0u64;
    let mut nonce = 0u64;

    loop {
        let hash = digest(&canonical.bytes_with_nonce(nonce), nonce, &pad);
        pending += 1;
        if proof_satisfied(&hash, difficulty) {
            on_progress(pending);
            block.nonce = nonce;
            block.hash = hash;
            return Some(MinedBlock {
                block,
                attempts: nonce + 1,
            });
        }
        if pending == report_every {
            on_progress(pending);
            pending = 0;
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
        }
        nonce = nonce.checked_add(1)?;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    FetchingTip,
    Searching,
    Submitting,
}

#[derive(Debug, Clone)]
pub struct MinerStats {
    pub total_attempts: u64,
    pub blocks_found: u64,
    pub blocks_rejected: u64,
    pub started: Instant,
}

impl MinerStats {
    fn new() -> Self {
        Self {
            total_attempts: 0,
            blocks_found: 0,
            blocks_rejected: 0,
            started: Instant::now(),
        }
    }

    /// Attempts per second since the miner started.
    pub fn hashrate(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.total_attempts as f64 / secs
        } else {
            0.0
        }
    }
}

enum Round {
    Accepted(u64),
    Rejected,
    Cancelled,
}

pub struct Miner {
    config: MinerConfig,
    client: NodeClient,
    stats: Mutex<MinerStats>,
    states: Mutex<Vec<WorkerState>>,
    cancel: AtomicBool,
    stop: watch::Sender<bool>,
}

impl Miner {
    pub fn new(config: MinerConfig) -> Result<Self> {
        if config.payout_address.trim().is_empty() {
            return Err(ChainError::Config("miner.payout_address must be set".into()));
        }
        if config.workers == 0 {
            return Err(ChainError::Config("miner.workers must be at least 1".into()));
        }
        let client = NodeClient::new(config.node_address.clone());
        let (stop, _) = watch::channel(false);
        Ok(Self {
            states: Mutex::new(vec![WorkerState::Idle; config.workers]),
            stats: Mutex::new(MinerStats::new()),
            cancel: AtomicBool::new(false),
            config,
            client,
            stop,
        })
    }

    pub fn with_client(mut self, client: NodeClient) -> Self {
        self.client = client;
        self
    }

    pub fn stats(&self) -> MinerStats {
        self.stats.lock().clone()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.states.lock().clone()
    }

    fn set_state(&self, worker: usize, state: WorkerState) {
        if let Some(slot) = self.states.lock().get_mut(worker) {
            *slot = state;
        }
    }

    fn record_attempts(&self, attempts: u64) {
        self.stats.lock().total_attempts += attempts;
    }

    fn halt(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.stop.send_replace(true);
    }

    fn halted(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn log_stats(&self) {
        let stats = self.stats();
        info!(
            "Hashrate {:.1} H/s, {} attempts, {} blocks found, {} rejected",
            stats.hashrate(),
            stats.total_attempts,
            stats.blocks_found,
            stats.blocks_rejected
        );
    }

    /// Mine until `shutdown` flips (or its sender goes away) or `max_blocks`
    /// blocks have been accepted. Every worker is awaited before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> MinerStats {
        info!(
            "Mining to {} via {} with {} workers",
            self.config.payout_address,
            self.client.address(),
            self.config.workers
        );
        if let Err(e) = self.client.announce_miner().await {
            debug!("Node did not acknowledge miner: {}", e);
        }

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            workers.spawn(self.clone().worker(id));
        }

        let mut report = interval_at(tokio::time::Instant::now() + STATS_INTERVAL, STATS_INTERVAL);
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Err(e)) if e.is_panic() => error!("Mining worker panicked: {}", e),
                    Some(_) => {}
                },
                _ = shutdown.changed() => {
                    info!("Stopping miner");
                    break;
                }
                _ = report.tick() => self.log_stats(),
            }
        }

        self.halt();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("Mining worker panicked: {}", e);
                }
            }
        }
        self.log_stats();
        self.stats()
    }

    async fn worker(self: Arc<Self>, id: usize) {
        let mut stop = self.stop.subscribe();
        while !self.halted() {
            match self.mine_round(id).await {
                Ok(Round::Accepted(index)) => {
                    let found = self.stats.lock().blocks_found;
                    info!("Worker {} mined block {} ({} total)", id, index, found);
                    if self.config.max_blocks > 0 && found >= self.config.max_blocks {
                        info!("Reached {} blocks, stopping", self.config.max_blocks);
                        self.halt();
                    }
                }
                Ok(Round::Rejected) => {}
                Ok(Round::Cancelled) => break,
                Err(e) => {
                    let backoff = if e.is_parse_error() {
                        PARSE_BACKOFF
                    } else {
                        FETCH_BACKOFF
                    };
                    warn!("Worker {}: {}; retrying in {:?}", id, e, backoff);
                    self.set_state(id, WorkerState::Idle);
                    tokio::select! {
                        _ = stop.changed() => break,
                        _ = sleep(backoff) => {}
                    }
                }
            }
        }
        self.set_state(id, WorkerState::Idle);
    }

    async fn mine_round(self: &Arc<Self>, id: usize) -> Result<Round> {
        self.set_state(id, WorkerState::FetchingTip);
        let tip = self.client.get_latest_block().await?;
        if tip.next_index().is_none() {
            return Err(ChainError::Protocol(format!("tip index {} has no successor", tip.index)));
        }
        let difficulty = self.fetch_difficulty(&tip).await;
        let candidate = Block::candidate(
            &tip,
            vec![Transaction::coinbase(
                self.config.payout_address.clone(),
                self.config.block_reward,
            )],
        );
        debug!(
            "Worker {} searching block {} at difficulty {}",
            id, candidate.index, difficulty
        );

        self.set_state(id, WorkerState::Searching);
        let miner = self.clone();
        let report_every = self.config.report_every;
        let mined = tokio::task::spawn_blocking(move || {
            mine_block(
                candidate,
                difficulty,
                report_every,
                |n| miner.record_attempts(n),
                &miner.cancel,
            )
        })
        .await
        .map_err(|e| ChainError::Worker(e.to_string()))?;

        let Some(mined) = mined else {
            return Ok(Round::Cancelled);
        };
        if self.halted() {
            return Ok(Round::Cancelled);
        }

        self.set_state(id, WorkerState::Submitting);
        let index = mined.block.index;
        match self.client.submit_block(&mined.block).await {
            Ok(()) => {
                self.stats.lock().blocks_found += 1;
                Ok(Round::Accepted(index))
            }
            Err(ChainError::Remote(reason)) => {
                warn!("Worker {}: block {} rejected: {}", id, index, reason);
                self.stats.lock().blocks_rejected += 1;
                Ok(Round::Rejected)
            }
            Err(e) => Err(e),
        }
    }

    /// Difficulty the node will demand for the block after `tip`.
    async fn fetch_difficulty(&self, tip: &Block) -> u32 {
        let target = self.config.target_block_time;
        let start = tip.index.saturating_sub(10);
        match self.client.get_blocks(start, tip.index).await {
            Ok(window) => dynamic_difficulty(&window, target),
            Err(e) => {
                warn!("Difficulty window unavailable ({}), using tip alone", e);
                dynamic_difficulty(std::slice::from_ref(tip), target)
            }
        }
    }
}
