//! Node synchronization module for Owonero
//!
//! A sync pass walks the known peers, asks each for its height and pulls the
//! missing range from the first peer that is strictly taller. Every pulled
//! block is replayed through full validation, including proof-of-work at the
//! difficulty the local ledger derives for that position.

use crate::blockchain::Blockchain;
use crate::client::{NodeClient, CONNECT_TIMEOUT, RESPONSE_TIMEOUT};
use crate::error::{ChainError, Result};
use crate::peers::PeerRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Peer sync information
#[derive(Debug, Clone)]
pub struct PeerSyncInfo {
    pub address: String,
    pub height: u64,
    pub last_seen: Instant,
    pub blocks_received: u64,
    pub sync_failures: u32,
}

impl PeerSyncInfo {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            height: 0,
            last_seen: Instant::now(),
            blocks_received: 0,
            sync_failures: 0,
        }
    }

    /// Purely informational: unreliable peers are still tried.
    pub fn is_unreliable(&self) -> bool {
        self.sync_failures >= 3
    }
}

/// Sync statistics
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub total_blocks_synced: u64,
    pub passes: u64,
    pub failed_passes: u64,
    pub last_pass: Option<Instant>,
    pub last_pass_duration: Duration,
}

/// Sync state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    Synced,
    Failed,
}

/// What a single peer exchange achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSync {
    UpToDate { peer_height: u64 },
    Appended { blocks: u64, peer_height: u64 },
}

/// Node synchronizer
pub struct NodeSynchronizer {
    blockchain: Arc<RwLock<Blockchain>>,
    peers: Arc<PeerRegistry>,
    target_block_time: u64,
    connect_timeout: Duration,
    response_timeout: Duration,
    peer_info: RwLock<HashMap<String, PeerSyncInfo>>,
    sync_state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    /// Held for the whole pass so two passes never interleave.
    pass_guard: Mutex<()>,
}

impl NodeSynchronizer {
    pub fn new(
        blockchain: Arc<RwLock<Blockchain>>,
        peers: Arc<PeerRegistry>,
        target_block_time: u64,
    ) -> Self {
        Self {
            blockchain,
            peers,
            target_block_time,
            connect_timeout: CONNECT_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
            peer_info: RwLock::new(HashMap::new()),
            sync_state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            pass_guard: Mutex::new(()),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, response: Duration) -> Self {
        self.connect_timeout = connect;
        self.response_timeout = response;
        self
    }

    pub async fn get_sync_state(&self) -> SyncState {
        *self.sync_state.read().await
    }

    pub async fn is_syncing(&self) -> bool {
        self.get_sync_state().await == SyncState::Syncing
    }

    pub async fn get_stats(&self) -> SyncStats {
        self.stats.read().await.clone()
    }

    pub async fn get_peer_info(&self, address: &str) -> Option<PeerSyncInfo> {
        self.peer_info.read().await.get(address).cloned()
    }

    async fn set_sync_state(&self, state: SyncState) {
        *self.sync_state.write().await = state;
    }

    /// One pass over the known peers; stops at the first peer that is
    /// either shorter-or-equal or successfully pulled from.
    pub async fn sync_with_peers(&self) -> SyncState {
        let _pass = self.pass_guard.lock().await;
        let peers = self.peers.list();
        if peers.is_empty() {
            debug!("No peers available for sync");
            self.set_sync_state(SyncState::Idle).await;
            return SyncState::Idle;
        }

        self.set_sync_state(SyncState::Syncing).await;
        let started = Instant::now();
        let mut outcome = SyncState::Failed;

        for address in peers {
            info!("Syncing with peer {}", address);
            match self.sync_with_peer(&address).await {
                Ok(PeerSync::UpToDate { peer_height }) => {
                    debug!("Peer {} at height {}, nothing to pull", address, peer_height);
                    outcome = SyncState::Synced;
                    break;
                }
                Ok(PeerSync::Appended { blocks, peer_height }) => {
                    info!(
                        "Synced {} blocks from {} (peer height {})",
                        blocks, address, peer_height
                    );
                    outcome = SyncState::Synced;
                    break;
                }
                Err(e) => {
                    warn!("Failed to sync with {}: {}", address, e);
                    self.record_failure(&address).await;
                }
            }
        }

        {
            let mut stats = self.stats.write().await;
            stats.passes += 1;
            if outcome == SyncState::Failed {
                stats.failed_passes += 1;
            }
            stats.last_pass = Some(Instant::now());
            stats.last_pass_duration = started.elapsed();
        }
        self.set_sync_state(outcome).await;
        outcome
    }

    /// Pull everything `address` has beyond our tip.
    pub async fn sync_with_peer(&self, address: &str) -> Result<PeerSync> {
        let client = NodeClient::new(address).with_timeouts(self.connect_timeout, self.response_timeout);

        let peer_height = client.get_height().await?;
        self.record_height(address, peer_height).await;

        let local_height = self.blockchain.read().await.height();
        if peer_height <= local_height {
            return Ok(PeerSync::UpToDate { peer_height });
        }

        info!("Peer height: {}, local height: {}", peer_height, local_height);
        let blocks = client.get_blocks(local_height + 1, peer_height).await?;

        let (appended, rejected) = {
            let mut chain = self.blockchain.write().await;
            let mut appended = 0u64;
            let mut rejected = None;
            for block in blocks {
                let difficulty = chain.get_dynamic_difficulty(self.target_block_time);
                let index = block.index;
                if !chain.add_block(block, difficulty) {
                    rejected = Some(index);
                    break;
                }
                appended += 1;
            }
            if appended > 0 {
                chain.save();
            }
            (appended, rejected)
        };

        self.record_blocks(address, appended).await;

        match rejected {
            Some(index) => Err(ChainError::Protocol(format!(
                "peer {} sent invalid block {} after {} good ones",
                address, index, appended
            ))),
            None if appended == 0 => Err(ChainError::Protocol(format!(
                "peer {} claimed height {} but sent no blocks",
                address, peer_height
            ))),
            None => Ok(PeerSync::Appended {
                blocks: appended,
                peer_height,
            }),
        }
    }

    async fn record_height(&self, address: &str, height: u64) {
        let mut info = self.peer_info.write().await;
        let peer = info
            .entry(address.to_string())
            .or_insert_with(|| PeerSyncInfo::new(address));
        peer.height = height;
        peer.last_seen = Instant::now();
    }

    async fn record_blocks(&self, address: &str, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(peer) = self.peer_info.write().await.get_mut(address) {
            peer.blocks_received += count;
        }
        self.stats.write().await.total_blocks_synced += count;
    }

    async fn record_failure(&self, address: &str) {
        let mut info = self.peer_info.write().await;
        let peer = info
            .entry(address.to_string())
            .or_insert_with(|| PeerSyncInfo::new(address));
        peer.sync_failures += 1;
        if peer.is_unreliable() {
            warn!("Peer {} has failed {} sync attempts", address, peer.sync_failures);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synchronizer(peers: &[&str]) -> NodeSynchronizer {
        NodeSynchronizer::new(
            Arc::new(RwLock::new(Blockchain::new())),
            Arc::new(PeerRegistry::with_peers(peers)),
            30,
        )
        .with_timeouts(Duration::from_millis(500), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_no_peers_leaves_state_idle() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let sync = synchronizer(&[]);
            assert_eq!(sync.sync_with_peers().await, SyncState::Idle);
            assert_eq!(sync.get_stats().await.passes, 0);
        })
        .await
        .expect("test_no_peers_leaves_state_idle timed out");
    }

    #[tokio::test]
    async fn test_unreachable_peer_counts_failure() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap().to_string();
            drop(listener);

            let sync = synchronizer(&[addr.as_str()]);
            assert_eq!(sync.sync_with_peers().await, SyncState::Failed);
            assert_eq!(sync.get_sync_state().await, SyncState::Failed);

            let stats = sync.get_stats().await;
            assert_eq!(stats.passes, 1);
            assert_eq!(stats.failed_passes, 1);
            assert_eq!(sync.get_peer_info(&addr).await.unwrap().sync_failures, 1);
        })
        .await
        .expect("test_unreachable_peer_counts_failure timed out");
    }

    #[test]
    fn test_unreliable_threshold() {
        let mut info = PeerSyncInfo::new("a:1");
        info.sync_failures = 2;
        assert!(!info.is_unreliable());
        info.sync_failures = 3;
        assert!(info.is_unreliable());
    }
}
