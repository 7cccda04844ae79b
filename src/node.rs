//! The node: line-protocol server plus the periodic sync task.

use crate::blockchain::Blockchain;
use crate::config::NodeConfig;
use crate::error::{ChainError, Result};
use crate::peers::PeerRegistry;
use crate::persistence::JsonFilePersistence;
use crate::protocol::{
    self, error_line, Command, BLOCK_VALIDATION_FAILED, CHAIN_EMPTY, INVALID_RANGE, OK,
    PEER_EXISTS, PEER_NOT_FOUND, SUBMIT_PROMPT, SYNC_INITIATED, WALLET_NOT_FOUND,
};
use crate::sync::{NodeSynchronizer, SyncState};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinSet;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Syncing,
    Ready,
    Degraded,
}

pub struct Node {
    pub config: NodeConfig,
    pub blockchain: Arc<RwLock<Blockchain>>,
    pub peers: Arc<PeerRegistry>,
    pub synchronizer: Arc<NodeSynchronizer>,
    pub state: Arc<RwLock<NodeState>>,
    sync_trigger: Notify,
}

/// A bound, running node. Dropping it aborts the node's tasks without
/// waiting for them; prefer [`NodeHandle::shutdown`].
pub struct NodeHandle {
    node: Arc<Node>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl NodeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Stop accepting, abort open connections and wait for every task.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                if e.is_panic() {
                    error!("Node task panicked: {}", e);
                }
            }
        }
        info!("Node on {} stopped", self.local_addr);
    }
}

impl Node {
    pub fn new(config: NodeConfig, blockchain: Blockchain) -> Self {
        let blockchain = Arc::new(RwLock::new(blockchain));
        let peers = Arc::new(PeerRegistry::with_peers(&config.peers));
        let synchronizer = Arc::new(NodeSynchronizer::new(
            blockchain.clone(),
            peers.clone(),
            config.target_block_time,
        ));
        Self {
            config,
            blockchain,
            peers,
            synchronizer,
            state: Arc::new(RwLock::new(NodeState::Booting)),
            sync_trigger: Notify::new(),
        }
    }

    /// Load (or create) the ledger file named in `config`.
    pub fn open(config: NodeConfig) -> Self {
        let persistence = JsonFilePersistence::new(&config.chain_file);
        let mut blockchain = Blockchain::with_persistence(Box::new(persistence));
        if !blockchain.load_or_init() {
            warn!("Genesis could not be persisted to {}", config.chain_file);
        }
        Self::new(config, blockchain)
    }

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    async fn set_state(&self, state: NodeState) {
        *self.state.write().await = state;
    }

    /// Bind `config.listen` and spawn the accept loop and the sync task.
    pub async fn start(self) -> Result<NodeHandle> {
        let listener = TcpListener::bind(&self.config.listen)
            .await
            .map_err(|e| ChainError::Network(format!("bind {}: {}", self.config.listen, e)))?;
        let local_addr = listener.local_addr()?;
        let node = Arc::new(self);
        {
            let chain = node.blockchain.read().await;
            info!(
                "Owonero node listening on {} (height {}, {} peers)",
                local_addr,
                chain.height(),
                node.peers.len()
            );
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        tasks.spawn(node.clone().accept_loop(listener, shutdown_rx.clone()));
        tasks.spawn(node.clone().sync_loop(shutdown_rx));

        Ok(NodeHandle {
            node,
            local_addr,
            shutdown,
            tasks,
        })
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Connection from {}", peer);
                        let node = self.clone();
                        connections.spawn(async move {
                            if let Err(e) = node.handle_connection(stream, peer).await {
                                debug!("Connection {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                Some(res) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = res {
                        if e.is_panic() {
                            error!("Connection handler panicked: {}", e);
                        }
                    }
                }
            }
        }
        connections.shutdown().await;
        drop(listener);
    }

    async fn sync_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.config.sync_on_startup {
            if !self.sync_or_shutdown(&mut shutdown).await {
                return;
            }
        } else {
            self.set_state(NodeState::Ready).await;
        }

        let period = self.config.sync_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
                _ = self.sync_trigger.notified() => {}
            }
            if !self.sync_or_shutdown(&mut shutdown).await {
                break;
            }
        }
    }

    /// Run one pass unless shutdown arrives first; `false` means stop.
    async fn sync_or_shutdown(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Sync pass abandoned for shutdown");
                false
            }
            _ = self.run_sync_pass() => true,
        }
    }

    async fn run_sync_pass(&self) {
        self.set_state(NodeState::Syncing).await;
        let outcome = self.synchronizer.sync_with_peers().await;
        let state = match outcome {
            SyncState::Failed => NodeState::Degraded,
            _ => NodeState::Ready,
        };
        self.set_state(state).await;
    }

    /// Wake the sync task; returns immediately.
    pub fn request_sync(&self) {
        self.sync_trigger.notify_one();
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let (read, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read);
        loop {
            let line = match timeout(self.config.idle_timeout, protocol::read_line(&mut reader)).await {
                Err(_) => {
                    debug!("Closing idle connection from {}", peer);
                    return Ok(());
                }
                Ok(read) => match read? {
                    Some(line) => line,
                    None => return Ok(()),
                },
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let reply = match Command::parse(line) {
                Ok(Command::SubmitBlock) => self.handle_submit(&mut reader, &mut writer).await?,
                Ok(command) => self.dispatch(command).await,
                Err(e) => e.reply(),
            };
            write_line(&mut writer, &reply).await?;
        }
    }

    /// Reply line for every single-step command.
    pub async fn dispatch(&self, command: Command) -> String {
        match command {
            Command::GetChain => {
                let chain = self.blockchain.read().await;
                to_json_line(&chain.blocks)
            }
            Command::GetLatestBlock => match self.blockchain.read().await.tip() {
                Some(block) => to_json_line(block),
                None => error_line(CHAIN_EMPTY),
            },
            Command::GetHeight => self.blockchain.read().await.height().to_string(),
            Command::GetBlocks { start, end } => {
                let blocks = self.blockchain.read().await.range(start, end);
                if blocks.is_empty() {
                    error_line(INVALID_RANGE)
                } else {
                    to_json_line(&blocks)
                }
            }
            Command::AddPeer(address) => {
                if self.peers.add(&address) {
                    info!("Added peer {}", address);
                    OK.to_string()
                } else {
                    error_line(PEER_EXISTS)
                }
            }
            Command::RemovePeer(address) => {
                if self.peers.remove(&address) {
                    info!("Removed peer {}", address);
                    OK.to_string()
                } else {
                    error_line(PEER_NOT_FOUND)
                }
            }
            Command::GetPeers => to_json_line(&self.peers.list()),
            Command::GetWallet(address) => match self.blockchain.read().await.wallet_info(&address) {
                Some(info) => to_json_line(&info),
                None => error_line(WALLET_NOT_FOUND),
            },
            Command::Sync => {
                self.request_sync();
                SYNC_INITIATED.to_string()
            }
            Command::MinerActive => {
                info!("Miner connected");
                OK.to_string()
            }
            Command::SubmitBlock => error_line("submitblock needs its own exchange"),
        }
    }

    async fn handle_submit<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_line(writer, SUBMIT_PROMPT).await?;
        let payload = match timeout(self.config.idle_timeout, protocol::read_line(reader)).await {
            Err(_) => return Err(ChainError::Timeout("waiting for block JSON".into())),
            Ok(read) => read?.ok_or_else(|| ChainError::Network("closed before block JSON".into()))?,
        };

        let block = match serde_json::from_str(payload.trim()) {
            Ok(block) => block,
            Err(e) => return Ok(error_line(&format!("invalid block json {}", e))),
        };
        Ok(self.submit_block(block).await)
    }

    /// Validate, append and persist under one write guard.
    pub async fn submit_block(&self, block: crate::blockchain::Block) -> String {
        let mut chain = self.blockchain.write().await;
        let difficulty = chain.get_dynamic_difficulty(self.config.target_block_time);
        let index = block.index;
        if !chain.add_block(block, difficulty) {
            return error_line(BLOCK_VALIDATION_FAILED);
        }
        chain.save();
        info!("Accepted block {} at difficulty {}", index, difficulty);
        OK.to_string()
    }
}

fn to_json_line<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| error_line(&format!("encoding reply: {}", e)))
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    let mut payload = Vec::with_capacity(line.len() + 1);
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}
