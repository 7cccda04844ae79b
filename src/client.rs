//! Client side of the line protocol, used by the miner, the sync task and the CLI.

use crate::blockchain::{Block, WalletInfo};
use crate::error::{ChainError, Result};
use crate::protocol::{self, Command, CHAIN_EMPTY, OK, SUBMIT_PROMPT, SYNC_INITIATED};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens one connection per request against a node address.
#[derive(Debug, Clone)]
pub struct NodeClient {
    address: String,
    connect_timeout: Duration,
    response_timeout: Duration,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    response_timeout: Duration,
    address: String,
}

impl Connection {
    async fn send(&mut self, line: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next reply line; `error: ...` replies become [`ChainError::Remote`].
    async fn reply(&mut self) -> Result<String> {
        let line = timeout(self.response_timeout, protocol::read_line(&mut self.reader))
            .await
            .map_err(|_| ChainError::Timeout(format!("no reply from {}", self.address)))??
            .ok_or_else(|| ChainError::Network(format!("{} closed the connection", self.address)))?;

        match protocol::error_message(&line) {
            Some(message) => Err(ChainError::Remote(message.to_string())),
            None => Ok(line),
        }
    }
}

impl NodeClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: CONNECT_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, response: Duration) -> Self {
        self.connect_timeout = connect;
        self.response_timeout = response;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<Connection> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| ChainError::Timeout(format!("connecting to {}", self.address)))?
            .map_err(|e| ChainError::Network(format!("connect to {}: {}", self.address, e)))?;
        let (read, write) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(read),
            writer: write,
            response_timeout: self.response_timeout,
            address: self.address.clone(),
        })
    }

    /// Send one command and return its single reply line.
    pub async fn request(&self, command: &Command) -> Result<String> {
        let mut conn = self.connect().await?;
        conn.send(&command.to_string()).await?;
        conn.reply().await
    }

    async fn request_json<T: DeserializeOwned>(&self, command: &Command) -> Result<T> {
        let line = self.request(command).await?;
        Ok(serde_json::from_str(&line)?)
    }

    async fn expect_ok(&self, command: &Command) -> Result<()> {
        let line = self.request(command).await?;
        if line.trim() == OK {
            Ok(())
        } else {
            Err(ChainError::Protocol(format!("expected `ok`, got {:?}", line)))
        }
    }

    pub async fn get_height(&self) -> Result<u64> {
        let line = self.request(&Command::GetHeight).await?;
        line.trim()
            .parse()
            .map_err(|_| ChainError::Protocol(format!("height is not a number: {:?}", line)))
    }

    pub async fn get_latest_block(&self) -> Result<Block> {
        match self.request_json(&Command::GetLatestBlock).await {
            Err(ChainError::Remote(message)) if message == CHAIN_EMPTY => Err(ChainError::ChainEmpty),
            other => other,
        }
    }

    pub async fn get_blocks(&self, start: u64, end: u64) -> Result<Vec<Block>> {
        self.request_json(&Command::GetBlocks { start, end }).await
    }

    pub async fn get_chain(&self) -> Result<Vec<Block>> {
        self.request_json(&Command::GetChain).await
    }

    pub async fn get_peers(&self) -> Result<Vec<String>> {
        self.request_json(&Command::GetPeers).await
    }

    pub async fn get_wallet(&self, address: &str) -> Result<WalletInfo> {
        self.request_json(&Command::GetWallet(address.to_string())).await
    }

    pub async fn add_peer(&self, address: &str) -> Result<()> {
        self.expect_ok(&Command::AddPeer(address.to_string())).await
    }

    pub async fn remove_peer(&self, address: &str) -> Result<()> {
        self.expect_ok(&Command::RemovePeer(address.to_string())).await
    }

    pub async fn announce_miner(&self) -> Result<()> {
        self.expect_ok(&Command::MinerActive).await
    }

    pub async fn trigger_sync(&self) -> Result<()> {
        let line = self.request(&Command::Sync).await?;
        if line.trim() == SYNC_INITIATED {
            Ok(())
        } else {
            Err(ChainError::Protocol(format!("unexpected sync reply {:?}", line)))
        }
    }

    /// Two-step submission. A rejected block comes back as [`ChainError::Remote`].
    pub async fn submit_block(&self, block: &Block) -> Result<()> {
        let payload = serde_json::to_string(block)?;
        let mut conn = self.connect().await?;
        conn.send(&Command::SubmitBlock.to_string()).await?;

        let prompt = conn.reply().await?;
        if prompt.trim() != SUBMIT_PROMPT {
            return Err(ChainError::Protocol(format!(
                "expected submit prompt, got {:?}",
                prompt
            )));
        }

        conn.send(&payload).await?;
        let verdict = conn.reply().await?;
        if verdict.trim() == OK {
            Ok(())
        } else {
            Err(ChainError::Protocol(format!("unexpected submit reply {:?}", verdict)))
        }
    }
}
