//! Configuration management for Owonero

use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 6969;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub miner: MinerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_chain_file")]
    pub chain_file: String,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_sync_interval", deserialize_with = "duration_str::deserialize")]
    pub sync_interval: Duration,
    #[serde(default = "default_idle_timeout", deserialize_with = "duration_str::deserialize")]
    pub idle_timeout: Duration,
    #[serde(default = "default_true")]
    pub sync_on_startup: bool,
    #[serde(default = "default_target_block_time")]
    pub target_block_time: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            chain_file: default_chain_file(),
            peers: Vec::new(),
            sync_interval: default_sync_interval(),
            idle_timeout: default_idle_timeout(),
            sync_on_startup: true,
            target_block_time: default_target_block_time(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_node_address")]
    pub node_address: String,
    #[serde(default)]
    pub payout_address: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_report_every")]
    pub report_every: u64,
    #[serde(default = "default_block_reward")]
    pub block_reward: u64,
    /// Stop after this many accepted blocks; 0 mines forever.
    #[serde(default)]
    pub max_blocks: u64,
    /// Must equal the node's `target_block_time` or its blocks miss the required difficulty.
    #[serde(default = "default_target_block_time")]
    pub target_block_time: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            node_address: default_node_address(),
            payout_address: String::new(),
            workers: default_workers(),
            report_every: default_report_every(),
            block_reward: default_block_reward(),
            max_blocks: 0,
            target_block_time: default_target_block_time(),
        }
    }
}

/// Durations are written as `"5m"`, `"30s"`, `"1h 30m"`.
mod duration_str {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

impl Config {
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| ChainError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate critical values
    pub fn validate(&self) -> Result<()> {
        if self.node.chain_file.trim().is_empty() {
            return Err(ChainError::Config("node.chain_file must not be empty".into()));
        }
        if self.node.listen.trim().is_empty() {
            return Err(ChainError::Config("node.listen must not be empty".into()));
        }
        if self.node.sync_interval.is_zero() {
            return Err(ChainError::Config("node.sync_interval must be positive".into()));
        }
        if self.miner.workers == 0 {
            return Err(ChainError::Config("miner.workers must be at least 1".into()));
        }
        if self.node.target_block_time == 0 || self.miner.target_block_time == 0 {
            return Err(ChainError::Config("target_block_time must be positive".into()));
        }
        if self.miner.report_every == 0 {
            return Err(ChainError::Config("miner.report_every must be at least 1".into()));
        }
        Ok(())
    }
}

/// Load `path`, or defaults when it does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| ChainError::Config(format!("reading {}: {}", path.display(), e)))?;
    Config::from_toml(&raw)
}

fn default_listen() -> String {
    format!("0.0.0.0:{}", DEFAULT_PORT)
}

fn default_chain_file() -> String {
    "blockchain.json".to_string()
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_target_block_time() -> u64 {
    crate::blockchain::TARGET_BLOCK_TIME
}

fn default_node_address() -> String {
    format!("localhost:{}", DEFAULT_PORT)
}

fn default_workers() -> usize {
    1
}

fn default_report_every() -> u64 {
    1000
}

fn default_block_reward() -> u64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_config("/definitely/not/here/owonero.toml").unwrap();
        assert_eq!(config.node.listen, "0.0.0.0:6969");
        assert_eq!(config.node.chain_file, "blockchain.json");
        assert_eq!(config.node.sync_interval, Duration::from_secs(300));
        assert_eq!(config.node.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.miner.report_every, 1000);
        assert_eq!(config.miner.block_reward, 50);
        assert_eq!(config.miner.target_block_time, config.node.target_block_time);
    }

    #[test]
    fn test_miner_reads_target_block_time() {
        let config = Config::from_toml(
            r#"
            [node]
            target_block_time = 600

            [miner]
            payout_address = "OWOabc"
            target_block_time = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.node.target_block_time, 600);
        assert_eq!(config.miner.target_block_time, 600);
        assert!(Config::from_toml("[miner]\ntarget_block_time = 0\n").is_err());
    }

    #[test]
    fn test_parses_sections_and_durations() {
        let config = Config::from_toml(
            r#"
            [node]
            listen = "127.0.0.1:7000"
            peers = ["10.0.0.2:6969", "10.0.0.3:6969"]
            sync_interval = "90s"
            sync_on_startup = false

            [miner]
            payout_address = "OWOabc"
            workers = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.node.listen, "127.0.0.1:7000");
        assert_eq!(config.node.peers.len(), 2);
        assert_eq!(config.node.sync_interval, Duration::from_secs(90));
        assert!(!config.node.sync_on_startup);
        assert_eq!(config.node.chain_file, "blockchain.json");
        assert_eq!(config.miner.workers, 4);
        assert_eq!(config.miner.payout_address, "OWOabc");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_toml("[miner]\nworkers = 0\n").is_err());
        assert!(Config::from_toml("[node]\nchain_file = \"\"\n").is_err());
        assert!(Config::from_toml("[node]\nsync_interval = \"soon\"\n").is_err());
        assert!(matches!(
            Config::from_toml("this is = = not toml"),
            Err(ChainError::Config(_))
        ));
    }
}
