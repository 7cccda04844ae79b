//! Shared helpers for the integration tests

#![allow(dead_code)]

use chrono::{DateTime, SecondsFormat};
use owonero::blockchain::{Block, Blockchain, GENESIS_TIMESTAMP};
use owonero::config::NodeConfig;
use owonero::miner::mine_block;
use owonero::node::{Node, NodeHandle};
use owonero::persistence::InMemoryPersistence;
use owonero::transaction::Transaction;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Extend `blocks` by `count` coinbase-only blocks mined at difficulty 1.
pub fn extend_chain(blocks: &mut Vec<Block>, count: usize, payout: &str) {
    let cancel = AtomicBool::new(false);
    for _ in 0..count {
        let prev = blocks.last().cloned().unwrap_or_else(Block::genesis);
        let candidate = Block::candidate(&prev, vec![Transaction::coinbase(payout, 50)]);
        let mined = mine_block(candidate, 1, 1000, |_| {}, &cancel).expect("nonce space exhausted");
        blocks.push(mined.block);
    }
}

/// Genesis plus `len - 1` mined blocks.
pub fn mined_chain(len: usize, payout: &str) -> Vec<Block> {
    let mut blocks = vec![Block::genesis()];
    extend_chain(&mut blocks, len.saturating_sub(1), payout);
    blocks
}

/// Genesis plus `len - 1` blocks stamped `gap_secs` apart, each mined at difficulty 1.
pub fn timed_chain(len: usize, gap_secs: i64, payout: &str) -> Vec<Block> {
    let cancel = AtomicBool::new(false);
    let start = DateTime::parse_from_rfc3339(GENESIS_TIMESTAMP).expect("genesis timestamp");
    let mut blocks = vec![Block::genesis()];
    for i in 1..len {
        let prev = blocks[i - 1].clone();
        let mut candidate = Block::candidate(&prev, vec![Transaction::coinbase(payout, 50)]);
        candidate.timestamp = (start + chrono::Duration::seconds(gap_secs * i as i64))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let mined = mine_block(candidate, 1, 1000, |_| {}, &cancel).expect("nonce space exhausted");
        blocks.push(mined.block);
    }
    blocks
}

pub fn test_config() -> NodeConfig {
    NodeConfig {
        listen: "127.0.0.1:0".to_string(),
        sync_on_startup: false,
        idle_timeout: Duration::from_secs(5),
        ..NodeConfig::default()
    }
}

/// Start a node on an ephemeral port over an in-memory ledger.
pub async fn start_node(blocks: Vec<Block>, peers: Vec<String>) -> Result<NodeHandle, Box<dyn std::error::Error>> {
    let mut chain = Blockchain::with_persistence(Box::new(InMemoryPersistence::with_blocks(blocks)));
    chain.load_or_init();
    let config = NodeConfig {
        peers,
        ..test_config()
    };
    Ok(Node::new(config, chain).start().await?)
}
