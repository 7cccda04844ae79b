use crate::blockchain::core::validation::{check_block, dynamic_difficulty};
use crate::error::ValidationError;
use crate::persistence::{InMemoryPersistence, Persistence};
use crate::pow::{calculate_hash, Scratchpad};
use crate::transaction::Transaction;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub const GENESIS_TIMESTAMP: &str = "2025-10-11T00:00:00Z";
pub const TARGET_BLOCK_TIME: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub prev_hash: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub nonce: u64,
}

impl Block {
    /// The fixed first block every node starts from.
    pub fn genesis() -> Self {
        let mut genesis = Block {
            index: 0,
            timestamp: GENESIS_TIMESTAMP.to_string(),
            transactions: vec![Transaction::new("genesis", "network", 0)],
            prev_hash: String::new(),
            hash: String::new(),
            nonce: 0,
        };
        genesis.hash = genesis.compute_hash();
        genesis
    }

    /// Index the next block must carry; `None` once the index space is exhausted.
    pub fn next_index(&self) -> Option<u64> {
        self.index.checked_add(1)
    }

    /// Unsealed successor of `prev`, stamped with the current UTC time.
    /// Past `u64::MAX` the index saturates, so the result never validates.
    pub fn candidate(prev: &Block, transactions: Vec<Transaction>) -> Self {
        Block {
            index: prev.index.saturating_add(1),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            transactions,
            prev_hash: prev.hash.clone(),
            hash: String::new(),
            nonce: 0,
        }
    }

    pub fn compute_hash(&self) -> String {
        calculate_hash(self, None)
    }

    pub fn compute_hash_with(&self, pad: &Scratchpad) -> String {
        calculate_hash(self, Some(pad))
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

pub struct Blockchain {
    pub blocks: Vec<Block>,
    persistence: Box<dyn Persistence>,
}

impl std::fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blockchain")
            .field("len", &self.blocks.len())
            .field("persistence", &self.persistence.describe())
            .finish()
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// In-memory ledger already holding the genesis block.
    pub fn new() -> Self {
        let mut chain = Self::with_persistence(Box::new(InMemoryPersistence::new()));
        chain.blocks.push(Block::genesis());
        chain
    }

    /// Empty ledger backed by `persistence`; call [`Blockchain::load_or_init`] next.
    pub fn with_persistence(persistence: Box<dyn Persistence>) -> Self {
        Self {
            blocks: Vec::new(),
            persistence,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Index of the tip; 0 for an empty ledger.
    pub fn height(&self) -> u64 {
        self.blocks.len().saturating_sub(1) as u64
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn get_block(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    /// Blocks `start..=end`; empty when the range is inverted or runs past the tip.
    pub fn range(&self, start: u64, end: u64) -> Vec<Block> {
        if start > end || end >= self.blocks.len() as u64 {
            return Vec::new();
        }
        self.blocks[start as usize..=end as usize].to_vec()
    }

    pub fn get_dynamic_difficulty(&self, target_block_secs: u64) -> u32 {
        dynamic_difficulty(&self.blocks, target_block_secs)
    }

    pub fn check_block(
        &self,
        block: &Block,
        difficulty: u32,
        skip_pow: bool,
    ) -> Result<(), ValidationError> {
        check_block(&self.blocks, block, difficulty, skip_pow)
    }

    pub fn validate_block(&self, block: &Block, difficulty: u32, skip_pow: bool) -> bool {
        match self.check_block(block, difficulty, skip_pow) {
            Ok(()) => true,
            Err(e) => {
                warn!("Block {} validation failed: {}", block.index, e);
                false
            }
        }
    }

    pub fn add_block(&mut self, block: Block, difficulty: u32) -> bool {
        self.add_block_skip_pow(block, difficulty, false)
    }

    /// Append with an explicit proof-of-work bypass for replaying mined history.
    pub fn add_block_skip_pow(&mut self, block: Block, difficulty: u32, skip_pow: bool) -> bool {
        if !self.validate_block(&block, difficulty, skip_pow) {
            return false;
        }
        self.blocks.push(block);
        true
    }

    /// Bootstrap from the persistence backend, falling back to genesis.
    ///
    /// Returns `false` only when a freshly synthesized genesis could not be
    /// written back.
    pub fn load_or_init(&mut self) -> bool {
        let source = self.persistence.describe();
        match self.persistence.load_chain() {
            Ok(Some(mut blocks)) if !blocks.is_empty() => {
                let mut corrected = 0usize;
                for block in blocks.iter_mut() {
                    let hash = block.compute_hash();
                    if hash != block.hash {
                        block.hash = hash;
                        corrected += 1;
                    }
                }
                if corrected > 0 {
                    warn!("Recomputed {} stale block hashes from {}", corrected, source);
                }
                info!("Loaded {} blocks from {}", blocks.len(), source);
                self.blocks = blocks;
                true
            }
            Ok(Some(_)) => {
                warn!("{} holds no blocks, starting from genesis", source);
                self.reset_to_genesis()
            }
            Ok(None) => {
                info!("No ledger at {}, creating genesis", source);
                self.reset_to_genesis()
            }
            Err(e) => {
                error!("Failed to load ledger from {}: {}", source, e);
                self.reset_to_genesis()
            }
        }
    }

    fn reset_to_genesis(&mut self) -> bool {
        self.blocks = vec![Block::genesis()];
        self.save()
    }

    pub fn save(&self) -> bool {
        match self.persistence.save_chain(&self.blocks) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save ledger to {}: {}", self.persistence.describe(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::proof_satisfied;

    fn mine(prev: &Block, timestamp: &str, difficulty: u32) -> Block {
        let mut block = Block::candidate(prev, vec![Transaction::coinbase("OWOtest", 50)]);
        block.timestamp = timestamp.to_string();
        let pad = Scratchpad::for_block(&block);
        loop {
            block.hash = block.compute_hash_with(&pad);
            if proof_satisfied(&block.hash, difficulty) {
                return block;
            }
            block.nonce += 1;
        }
    }

    #[test]
    fn test_genesis_block() {
        let chain = Blockchain::new();
        let genesis = chain.tip().unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.prev_hash, "");
        assert_eq!(genesis.hash, genesis.compute_hash());
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_genesis_validates_on_empty_ledger() {
        let chain = Blockchain::with_persistence(Box::new(InMemoryPersistence::new()));
        assert!(chain.validate_block(&Block::genesis(), 1, false));

        let mut bad = Block::genesis();
        bad.prev_hash = "00".into();
        assert_eq!(
            chain.check_block(&bad, 1, false),
            Err(ValidationError::GenesisPrevHash)
        );
    }

    #[test]
    fn test_append_mined_block() {
        let mut chain = Blockchain::new();
        let block = mine(chain.tip().unwrap(), "2025-10-11T00:01:00Z", 1);
        assert!(chain.add_block(block.clone(), 1));
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.tip().unwrap(), &block);
    }

    #[test]
    fn test_rejects_prev_hash_mismatch_without_mutation() {
        let mut chain = Blockchain::new();
        let mut block = mine(chain.tip().unwrap(), "2025-10-11T00:01:00Z", 0);
        block.prev_hash = "ff".repeat(32);
        block.hash = block.compute_hash();
        assert!(!chain.add_block(block, 0));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_rejects_repeated_and_skipped_indices() {
        let mut chain = Blockchain::new();
        let first = mine(chain.tip().unwrap(), "2025-10-11T00:01:00Z", 1);
        assert!(chain.add_block(first.clone(), 1));
        assert!(!chain.add_block(first.clone(), 1));

        let mut skipped = mine(&first, "2025-10-11T00:02:00Z", 0);
        skipped.index += 1;
        skipped.hash = skipped.compute_hash();
        assert!(matches!(
            chain.check_block(&skipped, 0, false),
            Err(ValidationError::IndexMismatch { expected: 2, actual: 3 })
        ));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_rejects_tampered_hash() {
        let mut chain = Blockchain::new();
        let mut block = mine(chain.tip().unwrap(), "2025-10-11T00:01:00Z", 0);
        block.transactions[0].amount = 5000;
        assert!(matches!(
            chain.check_block(&block, 0, false),
            Err(ValidationError::HashMismatch { .. })
        ));
        assert!(!chain.add_block(block, 0));
    }

    #[test]
    fn test_skip_pow_bypasses_only_difficulty() {
        let mut chain = Blockchain::new();
        let block = mine(chain.tip().unwrap(), "2025-10-11T00:01:00Z", 0);
        if !proof_satisfied(&block.hash, 64) {
            assert!(!chain.validate_block(&block, 64, false));
        }
        assert!(chain.add_block_skip_pow(block, 64, true));
    }

    #[test]
    fn test_range_queries() {
        let mut chain = Blockchain::new();
        for minute in 1..=4 {
            let ts = format!("2025-10-11T00:0{}:00Z", minute);
            let block = mine(chain.tip().unwrap(), &ts, 1);
            assert!(chain.add_block(block, 1));
        }
        let blocks = chain.range(1, 3);
        assert_eq!(blocks.iter().map(|b| b.index).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(chain.range(3, 1).is_empty());
        assert!(chain.range(2, 5).is_empty());
        assert_eq!(chain.range(4, 4).len(), 1);
        assert_eq!(chain.get_block(2).unwrap().index, 2);
        assert!(chain.get_block(9).is_none());
    }

    #[test]
    fn test_candidate_links_to_prev() {
        let genesis = Block::genesis();
        let candidate = Block::candidate(&genesis, vec![Transaction::coinbase("x", 50)]);
        assert_eq!(candidate.index, 1);
        assert_eq!(candidate.prev_hash, genesis.hash);
        assert!(candidate.timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&candidate.timestamp).is_ok());
    }
}
