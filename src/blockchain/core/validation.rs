use crate::blockchain::core::chain::Block;
use crate::error::ValidationError;
use crate::pow::proof_satisfied;
use chrono::DateTime;

pub const MIN_DIFFICULTY: u32 = 1;
pub const MAX_DIFFICULTY: u32 = 3;
pub const DIFFICULTY_WINDOW: usize = 10;

/// Check `block` as the next entry after `chain`.
///
/// Rules run in a fixed order so the reported reason is stable: linkage,
/// stored hash, index, then proof-of-work.
pub fn check_block(
    chain: &[Block],
    block: &Block,
    difficulty: u32,
    skip_pow: bool,
) -> Result<(), ValidationError> {
    let Some(tip) = chain.last() else {
        if block.index != 0 {
            return Err(ValidationError::GenesisIndex(block.index));
        }
        if !block.prev_hash.is_empty() {
            return Err(ValidationError::GenesisPrevHash);
        }
        return check_stored_hash(block);
    };

    if block.prev_hash != tip.hash {
        return Err(ValidationError::PrevHashMismatch {
            expected: tip.hash.clone(),
            actual: block.prev_hash.clone(),
        });
    }

    check_stored_hash(block)?;

    let expected = tip.next_index().ok_or(ValidationError::IndexOverflow(tip.index))?;
    if block.index != expected {
        return Err(ValidationError::IndexMismatch {
            expected,
            actual: block.index,
        });
    }

    if !skip_pow && !proof_satisfied(&block.hash, difficulty) {
        return Err(ValidationError::ProofOfWork {
            hash: block.hash.clone(),
            difficulty,
        });
    }

    Ok(())
}

fn check_stored_hash(block: &Block) -> Result<(), ValidationError> {
    let computed = block.compute_hash();
    if computed != block.hash {
        return Err(ValidationError::HashMismatch {
            stored: block.hash.clone(),
            computed,
        });
    }
    Ok(())
}

/// Difficulty for the block after `chain`.
///
/// Always starts from the baseline and moves at most one step, so every
/// node derives the same value from the same window regardless of history.
pub fn dynamic_difficulty(chain: &[Block], target_block_secs: u64) -> u32 {
    if chain.len() <= DIFFICULTY_WINDOW {
        return MIN_DIFFICULTY;
    }

    let latest = &chain[chain.len() - 1];
    let earlier = &chain[chain.len() - 1 - DIFFICULTY_WINDOW];
    let (Ok(t_latest), Ok(t_earlier)) = (
        DateTime::parse_from_rfc3339(&latest.timestamp),
        DateTime::parse_from_rfc3339(&earlier.timestamp),
    ) else {
        return MIN_DIFFICULTY;
    };

    let elapsed = t_latest.signed_duration_since(t_earlier).num_seconds();
    let average = elapsed / DIFFICULTY_WINDOW as i64;
    let target = i64::try_from(target_block_secs).unwrap_or(i64::MAX);

    let mut difficulty = MIN_DIFFICULTY;
    if average < target {
        difficulty += 1;
    } else if average > target {
        difficulty = difficulty.saturating_sub(1).max(MIN_DIFFICULTY);
    }
    difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::TARGET_BLOCK_TIME;
    use chrono::{Duration, TimeZone, Utc};

    /// Linked-by-index chain with `gap_secs` between timestamps; hashes are irrelevant here.
    fn timed_chain(len: usize, gap_secs: i64) -> Vec<Block> {
        let start = Utc.with_ymd_and_hms(2025, 10, 12, 0, 0, 0).unwrap();
        (0..len)
            .map(|i| Block {
                index: i as u64,
                timestamp: (start + Duration::seconds(gap_secs * i as i64))
                    .format("%Y-%m-%dT%H:%M:%SZ")
                    .to_string(),
                transactions: Vec::new(),
                prev_hash: String::new(),
                hash: String::new(),
                nonce: 0,
            })
            .collect()
    }

    #[test]
    fn test_short_chains_use_floor() {
        // Ten one-second blocks after the fixed genesis.
        let mut chain = vec![Block::genesis()];
        chain.extend(timed_chain(11, 1).into_iter().skip(1));
        assert_eq!(chain.len(), 11);
        for len in 0..=chain.len() {
            assert_eq!(dynamic_difficulty(&chain[..len], TARGET_BLOCK_TIME), 1);
        }
    }

    #[test]
    fn test_fast_blocks_raise_difficulty() {
        assert_eq!(dynamic_difficulty(&timed_chain(11, 5), TARGET_BLOCK_TIME), 2);
        assert_eq!(dynamic_difficulty(&timed_chain(40, 1), TARGET_BLOCK_TIME), 2);
    }

    #[test]
    fn test_slow_or_on_target_blocks_stay_at_floor() {
        assert_eq!(dynamic_difficulty(&timed_chain(11, 30), TARGET_BLOCK_TIME), 1);
        assert_eq!(dynamic_difficulty(&timed_chain(11, 120), TARGET_BLOCK_TIME), 1);
    }

    #[test]
    fn test_window_reaches_ten_blocks_back() {
        // Only the last ten gaps count: a slow start is ignored.
        let mut chain = timed_chain(5, 600);
        let last = chain.last().unwrap().clone();
        let base = DateTime::parse_from_rfc3339(&last.timestamp).unwrap();
        for i in 1..=10 {
            let mut b = last.clone();
            b.index = last.index + i;
            b.timestamp = (base + Duration::seconds(3 * i as i64))
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string();
            chain.push(b);
        }
        assert_eq!(dynamic_difficulty(&chain, TARGET_BLOCK_TIME), 2);
    }

    #[test]
    fn test_window_compares_eleventh_from_last() {
        let slow = "2025-10-01T00:00:00Z".to_string();

        // chain[len - 10] sits inside the window and is never read
        let mut chain = timed_chain(12, 1);
        chain[2].timestamp = slow.clone();
        assert_eq!(dynamic_difficulty(&chain, TARGET_BLOCK_TIME), 2);

        let mut chain = timed_chain(12, 1);
        chain[1].timestamp = slow;
        assert_eq!(dynamic_difficulty(&chain, TARGET_BLOCK_TIME), 1);
    }

    #[test]
    fn test_exhausted_index_is_rejected() {
        let mut tip = Block::genesis();
        tip.index = u64::MAX;
        tip.prev_hash = "00".repeat(32);
        tip.hash = tip.compute_hash();

        let mut next = Block::candidate(&tip, Vec::new());
        assert_eq!(next.index, u64::MAX);
        next.hash = next.compute_hash();
        assert_eq!(
            check_block(&[tip], &next, 1, true),
            Err(ValidationError::IndexOverflow(u64::MAX))
        );
    }

    #[test]
    fn test_unparseable_timestamp_falls_back() {
        let mut chain = timed_chain(12, 1);
        chain[11].timestamp = "yesterday".to_string();
        assert_eq!(dynamic_difficulty(&chain, TARGET_BLOCK_TIME), 1);
    }

    #[test]
    fn test_empty_chain_only_accepts_genesis_shape() {
        let mut block = Block::genesis();
        block.index = 1;
        assert_eq!(
            check_block(&[], &block, 1, false),
            Err(ValidationError::GenesisIndex(1))
        );

        let mut block = Block::genesis();
        block.hash = "00".repeat(32);
        assert!(matches!(
            check_block(&[], &block, 1, false),
            Err(ValidationError::HashMismatch { .. })
        ));
        assert_eq!(check_block(&[], &Block::genesis(), 3, false), Ok(()));
    }

    #[test]
    fn test_prev_hash_checked_before_index() {
        let chain = vec![Block::genesis()];
        let mut block = Block::genesis();
        block.index = 5;
        block.prev_hash = "aa".into();
        assert!(matches!(
            check_block(&chain, &block, 0, false),
            Err(ValidationError::PrevHashMismatch { .. })
        ));
    }
}
