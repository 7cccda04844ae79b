use crate::blockchain::core::chain::{Block, Blockchain};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How many history entries a wallet summary carries.
pub const WALLET_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub block_index: u64,
    pub timestamp: String,
    pub from: String,
    pub to: String,
    pub amount: u64,
    #[serde(rename = "type")]
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub address: String,
    pub balance: i64,
    pub transaction_count: usize,
    pub transactions: Vec<WalletEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpendError {
    #[error("Transaction amount must be positive")]
    NonPositiveAmount,
    #[error("Insufficient balance: {balance} < {amount}")]
    InsufficientBalance { balance: i64, amount: u64 },
}

fn signed(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

impl Blockchain {
    fn transactions(&self) -> impl Iterator<Item = (&Block, &Transaction)> {
        self.blocks
            .iter()
            .flat_map(|block| block.transactions.iter().map(move |tx| (block, tx)))
    }

    /// Everything received minus everything sent.
    pub fn get_balance(&self, address: &str) -> i64 {
        self.transactions().fold(0i64, |balance, (_, tx)| {
            let mut balance = balance;
            if tx.to == address {
                balance = balance.saturating_add(signed(tx.amount));
            }
            if tx.from == address {
                balance = balance.saturating_sub(signed(tx.amount));
            }
            balance
        })
    }

    /// Summary for the wallet layer. An address the ledger has never seen
    /// gets a zero balance and an empty history; only a blank address is `None`.
    pub fn wallet_info(&self, address: &str) -> Option<WalletInfo> {
        let address = address.trim();
        if address.is_empty() {
            return None;
        }

        let entries: Vec<WalletEntry> = self
            .transactions()
            .filter(|(_, tx)| tx.involves(address))
            .map(|(block, tx)| WalletEntry {
                block_index: block.index,
                timestamp: block.timestamp.clone(),
                from: tx.from.clone(),
                to: tx.to.clone(),
                amount: tx.amount,
                direction: if tx.from == address {
                    Direction::Sent
                } else {
                    Direction::Received
                },
            })
            .collect();

        let transaction_count = entries.len();
        let recent = entries[transaction_count.saturating_sub(WALLET_HISTORY_LIMIT)..].to_vec();
        Some(WalletInfo {
            address: address.to_string(),
            balance: self.get_balance(address),
            transaction_count,
            transactions: recent,
        })
    }

    /// Whether the sender of `tx` could afford it on the current ledger.
    pub fn check_spend(&self, tx: &Transaction) -> Result<(), SpendError> {
        if !tx.is_transfer_amount_valid() {
            return Err(SpendError::NonPositiveAmount);
        }
        let balance = self.get_balance(&tx.from);
        if balance < signed(tx.amount) {
            return Err(SpendError::InsufficientBalance {
                balance,
                amount: tx.amount,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(txs: Vec<Vec<Transaction>>) -> Blockchain {
        let mut chain = Blockchain::new();
        for (i, transactions) in txs.into_iter().enumerate() {
            let prev = chain.tip().unwrap().clone();
            let mut block = Block::candidate(&prev, transactions);
            block.timestamp = format!("2025-10-12T00:00:{:02}Z", i);
            block.hash = block.compute_hash();
            assert!(chain.add_block(block, 0));
        }
        chain
    }

    #[test]
    fn test_balance_is_received_minus_sent() {
        let chain = ledger_with(vec![
            vec![Transaction::coinbase("alice", 50)],
            vec![Transaction::coinbase("alice", 50), Transaction::new("alice", "bob", 30)],
        ]);
        assert_eq!(chain.get_balance("alice"), 70);
        assert_eq!(chain.get_balance("bob"), 30);
        assert_eq!(chain.get_balance("nobody"), 0);
    }

    #[test]
    fn test_wallet_info_shape() {
        let chain = ledger_with(vec![
            vec![Transaction::coinbase("alice", 50)],
            vec![Transaction::new("alice", "bob", 20)],
        ]);
        let info = chain.wallet_info("alice").unwrap();
        assert_eq!(info.balance, 30);
        assert_eq!(info.transaction_count, 2);
        assert_eq!(info.transactions[0].direction, Direction::Received);
        assert_eq!(info.transactions[1].direction, Direction::Sent);
        assert_eq!(info.transactions[1].block_index, 2);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["transactions"][1]["type"], "sent");
        assert_eq!(json["transactions"][0]["from"], "coinbase");
    }

    #[test]
    fn test_wallet_history_keeps_last_twenty() {
        let blocks = (0..25).map(|_| vec![Transaction::coinbase("miner", 50)]).collect();
        let chain = ledger_with(blocks);
        let info = chain.wallet_info("miner").unwrap();
        assert_eq!(info.transaction_count, 25);
        assert_eq!(info.transactions.len(), WALLET_HISTORY_LIMIT);
        assert_eq!(info.transactions[0].block_index, 6);
        assert_eq!(info.balance, 25 * 50);
    }

    #[test]
    fn test_unseen_wallet_has_zero_balance() {
        let chain = Blockchain::new();
        let info = chain.wallet_info("ghost").unwrap();
        assert_eq!(info.address, "ghost");
        assert_eq!(info.balance, 0);
        assert_eq!(info.transaction_count, 0);
        assert!(info.transactions.is_empty());

        assert!(chain.wallet_info("").is_none());
        assert!(chain.wallet_info("   ").is_none());
        assert_eq!(chain.wallet_info("network").unwrap().transaction_count, 1);
    }

    #[test]
    fn test_check_spend() {
        let chain = ledger_with(vec![vec![Transaction::coinbase("alice", 50)]]);
        assert!(chain.check_spend(&Transaction::new("alice", "bob", 50)).is_ok());
        assert_eq!(
            chain.check_spend(&Transaction::new("alice", "bob", 51)),
            Err(SpendError::InsufficientBalance { balance: 50, amount: 51 })
        );
        assert_eq!(
            chain.check_spend(&Transaction::new("alice", "bob", 0)),
            Err(SpendError::NonPositiveAmount)
        );
    }
}
