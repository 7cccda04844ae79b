//! Transactions carried inside blocks.
//!
//! Ledgers written by older tooling spell the sender and recipient as
//! `from_addr`/`to_addr`; deserialization accepts both spellings and always
//! serializes back as `from`/`to`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sender used by the block reward transaction.
pub const COINBASE_SENDER: &str = "coinbase";

/// Ordered candidate keys. The sender takes the first non-empty string; the
/// recipient takes the first key present, even when its value is empty.
const FROM_KEYS: [&str; 2] = ["from_addr", "from"];
const TO_KEYS: [&str; 2] = ["to_addr", "to"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct Transaction {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub signature: String,
}

impl Transaction {
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: u64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
            signature: String::new(),
        }
    }

    /// Block reward paid to `to`.
    pub fn coinbase(to: impl Into<String>, reward: u64) -> Self {
        Self::new(COINBASE_SENDER, to, reward)
    }

    pub fn is_coinbase(&self) -> bool {
        self.from == COINBASE_SENDER
    }

    /// Zero amounts only appear in the genesis marker; real transfers move value.
    pub fn is_transfer_amount_valid(&self) -> bool {
        self.amount > 0
    }

    pub fn involves(&self, address: &str) -> bool {
        self.from == address || self.to == address
    }
}

fn first_non_empty(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_str))
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn first_present(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_amount(value: Option<&Value>) -> Result<u64, String> {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| format!("amount {} is not a non-negative integer", n)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("amount {:?} is not numeric: {}", s, e)),
        Some(other) => Err(format!("amount has unexpected type: {}", other)),
        None => Err("missing field `amount`".to_string()),
    }
}

impl TryFrom<Map<String, Value>> for Transaction {
    type Error = String;

    fn try_from(obj: Map<String, Value>) -> Result<Self, Self::Error> {
        let from = first_non_empty(&obj, &FROM_KEYS)
            .ok_or_else(|| "transaction has no sender (from/from_addr)".to_string())?;
        let to = first_present(&obj, &TO_KEYS)
            .ok_or_else(|| "transaction has no recipient (to/to_addr)".to_string())?;
        let amount = parse_amount(obj.get("amount"))?;
        let signature = obj
            .get("signature")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            from,
            to,
            amount,
            signature,
        })
    }
}
