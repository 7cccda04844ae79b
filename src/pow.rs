//! Memory-hard proof-of-work hash.
//!
//! A block is hashed over its canonical JSON encoding (every field except
//! `hash`, keys sorted, no whitespace, non-printable-ASCII escaped as
//! `\uXXXX`) mixed with bytes drawn from a 2 MiB scratchpad. The scratchpad
//! only depends on `(index, prev_hash)`, so a miner derives it once per
//! candidate and reuses it for every nonce.
//!
//! The digest is bit-exact across implementations; peers reject any block
//! whose stored hash differs from the recomputed one.

use crate::blockchain::Block;
use crate::transaction::Transaction;
use sha2::Sha256;
use sha3::{Digest, Sha3_256};

pub const SCRATCHPAD_SIZE: usize = 2 * 1024 * 1024;

const MIX_ROUNDS: u64 = 12;
const MIX_STRIDE: u64 = 7919;
const BASE_MULTIPLIER: u64 = 31;
const SALT_MULTIPLIER: u64 = 13;
const FINAL_ROUNDS: usize = 4;

/// Seeded 2 MiB buffer keyed by `(index, prev_hash)`.
#[derive(Clone)]
pub struct Scratchpad {
    index: u64,
    prev_hash: String,
    mem: Vec<u8>,
}

impl Scratchpad {
    pub fn new(index: u64, prev_hash: &str) -> Self {
        let seed = Sha256::digest(format!("{}{}", index, prev_hash).as_bytes());
        let mut mem = vec![0u8; SCRATCHPAD_SIZE];
        for chunk in mem.chunks_mut(seed.len()) {
            chunk.copy_from_slice(&seed[..chunk.len()]);
        }
        Self {
            index,
            prev_hash: prev_hash.to_string(),
            mem,
        }
    }

    pub fn for_block(block: &Block) -> Self {
        Self::new(block.index, &block.prev_hash)
    }

    pub fn matches(&self, index: u64, prev_hash: &str) -> bool {
        self.index == index && self.prev_hash == prev_hash
    }

    fn byte_at(&self, offset: u64) -> u8 {
        self.mem[(offset % SCRATCHPAD_SIZE as u64) as usize]
    }
}

impl std::fmt::Debug for Scratchpad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scratchpad")
            .field("index", &self.index)
            .field("prev_hash", &self.prev_hash)
            .finish()
    }
}

/// Byte writer for the canonical block encoding.
struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    fn raw(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
    }

    fn number(&mut self, n: u64) {
        self.raw(&n.to_string());
    }

    fn key(&mut self, key: &str) {
        self.string(key);
        self.buffer.push(b':');
    }

    fn string(&mut self, s: &str) {
        self.buffer.push(b'"');
        for ch in s.chars() {
            match ch {
                '"' => self.raw("\\\""),
                '\\' => self.raw("\\\\"),
                '\n' => self.raw("\\n"),
                '\r' => self.raw("\\r"),
                '\t' => self.raw("\\t"),
                '\u{08}' => self.raw("\\b"),
                '\u{0c}' => self.raw("\\f"),
                ' '..='~' => self.buffer.push(ch as u8),
                _ => {
                    let mut units = [0u16; 2];
                    for unit in ch.encode_utf16(&mut units) {
                        self.raw(&format!("\\u{:04x}", unit));
                    }
                }
            }
        }
        self.buffer.push(b'"');
    }

    fn transaction(&mut self, tx: &Transaction) {
        self.raw("{");
        self.key("amount");
        self.number(tx.amount);
        self.raw(",");
        self.key("from");
        self.string(&tx.from);
        self.raw(",");
        self.key("signature");
        self.string(&tx.signature);
        self.raw(",");
        self.key("to");
        self.string(&tx.to);
        self.raw("}");
    }

    fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// Canonical encoding split around the nonce so a miner only re-renders the number.
#[derive(Debug, Clone)]
pub struct CanonicalBlock {
    head: Vec<u8>,
    tail: Vec<u8>,
}

impl CanonicalBlock {
    pub fn new(block: &Block) -> Self {
        let mut head = CanonicalEncoder::new();
        head.raw("{");
        head.key("index");
        head.number(block.index);
        head.raw(",");
        head.key("nonce");

        let mut tail = CanonicalEncoder::new();
        tail.raw(",");
        tail.key("prev_hash");
        tail.string(&block.prev_hash);
        tail.raw(",");
        tail.key("timestamp");
        tail.string(&block.timestamp);
        tail.raw(",");
        tail.key("transactions");
        tail.raw("[");
        for (i, tx) in block.transactions.iter().enumerate() {
            if i > 0 {
                tail.raw(",");
            }
            tail.transaction(tx);
        }
        tail.raw("]}");

        Self {
            head: head.finish(),
            tail: tail.finish(),
        }
    }

    pub fn bytes_with_nonce(&self, nonce: u64) -> Vec<u8> {
        let nonce = nonce.to_string();
        let mut out = Vec::with_capacity(self.head.len() + nonce.len() + self.tail.len());
        out.extend_from_slice(&self.head);
        out.extend_from_slice(nonce.as_bytes());
        out.extend_from_slice(&self.tail);
        out
    }
}

pub fn canonical_bytes(block: &Block) -> Vec<u8> {
    CanonicalBlock::new(block).bytes_with_nonce(block.nonce)
}

fn mix_accumulator(nonce: u64, pad: &Scratchpad) -> u64 {
    let size = SCRATCHPAD_SIZE as u64;
    let mut acc = nonce;
    let base = nonce.wrapping_mul(BASE_MULTIPLIER) % size;
    let stride = MIX_STRIDE % size;
    for i in 0..MIX_ROUNDS {
        let offset = base.wrapping_add(i.wrapping_mul(stride));
        acc ^= u64::from(pad.byte_at(offset)) << ((i % 4) * 8);
        if i % 3 == 0 {
            acc = (acc << 7) ^ (acc >> 11) ^ acc;
        }
    }
    acc
}

/// Hash canonical bytes for `nonce` against a scratchpad already built for the block.
///
/// The puzzle word is truncated to 16 bits. Implementations that instead
/// reject puzzle values above 65535 cannot verify blocks whose winning nonce
/// lands there (a few percent of nonces for a typical block).
pub fn digest(canonical: &[u8], nonce: u64, pad: &Scratchpad) -> String {
    let mut acc = mix_accumulator(nonce, pad);

    let puzzle = (nonce ^ canonical.len() as u64).wrapping_add(acc & 0xFFFF) as u16;

    let mut input = Vec::with_capacity(canonical.len() + 13);
    input.extend_from_slice(canonical);
    input.push(pad.byte_at(nonce.wrapping_mul(SALT_MULTIPLIER)));
    input.extend_from_slice(&puzzle.to_be_bytes());
    input.extend_from_slice(&acc.to_be_bytes());

    let input_len = input.len() as u64;
    for _ in 0..FINAL_ROUNDS {
        acc = (acc << 5) ^ (acc >> 3) ^ input_len;
    }
    input.push((acc & 0xFF) as u8);
    input.push(((acc >> 8) & 0xFF) as u8);

    hex::encode(Sha3_256::digest(&input))
}

/// Hash a block. A scratchpad built for a different `(index, prev_hash)` is ignored.
pub fn calculate_hash(block: &Block, pad: Option<&Scratchpad>) -> String {
    let canonical = canonical_bytes(block);
    match pad {
        Some(pad) if pad.matches(block.index, &block.prev_hash) => {
            digest(&canonical, block.nonce, pad)
        }
        _ => digest(&canonical, block.nonce, &Scratchpad::for_block(block)),
    }
}

/// `true` when the first `difficulty` hex digits of `hash` are zero.
pub fn proof_satisfied(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    if difficulty == 0 || hash.len() < difficulty {
        return true;
    }

    let digits: Vec<char> = hash.chars().collect();
    for (i, pair) in digits.chunks(2).enumerate() {
        if difficulty <= 2 * i {
            break;
        }
        match pair[0].to_digit(16) {
            Some(0) => {}
            _ => return false,
        }
        if difficulty > 2 * i + 1 {
            match pair.get(1).and_then(|c| c.to_digit(16)) {
                Some(0) => {}
                _ => return false,
            }
        }
    }
    true
}
