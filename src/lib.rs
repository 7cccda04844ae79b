//! Owonero - a minimal proof-of-work cryptocurrency node
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Ledger, validation, difficulty and balance queries
//! - [`transaction`] - Transaction records and legacy field spellings
//!
//! ## Consensus & Mining
//! - [`pow`] - Memory-hard block hash and the difficulty target
//! - [`miner`] - Nonce search workers that submit to a node
//!
//! ## State Management
//! - [`persistence`] - JSON ledger files and the in-memory backend
//!
//! ## Networking
//! - [`protocol`] - Line protocol commands and replies
//! - [`client`] - Outbound requests to a node
//! - [`node`] - Protocol server
//! - [`peers`] - Known peer addresses
//! - [`sync`] - Pulling missing blocks from peers
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;
pub mod pow;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Networking
// ============================================================================
pub mod client;
pub mod node;
pub mod peers;
pub mod protocol;
pub mod sync;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use blockchain::{Block, Blockchain};
pub use error::{ChainError, Result};
pub use transaction::Transaction;
