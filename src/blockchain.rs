// Thin re-export module: implementation lives in `blockchain/core.rs`, split
// into chain management, validation rules and derived wallet state.

pub mod core;
pub use self::core::*;
