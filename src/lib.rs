//! AURACLE - discovery-to-exit trading engine for Solana DEX aggregator swaps
//!
//! This crate gates discovered tokens through risk and decision rules, executes
//! swaps with bounded retries, and manages every open position through an
//! exit state machine until it is closed.

pub mod types;
pub mod trading;

// Re-export main types for convenience
pub use types::{EntryOrigin, Pubkey, TokenCandidate};
