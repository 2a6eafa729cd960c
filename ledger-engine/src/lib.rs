//! Ledger Engine
//!
//! Embedded account ledger with journaled, crash-recoverable transfers.
//!
//! # Architecture
//!
//! - **Command Journal**: Every mutation is made durable before it is applied
//! - **Single Writer**: One task assigns the total order of mutations
//! - **Lock-free Balances**: Compare-and-swap on each account's balance
//! - **Snapshots**: Bound recovery time and truncate the journal
//!
//! # Invariants
//!
//! - Money conservation: a transfer never creates or destroys value
//! - No overdraft: a transfer never takes a sender below zero
//! - Deterministic replay: same journal, same state
//! - Journal-before-apply: an acknowledged mutation survives a crash

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    clippy::all
)]

pub mod account;
pub mod actor;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::{LedgerView, TransferEngine};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use storage::{Journal, Storage};
pub use types::{
    AccountId, Command, CommandOutcome, JournalEntry, LedgerSnapshot, Request, TransferRecord,
    TransferStatus,
};
