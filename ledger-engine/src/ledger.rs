//! Main ledger orchestration layer
//!
//! This module ties together storage, the transfer engine, and the writer
//! actor into the four service operations.
//!
//! # Example
//!
//! ```no_run
//! use ledger_engine::{Config, Ledger};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> ledger_engine::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let alice = ledger.create_account(Decimal::new(10000, 2)).await?;
//!     let bob = ledger.create_account(Decimal::ZERO).await?;
//!     let status = ledger.make_transfer(alice, bob, Decimal::new(2550, 2)).await?;
//!     println!("{} -> {}: {}", alice, bob, status);
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_journal_writer, WriterHandle},
    engine::{LedgerView, TransferEngine},
    metrics::Metrics,
    storage::{Journal, StorageStats},
    types::{
        AccountId, CommandOutcome, JournalEntry, Request, SnapshotRecord, TransferRecord,
        TransferStatus,
    },
    Config, Error, Result, Storage,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Writer handle for mutating commands
    handle: WriterHandle,

    /// Writer task
    writer: JoinHandle<()>,

    /// Live state (for reads)
    engine: Arc<TransferEngine>,

    /// Direct storage access (for stats)
    storage: Arc<Storage>,

    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    ///
    /// Loads the latest snapshot, replays the journal tail after it and then
    /// starts the writer. Any corruption found on the way fails the open.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;

        let (engine, last_sequence, replayed) = match recover(&storage, &config) {
            Ok(recovered) => recovered,
            Err(e) => {
                tracing::error!(error = %e, fatal = e.is_fatal(), "Recovery failed");
                return Err(e);
            }
        };
        let engine = Arc::new(engine);

        metrics.record_replayed(replayed as usize);
        metrics.set_accounts(engine.accounts().len());

        if replayed > 0 && config.snapshot.on_open {
            let record = SnapshotRecord::encode(last_sequence, &engine.snapshot())?;
            storage.write_snapshot(&record)?;
            metrics.record_snapshot();
        }

        tracing::info!(
            accounts = engine.accounts().len(),
            replayed,
            last_sequence,
            "Ledger opened"
        );

        let journal: Arc<dyn Journal> = storage.clone();
        let (handle, writer) = spawn_journal_writer(
            journal,
            Arc::clone(&engine),
            metrics.clone(),
            last_sequence + 1,
            config.snapshot.clone(),
            config.mailbox_capacity,
        );

        Ok(Self {
            handle,
            writer,
            engine,
            storage,
            metrics,
            config,
        })
    }

    /// Journal a request and apply it, in that order
    ///
    /// The writer assigns the transfer timestamp when the request takes its
    /// turn, so statements are in timestamp order.
    pub async fn execute_and_record(&self, request: Request) -> Result<CommandOutcome> {
        self.handle.execute(request).await
    }

    /// Run a read against the live state
    ///
    /// Reads do not queue behind the writer.
    pub fn query<R>(&self, read: impl FnOnce(LedgerView<'_>) -> R) -> R {
        read(LedgerView::new(&self.engine))
    }

    /// Open an account with an initial balance
    pub async fn create_account(&self, initial_balance: Decimal) -> Result<AccountId> {
        let outcome = self
            .execute_and_record(Request::CreateAccount { initial_balance })
            .await?;

        outcome
            .account_id()
            .ok_or_else(|| Error::Concurrency(format!("unexpected outcome {:?}", outcome)))
    }

    /// Current balance of an account
    pub fn check_balance(&self, id: AccountId) -> Result<Decimal> {
        self.query(|view| view.balance(id))
    }

    /// Move `amount` from `sender` to `recipient`
    ///
    /// Business rejections come back as a non-success status; `Err` means
    /// the command could not be journaled.
    pub async fn make_transfer(
        &self,
        sender: AccountId,
        recipient: AccountId,
        amount: Decimal,
    ) -> Result<TransferStatus> {
        let outcome = self
            .execute_and_record(Request::MakeTransfer {
                sender,
                recipient,
                amount,
            })
            .await?;

        outcome
            .transfer_status()
            .ok_or_else(|| Error::Concurrency(format!("unexpected outcome {:?}", outcome)))
    }

    /// Transfer history of an account, oldest first
    pub fn get_statement(&self, id: AccountId) -> Result<Vec<TransferRecord>> {
        self.query(|view| view.statement(id))
    }

    /// Write a snapshot now; returns the last sequence it covers
    pub async fn snapshot(&self) -> Result<u64> {
        self.handle.snapshot().await
    }

    /// Journal statistics
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    /// Metrics of this ledger
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    ///
    /// Commands already queued are applied first.
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.writer
            .await
            .map_err(|e| Error::Concurrency(format!("writer task failed: {}", e)))
    }
}

/// Rebuild the engine from storage: latest snapshot plus journal tail
///
/// Returns the engine, the last sequence it reflects, and the number of
/// replayed commands.
fn recover(storage: &Storage, config: &Config) -> Result<(TransferEngine, u64, u64)> {
    let (engine, snapshot_sequence) = match storage.latest_snapshot()? {
        Some(record) => {
            let state = record.decode()?;
            tracing::info!(
                last_sequence = record.last_sequence,
                taken_at = %record.taken_at,
                accounts = state.accounts.len(),
                "Loaded snapshot"
            );
            (TransferEngine::restore(state, config.lock_timeout()), record.last_sequence)
        }
        None => (TransferEngine::with_lock_timeout(config.lock_timeout()), 0),
    };

    let tail = storage.commands_after(snapshot_sequence)?;
    let last_sequence = tail.last().map_or(snapshot_sequence, |entry| entry.sequence);
    let replayed = replay(&engine, &tail);

    Ok((engine, last_sequence, replayed))
}

/// Apply journal entries in order; returns how many were applied
///
/// An entry that fails to apply failed identically when it was first
/// executed, so it is skipped.
pub fn replay(engine: &TransferEngine, entries: &[JournalEntry]) -> u64 {
    let mut applied = 0;

    for entry in entries {
        match engine.apply(&entry.command) {
            Ok(_) => applied += 1,
            Err(e) => tracing::warn!(
                sequence = entry.sequence,
                command = entry.command.kind(),
                error = %e,
                "Replayed command failed"
            ),
        }
    }

    if applied > 0 {
        tracing::info!(applied, "Replayed journal tail");
    }

    applied
}
