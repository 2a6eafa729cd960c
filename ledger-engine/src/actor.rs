//! Single-writer actor for mutating commands
//!
//! Every create-account and make-transfer goes through one task, so the
//! journal holds a single total order of mutations and replay is
//! deterministic. Reads never pass through here.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               WriterHandle (Clone)                    │
//! │         Sends commands to the writer mailbox         │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              JournalWriter (Single Task)              │
//! │   1. assign sequence and timestamp                    │
//! │   2. Journal::append_command()  (synced)              │
//! │   3. TransferEngine::apply()                          │
//! │   4. snapshot every N commands                        │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! A command whose append fails is answered with the error and never
//! reaches the engine.

use crate::{
    config::SnapshotConfig,
    engine::TransferEngine,
    metrics::Metrics,
    storage::Journal,
    types::{CommandOutcome, JournalEntry, Request, SnapshotRecord},
    Error, Result,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Message sent to the writer
pub enum WriterMessage {
    /// Journal then apply a request
    Execute {
        /// Request to run
        request: Request,
        /// Reply channel
        response: oneshot::Sender<Result<CommandOutcome>>,
    },

    /// Write a snapshot now; answers with its sequence
    Snapshot {
        /// Reply channel
        response: oneshot::Sender<Result<u64>>,
    },

    /// Stop after the optional shutdown snapshot
    Shutdown {
        /// Reply channel
        response: oneshot::Sender<Result<()>>,
    },
}

/// Task that owns the write path
pub struct JournalWriter {
    journal: Arc<dyn Journal>,
    engine: Arc<TransferEngine>,
    metrics: Metrics,
    mailbox: mpsc::Receiver<WriterMessage>,

    /// Sequence the next command receives
    next_sequence: u64,

    /// Commands applied since the last snapshot
    since_snapshot: u64,

    /// Timestamp of the last stamped command; stamps never go backwards
    last_timestamp: DateTime<Utc>,

    snapshot: SnapshotConfig,
}

impl JournalWriter {
    /// Create new writer
    pub fn new(
        journal: Arc<dyn Journal>,
        engine: Arc<TransferEngine>,
        metrics: Metrics,
        mailbox: mpsc::Receiver<WriterMessage>,
        next_sequence: u64,
        snapshot: SnapshotConfig,
    ) -> Self {
        Self {
            journal,
            engine,
            metrics,
            mailbox,
            next_sequence,
            since_snapshot: 0,
            last_timestamp: DateTime::<Utc>::MIN_UTC,
            snapshot,
        }
    }

    /// Run the writer loop until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                WriterMessage::Execute { request, response } => {
                    let _ = response.send(self.execute(request));
                }
                WriterMessage::Snapshot { response } => {
                    let _ = response.send(self.take_snapshot());
                }
                WriterMessage::Shutdown { response } => {
                    let _ = response.send(self.finish());
                    return;
                }
            }
        }

        tracing::debug!("Writer mailbox closed");
        if let Err(e) = self.journal.flush() {
            tracing::error!("Error flushing journal on close: {}", e);
        }
    }

    fn execute(&mut self, request: Request) -> Result<CommandOutcome> {
        let entry = JournalEntry {
            sequence: self.next_sequence,
            command: request.into_command(self.stamp()),
        };

        let started = Instant::now();
        if let Err(e) = self.journal.append_command(&entry) {
            tracing::error!(
                sequence = entry.sequence,
                command = entry.command.kind(),
                error = %e,
                "Journal append failed, command not applied"
            );
            return Err(e);
        }
        self.metrics
            .record_append_duration(started.elapsed().as_secs_f64());
        self.next_sequence += 1;

        let outcome = self.engine.apply(&entry.command)?;

        self.metrics.record_command();
        if let Some(status) = outcome.transfer_status() {
            self.metrics.record_transfer(status);
        }
        self.metrics.set_accounts(self.engine.accounts().len());

        self.since_snapshot += 1;
        if self.snapshot.interval_commands > 0 && self.since_snapshot >= self.snapshot.interval_commands {
            // the command is already committed; a failed snapshot only delays truncation
            if let Err(e) = self.take_snapshot() {
                tracing::error!("Error writing periodic snapshot: {}", e);
            }
        }

        Ok(outcome)
    }

    /// Wall clock, clamped to the previous stamp
    fn stamp(&mut self) -> DateTime<Utc> {
        self.last_timestamp = self.last_timestamp.max(Utc::now());
        self.last_timestamp
    }

    fn take_snapshot(&mut self) -> Result<u64> {
        let last_sequence = self.next_sequence - 1;
        let record = SnapshotRecord::encode(last_sequence, &self.engine.snapshot())?;

        self.journal.write_snapshot(&record)?;
        self.since_snapshot = 0;
        self.metrics.record_snapshot();

        Ok(last_sequence)
    }

    fn finish(&mut self) -> Result<()> {
        if self.snapshot.on_shutdown && self.since_snapshot > 0 {
            self.take_snapshot()?;
        }
        self.journal.flush()?;
        tracing::info!(last_sequence = self.next_sequence - 1, "Writer stopped");
        Ok(())
    }
}

/// Handle for sending commands to the writer
#[derive(Clone, Debug)]
pub struct WriterHandle {
    sender: mpsc::Sender<WriterMessage>,
}

impl WriterHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<WriterMessage>) -> Self {
        Self { sender }
    }

    /// Journal and apply a request
    pub async fn execute(&self, request: Request) -> Result<CommandOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WriterMessage::Execute {
                request,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Writer mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Write a snapshot of the current state
    pub async fn snapshot(&self) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WriterMessage::Snapshot { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Writer mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown writer
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WriterMessage::Shutdown { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Writer mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }
}

/// Spawn the journal writer
pub fn spawn_journal_writer(
    journal: Arc<dyn Journal>,
    engine: Arc<TransferEngine>,
    metrics: Metrics,
    next_sequence: u64,
    snapshot: SnapshotConfig,
    mailbox_capacity: usize,
) -> (WriterHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let writer = JournalWriter::new(journal, engine, metrics, rx, next_sequence, snapshot);

    let task = tokio::spawn(async move {
        writer.run().await;
    });

    (WriterHandle::new(tx), task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, Command, TransferStatus};
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory journal that can be told to fail appends
    #[derive(Default)]
    struct MemoryJournal {
        entries: Mutex<Vec<JournalEntry>>,
        snapshots: Mutex<Vec<u64>>,
        fail_appends: AtomicBool,
    }

    impl Journal for MemoryJournal {
        fn append_command(&self, entry: &JournalEntry) -> Result<()> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(Error::Storage("disk full".to_string()));
            }
            self.entries.lock().push(entry.clone());
            Ok(())
        }

        fn write_snapshot(&self, snapshot: &SnapshotRecord) -> Result<()> {
            self.snapshots.lock().push(snapshot.last_sequence);
            Ok(())
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    fn spawn(
        journal: Arc<MemoryJournal>,
        interval_commands: u64,
    ) -> (WriterHandle, JoinHandle<()>, Arc<TransferEngine>) {
        let engine = Arc::new(TransferEngine::new());
        let snapshot = SnapshotConfig {
            interval_commands,
            on_open: false,
            on_shutdown: true,
        };
        let (handle, task) = spawn_journal_writer(
            journal,
            Arc::clone(&engine),
            Metrics::new().unwrap(),
            1,
            snapshot,
            16,
        );
        (handle, task, engine)
    }

    fn create(balance: i64) -> Request {
        Request::CreateAccount {
            initial_balance: Decimal::new(balance, 0),
        }
    }

    #[tokio::test]
    async fn test_writer_spawn_and_shutdown() {
        let journal = Arc::new(MemoryJournal::default());
        let (handle, task, _engine) = spawn(Arc::clone(&journal), 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        // nothing applied, nothing to snapshot
        assert!(journal.snapshots.lock().is_empty());
        assert!(handle.execute(create(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_commands_are_sequenced_then_applied() {
        let journal = Arc::new(MemoryJournal::default());
        let (handle, _task, engine) = spawn(Arc::clone(&journal), 0);

        let a = handle.execute(create(10)).await.unwrap();
        let b = handle.execute(create(0)).await.unwrap();
        assert_eq!(a, CommandOutcome::AccountCreated(AccountId::new(0)));
        assert_eq!(b, CommandOutcome::AccountCreated(AccountId::new(1)));

        let outcome = handle
            .execute(Request::MakeTransfer {
                sender: AccountId::new(0),
                recipient: AccountId::new(1),
                amount: Decimal::new(4, 0),
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Transfer(TransferStatus::Success));

        let sequences: Vec<u64> = journal.entries.lock().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(engine.balance(AccountId::new(1)).unwrap(), Decimal::new(4, 0));
    }

    #[tokio::test]
    async fn test_failed_append_is_not_applied() {
        let journal = Arc::new(MemoryJournal::default());
        let (handle, _task, engine) = spawn(Arc::clone(&journal), 0);

        handle.execute(create(10)).await.unwrap();

        journal.fail_appends.store(true, Ordering::SeqCst);
        let result = handle.execute(create(20)).await;
        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(engine.accounts().len(), 1);

        // the failed command did not consume a sequence
        journal.fail_appends.store(false, Ordering::SeqCst);
        handle.execute(create(30)).await.unwrap();
        let sequences: Vec<u64> = journal.entries.lock().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert_eq!(engine.balance(AccountId::new(1)).unwrap(), Decimal::new(30, 0));
    }

    #[tokio::test]
    async fn test_periodic_and_shutdown_snapshots() {
        let journal = Arc::new(MemoryJournal::default());
        let (handle, task, _engine) = spawn(Arc::clone(&journal), 2);

        for balance in 0..5 {
            handle.execute(create(balance)).await.unwrap();
        }
        assert_eq!(*journal.snapshots.lock(), vec![2, 4]);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(*journal.snapshots.lock(), vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn test_on_demand_snapshot_reports_position() {
        let journal = Arc::new(MemoryJournal::default());
        let (handle, _task, _engine) = spawn(Arc::clone(&journal), 0);

        handle.execute(create(1)).await.unwrap();
        handle.execute(create(2)).await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_writer_stamps_in_journal_order() {
        let journal = Arc::new(MemoryJournal::default());
        let (handle, _task, engine) = spawn(Arc::clone(&journal), 0);

        handle.execute(create(1_000)).await.unwrap();
        for _ in 0..4 {
            handle.execute(create(0)).await.unwrap();
        }

        let tasks: Vec<_> = (0..200u64)
            .map(|i| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    handle
                        .execute(Request::MakeTransfer {
                            sender: AccountId::new(0),
                            recipient: AccountId::new(1 + i % 4),
                            amount: Decimal::new(1, 0),
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stamps: Vec<_> = journal
            .entries
            .lock()
            .iter()
            .filter_map(|entry| match entry.command {
                Command::MakeTransfer { timestamp, .. } => Some(timestamp),
                Command::CreateAccount { .. } => None,
            })
            .collect();
        assert_eq!(stamps.len(), 200);
        assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));

        let statement = engine.statement(AccountId::new(0)).unwrap();
        assert_eq!(statement.len(), 200);
        assert!(statement
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }
}
