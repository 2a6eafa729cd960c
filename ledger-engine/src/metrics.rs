//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_commands_total` - Mutating commands journaled and applied
//! - `ledger_transfers_total{status}` - Transfer outcomes; a rising
//!   `failed_internal_error` count means sender lock timeouts
//! - `ledger_journal_append_seconds` - Histogram of synced append latencies
//! - `ledger_replayed_commands_total` - Commands replayed at startup
//! - `ledger_snapshots_total` - Snapshots written
//! - `ledger_accounts` - Number of accounts

use crate::types::TransferStatus;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
///
/// Each instance owns its registry, so several ledgers can live in one
/// process.
#[derive(Clone)]
pub struct Metrics {
    /// Commands journaled and applied
    pub commands_total: IntCounter,

    /// Transfer outcomes by status
    pub transfers_total: IntCounterVec,

    /// Journal append duration histogram
    pub journal_append_duration: Histogram,

    /// Commands replayed during recovery
    pub replayed_commands_total: IntCounter,

    /// Snapshots written
    pub snapshots_total: IntCounter,

    /// Account count
    pub accounts: IntGauge,

    registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("commands_total", &self.commands_total.get())
            .field("snapshots_total", &self.snapshots_total.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let commands_total = IntCounter::new(
            "ledger_commands_total",
            "Mutating commands journaled and applied",
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let transfers_total = IntCounterVec::new(
            Opts::new("ledger_transfers_total", "Transfer outcomes by status"),
            &["status"],
        )?;
        registry.register(Box::new(transfers_total.clone()))?;

        let journal_append_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_journal_append_seconds",
                "Histogram of synced journal append latencies",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]),
        )?;
        registry.register(Box::new(journal_append_duration.clone()))?;

        let replayed_commands_total = IntCounter::new(
            "ledger_replayed_commands_total",
            "Commands replayed during recovery",
        )?;
        registry.register(Box::new(replayed_commands_total.clone()))?;

        let snapshots_total = IntCounter::new("ledger_snapshots_total", "Snapshots written")?;
        registry.register(Box::new(snapshots_total.clone()))?;

        let accounts = IntGauge::new("ledger_accounts", "Number of accounts")?;
        registry.register(Box::new(accounts.clone()))?;

        Ok(Self {
            commands_total,
            transfers_total,
            journal_append_duration,
            replayed_commands_total,
            snapshots_total,
            accounts,
            registry,
        })
    }

    /// Record a journaled and applied command
    pub fn record_command(&self) {
        self.commands_total.inc();
    }

    /// Record a transfer outcome
    pub fn record_transfer(&self, status: TransferStatus) {
        self.transfers_total
            .with_label_values(&[status.as_str()])
            .inc();
    }

    /// Count of transfers that ended with `status`
    pub fn transfers_with_status(&self, status: TransferStatus) -> u64 {
        self.transfers_total
            .with_label_values(&[status.as_str()])
            .get()
    }

    /// Record append duration
    pub fn record_append_duration(&self, duration_seconds: f64) {
        self.journal_append_duration.observe(duration_seconds);
    }

    /// Record replayed commands
    pub fn record_replayed(&self, count: usize) {
        self.replayed_commands_total.inc_by(count as u64);
    }

    /// Record a written snapshot
    pub fn record_snapshot(&self) {
        self.snapshots_total.inc();
    }

    /// Update account count
    pub fn set_accounts(&self, count: usize) {
        self.accounts.set(count as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format of all metrics
    pub fn render(&self) -> crate::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
