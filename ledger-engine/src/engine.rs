//! Transfer engine
//!
//! In-memory state machine for accounts, transfers and statements. It knows
//! nothing about the journal; [`Ledger`](crate::Ledger) drives it.
//!
//! # Locking
//!
//! Balance changes are atomic on their own (see [`account`](crate::account)).
//! The only compound step is "check sender funds, then withdraw", which is
//! guarded by a mutex keyed by the sender alone:
//!
//! - transfers from the same sender are serialized, so the sender can never
//!   be overdrawn
//! - transfers from different senders into one recipient never contend
//! - a caller holds at most one account mutex, so there is no lock ordering
//!   to get wrong
//!
//! The mutex wait is bounded; a timeout is reported as
//! [`TransferStatus::FailedInternalError`].

use crate::{
    account::{Account, AccountStore},
    error::{Error, Result},
    types::{
        AccountId, AccountSnapshot, Command, CommandOutcome, LedgerSnapshot, TransferRecord,
        TransferStatus,
    },
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Default wait for a per-sender lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

type Statement = Arc<RwLock<Vec<TransferRecord>>>;

/// Accounts, per-sender locks and statements
#[derive(Debug)]
pub struct TransferEngine {
    accounts: AccountStore,

    /// One mutex per sender ever seen; grows monotonically
    locks: DashMap<AccountId, Arc<Mutex<()>>>,

    /// Per-account transfer history, oldest first
    statements: DashMap<AccountId, Statement>,

    lock_timeout: Duration,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferEngine {
    /// Empty engine with the default lock timeout
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Empty engine with a custom lock timeout
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            accounts: AccountStore::new(),
            locks: DashMap::new(),
            statements: DashMap::new(),
            lock_timeout,
        }
    }

    /// Rebuild an engine from a snapshot
    pub fn restore(snapshot: LedgerSnapshot, lock_timeout: Duration) -> Self {
        let statements = DashMap::new();
        let mut balances = Vec::with_capacity(snapshot.accounts.len());

        for account in snapshot.accounts {
            balances.push((account.id, account.balance));
            if !account.statement.is_empty() {
                statements.insert(account.id, Arc::new(RwLock::new(account.statement)));
            }
        }

        Self {
            accounts: AccountStore::restore(snapshot.next_account_id, balances),
            locks: DashMap::new(),
            statements,
            lock_timeout,
        }
    }

    /// Lock wait bound
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Underlying account store
    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    /// Open an account
    pub fn create_account(&self, initial_balance: Decimal) -> Result<AccountId> {
        let id = self.accounts.create(initial_balance)?;
        tracing::debug!(account_id = %id, %initial_balance, "Account created");
        Ok(id)
    }

    /// Current balance of an account
    pub fn balance(&self, id: AccountId) -> Result<Decimal> {
        self.accounts
            .get(id)
            .map(|account| account.balance())
            .ok_or(Error::AccountNotFound(id))
    }

    /// Transfer history of an account, oldest first
    pub fn statement(&self, id: AccountId) -> Result<Vec<TransferRecord>> {
        if !self.accounts.contains(id) {
            return Err(Error::AccountNotFound(id));
        }

        let statement = self.statements.get(&id).map(|entry| Arc::clone(entry.value()));
        Ok(statement
            .map(|records| records.read().clone())
            .unwrap_or_default())
    }

    /// Transfer timestamped now
    pub fn make_transfer(
        &self,
        sender: AccountId,
        recipient: AccountId,
        amount: Decimal,
    ) -> TransferStatus {
        self.make_transfer_at(sender, recipient, amount, Utc::now())
    }

    /// Transfer with an explicit application timestamp
    pub fn make_transfer_at(
        &self,
        sender_id: AccountId,
        recipient_id: AccountId,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> TransferStatus {
        let status = self.try_transfer(sender_id, recipient_id, amount);

        if status.is_success() {
            self.record(sender_id, recipient_id, amount, timestamp);
        }

        tracing::debug!(
            sender = %sender_id,
            recipient = %recipient_id,
            %amount,
            status = %status,
            "Transfer processed"
        );

        status
    }

    /// Apply a journaled command; the single entry point for live and replay
    pub fn apply(&self, command: &Command) -> Result<CommandOutcome> {
        match command {
            Command::CreateAccount { initial_balance } => self
                .create_account(*initial_balance)
                .map(CommandOutcome::AccountCreated),
            Command::MakeTransfer {
                sender,
                recipient,
                amount,
                timestamp,
            } => Ok(CommandOutcome::Transfer(self.make_transfer_at(
                *sender, *recipient, *amount, *timestamp,
            ))),
        }
    }

    /// Copy of the full state, accounts ascending by ID
    ///
    /// Only consistent when no mutation runs concurrently; the ledger takes
    /// it from inside the single writer.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let accounts = self
            .accounts
            .ids()
            .into_iter()
            .filter_map(|id| {
                let account = self.accounts.get(id)?;
                Some(AccountSnapshot {
                    id,
                    balance: account.balance(),
                    statement: self.statement(id).unwrap_or_default(),
                })
            })
            .collect();

        LedgerSnapshot {
            next_account_id: self.accounts.next_id(),
            accounts,
        }
    }

    /// Sum of all balances
    pub fn total_balance(&self) -> Decimal {
        self.accounts
            .ids()
            .into_iter()
            .filter_map(|id| self.accounts.get(id))
            .map(|account| account.balance())
            .sum()
    }

    fn try_transfer(
        &self,
        sender_id: AccountId,
        recipient_id: AccountId,
        amount: Decimal,
    ) -> TransferStatus {
        if amount <= Decimal::ZERO {
            return TransferStatus::FailedInvalidAmount;
        }
        if sender_id == recipient_id {
            return TransferStatus::FailedSameAccount;
        }

        let Some(sender) = self.accounts.get(sender_id) else {
            return TransferStatus::FailedSenderNotFound;
        };
        let Some(recipient) = self.accounts.get(recipient_id) else {
            return TransferStatus::FailedRecipientNotFound;
        };

        self.transfer_locked(&sender, &recipient, amount)
    }

    /// Funds check and both balance moves under the sender's mutex.
    /// The guard is dropped on every return path.
    fn transfer_locked(&self, sender: &Account, recipient: &Account, amount: Decimal) -> TransferStatus {
        let lock = self.sender_lock(sender.id());
        let Some(_guard) = lock.try_lock_for(self.lock_timeout) else {
            tracing::warn!(
                sender = %sender.id(),
                timeout_ms = self.lock_timeout.as_millis() as u64,
                "Sender lock not acquired in time"
            );
            return TransferStatus::FailedInternalError;
        };

        if sender.balance() < amount {
            return TransferStatus::DeniedLackOfFunds;
        }

        if let Err(err) = sender.withdraw(amount) {
            tracing::error!(sender = %sender.id(), error = %err, "Withdrawal failed");
            return TransferStatus::FailedInternalError;
        }

        if let Err(err) = recipient.deposit(amount) {
            tracing::error!(recipient = %recipient.id(), error = %err, "Deposit failed, returning funds");
            if let Err(err) = sender.deposit(amount) {
                tracing::error!(sender = %sender.id(), error = %err, "Refund failed");
            }
            return TransferStatus::FailedInternalError;
        }

        TransferStatus::Success
    }

    fn sender_lock(&self, id: AccountId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(&id) {
            return Arc::clone(lock.value());
        }
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    fn statement_of(&self, id: AccountId) -> Statement {
        if let Some(statement) = self.statements.get(&id) {
            return Arc::clone(statement.value());
        }
        Arc::clone(self.statements.entry(id).or_default().value())
    }

    fn record(&self, sender: AccountId, recipient: AccountId, amount: Decimal, timestamp: DateTime<Utc>) {
        self.statement_of(sender)
            .write()
            .push(TransferRecord::outgoing(timestamp, recipient, amount));
        self.statement_of(recipient)
            .write()
            .push(TransferRecord::incoming(timestamp, sender, amount));
    }
}

/// Read-only access to a [`TransferEngine`]
///
/// Handed out by [`Ledger::query`](crate::Ledger::query). It has no
/// mutators, so every change to a ledger goes through its journal.
///
/// ```compile_fail
/// # async fn open(ledger: &ledger_engine::Ledger) {
/// ledger.query(|view| view.create_account(rust_decimal::Decimal::ONE));
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LedgerView<'a> {
    engine: &'a TransferEngine,
}

impl<'a> LedgerView<'a> {
    pub(crate) fn new(engine: &'a TransferEngine) -> Self {
        Self { engine }
    }

    /// Current balance of an account
    pub fn balance(&self, id: AccountId) -> Result<Decimal> {
        self.engine.balance(id)
    }

    /// Transfer history of an account, oldest first
    pub fn statement(&self, id: AccountId) -> Result<Vec<TransferRecord>> {
        self.engine.statement(id)
    }

    /// Whether the account exists
    pub fn contains(&self, id: AccountId) -> bool {
        self.engine.accounts.contains(id)
    }

    /// Number of accounts
    pub fn account_count(&self) -> usize {
        self.engine.accounts.len()
    }

    /// All account IDs, ascending
    pub fn account_ids(&self) -> Vec<AccountId> {
        self.engine.accounts.ids()
    }

    /// Sum of all balances
    pub fn total_balance(&self) -> Decimal {
        self.engine.total_balance()
    }

    /// Copy of the full state; see [`TransferEngine::snapshot`]
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.engine.snapshot()
    }
}
