//! Account store
//!
//! Balances live in lock-free cells and are only changed through
//! compare-and-swap retry loops, so concurrent deposits and withdrawals on
//! the same account are never lost. The store does not enforce any balance
//! floor; the funds check belongs to the transfer engine.

use crate::{
    error::{Error, Result},
    types::AccountId,
};
use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A single account balance
#[derive(Debug)]
pub struct Account {
    id: AccountId,
    balance: AtomicCell<Decimal>,
}

impl Account {
    /// Create account with a starting balance
    pub fn new(id: AccountId, initial_balance: Decimal) -> Self {
        Self {
            id,
            balance: AtomicCell::new(initial_balance),
        }
    }

    /// Account ID
    pub fn id(&self) -> AccountId {
        self.id
    }

    /// Current balance
    pub fn balance(&self) -> Decimal {
        self.balance.load()
    }

    /// Add `amount`, returning the new balance
    pub fn deposit(&self, amount: Decimal) -> Result<Decimal> {
        self.accumulate(|current| current.checked_add(amount))
    }

    /// Subtract `amount`, returning the new balance
    pub fn withdraw(&self, amount: Decimal) -> Result<Decimal> {
        self.accumulate(|current| current.checked_sub(amount))
    }

    /// Read, compute, swap; retry whenever another writer got there first.
    fn accumulate(&self, update: impl Fn(Decimal) -> Option<Decimal>) -> Result<Decimal> {
        let mut current = self.balance.load();
        loop {
            let next = update(current).ok_or(Error::BalanceOverflow(self.id))?;
            match self.balance.compare_exchange(current, next) {
                Ok(_) => return Ok(next),
                Err(actual) => current = actual,
            }
        }
    }
}

/// All accounts of the ledger, keyed by ID
#[derive(Debug, Default)]
pub struct AccountStore {
    next_id: AtomicU64,
    accounts: DashMap<AccountId, Arc<Account>>,
}

impl AccountStore {
    /// Empty store, first ID is 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from snapshot data
    pub fn restore(
        next_id: u64,
        accounts: impl IntoIterator<Item = (AccountId, Decimal)>,
    ) -> Self {
        let store = Self {
            next_id: AtomicU64::new(next_id),
            accounts: DashMap::new(),
        };
        for (id, balance) in accounts {
            store.accounts.insert(id, Arc::new(Account::new(id, balance)));
        }
        store
    }

    /// Allocate the next ID and open an account with `initial_balance`
    pub fn create(&self, initial_balance: Decimal) -> Result<AccountId> {
        let raw = self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map_err(|_| Error::AccountIdsExhausted)?;
        let id = AccountId::new(raw);

        self.accounts
            .insert(id, Arc::new(Account::new(id, initial_balance)));

        Ok(id)
    }

    /// Look up an account
    pub fn get(&self, id: AccountId) -> Option<Arc<Account>> {
        self.accounts.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether the account exists
    pub fn contains(&self, id: AccountId) -> bool {
        self.accounts.contains_key(&id)
    }

    /// Atomically add to an account balance
    pub fn deposit(&self, id: AccountId, amount: Decimal) -> Result<Decimal> {
        self.get(id).ok_or(Error::AccountNotFound(id))?.deposit(amount)
    }

    /// Atomically subtract from an account balance
    pub fn withdraw(&self, id: AccountId, amount: Decimal) -> Result<Decimal> {
        self.get(id).ok_or(Error::AccountNotFound(id))?.withdraw(amount)
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether no account exists
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Next ID the allocator will hand out
    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// All account IDs, ascending
    pub fn ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }
}
