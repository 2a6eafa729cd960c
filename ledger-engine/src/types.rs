//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Plain data only, so a journaled command replays identically

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier, allocated from a monotonically increasing counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(u64);

impl AccountId {
    /// Create new account ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric value
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AccountId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Outcome of a transfer request
///
/// Codes are stable: they are what external callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransferStatus {
    /// Both balance changes applied
    Success = 0,
    /// Per-sender lock not acquired within the timeout
    FailedInternalError = 1,
    /// Unknown sender
    FailedSenderNotFound = 2,
    /// Unknown recipient
    FailedRecipientNotFound = 3,
    /// Amount is zero or negative
    FailedInvalidAmount = 4,
    /// Sender balance lower than the amount
    DeniedLackOfFunds = 5,
    /// Sender and recipient are the same account
    FailedSameAccount = 6,
}

impl TransferStatus {
    /// All variants, in code order
    pub const ALL: [TransferStatus; 7] = [
        TransferStatus::Success,
        TransferStatus::FailedInternalError,
        TransferStatus::FailedSenderNotFound,
        TransferStatus::FailedRecipientNotFound,
        TransferStatus::FailedInvalidAmount,
        TransferStatus::DeniedLackOfFunds,
        TransferStatus::FailedSameAccount,
    ];

    /// Numeric wire code
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Parse from numeric wire code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.code() == code)
    }

    /// Whether the transfer was applied
    pub fn is_success(&self) -> bool {
        matches!(self, TransferStatus::Success)
    }

    /// Snake-case label (metrics, logs)
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Success => "success",
            TransferStatus::FailedInternalError => "failed_internal_error",
            TransferStatus::FailedSenderNotFound => "failed_sender_not_found",
            TransferStatus::FailedRecipientNotFound => "failed_recipient_not_found",
            TransferStatus::FailedInvalidAmount => "failed_invalid_amount",
            TransferStatus::DeniedLackOfFunds => "denied_lack_of_funds",
            TransferStatus::FailedSameAccount => "failed_same_account",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One statement line: a transfer seen from one side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// When the transfer was applied
    pub timestamp: DateTime<Utc>,

    /// The other account of the transfer
    pub counterparty: AccountId,

    /// Signed amount: negative for the sender, positive for the recipient
    pub amount: Decimal,
}

impl TransferRecord {
    /// Sender-side record
    pub fn outgoing(timestamp: DateTime<Utc>, recipient: AccountId, amount: Decimal) -> Self {
        Self {
            timestamp,
            counterparty: recipient,
            amount: -amount,
        }
    }

    /// Recipient-side record
    pub fn incoming(timestamp: DateTime<Utc>, sender: AccountId, amount: Decimal) -> Self {
        Self {
            timestamp,
            counterparty: sender,
            amount,
        }
    }
}

/// A mutating operation, the unit of durability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Open an account with a starting balance
    CreateAccount {
        /// Starting balance (any decimal)
        initial_balance: Decimal,
    },

    /// Move funds between two accounts
    MakeTransfer {
        /// Debited account
        sender: AccountId,
        /// Credited account
        recipient: AccountId,
        /// Amount to move
        amount: Decimal,
        /// Application time, assigned by the writer before journaling
        timestamp: DateTime<Utc>,
    },
}

impl Command {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Command::CreateAccount { .. } => "create_account",
            Command::MakeTransfer { .. } => "make_transfer",
        }
    }
}

/// A mutation as submitted to the ledger
///
/// The writer turns it into a [`Command`] when it takes its turn, stamping
/// transfers then, so journal order and timestamp order agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Open an account with a starting balance
    CreateAccount {
        /// Starting balance (any decimal)
        initial_balance: Decimal,
    },

    /// Move funds between two accounts
    MakeTransfer {
        /// Debited account
        sender: AccountId,
        /// Credited account
        recipient: AccountId,
        /// Amount to move
        amount: Decimal,
    },
}

impl Request {
    /// Fix the request at its application time
    pub fn into_command(self, timestamp: DateTime<Utc>) -> Command {
        match self {
            Request::CreateAccount { initial_balance } => Command::CreateAccount { initial_balance },
            Request::MakeTransfer {
                sender,
                recipient,
                amount,
            } => Command::MakeTransfer {
                sender,
                recipient,
                amount,
                timestamp,
            },
        }
    }
}

/// Result of applying a [`Command`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// Account created with this ID
    AccountCreated(AccountId),
    /// Transfer finished with this status
    Transfer(TransferStatus),
}

impl CommandOutcome {
    /// Created account ID, if this was a creation
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            CommandOutcome::AccountCreated(id) => Some(*id),
            CommandOutcome::Transfer(_) => None,
        }
    }

    /// Transfer status, if this was a transfer
    pub fn transfer_status(&self) -> Option<TransferStatus> {
        match self {
            CommandOutcome::Transfer(status) => Some(*status),
            CommandOutcome::AccountCreated(_) => None,
        }
    }
}

/// Journaled command with its position in the total order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the journal (contiguous, starting at 1)
    pub sequence: u64,

    /// The command
    pub command: Command,
}

/// Serialized state of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Account ID
    pub id: AccountId,

    /// Balance at snapshot time
    pub balance: Decimal,

    /// Statement at snapshot time, oldest first
    pub statement: Vec<TransferRecord>,
}

/// Full in-memory ledger state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Next identifier the allocator hands out
    pub next_account_id: u64,

    /// Accounts ordered by ID
    pub accounts: Vec<AccountSnapshot>,
}

impl LedgerSnapshot {
    /// Sum of all balances
    pub fn total_balance(&self) -> Decimal {
        self.accounts.iter().map(|a| a.balance).sum()
    }
}

/// Snapshot as persisted, positioned in the journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Last journal sequence folded into the state
    pub last_sequence: u64,

    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,

    /// blake3 digest of `state`
    pub digest: [u8; 32],

    /// bincode-encoded [`LedgerSnapshot`]
    pub state: Vec<u8>,
}

impl SnapshotRecord {
    /// Encode a ledger snapshot at a journal position
    pub fn encode(last_sequence: u64, snapshot: &LedgerSnapshot) -> crate::Result<Self> {
        let state = bincode::serialize(snapshot)?;
        let digest = *blake3::hash(&state).as_bytes();

        Ok(Self {
            last_sequence,
            taken_at: Utc::now(),
            digest,
            state,
        })
    }

    /// Verify the digest and decode the ledger snapshot
    pub fn decode(&self) -> crate::Result<LedgerSnapshot> {
        if *blake3::hash(&self.state).as_bytes() != self.digest {
            return Err(crate::Error::Corruption(format!(
                "snapshot at sequence {} failed digest check",
                self.last_sequence
            )));
        }

        Ok(bincode::deserialize(&self.state)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in TransferStatus::ALL {
            assert_eq!(TransferStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(TransferStatus::from_code(42), None);
        assert_eq!(TransferStatus::Success.code(), 0);
        assert_eq!(TransferStatus::DeniedLackOfFunds.code(), 5);
    }

    #[test]
    fn test_transfer_record_signs() {
        let now = Utc::now();
        let amount = Decimal::new(12345, 2);

        let out = TransferRecord::outgoing(now, AccountId::new(2), amount);
        let inc = TransferRecord::incoming(now, AccountId::new(1), amount);

        assert_eq!(out.amount, Decimal::new(-12345, 2));
        assert_eq!(inc.amount, amount);
        assert_eq!(out.counterparty, AccountId::new(2));
        assert_eq!(inc.counterparty, AccountId::new(1));
    }

    #[test]
    fn test_command_keeps_timestamp_through_bincode() {
        let command = Command::MakeTransfer {
            sender: AccountId::new(0),
            recipient: AccountId::new(1),
            amount: Decimal::new(12345, 2),
            timestamp: Utc::now(),
        };

        let bytes = bincode::serialize(&command).unwrap();
        let decoded: Command = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn test_snapshot_record_detects_tampering() {
        let snapshot = LedgerSnapshot {
            next_account_id: 1,
            accounts: vec![AccountSnapshot {
                id: AccountId::new(0),
                balance: Decimal::new(100, 0),
                statement: vec![],
            }],
        };

        let mut record = SnapshotRecord::encode(3, &snapshot).unwrap();
        assert_eq!(record.decode().unwrap(), snapshot);

        let last = record.state.len() - 1;
        record.state[last] ^= 0xff;
        assert!(matches!(record.decode(), Err(crate::Error::Corruption(_))));
    }
}
