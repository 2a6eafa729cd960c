//! Command journal using RocksDB
//!
//! # Column Families
//!
//! - `commands` - Append-only command log (key: sequence, big-endian u64)
//! - `snapshots` - Full ledger state (key: last folded sequence, big-endian u64)
//!
//! Big-endian keys make byte order equal to journal order, so forward
//! iteration replays commands in the order they were committed.

use crate::{
    error::{Error, Result},
    types::{Command, JournalEntry, SnapshotRecord},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, WriteOptions, DB,
};

/// Column family names
const CF_COMMANDS: &str = "commands";
const CF_SNAPSHOTS: &str = "snapshots";

/// Durable sink for the single writer
///
/// Implementations must have the entry on stable storage when
/// `append_command` returns `Ok`.
pub trait Journal: Send + Sync {
    /// Append one command
    fn append_command(&self, entry: &JournalEntry) -> Result<()>;

    /// Persist a snapshot and drop the journal prefix it covers
    fn write_snapshot(&self, snapshot: &SnapshotRecord) -> Result<()>;

    /// Flush buffered state before shutdown
    fn flush(&self) -> Result<()>;
}

/// Journal and snapshot store
pub struct Storage {
    db: DB,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create the journal
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_COMMANDS, Self::cf_options_commands()),
            ColumnFamilyDescriptor::new(CF_SNAPSHOTS, Self::cf_options_snapshots()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        if !config.journal.sync_writes {
            tracing::warn!(
                path = %path.display(),
                "Journal sync disabled; acknowledged commands can be lost on power failure"
            );
        }

        tracing::info!(
            path = %path.display(),
            sync_writes = config.journal.sync_writes,
            "Opened journal"
        );

        Ok(Self {
            db,
            sync_writes: config.journal.sync_writes,
        })
    }

    fn cf_options_commands() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_snapshots() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Whether every write is synced before it returns
    pub fn sync_writes(&self) -> bool {
        self.sync_writes
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    // Journal operations

    /// Append one command; on return it is on stable storage
    pub fn append_command(&self, entry: &JournalEntry) -> Result<()> {
        let cf = self.cf_handle(CF_COMMANDS)?;
        let value = bincode::serialize(&entry.command)?;

        self.db
            .put_cf_opt(cf, entry.sequence.to_be_bytes(), value, &self.write_options())?;

        tracing::debug!(
            sequence = entry.sequence,
            command = entry.command.kind(),
            "Command journaled"
        );

        Ok(())
    }

    /// All journaled commands after `sequence`, in order
    ///
    /// The returned entries are contiguous starting at `sequence + 1`; a gap
    /// or an undecodable record is reported as corruption.
    pub fn commands_after(&self, sequence: u64) -> Result<Vec<JournalEntry>> {
        let cf = self.cf_handle(CF_COMMANDS)?;
        let start = sequence.saturating_add(1).to_be_bytes();

        let mut entries = Vec::new();
        let mut expected = sequence.saturating_add(1);

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, value) = item?;
            let found = decode_sequence(&key)?;

            if found != expected {
                return Err(Error::Corruption(format!(
                    "journal gap: expected sequence {}, found {}",
                    expected, found
                )));
            }

            let command: Command = bincode::deserialize(&value).map_err(|e| {
                Error::Corruption(format!("undecodable command at sequence {}: {}", found, e))
            })?;

            entries.push(JournalEntry {
                sequence: found,
                command,
            });
            expected += 1;
        }

        Ok(entries)
    }

    /// Highest sequence written to the journal or folded into a snapshot
    pub fn last_sequence(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_COMMANDS)?;

        let last_command = match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => Some(decode_sequence(&item?.0)?),
            None => None,
        };

        match last_command {
            Some(sequence) => Ok(sequence),
            None => Ok(self
                .latest_snapshot()?
                .map(|snapshot| snapshot.last_sequence)
                .unwrap_or(0)),
        }
    }

    // Snapshot operations

    /// Persist a snapshot and drop everything it supersedes (atomic)
    pub fn write_snapshot(&self, snapshot: &SnapshotRecord) -> Result<()> {
        let cf_commands = self.cf_handle(CF_COMMANDS)?;
        let cf_snapshots = self.cf_handle(CF_SNAPSHOTS)?;

        let key = snapshot.last_sequence.to_be_bytes();
        let value = bincode::serialize(snapshot)?;

        let mut batch = WriteBatch::default();

        // 1. Snapshot
        batch.put_cf(cf_snapshots, key, &value);

        // 2. Older snapshots
        batch.delete_range_cf(cf_snapshots, 0u64.to_be_bytes(), key);

        // 3. Journal prefix folded into the snapshot: [0, last_sequence]
        if let Some(end) = snapshot.last_sequence.checked_add(1) {
            batch.delete_range_cf(cf_commands, 0u64.to_be_bytes(), end.to_be_bytes());
        }

        self.db.write_opt(batch, &self.write_options())?;

        tracing::info!(
            last_sequence = snapshot.last_sequence,
            bytes = snapshot.state.len(),
            "Snapshot written"
        );

        Ok(())
    }

    /// Most recent snapshot, if any
    pub fn latest_snapshot(&self) -> Result<Option<SnapshotRecord>> {
        let cf = self.cf_handle(CF_SNAPSHOTS)?;

        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, value) = item?;
                let record: SnapshotRecord = bincode::deserialize(&value).map_err(|e| {
                    Error::Corruption(format!("undecodable snapshot: {}", e))
                })?;

                if decode_sequence(&key)? != record.last_sequence {
                    return Err(Error::Corruption(format!(
                        "snapshot key does not match its sequence {}",
                        record.last_sequence
                    )));
                }

                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let cf_commands = self.cf_handle(CF_COMMANDS)?;
        let journaled_commands = self
            .db
            .iterator_cf(cf_commands, IteratorMode::Start)
            .count() as u64;

        let snapshot_sequence = self
            .latest_snapshot()?
            .map(|snapshot| snapshot.last_sequence);

        Ok(StorageStats {
            journaled_commands,
            snapshot_sequence,
            last_sequence: self.last_sequence()?,
        })
    }

    /// Force memtables to disk (graceful shutdown)
    pub fn flush(&self) -> Result<()> {
        self.db.flush_cf(self.cf_handle(CF_COMMANDS)?)?;
        self.db.flush_cf(self.cf_handle(CF_SNAPSHOTS)?)?;
        Ok(())
    }
}

impl Journal for Storage {
    fn append_command(&self, entry: &JournalEntry) -> Result<()> {
        Storage::append_command(self, entry)
    }

    fn write_snapshot(&self, snapshot: &SnapshotRecord) -> Result<()> {
        Storage::write_snapshot(self, snapshot)
    }

    fn flush(&self) -> Result<()> {
        Storage::flush(self)
    }
}

fn decode_sequence(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| Error::Corruption(format!("journal key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Storage statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Commands still in the journal (not yet folded into a snapshot)
    pub journaled_commands: u64,
    /// Position of the latest snapshot
    pub snapshot_sequence: Option<u64>,
    /// Highest committed sequence
    pub last_sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, LedgerSnapshot};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn entry(sequence: u64) -> JournalEntry {
        JournalEntry {
            sequence,
            command: Command::MakeTransfer {
                sender: AccountId::new(0),
                recipient: AccountId::new(1),
                amount: Decimal::new(sequence as i64, 2),
                timestamp: Utc::now(),
            },
        }
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert!(storage.db.cf_handle(CF_COMMANDS).is_some());
        assert!(storage.db.cf_handle(CF_SNAPSHOTS).is_some());
        assert_eq!(storage.last_sequence().unwrap(), 0);
    }

    #[test]
    fn test_append_and_read_in_order() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        // more than 255 entries so byte order matters
        let entries: Vec<_> = (1..=300).map(entry).collect();
        for e in &entries {
            storage.append_command(e).unwrap();
        }

        assert_eq!(storage.commands_after(0).unwrap(), entries);
        assert_eq!(storage.commands_after(298).unwrap(), entries[298..].to_vec());
        assert_eq!(storage.last_sequence().unwrap(), 300);
    }

    #[test]
    fn test_reopen_keeps_commands() {
        let (config, _temp) = test_config();
        {
            let storage = Storage::open(&config).unwrap();
            storage.append_command(&entry(1)).unwrap();
            storage.append_command(&entry(2)).unwrap();
        }

        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.commands_after(0).unwrap().len(), 2);
    }

    #[test]
    fn test_unsynced_journal_survives_clean_close() {
        let (mut config, _temp) = test_config();
        config.journal.sync_writes = false;
        {
            let storage = Storage::open(&config).unwrap();
            assert!(!storage.sync_writes());
            storage.append_command(&entry(1)).unwrap();
            storage.flush().unwrap();
        }

        let storage = Storage::open(&config).unwrap();
        assert!(!storage.sync_writes());
        let entries = storage.commands_after(0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 1);
    }

    #[test]
    fn test_gap_is_corruption() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        storage.append_command(&entry(1)).unwrap();
        storage.append_command(&entry(3)).unwrap();

        assert!(matches!(storage.commands_after(0), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_garbage_record_is_corruption() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        storage.append_command(&entry(1)).unwrap();
        let cf = storage.cf_handle(CF_COMMANDS).unwrap();
        storage.db.put_cf(cf, 2u64.to_be_bytes(), [0xffu8; 3]).unwrap();

        assert!(matches!(storage.commands_after(0), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_snapshot_truncates_journal() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        for sequence in 1..=5 {
            storage.append_command(&entry(sequence)).unwrap();
        }

        let state = LedgerSnapshot {
            next_account_id: 2,
            accounts: vec![],
        };
        storage
            .write_snapshot(&SnapshotRecord::encode(3, &state).unwrap())
            .unwrap();

        let tail = storage.commands_after(3).unwrap();
        assert_eq!(tail.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![4, 5]);

        let snapshot = storage.latest_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.last_sequence, 3);
        assert_eq!(snapshot.decode().unwrap(), state);

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.journaled_commands, 2);
        assert_eq!(stats.snapshot_sequence, Some(3));
        assert_eq!(stats.last_sequence, 5);
    }

    #[test]
    fn test_newer_snapshot_replaces_older() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        for sequence in 1..=4 {
            storage.append_command(&entry(sequence)).unwrap();
        }
        let state = LedgerSnapshot::default();
        storage.write_snapshot(&SnapshotRecord::encode(2, &state).unwrap()).unwrap();
        storage.write_snapshot(&SnapshotRecord::encode(4, &state).unwrap()).unwrap();

        assert_eq!(storage.latest_snapshot().unwrap().unwrap().last_sequence, 4);
        assert!(storage.commands_after(4).unwrap().is_empty());
        // journal empty, position comes from the snapshot
        assert_eq!(storage.last_sequence().unwrap(), 4);
    }
}
