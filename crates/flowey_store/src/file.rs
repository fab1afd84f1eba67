//! File-based state store for persistent storage.

use crate::backend::StateStore;
use crate::error::{StoreError, StoreResult};
use flowey_protocol::{State, UserId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Number of log records after which compaction is considered.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1024;

#[derive(Serialize)]
struct RecordRef<'a> {
    user_id: UserId,
    state: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct Record {
    user_id: UserId,
    state: Map<String, Value>,
}

/// A file-based state store.
///
/// Every `set` appends one newline-terminated JSON record
/// `{"user_id":..,"state":{..}}` to a log file; on open the log is replayed
/// and the last record of each user wins. The current states are also kept
/// in memory, so `get` never touches the disk.
///
/// # Durability
///
/// - `set` returns only after the record has been `sync_data`'d
/// - A failed write truncates the log back to its previous length
/// - A torn final record (crash mid-write) is dropped on open
///
/// # Compaction
///
/// Once the log holds more than `compact_threshold` records and at least
/// twice as many records as users, it is rewritten with one record per user
/// into a temporary file that is renamed over the log.
///
/// # Example
///
/// ```no_run
/// use flowey_protocol::{State, UserId};
/// use flowey_store::{FileStateStore, StateStore};
/// use std::path::Path;
///
/// let store = FileStateStore::open(Path::new("states.log")).unwrap();
/// store.set(UserId::new(1), &State::default()).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    log: Mutex<LogFile>,
    states: RwLock<HashMap<UserId, State>>,
    compact_threshold: u64,
}

#[derive(Debug)]
struct LogFile {
    file: File,
    len: u64,
    records: u64,
}

impl LogFile {
    fn append(&mut self, data: &[u8]) -> StoreResult<()> {
        let result = self
            .file
            .seek(SeekFrom::End(0))
            .and_then(|_| self.file.write_all(data))
            .and_then(|_| self.file.sync_data());

        if let Err(err) = result {
            if let Err(rollback) = self.file.set_len(self.len) {
                warn!(error = %rollback, "failed to roll back partial state record");
            }
            return Err(err.into());
        }

        self.len += data.len() as u64;
        self.records += 1;
        Ok(())
    }
}

fn open_log(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

fn encode_record(user: UserId, state: &State) -> StoreResult<Vec<u8>> {
    let mut line = serde_json::to_vec(&RecordRef {
        user_id: user,
        state: state.fields(),
    })?;
    line.push(b'\n');
    Ok(line)
}

fn decode_record(line: &[u8]) -> StoreResult<(UserId, State)> {
    let record: Record = serde_json::from_slice(line)?;
    let state = State::from_fields(record.state)?;
    Ok((record.user_id, state))
}

impl FileStateStore {
    /// Opens or creates a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or a record before the
    /// last one is corrupted.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_threshold(path, DEFAULT_COMPACT_THRESHOLD)
    }

    /// Opens or creates a store with a custom compaction threshold.
    ///
    /// # Errors
    ///
    /// Same as [`FileStateStore::open`].
    pub fn open_with_threshold(path: &Path, compact_threshold: u64) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = open_log(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let mut states = HashMap::new();
        let mut records = 0u64;
        let mut offset = 0usize;

        while offset < buffer.len() {
            let Some(end) = buffer[offset..].iter().position(|&b| b == b'\n') else {
                break;
            };
            let next = offset + end + 1;
            match decode_record(&buffer[offset..offset + end]) {
                Ok((user, state)) => {
                    states.insert(user, state);
                    records += 1;
                    offset = next;
                }
                Err(err) if next == buffer.len() => {
                    debug!(offset, error = %err, "undecodable final state record");
                    break;
                }
                Err(err) => {
                    return Err(StoreError::Corrupted(format!(
                        "record at offset {}: {}",
                        offset, err
                    )));
                }
            }
        }

        if offset < buffer.len() {
            warn!(
                path = %path.display(),
                dropped = buffer.len() - offset,
                "truncating torn tail of state log"
            );
            file.set_len(offset as u64)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            log: Mutex::new(LogFile {
                file,
                len: offset as u64,
                records,
            }),
            states: RwLock::new(states),
            compact_threshold,
        })
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of users with a stored state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Returns true if no state is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Returns the number of records currently in the log.
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.log.lock().records
    }

    /// Rewrites the log with one record per user.
    ///
    /// # Errors
    ///
    /// Returns an error if the compacted log cannot be written. The existing
    /// log is left untouched in that case.
    pub fn compact(&self) -> StoreResult<()> {
        let mut log = self.log.lock();
        self.compact_locked(&mut log)
    }

    fn compact_locked(&self, log: &mut LogFile) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("compact");
        let states = self.states.read();

        let tmp = open_log(&tmp_path)?;
        tmp.set_len(0)?;
        let mut writer = BufWriter::new(tmp);
        let mut len = 0u64;
        for (user, state) in states.iter() {
            let line = encode_record(*user, state)?;
            writer.write_all(&line)?;
            len += line.len() as u64;
        }
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        // The handle follows the inode through the rename, so nothing can
        // fail between replacing the log and appending to the new one.
        std::fs::rename(&tmp_path, &self.path)?;
        log.file = file;
        log.len = len;
        log.records = states.len() as u64;

        debug!(path = %self.path.display(), records = log.records, "compacted state log");
        Ok(())
    }

    fn should_compact(&self, log: &LogFile) -> bool {
        let live = self.states.read().len() as u64;
        log.records > self.compact_threshold && log.records >= live.saturating_mul(2)
    }
}

impl StateStore for FileStateStore {
    fn get(&self, user: UserId) -> StoreResult<Option<State>> {
        Ok(self.states.read().get(&user).cloned())
    }

    fn set(&self, user: UserId, state: &State) -> StoreResult<()> {
        let line = encode_record(user, state)?;

        let mut log = self.log.lock();
        log.append(&line)?;
        self.states.write().insert(user, state.clone());

        if self.should_compact(&log) {
            // The record is already durable; a failed compaction only costs space.
            if let Err(err) = self.compact_locked(&mut log) {
                warn!(path = %self.path.display(), error = %err, "state log compaction failed");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn state(json: &str) -> State {
        State::parse(json).unwrap()
    }

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("states.log");

        let store = FileStateStore::open(&path).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.record_count(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("states.log");

        FileStateStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("states.log");
        let value = state(r#"{"version":4,"text":"persisted"}"#);

        {
            let store = FileStateStore::open(&path).unwrap();
            store.set(UserId::new(1), &value).unwrap();
        }

        let store = FileStateStore::open(&path).unwrap();
        assert_eq!(store.get(UserId::new(1)).unwrap(), Some(value));
    }

    #[test]
    fn file_last_record_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("states.log");

        {
            let store = FileStateStore::open(&path).unwrap();
            store
                .set(UserId::new(1), &state(r#"{"version":1,"text":"a"}"#))
                .unwrap();
            store
                .set(UserId::new(2), &state(r#"{"version":1,"text":"x"}"#))
                .unwrap();
            store
                .set(UserId::new(1), &state(r#"{"version":2,"text":"b"}"#))
                .unwrap();
        }

        let store = FileStateStore::open(&path).unwrap();
        assert_eq!(store.record_count(), 3);
        assert_eq!(
            store.get(UserId::new(1)).unwrap(),
            Some(state(r#"{"version":2,"text":"b"}"#))
        );
        assert_eq!(
            store.get(UserId::new(2)).unwrap(),
            Some(state(r#"{"version":1,"text":"x"}"#))
        );
    }

    #[test]
    fn file_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("states.log");

        {
            let store = FileStateStore::open(&path).unwrap();
            store
                .set(UserId::new(1), &state(r#"{"version":1,"text":"a"}"#))
                .unwrap();
        }
        let intact_len = std::fs::metadata(&path).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"user_id":1,"state":{"vers"#).unwrap();
        drop(file);

        let store = FileStateStore::open(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact_len);
        assert_eq!(
            store.get(UserId::new(1)).unwrap(),
            Some(state(r#"{"version":1,"text":"a"}"#))
        );

        // Appends after recovery land on a clean record boundary.
        store
            .set(UserId::new(1), &state(r#"{"version":2,"text":"b"}"#))
            .unwrap();
        drop(store);
        let store = FileStateStore::open(&path).unwrap();
        assert_eq!(store.get(UserId::new(1)).unwrap().unwrap().version().get(), 2);
    }

    #[test]
    fn file_corrupt_middle_record_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("states.log");
        std::fs::write(
            &path,
            concat!(
                "{\"user_id\":1,\"state\":{\"version\":1}}\n",
                "garbage\n",
                "{\"user_id\":1,\"state\":{\"version\":2}}\n",
            ),
        )
        .unwrap();

        let result = FileStateStore::open(&path);
        assert!(matches!(result, Err(StoreError::Corrupted(_))));
    }

    #[test]
    fn file_rejects_invalid_state_in_middle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("states.log");
        std::fs::write(
            &path,
            concat!(
                "{\"user_id\":1,\"state\":{\"text\":\"no version\"}}\n",
                "{\"user_id\":1,\"state\":{\"version\":2}}\n",
            ),
        )
        .unwrap();

        assert!(matches!(
            FileStateStore::open(&path),
            Err(StoreError::Corrupted(_))
        ));
    }

    #[test]
    fn file_compaction_keeps_latest_states() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("states.log");

        let store = FileStateStore::open_with_threshold(&path, 4).unwrap();
        for version in 0..10u32 {
            let value = state(&format!(r#"{{"version":{},"text":"v{}"}}"#, version, version));
            store.set(UserId::new(1), &value).unwrap();
        }
        store
            .set(UserId::new(2), &state(r#"{"version":3}"#))
            .unwrap();

        assert!(store.record_count() <= 5);
        drop(store);

        let store = FileStateStore::open(&path).unwrap();
        assert_eq!(store.get(UserId::new(1)).unwrap().unwrap().version().get(), 9);
        assert_eq!(store.get(UserId::new(2)).unwrap().unwrap().version().get(), 3);
        assert!(!path.with_extension("compact").exists());
    }

    #[test]
    fn file_manual_compaction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("states.log");

        let store = FileStateStore::open(&path).unwrap();
        for version in 0..5u32 {
            let value = state(&format!(r#"{{"version":{}}}"#, version));
            store.set(UserId::new(1), &value).unwrap();
        }
        assert_eq!(store.record_count(), 5);

        store.compact().unwrap();
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.get(UserId::new(1)).unwrap().unwrap().version().get(), 4);
    }

    #[test]
    fn writes_after_compaction_reach_the_new_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("states.log");

        let store = FileStateStore::open(&path).unwrap();
        for version in 0..5u32 {
            let value = state(&format!(r#"{{"version":{}}}"#, version));
            store.set(UserId::new(1), &value).unwrap();
        }
        store.compact().unwrap();
        store
            .set(UserId::new(1), &state(r#"{"version":5,"text":"after"}"#))
            .unwrap();
        assert_eq!(store.record_count(), 2);
        drop(store);

        let store = FileStateStore::open(&path).unwrap();
        assert_eq!(store.record_count(), 2);
        assert_eq!(
            store.get(UserId::new(1)).unwrap(),
            Some(state(r#"{"version":5,"text":"after"}"#))
        );
    }
}
