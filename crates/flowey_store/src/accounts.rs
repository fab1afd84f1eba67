//! Account and session persistence.
//!
//! Accounts and session tokens live in one JSON document. Writes hold an
//! exclusive lock on a sibling `.lock` file, re-read the document, and go to
//! a temporary file that is renamed over it, so concurrent CLI runs and a
//! running server never lose each other's updates. Readers reload the
//! document whenever its modification time or length changes, so a session
//! created by one process (the CLI) becomes visible to a running server.

use crate::error::{StoreError, StoreResult};
use crate::lock::open_lock_file;
use flowey_protocol::UserId;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable user identifier.
    pub user_id: UserId,
    /// Unique login name.
    pub username: String,
    /// Password salt (encoded by the caller).
    pub salt: String,
    /// Password hash (encoded by the caller).
    pub password_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccountsDocument {
    next_user_id: i64,
    accounts: Vec<Account>,
    sessions: HashMap<String, UserId>,
}

/// Modification time and length of the document on disk.
type Fingerprint = Option<(Option<SystemTime>, u64)>;

#[derive(Debug)]
struct Loaded {
    document: AccountsDocument,
    fingerprint: Fingerprint,
}

/// Accounts and the session-token table.
#[derive(Debug)]
pub struct AccountStore {
    path: Option<PathBuf>,
    loaded: RwLock<Loaded>,
}

impl AccountStore {
    /// Opens the document at `path`; a missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let loaded = Self::read(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            loaded: RwLock::new(loaded),
        })
    }

    /// Creates a store that is never persisted.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            loaded: RwLock::new(Loaded {
                document: AccountsDocument::default(),
                fingerprint: None,
            }),
        }
    }

    /// Returns the path of the backing document, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(path: &Path) -> StoreResult<Loaded> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let document = serde_json::from_slice(&bytes)?;
                let fingerprint = Self::fingerprint(path)?;
                Ok(Loaded {
                    document,
                    fingerprint,
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Loaded {
                document: AccountsDocument::default(),
                fingerprint: None,
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn fingerprint(path: &Path) -> StoreResult<Fingerprint> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(Some((meta.modified().ok(), meta.len()))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Reloads the document if another process changed it.
    ///
    /// # Errors
    ///
    /// Returns an error if the changed document cannot be read.
    pub fn reload_if_changed(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let on_disk = Self::fingerprint(path)?;
        if on_disk == self.loaded.read().fingerprint {
            return Ok(());
        }

        let fresh = Self::read(path)?;
        debug!(path = %path.display(), "reloaded account document");
        *self.loaded.write() = fresh;
        Ok(())
    }

    /// Applies `change` to the freshest document and persists the result.
    fn update<T>(
        &self,
        change: impl FnOnce(&mut AccountsDocument) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut loaded = self.loaded.write();
        // Released when the handle is dropped at the end of the update.
        let _lock = match &self.path {
            Some(path) => {
                let file = open_lock_file(&path.with_extension("lock"))?;
                file.lock_exclusive()?;
                *loaded = Self::read(path)?;
                Some(file)
            }
            None => None,
        };

        let mut document = loaded.document.clone();
        let value = change(&mut document)?;

        if let Some(path) = &self.path {
            Self::write(path, &document)?;
            loaded.fingerprint = Self::fingerprint(path)?;
        }
        loaded.document = document;
        Ok(value)
    }

    fn write(path: &Path, document: &AccountsDocument) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(document)?;
        std::fs::write(&tmp_path, bytes)?;
        std::fs::File::open(&tmp_path)?.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Adds an account and returns its newly assigned user ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateAccount`] if the username is taken.
    pub fn add_account(
        &self,
        username: &str,
        salt: String,
        password_hash: String,
    ) -> StoreResult<UserId> {
        self.update(|document| {
            if document.accounts.iter().any(|a| a.username == username) {
                return Err(StoreError::DuplicateAccount(username.to_string()));
            }
            document.next_user_id += 1;
            let user_id = UserId::new(document.next_user_id);
            document.accounts.push(Account {
                user_id,
                username: username.to_string(),
                salt,
                password_hash,
            });
            Ok(user_id)
        })
    }

    /// Looks up an account by username.
    ///
    /// # Errors
    ///
    /// Returns an error if the document changed and cannot be reloaded.
    pub fn find_account(&self, username: &str) -> StoreResult<Option<Account>> {
        self.reload_if_changed()?;
        Ok(self
            .loaded
            .read()
            .document
            .accounts
            .iter()
            .find(|a| a.username == username)
            .cloned())
    }

    /// Returns the number of accounts.
    pub fn account_count(&self) -> usize {
        self.loaded.read().document.accounts.len()
    }

    /// Records a session token for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be persisted.
    pub fn insert_session(&self, token: &str, user: UserId) -> StoreResult<()> {
        self.update(|document| {
            document.sessions.insert(token.to_string(), user);
            Ok(())
        })
    }

    /// Removes a session token. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be persisted.
    pub fn remove_session(&self, token: &str) -> StoreResult<bool> {
        self.update(|document| Ok(document.sessions.remove(token).is_some()))
    }

    /// Resolves a session token to its user.
    ///
    /// # Errors
    ///
    /// Returns an error if the document changed and cannot be reloaded.
    pub fn session_user(&self, token: &str) -> StoreResult<Option<UserId>> {
        self.reload_if_changed()?;
        Ok(self.loaded.read().document.sessions.get(token).copied())
    }
}
