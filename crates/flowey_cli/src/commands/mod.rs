//! CLI command implementations.

pub mod serve;
pub mod session;
pub mod user;

use flowey_store::{AccountStore, DirectoryLock};
use flowey_sync_server::SessionAuthenticator;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// States log inside the data directory.
pub const STATES_FILE: &str = "states.log";
/// Accounts document inside the data directory.
pub const ACCOUNTS_FILE: &str = "accounts.json";

/// Location of the server's on-disk data.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Uses `explicit` if given, otherwise `$XDG_DATA_HOME/flowey`.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let root = match explicit {
            Some(path) => path,
            None => dirs::data_dir()
                .ok_or("Could not determine the data directory, pass --data-dir")?
                .join("flowey"),
        };
        Ok(Self { root })
    }

    /// Returns the directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the states log.
    pub fn states_path(&self) -> PathBuf {
        self.root.join(STATES_FILE)
    }

    /// Returns the path of the accounts document.
    pub fn accounts_path(&self) -> PathBuf {
        self.root.join(ACCOUNTS_FILE)
    }

    /// Creates the directory if needed.
    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Takes exclusive ownership of the directory for a server's lifetime.
    pub fn lock(&self) -> Result<DirectoryLock, Box<dyn std::error::Error>> {
        Ok(DirectoryLock::acquire(&self.root)?)
    }

    /// Opens the accounts document and wraps it in an authenticator.
    pub fn authenticator(&self) -> Result<SessionAuthenticator, Box<dyn std::error::Error>> {
        let accounts = AccountStore::open(&self.accounts_path())?;
        Ok(SessionAuthenticator::new(Arc::new(accounts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_directory_wins() {
        let dir = tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(data_dir.root(), dir.path());
        assert_eq!(data_dir.states_path(), dir.path().join("states.log"));
        assert_eq!(data_dir.accounts_path(), dir.path().join("accounts.json"));
    }

    #[test]
    fn create_makes_nested_directory() {
        let dir = tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(dir.path().join("a").join("flowey"))).unwrap();
        data_dir.create().unwrap();
        assert!(data_dir.root().is_dir());
    }

    #[test]
    fn a_second_server_cannot_take_the_directory() {
        let dir = tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(dir.path().to_path_buf())).unwrap();

        let held = data_dir.lock().unwrap();
        assert!(data_dir.lock().is_err());
        drop(held);
        assert!(data_dir.lock().is_ok());
    }
}
