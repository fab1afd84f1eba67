//! # Flowey Store
//!
//! Persistence for the authoritative per-user state and for accounts.
//!
//! Stores perform no business logic: they read and upsert what they are
//! given and report failures without retrying.
//!
//! ## Available Stores
//!
//! - [`InMemoryStateStore`] - For testing and ephemeral servers
//! - [`FileStateStore`] - Append-only JSON-lines log with recovery and compaction
//! - [`AccountStore`] - Accounts and session tokens in a single JSON document
//!
//! [`DirectoryLock`] keeps a second server process off a data directory.
//!
//! ## Example
//!
//! ```rust
//! use flowey_protocol::{State, UserId};
//! use flowey_store::{InMemoryStateStore, StateStore};
//!
//! let store = InMemoryStateStore::new();
//! let user = UserId::new(1);
//! assert!(store.get(user).unwrap().is_none());
//!
//! let state = State::parse(r#"{"version":1,"text":"hello"}"#).unwrap();
//! store.set(user, &state).unwrap();
//! assert_eq!(store.get(user).unwrap(), Some(state));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod accounts;
mod backend;
mod error;
mod file;
mod lock;
mod memory;

pub use accounts::{Account, AccountStore};
pub use backend::StateStore;
pub use error::{StoreError, StoreResult};
pub use file::{FileStateStore, DEFAULT_COMPACT_THRESHOLD};
pub use lock::DirectoryLock;
pub use memory::InMemoryStateStore;
