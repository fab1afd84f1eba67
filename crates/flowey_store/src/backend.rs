//! State store trait definition.

use crate::error::StoreResult;
use flowey_protocol::{State, UserId};

/// Persistence of the authoritative `UserId -> State` mapping.
///
/// # Invariants
///
/// - At most one state is kept per user; `set` replaces it entirely
/// - `get` after a successful `set` returns exactly the value written
/// - A failed `set` leaves the previous value in place
/// - Implementations serialize access to a single record internally
///
/// # Implementors
///
/// - [`super::InMemoryStateStore`] - For testing
/// - [`super::FileStateStore`] - For persistent storage
pub trait StateStore: Send + Sync {
    /// Returns the stored state, or `None` if the user has none yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, user: UserId) -> StoreResult<Option<State>>;

    /// Inserts or replaces the state of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; nothing is persisted in that case.
    fn set(&self, user: UserId, state: &State) -> StoreResult<()>;
}
