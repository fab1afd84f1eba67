//! In-memory state store for testing.

use crate::backend::StateStore;
use crate::error::StoreResult;
use flowey_protocol::{State, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory state store.
///
/// This store keeps all states in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral servers that don't need persistence
///
/// # Example
///
/// ```rust
/// use flowey_protocol::{State, UserId};
/// use flowey_store::{InMemoryStateStore, StateStore};
///
/// let store = InMemoryStateStore::new();
/// store.set(UserId::new(7), &State::default()).unwrap();
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<UserId, State>>,
}

impl InMemoryStateStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing states.
    #[must_use]
    pub fn with_states(states: impl IntoIterator<Item = (UserId, State)>) -> Self {
        Self {
            states: RwLock::new(states.into_iter().collect()),
        }
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
}

impl StateStore for InMemoryStateStore {
    fn get(&self, user: UserId) -> StoreResult<Option<State>> {
        Ok(self.states.read().get(&user).cloned())
    }

    fn set(&self, user: UserId, state: &State) -> StoreResult<()> {
        self.states.write().insert(user, state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(json: &str) -> State {
        State::parse(json).unwrap()
    }

    #[test]
    fn memory_get_absent() {
        let store = InMemoryStateStore::new();
        assert!(store.get(UserId::new(1)).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn memory_set_and_get() {
        let store = InMemoryStateStore::new();
        let value = state(r#"{"version":3,"text":"a"}"#);
        store.set(UserId::new(1), &value).unwrap();
        assert_eq!(store.get(UserId::new(1)).unwrap(), Some(value));
        assert!(store.get(UserId::new(2)).unwrap().is_none());
    }

    #[test]
    fn memory_set_overwrites() {
        let store = InMemoryStateStore::new();
        store
            .set(UserId::new(1), &state(r#"{"version":1,"text":"a"}"#))
            .unwrap();
        let newer = state(r#"{"version":2,"text":"b"}"#);
        store.set(UserId::new(1), &newer).unwrap();
        assert_eq!(store.get(UserId::new(1)).unwrap(), Some(newer));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_with_states() {
        let store = InMemoryStateStore::with_states([
            (UserId::new(1), State::default()),
            (UserId::new(2), state(r#"{"version":9}"#)),
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get(UserId::new(2)).unwrap().map(|s| s.version().get()),
            Some(9)
        );
    }
}
