//! Version-based reconciliation of submitted states.
//!
//! A submission is a compare-and-swap on the version counter:
//! - equal to the stored state: nothing to do
//! - same version, different content: accepted, stored with `version + 1`
//! - different version: rejected, the stored state is returned so the client
//!   can re-base
//!
//! The read-decide-write sequence runs under a lock keyed by user, so two
//! concurrent submissions against the same version cannot both be accepted.
//! The outcome is queued for delivery before that lock is released, which
//! keeps every connection's view of a user's states in commit order.

use crate::error::ServerResult;
use flowey_protocol::{State, UserId};
use flowey_store::StateStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Result of reconciling one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The submission equals the stored state.
    NoOp,
    /// The submission was stored; deliver this state to every connection of the user.
    Accepted(State),
    /// The submission was stale; deliver the stored state to the submitter only.
    Rejected(State),
}

impl Outcome {
    /// Returns the state to deliver, if any.
    pub fn state(&self) -> Option<&State> {
        match self {
            Outcome::NoOp => None,
            Outcome::Accepted(state) | Outcome::Rejected(state) => Some(state),
        }
    }
}

/// Decides whether submitted states are accepted.
pub struct Reconciler {
    store: Arc<dyn StateStore>,
    user_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl Reconciler {
    /// Creates a reconciler over a state store.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Parses and reconciles a submitted state.
    ///
    /// # Errors
    ///
    /// - [`crate::ServerError::MalformedInput`] if `text` is not a state
    ///   document; the store is not touched
    /// - [`crate::ServerError::Storage`] if the store fails; nothing is persisted
    pub fn reconcile(&self, user: UserId, text: &str) -> ServerResult<Outcome> {
        self.reconcile_then(user, text, |_| {})
    }

    /// Reconciles a submitted state and hands the outcome to `deliver` while
    /// the user's lock is still held.
    ///
    /// Outcomes for one user reach `deliver` in the order they were
    /// committed, so `deliver` must not block.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::reconcile`]. `deliver` is not called on error.
    pub fn reconcile_then<F>(&self, user: UserId, text: &str, deliver: F) -> ServerResult<Outcome>
    where
        F: FnOnce(&Outcome),
    {
        let submitted = State::parse(text)?;

        let lock = self.user_lock(user);
        let result = {
            let _guard = lock.lock();
            let result = self.decide(user, submitted);
            if let Ok(outcome) = &result {
                deliver(outcome);
            }
            result
        };
        self.release_lock(user, lock);
        result
    }

    fn decide(&self, user: UserId, submitted: State) -> ServerResult<Outcome> {
        let current = self.store.get(user)?.unwrap_or_default();

        if submitted == current {
            debug!(user = %user, version = %current.version(), "state unchanged");
            return Ok(Outcome::NoOp);
        }

        if submitted.version() == current.version() {
            let next = submitted.next_version();
            self.store.set(user, &next)?;
            debug!(user = %user, version = %next.version(), "accepted state");
            Ok(Outcome::Accepted(next))
        } else {
            debug!(
                user = %user,
                submitted = %submitted.version(),
                current = %current.version(),
                "rejected stale state"
            );
            Ok(Outcome::Rejected(current))
        }
    }

    fn user_lock(&self, user: UserId) -> Arc<Mutex<()>> {
        Arc::clone(self.user_locks.lock().entry(user).or_default())
    }

    /// Drops the user's lock entry once nobody else holds it.
    fn release_lock(&self, user: UserId, lock: Arc<Mutex<()>>) {
        let mut locks = self.user_locks.lock();
        // The map and `lock` itself.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&user);
        }
    }
}
