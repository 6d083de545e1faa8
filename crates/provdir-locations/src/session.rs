//! Ownership of one provider-editing session.

use crate::store::{lock, LocationStore, SharedStore, WritePhase};

/// Exclusive owner of the [`LocationStore`] for one editing session.
///
/// Writes in flight may hold clones of [`EditingSession::store`]. Dropping
/// the session detaches the store, so a write that completes afterwards
/// discards its result instead of applying it.
pub struct EditingSession {
    store: SharedStore,
}

impl EditingSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: LocationStore::shared(),
        }
    }

    /// The shared store, for handing to [`crate::ReconciliationClient`].
    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Busy flag: `true` while a write or refresh is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        lock(&self.store).is_busy()
    }

    #[must_use]
    pub fn phase(&self) -> WritePhase {
        lock(&self.store).phase()
    }

    /// Runs `f` against the store under its lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut LocationStore) -> R) -> R {
        f(&mut lock(&self.store))
    }
}

impl Default for EditingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EditingSession {
    fn drop(&mut self) {
        lock(&self.store).detach();
        tracing::debug!("editing session closed; store detached");
    }
}
