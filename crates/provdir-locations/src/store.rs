//! The authoritative in-memory location set of one provider-editing session.
//!
//! All local mutations happen here, synchronously. The store never talks to
//! the network; [`crate::ReconciliationClient`] composes its operations with
//! remote writes and feeds the authoritative result back through
//! [`LocationStore::load`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::LocationError;
use crate::services::ServiceNormalizer;
use crate::types::{
    blank_to_none, Location, LocationDraft, LocationId, LocationKey, LocationPatch,
    RemoteLocation, WaitlistStatus,
};
use crate::validation::FormatScope;

/// A store shared between the editing session and its in-flight writes.
pub type SharedStore = Arc<Mutex<LocationStore>>;

/// Locks a shared store. A poisoned lock still yields the store: every
/// mutation leaves it consistent before it can panic.
pub(crate) fn lock(store: &SharedStore) -> MutexGuard<'_, LocationStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where the store is in a write cycle.
///
/// `Idle -> Building -> Sending -> Reconciling -> Idle` on success and
/// `... -> Sending -> RolledBack -> Idle` on failure. `Fetching` covers a
/// plain refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePhase {
    #[default]
    Idle,
    Building,
    Sending,
    Reconciling,
    RolledBack,
    Fetching,
}

impl std::fmt::Display for WritePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            WritePhase::Idle => "idle",
            WritePhase::Building => "building",
            WritePhase::Sending => "sending",
            WritePhase::Reconciling => "reconciling",
            WritePhase::RolledBack => "rolled-back",
            WritePhase::Fetching => "fetching",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: u64,
    location: Location,
    /// Fields changed locally since the last load.
    edited: Vec<&'static str>,
}

/// Captured store contents used to roll back an optimistic change.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    entries: Vec<Entry>,
    primary_location_id: Option<LocationId>,
}

impl StoreSnapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct LocationStore {
    entries: Vec<Entry>,
    primary_location_id: Option<LocationId>,
    phase: WritePhase,
    detached: bool,
    next_key: u64,
}

impl LocationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a fresh store for use with [`crate::ReconciliationClient`].
    #[must_use]
    pub fn shared() -> SharedStore {
        Arc::new(Mutex::new(Self::new()))
    }

    // -- read access -------------------------------------------------------

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn primary_location_id(&self) -> Option<LocationId> {
        self.primary_location_id
    }

    /// Locations in display order.
    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.entries.iter().map(|e| &e.location)
    }

    /// Locations in display order paired with a key addressing each: the
    /// server id when persisted, the local key otherwise.
    pub fn keyed(&self) -> impl Iterator<Item = (LocationKey, &Location)> {
        self.entries.iter().map(|e| {
            let key = e
                .location
                .id
                .map_or(LocationKey::Local(e.key), LocationKey::Persisted);
            (key, &e.location)
        })
    }

    /// Like [`LocationStore::keyed`], with the fields each location needs
    /// format-checked: everything for unsaved locations, only locally edited
    /// fields for server-held ones.
    pub(crate) fn validation_targets(
        &self,
    ) -> impl Iterator<Item = (LocationKey, &Location, FormatScope<'_>)> {
        self.entries.iter().map(|e| match e.location.id {
            Some(id) => (
                LocationKey::Persisted(id),
                &e.location,
                FormatScope::Edited(&e.edited),
            ),
            None => (LocationKey::Local(e.key), &e.location, FormatScope::All),
        })
    }

    #[must_use]
    pub fn get(&self, key: LocationKey) -> Option<&Location> {
        self.position(key).map(|idx| &self.entries[idx].location)
    }

    /// Local key of the entry addressed by `key`.
    #[must_use]
    pub fn local_key(&self, key: LocationKey) -> Option<LocationKey> {
        self.position(key)
            .map(|idx| LocationKey::Local(self.entries[idx].key))
    }

    #[must_use]
    pub fn primary(&self) -> Option<&Location> {
        self.primary_location_id
            .and_then(|id| self.get(LocationKey::Persisted(id)))
    }

    #[must_use]
    pub fn phase(&self) -> WritePhase {
        self.phase
    }

    /// `true` while a write or refresh is in flight. Structural mutations
    /// are rejected until it clears.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.phase != WritePhase::Idle
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Marks the store as no longer observed. A write that completes after
    /// this call discards its result instead of applying it.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    /// Checks the primary-location invariants: at most one location carries
    /// the primary id, and a non-null primary id names an existing location.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.primary_location_id {
            None => true,
            Some(id) => self.locations().filter(|l| l.id == Some(id)).count() == 1,
        }
    }

    // -- authoritative load -----------------------------------------------

    /// Replaces the whole set with a server result.
    ///
    /// Services are normalized and blank strings nulled. The primary location
    /// moves to the front; the rest keep the server's relative order. A
    /// `primary_location_id` that matches no returned location is cleared.
    /// Duplicate server ids keep their first occurrence.
    pub fn load(
        &mut self,
        server_locations: Vec<RemoteLocation>,
        primary_location_id: Option<LocationId>,
        normalizer: &ServiceNormalizer,
    ) {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(server_locations.len());
        for remote in server_locations {
            if let Some(id) = remote.id {
                if !seen.insert(id) {
                    tracing::warn!(location_id = id, "server returned a duplicate location id; keeping the first");
                    continue;
                }
            }
            let location = from_remote(remote, normalizer);
            entries.push(Entry {
                key: self.allocate_key(),
                location,
                edited: Vec::new(),
            });
        }

        let primary = match primary_location_id {
            Some(id) if seen.contains(&id) => Some(id),
            Some(id) => {
                tracing::warn!(
                    primary_location_id = id,
                    "primary location missing from server result; clearing it"
                );
                None
            }
            None => None,
        };

        if let Some(id) = primary {
            if let Some(idx) = entries.iter().position(|e| e.location.id == Some(id)) {
                let entry = entries.remove(idx);
                entries.insert(0, entry);
            }
        }

        self.entries = entries;
        self.primary_location_id = primary;
    }

    // -- local mutations ---------------------------------------------------

    /// Appends an unsaved location and returns its local key.
    ///
    /// # Errors
    ///
    /// [`LocationError::Busy`] while a write is in flight.
    pub fn add(&mut self, draft: LocationDraft) -> Result<LocationKey, LocationError> {
        self.ensure_idle()?;
        let key = self.allocate_key();
        self.entries.push(Entry {
            key,
            location: draft.into_location(),
            edited: Vec::new(),
        });
        Ok(LocationKey::Local(key))
    }

    /// Edits one location's fields in place.
    ///
    /// # Errors
    ///
    /// [`LocationError::Busy`] while a write is in flight,
    /// [`LocationError::NotFound`] for an unknown key.
    pub fn update(&mut self, key: LocationKey, patch: LocationPatch) -> Result<(), LocationError> {
        self.ensure_idle()?;
        let idx = self.require(key)?;
        let entry = &mut self.entries[idx];
        for field in patch.touched_fields() {
            if !entry.edited.contains(&field) {
                entry.edited.push(field);
            }
        }
        patch.apply(&mut entry.location);
        Ok(())
    }

    /// Removes a location. Removing the primary clears the designation; no
    /// other location is promoted.
    ///
    /// # Errors
    ///
    /// [`LocationError::Busy`] while a write is in flight,
    /// [`LocationError::NotFound`] for an unknown key.
    pub fn remove(&mut self, key: LocationKey) -> Result<Location, LocationError> {
        self.ensure_idle()?;
        let idx = self.require(key)?;
        let removed = self.entries.remove(idx).location;
        if removed.id.is_some() && removed.id == self.primary_location_id {
            self.primary_location_id = None;
        }
        Ok(removed)
    }

    /// Designates a persisted location as primary and moves it to the front.
    ///
    /// # Errors
    ///
    /// [`LocationError::NotFound`] for an unknown key,
    /// [`LocationError::InvalidOperation`] for an unsaved location,
    /// [`LocationError::Busy`] while a write is in flight.
    pub fn set_primary(&mut self, key: LocationKey) -> Result<LocationId, LocationError> {
        self.ensure_idle()?;
        let idx = self.require(key)?;
        let Some(id) = self.entries[idx].location.id else {
            return Err(LocationError::InvalidOperation(format!(
                "location {key} has not been saved and cannot become primary"
            )));
        };
        let entry = self.entries.remove(idx);
        self.entries.insert(0, entry);
        self.primary_location_id = Some(id);
        Ok(id)
    }

    /// Swaps a location with its predecessor. A no-op at the top.
    ///
    /// # Errors
    ///
    /// [`LocationError::Busy`] while a write is in flight,
    /// [`LocationError::NotFound`] for an unknown key.
    pub fn move_up(&mut self, key: LocationKey) -> Result<(), LocationError> {
        self.ensure_idle()?;
        let idx = self.require(key)?;
        if idx > 0 {
            self.entries.swap(idx - 1, idx);
        }
        Ok(())
    }

    /// Swaps a location with its successor. A no-op at the bottom.
    ///
    /// # Errors
    ///
    /// [`LocationError::Busy`] while a write is in flight,
    /// [`LocationError::NotFound`] for an unknown key.
    pub fn move_down(&mut self, key: LocationKey) -> Result<(), LocationError> {
        self.ensure_idle()?;
        let idx = self.require(key)?;
        if idx + 1 < self.entries.len() {
            self.entries.swap(idx, idx + 1);
        }
        Ok(())
    }

    /// Rearranges the display order. `order` must name every location
    /// exactly once.
    ///
    /// # Errors
    ///
    /// [`LocationError::Busy`] while a write is in flight,
    /// [`LocationError::NotFound`] for an unknown key,
    /// [`LocationError::InvalidOperation`] if `order` is not a permutation of
    /// the current set.
    pub fn reorder(&mut self, order: &[LocationKey]) -> Result<(), LocationError> {
        self.ensure_idle()?;
        if order.len() != self.entries.len() {
            return Err(LocationError::InvalidOperation(format!(
                "new order names {} locations but the store holds {}",
                order.len(),
                self.entries.len()
            )));
        }
        let mut indices = Vec::with_capacity(order.len());
        let mut seen = HashSet::new();
        for &key in order {
            let idx = self.require(key)?;
            if !seen.insert(idx) {
                return Err(LocationError::InvalidOperation(format!(
                    "location {key} appears more than once in the new order"
                )));
            }
            indices.push(idx);
        }
        let reordered = indices
            .into_iter()
            .map(|idx| self.entries[idx].clone())
            .collect();
        self.entries = reordered;
        Ok(())
    }

    // -- write-cycle plumbing ---------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            entries: self.entries.clone(),
            primary_location_id: self.primary_location_id,
        }
    }

    /// Restores a snapshot taken earlier in the same session.
    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        self.entries = snapshot.entries;
        self.primary_location_id = snapshot.primary_location_id;
    }

    pub(crate) fn ensure_idle(&self) -> Result<(), LocationError> {
        if self.is_busy() {
            Err(LocationError::Busy { phase: self.phase })
        } else {
            Ok(())
        }
    }

    pub(crate) fn set_phase(&mut self, phase: WritePhase) {
        tracing::trace!(from = %self.phase, to = %phase, "write phase transition");
        self.phase = phase;
    }

    fn allocate_key(&mut self) -> u64 {
        self.next_key += 1;
        self.next_key
    }

    fn position(&self, key: LocationKey) -> Option<usize> {
        match key {
            LocationKey::Persisted(id) => self.entries.iter().position(|e| e.location.id == Some(id)),
            LocationKey::Local(local) => self.entries.iter().position(|e| e.key == local),
        }
    }

    fn require(&self, key: LocationKey) -> Result<usize, LocationError> {
        self.position(key).ok_or(LocationError::NotFound(key))
    }
}

fn from_remote(remote: RemoteLocation, normalizer: &ServiceNormalizer) -> Location {
    let services = normalizer.to_canonical(remote.raw_services());
    Location {
        id: remote.id,
        name: blank_to_none(remote.name),
        phone: blank_to_none(remote.phone),
        address1: blank_to_none(remote.address_1),
        address2: blank_to_none(remote.address_2),
        city: blank_to_none(remote.city),
        state: blank_to_none(remote.state),
        zip: blank_to_none(remote.zip),
        services,
        in_home_waitlist: waitlist(remote.id, "in_home_waitlist", remote.in_home_waitlist),
        in_clinic_waitlist: waitlist(remote.id, "in_clinic_waitlist", remote.in_clinic_waitlist),
    }
}

fn waitlist(
    location_id: Option<LocationId>,
    field: &'static str,
    raw: Option<String>,
) -> Option<WaitlistStatus> {
    let status = raw.as_deref().and_then(WaitlistStatus::parse)?;
    if !status.is_recognized() {
        tracing::warn!(
            location_id,
            field,
            value = status.as_str(),
            "unrecognized waitlist status; keeping it verbatim"
        );
    }
    Some(status)
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
