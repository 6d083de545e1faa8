//! Write cycles against the replace-all endpoint.
//!
//! Each operation applies one local mutation optimistically, builds a payload
//! describing the whole set, checks it with [`ConflictGuard::preflight`],
//! sends it once, loads the authoritative reply into the store and checks it
//! with [`ConflictGuard::postflight`]:
//!
//! ```text
//! Idle -> Building -> Sending -> Reconciling -> Idle
//!                            \-> RolledBack  -> Idle
//! ```
//!
//! A failed exchange restores the pre-write snapshot and then refetches the
//! full set, since the remote contents are uncertain after a failed
//! replace-all. Writes are never retried automatically.

use std::sync::Arc;

use provdir_core::{AppConfig, PrimaryUpdateMode, ServiceFormat};

use crate::credentials::CredentialProvider;
use crate::error::{LocationError, RemoteError};
use crate::guard::{ConflictGuard, DataIntegrityWarning};
use crate::payload::build_payload;
use crate::remote::{ClientSettings, ProviderTarget, RemoteLocations, WriteReply};
use crate::services::ServiceNormalizer;
use crate::store::{lock, LocationStore, SharedStore, StoreSnapshot, WritePhase};
use crate::types::{
    LocationDraft, LocationId, LocationKey, LocationPatch, LocationsPayload, ServerLocationSet,
};

/// What a completed write cycle did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// `false` when the store was detached before the reply arrived and the
    /// result was discarded.
    pub applied: bool,
    /// Postflight disagreements between the intended and the returned
    /// primary designation.
    pub warnings: Vec<DataIntegrityWarning>,
    /// A corrective refetch replaced the reply with a fresh server read.
    pub refetched: bool,
}

impl WriteOutcome {
    fn applied() -> Self {
        Self {
            applied: true,
            ..Self::default()
        }
    }

    fn discarded() -> Self {
        Self::default()
    }
}

/// One user intent, applied to the store before the payload is built.
#[derive(Debug, Clone)]
enum WriteIntent {
    Flush,
    Add(LocationDraft),
    Update(LocationKey, LocationPatch),
    Remove(LocationKey),
    Reorder(Vec<LocationKey>),
    MoveUp(LocationKey),
    MoveDown(LocationKey),
    SetPrimary(LocationKey),
}

impl WriteIntent {
    fn label(&self) -> &'static str {
        match self {
            WriteIntent::Flush => "flush",
            WriteIntent::Add(_) => "add",
            WriteIntent::Update(..) => "update",
            WriteIntent::Remove(_) => "remove",
            WriteIntent::Reorder(_) => "reorder",
            WriteIntent::MoveUp(_) => "move-up",
            WriteIntent::MoveDown(_) => "move-down",
            WriteIntent::SetPrimary(_) => "set-primary",
        }
    }

    /// How the number of locations changes. The payload must describe
    /// exactly `count_before + delta` locations.
    fn count_delta(&self) -> isize {
        match self {
            WriteIntent::Add(_) => 1,
            WriteIntent::Remove(_) => -1,
            _ => 0,
        }
    }

    fn apply(self, store: &mut LocationStore) -> Result<(), LocationError> {
        match self {
            WriteIntent::Flush => Ok(()),
            WriteIntent::Add(draft) => store.add(draft).map(drop),
            WriteIntent::Update(key, patch) => store.update(key, patch),
            WriteIntent::Remove(key) => store.remove(key).map(drop),
            WriteIntent::Reorder(order) => store.reorder(&order),
            WriteIntent::MoveUp(key) => store.move_up(key),
            WriteIntent::MoveDown(key) => store.move_down(key),
            WriteIntent::SetPrimary(key) => store.set_primary(key).map(drop),
        }
    }
}

enum PreparedRequest {
    Full(LocationsPayload),
    Designator(Option<LocationId>),
}

struct Prepared {
    snapshot: StoreSnapshot,
    request: PreparedRequest,
    intended_primary: Option<LocationId>,
}

/// Keeps one provider's [`LocationStore`] in step with the remote service.
///
/// Writes issued through one client are processed strictly in submission
/// order: each waits for the previous cycle to finish before its payload is
/// built.
pub struct ReconciliationClient {
    remote: RemoteLocations,
    normalizer: ServiceNormalizer,
    target: ProviderTarget,
    service_format: ServiceFormat,
    primary_update: PrimaryUpdateMode,
    lane: tokio::sync::Mutex<()>,
}

impl ReconciliationClient {
    #[must_use]
    pub fn new(remote: RemoteLocations, target: ProviderTarget, normalizer: ServiceNormalizer) -> Self {
        Self {
            remote,
            normalizer,
            target,
            service_format: ServiceFormat::default(),
            primary_update: PrimaryUpdateMode::default(),
            lane: tokio::sync::Mutex::new(()),
        }
    }

    /// Builds a client from application configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::Network`] if the HTTP client cannot be built
    /// or the configured base URL is invalid.
    pub fn from_config(
        config: &AppConfig,
        provider_id: i64,
        credentials: Arc<dyn CredentialProvider>,
        normalizer: ServiceNormalizer,
    ) -> Result<Self, LocationError> {
        let remote = RemoteLocations::new(
            &config.api_base_url,
            &ClientSettings::from(config),
            credentials,
        )?;
        let target = ProviderTarget {
            provider_id,
            self_service: config.self_service,
        };
        Ok(Self::new(remote, target, normalizer)
            .with_service_format(config.service_format)
            .with_primary_update(config.primary_update))
    }

    #[must_use]
    pub fn with_service_format(mut self, format: ServiceFormat) -> Self {
        self.service_format = format;
        self
    }

    #[must_use]
    pub fn with_primary_update(mut self, mode: PrimaryUpdateMode) -> Self {
        self.primary_update = mode;
        self
    }

    #[must_use]
    pub fn target(&self) -> ProviderTarget {
        self.target
    }

    #[must_use]
    pub fn normalizer(&self) -> &ServiceNormalizer {
        &self.normalizer
    }

    /// Builds the payload the next write would send, without sending it.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::Validation`] on invalid fields.
    pub fn build_payload(&self, store: &LocationStore) -> Result<LocationsPayload, LocationError> {
        build_payload(store, self.service_format)
    }

    // -- public operations -------------------------------------------------

    /// Replaces the store with a fresh read of the remote collection.
    ///
    /// # Errors
    ///
    /// - [`LocationError::Busy`] / [`LocationError::Detached`] if the store
    ///   cannot be refreshed right now.
    /// - [`LocationError::Network`] if the fetch fails; the store keeps its
    ///   previous contents.
    pub async fn refresh(&self, store: &SharedStore) -> Result<(), LocationError> {
        let _lane = self.lane.lock().await;
        {
            let mut guard = lock(store);
            if guard.is_detached() {
                return Err(LocationError::Detached);
            }
            guard.ensure_idle()?;
            guard.set_phase(WritePhase::Fetching);
        }
        let result = self.refetch_into(store).await;
        lock(store).set_phase(WritePhase::Idle);
        result.map(drop).map_err(LocationError::from)
    }

    /// Sends the current local state as-is, e.g. after field edits made
    /// directly on the store.
    ///
    /// # Errors
    ///
    /// See [`ReconciliationClient::add_location`].
    pub async fn flush(&self, store: &SharedStore) -> Result<WriteOutcome, LocationError> {
        self.run_write(store, WriteIntent::Flush).await
    }

    /// Appends a new location and writes the full set.
    ///
    /// # Errors
    ///
    /// - [`LocationError::Validation`], [`LocationError::CountMismatch`] or
    ///   [`LocationError::InconsistentPayload`] before anything is sent; the
    ///   store is left as it was.
    /// - [`LocationError::Network`] if the exchange fails; the store is
    ///   rolled back and refetched.
    /// - [`LocationError::Busy`] / [`LocationError::Detached`].
    pub async fn add_location(
        &self,
        store: &SharedStore,
        draft: LocationDraft,
    ) -> Result<WriteOutcome, LocationError> {
        self.run_write(store, WriteIntent::Add(draft)).await
    }

    /// Edits one location's fields and writes the full set.
    ///
    /// # Errors
    ///
    /// As [`ReconciliationClient::add_location`], plus
    /// [`LocationError::NotFound`].
    pub async fn update_location(
        &self,
        store: &SharedStore,
        key: LocationKey,
        patch: LocationPatch,
    ) -> Result<WriteOutcome, LocationError> {
        self.run_write(store, WriteIntent::Update(key, patch)).await
    }

    /// Drops a location from the set and writes the rest; the omission
    /// deletes it remotely.
    ///
    /// # Errors
    ///
    /// As [`ReconciliationClient::add_location`], plus
    /// [`LocationError::NotFound`].
    pub async fn remove_location(
        &self,
        store: &SharedStore,
        key: LocationKey,
    ) -> Result<WriteOutcome, LocationError> {
        self.run_write(store, WriteIntent::Remove(key)).await
    }

    /// Applies a new display order and writes the full set.
    ///
    /// # Errors
    ///
    /// As [`ReconciliationClient::add_location`], plus
    /// [`LocationError::NotFound`] and [`LocationError::InvalidOperation`].
    pub async fn reorder(
        &self,
        store: &SharedStore,
        new_order: Vec<LocationKey>,
    ) -> Result<WriteOutcome, LocationError> {
        self.run_write(store, WriteIntent::Reorder(new_order)).await
    }

    /// # Errors
    ///
    /// As [`ReconciliationClient::reorder`].
    pub async fn move_up(
        &self,
        store: &SharedStore,
        key: LocationKey,
    ) -> Result<WriteOutcome, LocationError> {
        self.run_write(store, WriteIntent::MoveUp(key)).await
    }

    /// # Errors
    ///
    /// As [`ReconciliationClient::reorder`].
    pub async fn move_down(
        &self,
        store: &SharedStore,
        key: LocationKey,
    ) -> Result<WriteOutcome, LocationError> {
        self.run_write(store, WriteIntent::MoveDown(key)).await
    }

    /// Designates a persisted location as primary and writes it, either as
    /// the full set or, when configured, as the designator alone.
    ///
    /// # Errors
    ///
    /// As [`ReconciliationClient::add_location`], plus
    /// [`LocationError::NotFound`] and [`LocationError::InvalidOperation`]
    /// for an unsaved location.
    pub async fn set_primary(
        &self,
        store: &SharedStore,
        key: LocationKey,
    ) -> Result<WriteOutcome, LocationError> {
        self.run_write(store, WriteIntent::SetPrimary(key)).await
    }

    /// Deletes one location through the single-record endpoint, then
    /// refetches the full set. An unsaved location is only removed locally.
    ///
    /// # Errors
    ///
    /// - [`LocationError::NotFound`], [`LocationError::Busy`],
    ///   [`LocationError::Detached`].
    /// - [`LocationError::Network`] if the delete fails (the store is rolled
    ///   back and refetched) or if the follow-up refetch fails (the deleted
    ///   location is dropped locally).
    pub async fn delete_location(
        &self,
        store: &SharedStore,
        key: LocationKey,
    ) -> Result<WriteOutcome, LocationError> {
        let _lane = self.lane.lock().await;
        let (snapshot, location_id) = {
            let mut guard = lock(store);
            if guard.is_detached() {
                return Err(LocationError::Detached);
            }
            guard.ensure_idle()?;
            let location = guard.get(key).ok_or(LocationError::NotFound(key))?;
            let Some(location_id) = location.id else {
                guard.remove(key)?;
                return Ok(WriteOutcome::applied());
            };
            let snapshot = guard.snapshot();
            guard.set_phase(WritePhase::Sending);
            (snapshot, location_id)
        };

        if let Err(err) = self.remote.delete_location(&self.target, location_id).await {
            self.roll_back(store, snapshot, "delete").await;
            return Err(err.into());
        }

        let outcome = match self.refetch_into(store).await {
            Ok(applied) => Ok(WriteOutcome {
                applied,
                refetched: applied,
                ..WriteOutcome::default()
            }),
            Err(err) => {
                tracing::warn!(
                    provider_id = self.target.provider_id,
                    location_id,
                    error = %err,
                    "refetch after delete failed; dropping the location locally"
                );
                let mut guard = lock(store);
                guard.set_phase(WritePhase::Idle);
                if !guard.is_detached() {
                    let _ = guard.remove(LocationKey::Persisted(location_id));
                }
                Err(err.into())
            }
        };
        lock(store).set_phase(WritePhase::Idle);
        outcome
    }

    // -- the write cycle ---------------------------------------------------

    async fn run_write(
        &self,
        store: &SharedStore,
        intent: WriteIntent,
    ) -> Result<WriteOutcome, LocationError> {
        let _lane = self.lane.lock().await;
        let label = intent.label();

        let prepared = {
            let mut guard = lock(store);
            self.prepare(&mut guard, intent)?
        };
        self.exchange(store, prepared, label).await
    }

    /// Sends an already-built payload after checking it against
    /// `expected_count`, then reconciles the reply like any other write.
    ///
    /// # Errors
    ///
    /// - [`LocationError::CountMismatch`] or
    ///   [`LocationError::InconsistentPayload`] before anything is sent.
    /// - [`LocationError::Network`] if the exchange fails; the store is
    ///   rolled back and refetched.
    /// - [`LocationError::Busy`] / [`LocationError::Detached`].
    pub async fn send(
        &self,
        store: &SharedStore,
        payload: LocationsPayload,
        expected_count: usize,
    ) -> Result<WriteOutcome, LocationError> {
        let _lane = self.lane.lock().await;
        let prepared = {
            let mut guard = lock(store);
            if guard.is_detached() {
                return Err(LocationError::Detached);
            }
            guard.ensure_idle()?;
            ConflictGuard::preflight(&payload, expected_count)?;
            guard.set_phase(WritePhase::Sending);
            Prepared {
                snapshot: guard.snapshot(),
                intended_primary: payload.primary_location_id,
                request: PreparedRequest::Full(payload),
            }
        };
        self.exchange(store, prepared, "send").await
    }

    async fn exchange(
        &self,
        store: &SharedStore,
        prepared: Prepared,
        label: &'static str,
    ) -> Result<WriteOutcome, LocationError> {
        let reply = match &prepared.request {
            PreparedRequest::Full(payload) => {
                self.remote.replace_locations(&self.target, payload).await
            }
            PreparedRequest::Designator(primary) => {
                self.remote.update_primary(&self.target, *primary).await
            }
        };

        match reply {
            Ok(reply) => {
                self.reconcile(store, reply, prepared.intended_primary, label)
                    .await
            }
            Err(err) => {
                tracing::warn!(
                    provider_id = self.target.provider_id,
                    intent = label,
                    error = %err,
                    "location write failed; rolling back"
                );
                self.roll_back(store, prepared.snapshot, label).await;
                Err(err.into())
            }
        }
    }

    /// Idle -> Building -> Sending, all under one lock. On any failure the
    /// store is restored and left idle.
    fn prepare(
        &self,
        store: &mut LocationStore,
        intent: WriteIntent,
    ) -> Result<Prepared, LocationError> {
        if store.is_detached() {
            return Err(LocationError::Detached);
        }
        store.ensure_idle()?;

        let snapshot = store.snapshot();
        let expected = snapshot.len().checked_add_signed(intent.count_delta());
        let designator_only = matches!(intent, WriteIntent::SetPrimary(_))
            && self.primary_update == PrimaryUpdateMode::DesignatorOnly;

        intent.apply(store)?;
        store.set_phase(WritePhase::Building);

        let request = if designator_only {
            Ok(PreparedRequest::Designator(store.primary_location_id()))
        } else {
            build_payload(store, self.service_format).and_then(|payload| {
                ConflictGuard::preflight(&payload, expected.unwrap_or_default())?;
                Ok(PreparedRequest::Full(payload))
            })
        };

        match request {
            Ok(request) => {
                store.set_phase(WritePhase::Sending);
                Ok(Prepared {
                    snapshot,
                    request,
                    intended_primary: store.primary_location_id(),
                })
            }
            Err(err) => {
                store.restore(snapshot);
                store.set_phase(WritePhase::Idle);
                Err(err)
            }
        }
    }

    /// Sending -> Reconciling -> Idle.
    async fn reconcile(
        &self,
        store: &SharedStore,
        reply: WriteReply,
        intended_primary: Option<LocationId>,
        label: &'static str,
    ) -> Result<WriteOutcome, LocationError> {
        let server_set = match reply.into_server_set() {
            Ok(set) => set,
            // The fetch never asserts a primary; keep what the write reply said.
            Err(asserted) => match self.remote.fetch_locations(&self.target).await {
                Ok(set) => ServerLocationSet {
                    primary: asserted,
                    ..set
                },
                Err(err) => {
                    tracing::warn!(
                        provider_id = self.target.provider_id,
                        intent = label,
                        error = %err,
                        "write accepted but the result could not be read back"
                    );
                    lock(store).set_phase(WritePhase::Idle);
                    return Err(err.into());
                }
            },
        };

        let warning = {
            let mut guard = lock(store);
            if guard.is_detached() {
                guard.set_phase(WritePhase::Idle);
                tracing::debug!(intent = label, "store detached; discarding write result");
                return Ok(WriteOutcome::discarded());
            }
            guard.set_phase(WritePhase::Reconciling);
            self.apply_server_set(&mut guard, server_set, intended_primary, label)
        };

        let mut outcome = WriteOutcome::applied();
        if let Some(warning) = warning {
            outcome.warnings.push(warning);
            outcome.refetched = match self.refetch_into(store).await {
                Ok(applied) => applied,
                Err(err) => {
                    tracing::warn!(
                        provider_id = self.target.provider_id,
                        error = %err,
                        "corrective refetch failed; keeping the write result"
                    );
                    false
                }
            };
        }
        lock(store).set_phase(WritePhase::Idle);
        Ok(outcome)
    }

    /// Loads an authoritative write result and runs the postflight check.
    fn apply_server_set(
        &self,
        store: &mut LocationStore,
        server_set: ServerLocationSet,
        intended_primary: Option<LocationId>,
        label: &'static str,
    ) -> Option<DataIntegrityWarning> {
        let check = ConflictGuard::postflight(&server_set, intended_primary);
        let primary = server_set.resolve_primary(intended_primary);
        let count = server_set.locations.len();
        store.load(server_set.locations, primary, &self.normalizer);
        tracing::info!(
            provider_id = self.target.provider_id,
            intent = label,
            locations = count,
            primary_location_id = store.primary_location_id(),
            "reconciled location set"
        );
        check.err()
    }

    /// Sending -> RolledBack -> Idle. Restores the snapshot, then tries to
    /// replace it with a fresh server read.
    async fn roll_back(&self, store: &SharedStore, snapshot: StoreSnapshot, label: &'static str) {
        {
            let mut guard = lock(store);
            if guard.is_detached() {
                guard.set_phase(WritePhase::Idle);
                return;
            }
            guard.restore(snapshot);
            guard.set_phase(WritePhase::RolledBack);
        }

        if let Err(err) = self.refetch_into(store).await {
            tracing::warn!(
                provider_id = self.target.provider_id,
                intent = label,
                error = %err,
                "refetch after rollback failed; showing the pre-write state"
            );
        }
        lock(store).set_phase(WritePhase::Idle);
    }

    /// Fetches the full set and loads it. Returns `false` if the store was
    /// detached meanwhile. Leaves the write phase untouched.
    async fn refetch_into(&self, store: &SharedStore) -> Result<bool, RemoteError> {
        let server_set = self.remote.fetch_locations(&self.target).await?;
        let mut guard = lock(store);
        if guard.is_detached() {
            return Ok(false);
        }
        let fallback = guard.primary_location_id();
        let primary = server_set.resolve_primary(fallback);
        guard.load(server_set.locations, primary, &self.normalizer);
        tracing::debug!(
            provider_id = self.target.provider_id,
            locations = guard.len(),
            primary_location_id = guard.primary_location_id(),
            "loaded server location set"
        );
        Ok(true)
    }
}
