//! Client-side location management for provider profiles.
//!
//! A provider's locations live in a [`LocationStore`] owned by an
//! [`EditingSession`]. Every change goes to the remote service as a full
//! replacement of the collection through [`ReconciliationClient`], which
//! guards each payload with [`ConflictGuard`] and loads the server's answer
//! back into the store.

pub mod credentials;
pub mod error;
pub mod guard;
pub mod payload;
pub mod reconcile;
pub mod remote;
mod retry;
pub mod services;
pub mod session;
pub mod store;
pub mod types;
pub mod validation;

pub use credentials::{Anonymous, BearerToken, CredentialProvider};
pub use error::{LocationError, RemoteError};
pub use guard::{ConflictGuard, DataIntegrityWarning};
pub use payload::build_payload;
pub use reconcile::{ReconciliationClient, WriteOutcome};
pub use remote::{ClientSettings, ProviderTarget, RemoteLocations, WriteReply};
pub use services::ServiceNormalizer;
pub use session::EditingSession;
pub use store::{LocationStore, SharedStore, StoreSnapshot, WritePhase};
pub use types::{
    FieldUpdate, Location, LocationDraft, LocationId, LocationKey, LocationPatch,
    LocationsPayload, PrimaryAssertion, RawService, RemoteLocation, ServerLocationSet,
    ServiceRef, WaitlistStatus,
};
pub use validation::{FieldError, FormatScope, ValidationErrors};
