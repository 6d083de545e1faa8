use thiserror::Error;

use crate::types::LocationKey;
use crate::validation::ValidationErrors;

/// Errors from the remote provider-locations service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {method} {url}")]
    UnexpectedStatus {
        method: &'static str,
        status: u16,
        url: String,
    },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("response from {context} carried no location collection")]
    MissingLocations { context: String },

    #[error("invalid base URL '{base_url}': {reason}")]
    InvalidBaseUrl { base_url: String, reason: String },
}

/// Errors raised by the location store and the reconciliation cycle.
#[derive(Debug, Error)]
pub enum LocationError {
    /// Required fields were missing or malformed; nothing was sent.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// The outgoing payload does not describe every known location. Nothing
    /// was sent.
    #[error("payload carries {actual} locations but {expected} were expected")]
    CountMismatch { expected: usize, actual: usize },

    /// The outgoing payload contradicts itself about identity or primary
    /// designation. Nothing was sent.
    #[error("inconsistent payload: {0}")]
    InconsistentPayload(String),

    /// The exchange with the remote service failed. Never retried
    /// automatically.
    #[error("network error: {0}")]
    Network(#[from] RemoteError),

    #[error("location {0} not found")]
    NotFound(LocationKey),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A structural change was attempted while a write is in flight.
    #[error("location store is busy with an in-flight write ({phase})")]
    Busy { phase: crate::store::WritePhase },

    /// The editing session that owned the store has been torn down.
    #[error("location store has been detached from its editing session")]
    Detached,
}
