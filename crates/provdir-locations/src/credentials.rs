//! Authorization for requests to the provider service.
//!
//! The client receives a [`CredentialProvider`] at construction instead of
//! reaching into a shared session.

/// Supplies the `Authorization` header value for each request.
pub trait CredentialProvider: Send + Sync {
    /// Header value to send, or `None` to send no `Authorization` header.
    fn authorization(&self) -> Option<String>;
}

/// A fixed bearer token.
#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken")
            .field("token", &"[redacted]")
            .finish()
    }
}

impl CredentialProvider for BearerToken {
    fn authorization(&self) -> Option<String> {
        Some(format!("Bearer {}", self.token))
    }
}

/// Sends requests unauthenticated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn authorization(&self) -> Option<String> {
        None
    }
}
