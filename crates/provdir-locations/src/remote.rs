//! HTTP client for the provider service's location endpoints.
//!
//! - `GET    /providers/{id}/locations` fetches the full collection.
//! - `PATCH  /providers/{id}` (or `/provider_self`) replaces it.
//! - `DELETE /providers/{id}/locations/{location_id}` removes one record.
//!
//! Only fetches are retried.

use std::sync::Arc;
use std::time::Duration;

use provdir_core::AppConfig;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Serialize;

use crate::credentials::CredentialProvider;
use crate::error::RemoteError;
use crate::retry::retry_with_backoff;
use crate::types::{
    LocationId, LocationsEnvelope, LocationsPayload, PrimaryAssertion, PrimaryDesignatorPayload,
    RemoteLocation, ServerLocationSet, WriteEnvelope,
};

/// HTTP tuning for [`RemoteLocations`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Additional attempts for failed fetches. Writes are never retried.
    pub fetch_max_retries: u32,
    pub fetch_backoff_base_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "provdir/0.1 (location-sync)".to_string(),
            fetch_max_retries: 3,
            fetch_backoff_base_ms: 500,
        }
    }
}

impl From<&AppConfig> for ClientSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout_secs: config.request_timeout_secs,
            user_agent: config.user_agent.clone(),
            fetch_max_retries: config.fetch_max_retries,
            fetch_backoff_base_ms: config.fetch_backoff_base_ms,
        }
    }
}

/// Which provider's locations are edited, and through which write endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderTarget {
    pub provider_id: i64,
    /// Write through `/provider_self` (the signed-in provider) rather than
    /// the admin `/providers/{id}` route.
    pub self_service: bool,
}

impl ProviderTarget {
    #[must_use]
    pub fn admin(provider_id: i64) -> Self {
        Self {
            provider_id,
            self_service: false,
        }
    }

    #[must_use]
    pub fn self_service(provider_id: i64) -> Self {
        Self {
            provider_id,
            self_service: true,
        }
    }

    fn write_path(&self) -> String {
        if self.self_service {
            "provider_self".to_string()
        } else {
            format!("providers/{}", self.provider_id)
        }
    }

    fn locations_path(&self) -> String {
        format!("providers/{}/locations", self.provider_id)
    }

    fn location_path(&self, location_id: LocationId) -> String {
        format!("providers/{}/locations/{location_id}", self.provider_id)
    }

    /// The resource id echoed in the write body; omitted for self-service.
    fn resource_id(&self) -> Option<i64> {
        (!self.self_service).then_some(self.provider_id)
    }
}

/// Decoded reply of a write. `locations` is `None` when the remote answered
/// without a collection (for example an empty `204`).
#[derive(Debug, Clone)]
pub struct WriteReply {
    pub locations: Option<Vec<RemoteLocation>>,
    pub primary: PrimaryAssertion,
}

impl WriteReply {
    /// The reply as an authoritative set.
    ///
    /// # Errors
    ///
    /// When the reply carried no collection, returns its primary assertion so
    /// it can be attached to the set read back by a fetch.
    pub fn into_server_set(self) -> Result<ServerLocationSet, PrimaryAssertion> {
        match self.locations {
            Some(locations) => Ok(ServerLocationSet {
                locations,
                primary: self.primary,
            }),
            None => Err(self.primary),
        }
    }
}

#[derive(Serialize)]
struct WriteDocument<A> {
    data: Vec<WriteResource<A>>,
}

#[derive(Serialize)]
struct WriteResource<A> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    attributes: A,
}

/// Client for the provider service's location endpoints.
pub struct RemoteLocations {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
    fetch_max_retries: u32,
    fetch_backoff_base_ms: u64,
}

impl RemoteLocations {
    /// Creates a client for the service rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`RemoteError::InvalidBaseUrl`] if
    /// `base_url` does not parse.
    pub fn new(
        base_url: &str,
        settings: &ClientSettings,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(settings.user_agent.as_str())
            .build()?;

        // Exactly one trailing slash so `Url::join` appends instead of
        // replacing the last path segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let parsed = Url::parse(&normalised).map_err(|e| RemoteError::InvalidBaseUrl {
            base_url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url: parsed,
            credentials,
            fetch_max_retries: settings.fetch_max_retries,
            fetch_backoff_base_ms: settings.fetch_backoff_base_ms,
        })
    }

    /// Fetches the provider's full location collection.
    ///
    /// The response may use either a `locations` or a `data` top-level key.
    /// The primary designation is reported only through per-location flags,
    /// so the set-level assertion is always [`PrimaryAssertion::Unknown`].
    ///
    /// # Errors
    ///
    /// - [`RemoteError::Http`] / [`RemoteError::UnexpectedStatus`] after
    ///   retries are exhausted.
    /// - [`RemoteError::Deserialize`] or [`RemoteError::MissingLocations`]
    ///   if the body has the wrong shape.
    pub async fn fetch_locations(
        &self,
        target: &ProviderTarget,
    ) -> Result<ServerLocationSet, RemoteError> {
        let url = self.url(&target.locations_path())?;
        let body = retry_with_backoff(self.fetch_max_retries, self.fetch_backoff_base_ms, || {
            let url = url.clone();
            async move {
                let request = self.request(Method::GET, url.clone());
                Self::send_checked(request, "GET", &url).await
            }
        })
        .await?;

        let envelope: LocationsEnvelope =
            serde_json::from_str(&body).map_err(|e| RemoteError::Deserialize {
                context: format!("GET {url}"),
                source: e,
            })?;
        let locations = envelope
            .into_locations()
            .ok_or_else(|| RemoteError::MissingLocations {
                context: format!("GET {url}"),
            })?;

        tracing::debug!(
            provider_id = target.provider_id,
            locations = locations.len(),
            "fetched provider locations"
        );
        Ok(ServerLocationSet {
            locations,
            primary: PrimaryAssertion::Unknown,
        })
    }

    /// Replaces the provider's entire location collection. Sent once.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::Http`] on transport failure.
    /// - [`RemoteError::UnexpectedStatus`] on any non-2xx response.
    /// - [`RemoteError::Deserialize`] if a non-empty body has the wrong shape.
    pub async fn replace_locations(
        &self,
        target: &ProviderTarget,
        payload: &LocationsPayload,
    ) -> Result<WriteReply, RemoteError> {
        self.patch(target, payload).await
    }

    /// Updates only `primary_location_id`, for remotes that accept a partial
    /// update of that field. Sent once.
    ///
    /// # Errors
    ///
    /// Same as [`RemoteLocations::replace_locations`].
    pub async fn update_primary(
        &self,
        target: &ProviderTarget,
        primary_location_id: Option<LocationId>,
    ) -> Result<WriteReply, RemoteError> {
        self.patch(
            target,
            &PrimaryDesignatorPayload {
                primary_location_id,
            },
        )
        .await
    }

    /// Deletes one persisted location. Sent once.
    ///
    /// # Errors
    ///
    /// [`RemoteError::Http`] or [`RemoteError::UnexpectedStatus`].
    pub async fn delete_location(
        &self,
        target: &ProviderTarget,
        location_id: LocationId,
    ) -> Result<(), RemoteError> {
        let url = self.url(&target.location_path(location_id))?;
        let request = self.request(Method::DELETE, url.clone());
        Self::send_checked(request, "DELETE", &url).await?;
        tracing::info!(
            provider_id = target.provider_id,
            location_id,
            "deleted provider location"
        );
        Ok(())
    }

    async fn patch<A: Serialize>(
        &self,
        target: &ProviderTarget,
        attributes: &A,
    ) -> Result<WriteReply, RemoteError> {
        let url = self.url(&target.write_path())?;
        let document = WriteDocument {
            data: vec![WriteResource {
                id: target.resource_id(),
                attributes,
            }],
        };
        let request = self.request(Method::PATCH, url.clone()).json(&document);
        let body = Self::send_checked(request, "PATCH", &url).await?;

        if body.trim().is_empty() {
            return Ok(WriteReply {
                locations: None,
                primary: PrimaryAssertion::Unknown,
            });
        }

        let envelope: WriteEnvelope =
            serde_json::from_str(&body).map_err(|e| RemoteError::Deserialize {
                context: format!("PATCH {url}"),
                source: e,
            })?;
        let attributes = envelope
            .data
            .into_first()
            .map(|resource| resource.attributes)
            .unwrap_or_default();

        Ok(WriteReply {
            locations: attributes.locations,
            primary: PrimaryAssertion::from(attributes.primary_location_id),
        })
    }

    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::InvalidBaseUrl {
                base_url: self.base_url.to_string(),
                reason: format!("cannot join '{path}': {e}"),
            })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json");
        match self.credentials.authorization() {
            Some(value) => builder.header(AUTHORIZATION, value),
            None => builder,
        }
    }

    /// Sends a request, asserts a 2xx status, and returns the body text.
    async fn send_checked(
        request: RequestBuilder,
        method: &'static str,
        url: &Url,
    ) -> Result<String, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(method, url = %url, status = status.as_u16(), "remote request failed");
            return Err(RemoteError::UnexpectedStatus {
                method,
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}
