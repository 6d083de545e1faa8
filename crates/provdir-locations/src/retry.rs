//! Back-off for reading the location collection.
//!
//! A `GET` of the full set is idempotent, so a flaky connection or a `5xx`
//! from the provider service is retried here. Writes never come through this
//! module: a replace-all `PATCH` built from an old snapshot could revert
//! edits made since, so the user re-issues it instead.

use std::future::Future;
use std::time::Duration;

use crate::error::RemoteError;

/// Longest pause between two fetch attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Whether a failed fetch may succeed if simply tried again.
///
/// Transport timeouts, refused connections and `5xx` statuses qualify. A
/// `4xx`, a body that does not decode, or a bad base URL will fail the same
/// way every time.
pub(crate) fn is_retriable(err: &RemoteError) -> bool {
    match err {
        RemoteError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        RemoteError::UnexpectedStatus { status, .. } => (500..600).contains(status),
        RemoteError::Deserialize { .. }
        | RemoteError::MissingLocations { .. }
        | RemoteError::InvalidBaseUrl { .. } => false,
    }
}

/// Pause before retry number `retry` (1-based): `base_ms` doubled per retry,
/// capped at [`MAX_BACKOFF`], then scaled by `jitter` in `0.75..=1.25`.
fn backoff_delay(retry: u32, base_ms: u64, jitter: f64) -> Duration {
    let doubled = base_ms.saturating_mul(1u64 << retry.saturating_sub(1).min(10));
    let capped = Duration::from_millis(doubled).min(MAX_BACKOFF);
    capped.mul_f64(jitter)
}

/// Runs `fetch` once, then up to `max_retries` more times while it fails with
/// a retriable error.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base_ms: u64,
    mut fetch: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut retries = 0u32;
    loop {
        let err = match fetch().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if retries >= max_retries || !is_retriable(&err) {
            return Err(err);
        }
        retries += 1;
        let delay = backoff_delay(retries, backoff_base_ms, 0.75 + rand::random::<f64>() * 0.5);
        tracing::warn!(
            retry = retries,
            max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "location fetch failed; retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn unavailable() -> RemoteError {
        RemoteError::UnexpectedStatus {
            method: "GET",
            status: 503,
            url: "http://test/providers/1/locations".to_owned(),
        }
    }

    fn not_found() -> RemoteError {
        RemoteError::UnexpectedStatus {
            method: "GET",
            status: 404,
            url: "http://test/providers/1/locations".to_owned(),
        }
    }

    #[test]
    fn only_transient_fetch_failures_are_retriable() {
        assert!(is_retriable(&unavailable()));
        assert!(!is_retriable(&not_found()));
        assert!(!is_retriable(&RemoteError::MissingLocations {
            context: "GET /providers/1/locations".to_owned(),
        }));
    }

    #[test]
    fn undecodable_bodies_are_not_retried() {
        let source = serde_json::from_str::<()>("<html>").unwrap_err();
        assert!(!is_retriable(&RemoteError::Deserialize {
            context: "GET /providers/1/locations".to_owned(),
            source,
        }));
    }

    #[test]
    fn delay_doubles_per_retry_and_is_capped() {
        assert_eq!(backoff_delay(1, 500, 1.0), Duration::from_millis(500));
        assert_eq!(backoff_delay(3, 500, 1.0), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(12, 500, 1.0), MAX_BACKOFF);
        let jittered = backoff_delay(1, 400, 0.75);
        assert!(jittered.abs_diff(Duration::from_millis(300)) < Duration::from_millis(1));
    }

    #[tokio::test]
    async fn outage_followed_by_recovery_returns_the_set() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retry_with_backoff(3, 0, || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok("locations")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "locations");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_outage_stops_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retry_with_backoff(2, 0, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(unavailable())
            }
        })
        .await;
        assert!(matches!(
            result,
            Err(RemoteError::UnexpectedStatus { status: 503, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_provider_fails_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retry_with_backoff(3, 0, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(not_found())
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
