//! Invariant checks around each exchange with the replace-all endpoint.
//!
//! [`ConflictGuard::preflight`] runs before a request is issued and aborts the
//! send on any mismatch: the remote cannot tell "fewer locations" from
//! "delete the missing ones". [`ConflictGuard::postflight`] runs on the
//! authoritative result and only warns.

use std::collections::HashSet;

use thiserror::Error;

use crate::error::LocationError;
use crate::types::{LocationId, LocationsPayload, PrimaryAssertion, ServerLocationSet};

/// The server's primary designation disagrees with what the client wrote.
///
/// Non-fatal: the result is already applied, and the caller is expected to
/// refetch rather than trust either side's guess.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("primary mismatch after write: intended {intended:?}, server designated {designated:?} (asserted {asserted:?})")]
pub struct DataIntegrityWarning {
    pub intended: Option<LocationId>,
    pub designated: Vec<Option<LocationId>>,
    pub asserted: PrimaryAssertion,
}

pub struct ConflictGuard;

impl ConflictGuard {
    /// Verifies an outgoing payload before anything is sent.
    ///
    /// `expected_count` is the number of locations the write must describe,
    /// derived from the store when the write was initiated.
    ///
    /// # Errors
    ///
    /// - [`LocationError::CountMismatch`] if the payload length differs from
    ///   `expected_count`.
    /// - [`LocationError::InconsistentPayload`] on duplicate ids, more than
    ///   one `primary: true`, or flags that contradict `primary_location_id`.
    pub fn preflight(
        payload: &LocationsPayload,
        expected_count: usize,
    ) -> Result<(), LocationError> {
        if payload.len() != expected_count {
            tracing::error!(
                expected = expected_count,
                actual = payload.len(),
                "location payload count mismatch; refusing to send"
            );
            return Err(LocationError::CountMismatch {
                expected: expected_count,
                actual: payload.len(),
            });
        }

        let mut seen = HashSet::new();
        for id in payload.locations.iter().filter_map(|l| l.id) {
            if !seen.insert(id) {
                return Err(inconsistent(format!("location id {id} appears twice")));
            }
        }

        let flagged: Vec<Option<LocationId>> = payload
            .locations
            .iter()
            .filter(|l| l.primary)
            .map(|l| l.id)
            .collect();

        match (payload.primary_location_id, flagged.as_slice()) {
            (None, []) => Ok(()),
            (Some(id), [Some(flag)]) if *flag == id => Ok(()),
            (Some(id), []) => Err(inconsistent(format!(
                "primary_location_id {id} is set but no location is flagged primary"
            ))),
            (primary, flags) => Err(inconsistent(format!(
                "primary_location_id {primary:?} disagrees with primary flags on {flags:?}"
            ))),
        }
    }

    /// Checks the authoritative result of a write against the primary the
    /// client intended.
    ///
    /// With an intended primary, exactly one returned location must be
    /// designated and it must carry that id. Without one, none may be.
    ///
    /// # Errors
    ///
    /// Returns a [`DataIntegrityWarning`] describing the disagreement.
    pub fn postflight(
        result: &ServerLocationSet,
        intended_primary: Option<LocationId>,
    ) -> Result<(), DataIntegrityWarning> {
        let designated = result.designated();
        let assertion_agrees = match (result.primary, intended_primary) {
            (PrimaryAssertion::Unknown, _) => true,
            (PrimaryAssertion::Set(id), Some(intended)) => id == intended,
            (PrimaryAssertion::Cleared, None) => true,
            _ => false,
        };
        let designation_agrees = match intended_primary {
            Some(intended) => designated == vec![Some(intended)],
            None => designated.is_empty(),
        };

        if assertion_agrees && designation_agrees {
            return Ok(());
        }

        let warning = DataIntegrityWarning {
            intended: intended_primary,
            designated,
            asserted: result.primary,
        };
        tracing::warn!(warning = %warning, "postflight check failed");
        Err(warning)
    }
}

fn inconsistent(message: String) -> LocationError {
    tracing::error!(reason = %message, "inconsistent location payload; refusing to send");
    LocationError::InconsistentPayload(message)
}
