//! Field validation run before any payload is built.
//!
//! Failures are reported per location and per field and never reach the
//! network.

use crate::types::{Location, LocationKey};

/// One invalid field of one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub location: LocationKey,
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.location, self.field, self.message)
    }
}

/// Every field error found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn for_field(&self, field: &str) -> Vec<&FieldError> {
        self.0.iter().filter(|e| e.field == field).collect()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join("; "))
    }
}

/// Which fields of a location get format checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatScope<'a> {
    /// Every field. Locations created in this session.
    All,
    /// Only the listed fields. Server-held locations, whose untouched values
    /// the server has already accepted.
    Edited(&'a [&'static str]),
}

impl FormatScope<'_> {
    fn covers(self, field: &str) -> bool {
        match self {
            FormatScope::All => true,
            FormatScope::Edited(fields) => fields.iter().any(|f| *f == field),
        }
    }
}

/// Validates one location.
///
/// Unsaved locations must carry a name. Contact and address fields are
/// optional but must be well formed when present and within `scope`.
#[must_use]
pub fn validate_location(
    key: LocationKey,
    location: &Location,
    scope: FormatScope<'_>,
) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let mut push = |field: &'static str, message: String| {
        errors.push(FieldError {
            location: key,
            field,
            message,
        });
    };

    if !location.is_persisted() && location.name.is_none() {
        push("name", "a new location needs a name".to_string());
    }

    if let Some(state) = location.state.as_ref().filter(|_| scope.covers("state")) {
        if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
            push(
                "state",
                format!("expected a two-letter state code, got '{state}'"),
            );
        }
    }

    if let Some(zip) = location.zip.as_ref().filter(|_| scope.covers("zip")) {
        if !is_valid_zip(zip) {
            push(
                "zip",
                format!("expected a 5-digit or ZIP+4 code, got '{zip}'"),
            );
        }
    }

    if let Some(phone) = location.phone.as_ref().filter(|_| scope.covers("phone")) {
        let digits = phone.chars().filter(char::is_ascii_digit).count();
        let starts_with_country = phone.trim_start_matches('+').starts_with('1');
        if !(digits == 10 || (digits == 11 && starts_with_country)) {
            push(
                "phone",
                format!("expected a 10-digit phone number, got '{phone}'"),
            );
        }
    }

    if scope.covers("services") {
        for (idx, service) in location.services.iter().enumerate() {
            if service.name.trim().is_empty() {
                push("services", format!("service #{idx} has an empty name"));
            }
        }
    }

    errors
}

/// Validates every location of a collection in display order.
///
/// # Errors
///
/// Returns every field error found, across all locations.
pub fn validate_all<'a, I>(locations: I) -> Result<(), ValidationErrors>
where
    I: IntoIterator<Item = (LocationKey, &'a Location, FormatScope<'a>)>,
{
    let errors: Vec<FieldError> = locations
        .into_iter()
        .flat_map(|(key, location, scope)| validate_location(key, location, scope))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

fn is_valid_zip(zip: &str) -> bool {
    let bytes = zip.as_bytes();
    let five = |b: &[u8]| b.len() == 5 && b.iter().all(u8::is_ascii_digit);
    match bytes.len() {
        5 => five(bytes),
        10 => five(&bytes[..5]) && bytes[5] == b'-' && bytes[6..].iter().all(u8::is_ascii_digit),
        _ => false,
    }
}
