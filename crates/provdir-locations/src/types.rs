//! Location domain types and the JSON shapes exchanged with the remote
//! provider service.

use serde::{Deserialize, Deserializer, Serialize};

/// Server-assigned location identifier.
pub type LocationId = i64;

/// Addresses one entry of a [`crate::LocationStore`].
///
/// Persisted locations can be addressed by their server id. Every entry,
/// persisted or not, also has a store-local key that is stable until the next
/// authoritative load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationKey {
    Persisted(LocationId),
    Local(u64),
}

impl std::fmt::Display for LocationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationKey::Persisted(id) => write!(f, "#{id}"),
            LocationKey::Local(key) => write!(f, "local:{key}"),
        }
    }
}

/// Reference to one offered service. An `id` of `0` means the name could not
/// be resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceRef {
    #[serde(default)]
    pub id: i64,
    pub name: String,
}

impl ServiceRef {
    #[must_use]
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.id != 0
    }
}

/// Intake availability for in-home or in-clinic services.
///
/// Values outside the known vocabulary are kept verbatim in
/// [`WaitlistStatus::Unrecognized`] so a write never erases them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WaitlistStatus {
    NoWaitlist,
    OneToTwoWeeks,
    TwoToFourWeeks,
    OneToThreeMonths,
    ThreeToSixMonths,
    SixMonthsOrMore,
    ContactForAvailability,
    Unrecognized(String),
}

impl WaitlistStatus {
    pub const KNOWN: [WaitlistStatus; 7] = [
        WaitlistStatus::NoWaitlist,
        WaitlistStatus::OneToTwoWeeks,
        WaitlistStatus::TwoToFourWeeks,
        WaitlistStatus::OneToThreeMonths,
        WaitlistStatus::ThreeToSixMonths,
        WaitlistStatus::SixMonthsOrMore,
        WaitlistStatus::ContactForAvailability,
    ];

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            WaitlistStatus::NoWaitlist => "No waitlist",
            WaitlistStatus::OneToTwoWeeks => "1-2 weeks",
            WaitlistStatus::TwoToFourWeeks => "2-4 weeks",
            WaitlistStatus::OneToThreeMonths => "1-3 months",
            WaitlistStatus::ThreeToSixMonths => "3-6 months",
            WaitlistStatus::SixMonthsOrMore => "6 months or more",
            WaitlistStatus::ContactForAvailability => "Contact for current waitlist",
            WaitlistStatus::Unrecognized(raw) => raw,
        }
    }

    /// Parses a wire value. Blank input means "no status" and yields `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let known = Self::KNOWN
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed));
        Some(known.unwrap_or_else(|| WaitlistStatus::Unrecognized(trimmed.to_string())))
    }

    #[must_use]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, WaitlistStatus::Unrecognized(_))
    }
}

impl From<String> for WaitlistStatus {
    fn from(raw: String) -> Self {
        WaitlistStatus::parse(&raw).unwrap_or(WaitlistStatus::Unrecognized(raw))
    }
}

impl From<WaitlistStatus> for String {
    fn from(status: WaitlistStatus) -> Self {
        match status {
            WaitlistStatus::Unrecognized(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for WaitlistStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One physical or service site of a provider.
///
/// String fields are `None` when absent; blank strings never reach the store.
#[derive(Debug, Clone, Default)]
pub struct Location {
    pub id: Option<LocationId>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    /// Display order is kept; equality ignores it.
    pub services: Vec<ServiceRef>,
    pub in_home_waitlist: Option<WaitlistStatus>,
    pub in_clinic_waitlist: Option<WaitlistStatus>,
}

impl Location {
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Short human label used in logs and CLI output.
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.name, self.id) {
            (Some(name), Some(id)) => format!("{name} (#{id})"),
            (Some(name), None) => format!("{name} (unsaved)"),
            (None, Some(id)) => format!("#{id}"),
            (None, None) => "(unnamed, unsaved)".to_string(),
        }
    }

    fn sorted_services(&self) -> Vec<&ServiceRef> {
        let mut services: Vec<&ServiceRef> = self.services.iter().collect();
        services.sort();
        services
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.phone == other.phone
            && self.address1 == other.address1
            && self.address2 == other.address2
            && self.city == other.city
            && self.state == other.state
            && self.zip == other.zip
            && self.in_home_waitlist == other.in_home_waitlist
            && self.in_clinic_waitlist == other.in_clinic_waitlist
            && self.sorted_services() == other.sorted_services()
    }
}

impl Eq for Location {}

/// Fields of a location the user is about to add.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationDraft {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub services: Vec<ServiceRef>,
    pub in_home_waitlist: Option<WaitlistStatus>,
    pub in_clinic_waitlist: Option<WaitlistStatus>,
}

impl LocationDraft {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Converts the draft into an unsaved location, nulling blank strings.
    #[must_use]
    pub fn into_location(self) -> Location {
        Location {
            id: None,
            name: blank_to_none(self.name),
            phone: blank_to_none(self.phone),
            address1: blank_to_none(self.address1),
            address2: blank_to_none(self.address2),
            city: blank_to_none(self.city),
            state: blank_to_none(self.state),
            zip: blank_to_none(self.zip),
            services: self.services,
            in_home_waitlist: self.in_home_waitlist,
            in_clinic_waitlist: self.in_clinic_waitlist,
        }
    }
}

/// Tri-state edit of one field: keep it, overwrite it, or null it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> FieldUpdate<T> {
    fn apply_to(self, slot: &mut Option<T>) {
        match self {
            FieldUpdate::Keep => {}
            FieldUpdate::Set(value) => *slot = Some(value),
            FieldUpdate::Clear => *slot = None,
        }
    }

    #[must_use]
    pub fn is_keep(&self) -> bool {
        matches!(self, FieldUpdate::Keep)
    }
}

impl FieldUpdate<String> {
    /// Blank text clears the field rather than storing an empty string.
    fn apply_text(self, slot: &mut Option<String>) {
        match self {
            FieldUpdate::Set(value) => *slot = blank_to_none(Some(value)),
            other => other.apply_to(slot),
        }
    }
}

/// Partial edit of one location. Never touches `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationPatch {
    pub name: FieldUpdate<String>,
    pub phone: FieldUpdate<String>,
    pub address1: FieldUpdate<String>,
    pub address2: FieldUpdate<String>,
    pub city: FieldUpdate<String>,
    pub state: FieldUpdate<String>,
    pub zip: FieldUpdate<String>,
    pub services: Option<Vec<ServiceRef>>,
    pub in_home_waitlist: FieldUpdate<WaitlistStatus>,
    pub in_clinic_waitlist: FieldUpdate<WaitlistStatus>,
}

impl LocationPatch {
    /// Names of the fields this patch sets or clears.
    #[must_use]
    pub fn touched_fields(&self) -> Vec<&'static str> {
        [
            ("name", self.name.is_keep()),
            ("phone", self.phone.is_keep()),
            ("address1", self.address1.is_keep()),
            ("address2", self.address2.is_keep()),
            ("city", self.city.is_keep()),
            ("state", self.state.is_keep()),
            ("zip", self.zip.is_keep()),
            ("services", self.services.is_none()),
            ("in_home_waitlist", self.in_home_waitlist.is_keep()),
            ("in_clinic_waitlist", self.in_clinic_waitlist.is_keep()),
        ]
        .into_iter()
        .filter_map(|(field, untouched)| (!untouched).then_some(field))
        .collect()
    }

    pub(crate) fn apply(self, location: &mut Location) {
        self.name.apply_text(&mut location.name);
        self.phone.apply_text(&mut location.phone);
        self.address1.apply_text(&mut location.address1);
        self.address2.apply_text(&mut location.address2);
        self.city.apply_text(&mut location.city);
        self.state.apply_text(&mut location.state);
        self.zip.apply_text(&mut location.zip);
        if let Some(services) = self.services {
            location.services = services;
        }
        self.in_home_waitlist.apply_to(&mut location.in_home_waitlist);
        self.in_clinic_waitlist
            .apply_to(&mut location.in_clinic_waitlist);
    }
}

/// Trims and nulls blank strings.
#[must_use]
pub fn blank_to_none(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == v.len() {
            Some(v)
        } else {
            Some(trimmed.to_string())
        }
    })
}

// ---------------------------------------------------------------------------
// Inbound wire shapes
// ---------------------------------------------------------------------------

/// A service entry as received: either a structured reference or a bare name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawService {
    Ref(ServiceRef),
    Name(String),
}

impl From<&str> for RawService {
    fn from(name: &str) -> Self {
        RawService::Name(name.to_string())
    }
}

/// A location object as returned by the remote service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteLocation {
    #[serde(default)]
    pub id: Option<LocationId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, alias = "address1")]
    pub address_1: Option<String>,
    #[serde(default, alias = "address2")]
    pub address_2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub services: Option<Vec<RawService>>,
    #[serde(default)]
    pub practice_types: Option<Vec<RawService>>,
    #[serde(default)]
    pub in_home_waitlist: Option<String>,
    #[serde(default)]
    pub in_clinic_waitlist: Option<String>,
    #[serde(default)]
    pub primary: Option<bool>,
}

impl RemoteLocation {
    /// The service entries to normalize. `services` wins unless it is empty
    /// and the legacy `practice_types` list has entries.
    #[must_use]
    pub fn raw_services(&self) -> &[RawService] {
        match (&self.services, &self.practice_types) {
            (Some(services), _) if !services.is_empty() => services.as_slice(),
            (_, Some(legacy)) => legacy.as_slice(),
            (Some(services), None) => services.as_slice(),
            (None, None) => &[],
        }
    }
}

/// `GET /providers/{id}/locations` accepts either top-level key.
#[derive(Debug, Deserialize)]
pub(crate) struct LocationsEnvelope {
    #[serde(default)]
    pub locations: Option<Vec<RemoteLocation>>,
    #[serde(default)]
    pub data: Option<Vec<RemoteLocation>>,
}

impl LocationsEnvelope {
    pub(crate) fn into_locations(self) -> Option<Vec<RemoteLocation>> {
        self.locations.or(self.data)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_first(self) -> Option<T> {
        match self {
            OneOrMany::Many(items) => items.into_iter().next(),
            OneOrMany::One(item) => Some(item),
        }
    }
}

/// `{ data: [{ attributes: { locations, primary_location_id? } }] }`
#[derive(Debug, Deserialize)]
pub(crate) struct WriteEnvelope {
    pub data: OneOrMany<WriteResource>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WriteResource {
    #[serde(default)]
    pub attributes: WriteAttributes,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WriteAttributes {
    #[serde(default)]
    pub locations: Option<Vec<RemoteLocation>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub primary_location_id: Option<Option<LocationId>>,
}

/// Distinguishes an absent key (`None`) from an explicit `null` (`Some(None)`).
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// What the remote service said about the primary designation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryAssertion {
    /// The response did not mention `primary_location_id`.
    Unknown,
    /// The response carried an explicit `null`.
    Cleared,
    Set(LocationId),
}

impl From<Option<Option<LocationId>>> for PrimaryAssertion {
    fn from(raw: Option<Option<LocationId>>) -> Self {
        match raw {
            None => PrimaryAssertion::Unknown,
            Some(None) => PrimaryAssertion::Cleared,
            Some(Some(id)) => PrimaryAssertion::Set(id),
        }
    }
}

/// An authoritative location collection received from the remote service.
#[derive(Debug, Clone)]
pub struct ServerLocationSet {
    pub locations: Vec<RemoteLocation>,
    pub primary: PrimaryAssertion,
}

impl ServerLocationSet {
    /// Ids of the locations the server designates as primary.
    ///
    /// Per-location `primary` flags are authoritative when any location
    /// carries one; otherwise the set-level assertion decides.
    #[must_use]
    pub fn designated(&self) -> Vec<Option<LocationId>> {
        let any_flag = self.locations.iter().any(|l| l.primary.is_some());
        if any_flag {
            return self
                .locations
                .iter()
                .filter(|l| l.primary == Some(true))
                .map(|l| l.id)
                .collect();
        }
        match self.primary {
            PrimaryAssertion::Set(id) => self
                .locations
                .iter()
                .filter(|l| l.id == Some(id))
                .map(|l| l.id)
                .collect(),
            PrimaryAssertion::Unknown | PrimaryAssertion::Cleared => Vec::new(),
        }
    }

    /// Primary id to load into the store.
    ///
    /// An explicit assertion wins. When the server is silent, a single
    /// flagged location decides, and failing that the caller's `fallback`
    /// is kept; the store clears it if no returned location matches.
    #[must_use]
    pub fn resolve_primary(&self, fallback: Option<LocationId>) -> Option<LocationId> {
        match self.primary {
            PrimaryAssertion::Set(id) => Some(id),
            PrimaryAssertion::Cleared => None,
            PrimaryAssertion::Unknown => {
                let flagged: Vec<LocationId> = self
                    .locations
                    .iter()
                    .filter(|l| l.primary == Some(true))
                    .filter_map(|l| l.id)
                    .collect();
                match flagged.as_slice() {
                    [only] => Some(*only),
                    [] if self.locations.iter().any(|l| l.primary.is_some()) => None,
                    _ => fallback,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound wire shapes
// ---------------------------------------------------------------------------

/// Services of one outgoing location, in whichever format the remote expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ServicesField {
    #[serde(rename = "services")]
    Structured(Vec<ServiceRef>),
    #[serde(rename = "practice_types")]
    Legacy(Vec<String>),
}

impl ServicesField {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ServicesField::Structured(refs) => refs.len(),
            ServicesField::Legacy(names) => names.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One location in a replace-all write. Blank fields serialize as `null`;
/// `id` is omitted for unsaved locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<LocationId>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    #[serde(flatten)]
    pub services: ServicesField,
    pub in_home_waitlist: Option<WaitlistStatus>,
    pub in_clinic_waitlist: Option<WaitlistStatus>,
    pub primary: bool,
}

/// The full collection sent to the replace-all endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationsPayload {
    pub locations: Vec<LocationPayload>,
    pub primary_location_id: Option<LocationId>,
}

impl LocationsPayload {
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

/// Narrow body for remotes that accept a partial primary update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrimaryDesignatorPayload {
    pub primary_location_id: Option<LocationId>,
}
