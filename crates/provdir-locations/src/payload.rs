//! Builds the replace-all request body from the current store contents.

use provdir_core::ServiceFormat;

use crate::error::LocationError;
use crate::services::ServiceNormalizer;
use crate::store::LocationStore;
use crate::types::{blank_to_none, Location, LocationId, LocationPayload, LocationsPayload};

/// Describes every location in the store, in display order.
///
/// Format checks cover new locations and locally edited fields only; values
/// loaded from the server are sent back as they are.
///
/// Unsaved locations carry no `id`; blank fields are explicit `null`s; the
/// `primary` flag is set on the location whose id equals the store's
/// `primary_location_id`, which is repeated at the set level.
///
/// # Errors
///
/// Returns [`LocationError::Validation`] if any location has missing or
/// malformed fields.
pub fn build_payload(
    store: &LocationStore,
    format: ServiceFormat,
) -> Result<LocationsPayload, LocationError> {
    crate::validation::validate_all(store.validation_targets()).map_err(|errors| {
        tracing::info!(errors = %errors, "location validation failed; nothing sent");
        LocationError::Validation(errors)
    })?;

    let primary = store.primary_location_id();
    let locations: Vec<LocationPayload> = store
        .locations()
        .map(|location| location_payload(location, primary, format))
        .collect();

    tracing::debug!(
        locations = locations.len(),
        primary_location_id = primary,
        %format,
        "built location payload"
    );

    Ok(LocationsPayload {
        locations,
        primary_location_id: primary,
    })
}

fn location_payload(
    location: &Location,
    primary: Option<LocationId>,
    format: ServiceFormat,
) -> LocationPayload {
    LocationPayload {
        id: location.id,
        name: blank_to_none(location.name.clone()),
        phone: blank_to_none(location.phone.clone()),
        address_1: blank_to_none(location.address1.clone()),
        address_2: blank_to_none(location.address2.clone()),
        city: blank_to_none(location.city.clone()),
        state: blank_to_none(location.state.clone()),
        zip: blank_to_none(location.zip.clone()),
        services: ServiceNormalizer::encode(&location.services, format),
        in_home_waitlist: location.in_home_waitlist.clone(),
        in_clinic_waitlist: location.in_clinic_waitlist.clone(),
        primary: location.id.is_some() && location.id == primary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        FieldUpdate, LocationDraft, LocationKey, LocationPatch, RemoteLocation, ServiceRef,
        ServicesField,
    };

    fn store_with(locations: &[(i64, &str)], primary: Option<i64>) -> LocationStore {
        let mut store = LocationStore::new();
        store.load(
            locations
                .iter()
                .map(|&(id, name)| RemoteLocation {
                    id: Some(id),
                    name: Some(name.to_string()),
                    ..RemoteLocation::default()
                })
                .collect(),
            primary,
            &ServiceNormalizer::without_catalog(),
        );
        store
    }

    fn primaries(payload: &LocationsPayload) -> Vec<Option<i64>> {
        payload
            .locations
            .iter()
            .filter(|l| l.primary)
            .map(|l| l.id)
            .collect()
    }

    #[test]
    fn add_scenario_describes_all_three_locations() {
        let mut store = store_with(&[(1, "Main"), (2, "Branch")], Some(1));
        store.add(LocationDraft::named("New")).unwrap();

        let payload = build_payload(&store, ServiceFormat::Structured).unwrap();
        assert_eq!(payload.len(), 3);
        assert_eq!(payload.primary_location_id, Some(1));

        let summary: Vec<(Option<i64>, Option<&str>, bool)> = payload
            .locations
            .iter()
            .map(|l| (l.id, l.name.as_deref(), l.primary))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Some(1), Some("Main"), true),
                (Some(2), Some("Branch"), false),
                (None, Some("New"), false),
            ]
        );
    }

    #[test]
    fn payload_length_matches_store_after_each_mutation() {
        let mut store = store_with(&[(1, "A"), (2, "B"), (3, "C")], Some(2));
        assert_eq!(build_payload(&store, ServiceFormat::Structured).unwrap().len(), 3);

        store.remove(LocationKey::Persisted(3)).unwrap();
        assert_eq!(build_payload(&store, ServiceFormat::Structured).unwrap().len(), 2);

        store.move_down(LocationKey::Persisted(2)).unwrap();
        assert_eq!(build_payload(&store, ServiceFormat::Structured).unwrap().len(), 2);

        store.set_primary(LocationKey::Persisted(1)).unwrap();
        let payload = build_payload(&store, ServiceFormat::Structured).unwrap();
        assert_eq!(payload.len(), store.len());
        assert_eq!(primaries(&payload), vec![Some(1)]);
    }

    #[test]
    fn exactly_one_entry_is_flagged_primary() {
        let store = store_with(&[(10, "A"), (20, "B"), (30, "C")], Some(20));
        let payload = build_payload(&store, ServiceFormat::Structured).unwrap();
        assert_eq!(primaries(&payload), vec![Some(20)]);
    }

    #[test]
    fn no_primary_means_no_flags() {
        let store = store_with(&[(10, "A"), (20, "B")], None);
        let payload = build_payload(&store, ServiceFormat::Structured).unwrap();
        assert!(primaries(&payload).is_empty());
        assert_eq!(payload.primary_location_id, None);
    }

    #[test]
    fn unsaved_location_serializes_without_id_and_with_nulls() {
        let mut store = LocationStore::new();
        store.add(LocationDraft::named("Solo")).unwrap();
        let payload = build_payload(&store, ServiceFormat::Structured).unwrap();
        let value = serde_json::to_value(&payload).unwrap();
        let location = &value["locations"][0];
        assert!(location.get("id").is_none());
        assert!(location["phone"].is_null());
        assert!(location["zip"].is_null());
        assert_eq!(location["services"], serde_json::json!([]));
        assert!(value["primary_location_id"].is_null());
    }

    #[test]
    fn legacy_format_emits_practice_type_names() {
        let mut store = LocationStore::new();
        store
            .add(LocationDraft {
                name: Some("Clinic".to_string()),
                services: vec![
                    ServiceRef {
                        id: 3,
                        name: "Speech Therapy".to_string(),
                    },
                    ServiceRef::unresolved("Music Therapy"),
                ],
                ..LocationDraft::default()
            })
            .unwrap();
        let payload = build_payload(&store, ServiceFormat::Legacy).unwrap();
        assert_eq!(
            payload.locations[0].services,
            ServicesField::Legacy(vec![
                "Speech Therapy".to_string(),
                "Music Therapy".to_string()
            ])
        );
    }

    #[test]
    fn invalid_fields_block_the_payload() {
        let mut store = LocationStore::new();
        store.add(LocationDraft::default()).unwrap();
        let err = build_payload(&store, ServiceFormat::Structured).unwrap_err();
        match err {
            LocationError::Validation(errors) => assert_eq!(errors.for_field("name").len(), 1),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn server_held_values_do_not_block_unrelated_writes() {
        let mut store = LocationStore::new();
        store.load(
            vec![
                RemoteLocation {
                    id: Some(1),
                    name: Some("Main".to_string()),
                    state: Some("Utah".to_string()),
                    phone: Some("(801) 555-1234 ext 2".to_string()),
                    ..RemoteLocation::default()
                },
                RemoteLocation {
                    id: Some(2),
                    name: Some("Branch".to_string()),
                    ..RemoteLocation::default()
                },
            ],
            Some(1),
            &ServiceNormalizer::without_catalog(),
        );
        store.set_primary(LocationKey::Persisted(2)).unwrap();

        let payload = build_payload(&store, ServiceFormat::Structured).unwrap();
        assert_eq!(payload.len(), 2);
        assert_eq!(payload.locations[1].state.as_deref(), Some("Utah"));
    }

    #[test]
    fn locally_edited_fields_are_format_checked() {
        let mut store = store_with(&[(1, "Main")], Some(1));
        store
            .update(
                LocationKey::Persisted(1),
                LocationPatch {
                    state: FieldUpdate::Set("Utah".to_string()),
                    ..LocationPatch::default()
                },
            )
            .unwrap();

        let err = build_payload(&store, ServiceFormat::Structured).unwrap_err();
        match err {
            LocationError::Validation(errors) => {
                assert_eq!(errors.0.len(), 1);
                assert_eq!(errors.0[0].field, "state");
                assert_eq!(errors.0[0].location, LocationKey::Persisted(1));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
