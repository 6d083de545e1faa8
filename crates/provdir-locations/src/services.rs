//! Conversion between the structured and legacy wire forms of a location's
//! services.
//!
//! Every conversion is length-preserving: an entry that cannot be resolved
//! against the catalog becomes `{ id: 0, name }` instead of being dropped.

use std::sync::Arc;

use provdir_core::{ServiceCatalog, ServiceFormat};

use crate::types::{RawService, ServiceRef, ServicesField};

#[derive(Debug, Clone, Default)]
pub struct ServiceNormalizer {
    catalog: Option<Arc<ServiceCatalog>>,
}

impl ServiceNormalizer {
    #[must_use]
    pub fn new(catalog: ServiceCatalog) -> Self {
        Self {
            catalog: Some(Arc::new(catalog)),
        }
    }

    /// A normalizer whose catalog has not been loaded yet. Every name-only
    /// entry resolves to id `0`.
    #[must_use]
    pub fn without_catalog() -> Self {
        Self::default()
    }

    pub fn set_catalog(&mut self, catalog: ServiceCatalog) {
        self.catalog = Some(Arc::new(catalog));
    }

    #[must_use]
    pub fn has_catalog(&self) -> bool {
        self.catalog.is_some()
    }

    /// Normalizes either wire form into structured references.
    ///
    /// Structured entries with a non-zero id pass through untouched. Bare
    /// names, and structured entries with id `0`, are looked up by name.
    /// The output always has exactly as many entries as `raw`.
    #[must_use]
    pub fn to_canonical(&self, raw: &[RawService]) -> Vec<ServiceRef> {
        let canonical: Vec<ServiceRef> = raw
            .iter()
            .map(|entry| match entry {
                RawService::Ref(service) if service.is_resolved() => service.clone(),
                RawService::Ref(service) => self.resolve_name(&service.name),
                RawService::Name(name) => self.resolve_name(name),
            })
            .collect();
        debug_assert_eq!(canonical.len(), raw.len());
        canonical
    }

    /// Resolves one service name against the catalog, falling back to an
    /// unresolved reference.
    #[must_use]
    pub fn resolve_name(&self, name: &str) -> ServiceRef {
        let trimmed = name.trim();
        match self.catalog.as_ref().and_then(|c| c.lookup(trimmed)) {
            Some(known) => ServiceRef {
                id: known.id,
                name: trimmed.to_string(),
            },
            None => {
                tracing::debug!(
                    service = trimmed,
                    catalog_loaded = self.catalog.is_some(),
                    "service name not in catalog; keeping it unresolved"
                );
                ServiceRef::unresolved(trimmed)
            }
        }
    }

    #[must_use]
    pub fn to_legacy_names(list: &[ServiceRef]) -> Vec<String> {
        list.iter().map(|s| s.name.clone()).collect()
    }

    /// Projects canonical services into the wire form the remote expects.
    #[must_use]
    pub fn encode(list: &[ServiceRef], format: ServiceFormat) -> ServicesField {
        match format {
            ServiceFormat::Structured => ServicesField::Structured(list.to_vec()),
            ServiceFormat::Legacy => ServicesField::Legacy(Self::to_legacy_names(list)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use provdir_core::CatalogService;

    use super::*;

    fn catalog(entries: &[(i64, &str)]) -> ServiceCatalog {
        ServiceCatalog::new(
            entries
                .iter()
                .map(|&(id, name)| CatalogService {
                    id,
                    name: name.to_string(),
                })
                .collect(),
        )
        .expect("catalog should validate")
    }

    fn names(raw: &[&str]) -> Vec<RawService> {
        raw.iter().map(|&n| RawService::from(n)).collect()
    }

    #[test]
    fn unknown_names_are_kept_with_zero_id() {
        let normalizer = ServiceNormalizer::new(catalog(&[(11, "A")]));
        let canonical = normalizer.to_canonical(&names(&["A", "B"]));
        assert_eq!(
            canonical,
            vec![
                ServiceRef {
                    id: 11,
                    name: "A".to_string()
                },
                ServiceRef {
                    id: 0,
                    name: "B".to_string()
                },
            ]
        );
    }

    #[test]
    fn missing_catalog_never_drops_entries() {
        let normalizer = ServiceNormalizer::without_catalog();
        let canonical = normalizer.to_canonical(&names(&["ABA Therapy", "Dentistry", "Coaching"]));
        assert_eq!(canonical.len(), 3);
        assert!(canonical.iter().all(|s| !s.is_resolved()));
    }

    #[test]
    fn structured_entries_pass_through() {
        let normalizer = ServiceNormalizer::new(catalog(&[(1, "ABA Therapy")]));
        let raw = vec![RawService::Ref(ServiceRef {
            id: 42,
            name: "Something Custom".to_string(),
        })];
        assert_eq!(
            normalizer.to_canonical(&raw),
            vec![ServiceRef {
                id: 42,
                name: "Something Custom".to_string()
            }]
        );
    }

    #[test]
    fn structured_entries_with_zero_id_are_resolved_by_name() {
        let normalizer = ServiceNormalizer::new(catalog(&[(5, "Dentistry")]));
        let raw = vec![RawService::Ref(ServiceRef::unresolved("dentistry"))];
        assert_eq!(normalizer.to_canonical(&raw)[0].id, 5);
    }

    #[test]
    fn empty_input_stays_empty() {
        let normalizer = ServiceNormalizer::without_catalog();
        assert!(normalizer.to_canonical(&[]).is_empty());
    }

    #[test]
    fn legacy_round_trip_preserves_names_when_catalog_resolves_all() {
        let normalizer =
            ServiceNormalizer::new(catalog(&[(1, "ABA Therapy"), (2, "Speech Therapy")]));
        let list = vec![
            ServiceRef {
                id: 2,
                name: "Speech Therapy".to_string(),
            },
            ServiceRef {
                id: 1,
                name: "ABA Therapy".to_string(),
            },
        ];
        let legacy = ServiceNormalizer::to_legacy_names(&list);
        let raw: Vec<RawService> = legacy.iter().map(|n| RawService::from(n.as_str())).collect();
        let back = normalizer.to_canonical(&raw);

        let before: BTreeSet<_> = list.iter().map(|s| s.name.clone()).collect();
        let after: BTreeSet<_> = back.iter().map(|s| s.name.clone()).collect();
        assert_eq!(before, after);
        assert!(back.iter().all(ServiceRef::is_resolved));
    }

    #[test]
    fn encode_switches_wire_format() {
        let list = vec![ServiceRef {
            id: 3,
            name: "Coaching".to_string(),
        }];
        assert_eq!(
            ServiceNormalizer::encode(&list, ServiceFormat::Legacy),
            ServicesField::Legacy(vec!["Coaching".to_string()])
        );
        assert_eq!(
            ServiceNormalizer::encode(&list, ServiceFormat::Structured),
            ServicesField::Structured(list.clone())
        );
    }
}
