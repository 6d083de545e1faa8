//! Locally cached catalog of the services a provider can offer.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogService {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ServicesFile {
    services: Vec<CatalogService>,
}

/// Known services, looked up by name case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: Vec<CatalogService>,
    by_name: HashMap<String, usize>,
}

impl ServiceCatalog {
    /// Builds a catalog from already-validated entries.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on blank names, non-positive ids,
    /// or duplicate ids/names.
    pub fn new(services: Vec<CatalogService>) -> Result<Self, ConfigError> {
        validate_services(&services)?;
        let by_name = services
            .iter()
            .enumerate()
            .map(|(idx, s)| (name_key(&s.name), idx))
            .collect();
        Ok(Self { services, by_name })
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&CatalogService> {
        self.by_name
            .get(&name_key(name))
            .map(|&idx| &self.services[idx])
    }

    #[must_use]
    pub fn services(&self) -> &[CatalogService] {
        &self.services
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Load and validate the services catalog from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_services_catalog(path: &Path) -> Result<ServiceCatalog, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ServicesFileIo {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_services_catalog(&content)
}

fn parse_services_catalog(content: &str) -> Result<ServiceCatalog, ConfigError> {
    let file: ServicesFile = serde_yaml::from_str(content)?;
    ServiceCatalog::new(file.services)
}

fn validate_services(services: &[CatalogService]) -> Result<(), ConfigError> {
    let mut seen_ids = HashSet::new();
    let mut seen_names = HashSet::new();

    for service in services {
        if service.name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "service {} has an empty name",
                service.id
            )));
        }

        if service.id <= 0 {
            return Err(ConfigError::Validation(format!(
                "service '{}' has invalid id {}; ids must be positive",
                service.name, service.id
            )));
        }

        if !seen_ids.insert(service.id) {
            return Err(ConfigError::Validation(format!(
                "duplicate service id: {}",
                service.id
            )));
        }

        if !seen_names.insert(name_key(&service.name)) {
            return Err(ConfigError::Validation(format!(
                "duplicate service name: '{}'",
                service.name
            )));
        }
    }

    Ok(())
}
