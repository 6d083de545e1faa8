//! Shared configuration for the provider directory tooling.
//!
//! Holds the environment-driven [`AppConfig`], the services catalog loader,
//! and the [`ConfigError`] both of them report.

pub mod app_config;
pub mod config;
pub mod services;

use thiserror::Error;

pub use app_config::{AppConfig, Environment, PrimaryUpdateMode, ServiceFormat};
pub use config::{load_app_config, load_app_config_from_env};
pub use services::{load_services_catalog, CatalogService, ServiceCatalog};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read services catalog {path}: {source}")]
    ServicesFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse services catalog: {0}")]
    ServicesFileParse(#[from] serde_yaml::Error),

    #[error("services catalog validation failed: {0}")]
    Validation(String),
}
