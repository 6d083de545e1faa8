use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Wire representation used for the services of each outgoing location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceFormat {
    /// `services: [{ id, name }]`
    #[default]
    Structured,
    /// `practice_types: ["name", ...]`, the older wire format.
    Legacy,
}

impl std::fmt::Display for ServiceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceFormat::Structured => write!(f, "structured"),
            ServiceFormat::Legacy => write!(f, "legacy"),
        }
    }
}

/// How a primary-location change is written to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryUpdateMode {
    /// Send the whole location collection, like every other write.
    #[default]
    FullPayload,
    /// Send only `primary_location_id`; requires the remote to accept a
    /// partial update for that field.
    DesignatorOnly,
}

impl std::fmt::Display for PrimaryUpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimaryUpdateMode::FullPayload => write!(f, "full"),
            PrimaryUpdateMode::DesignatorOnly => write!(f, "designator"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub env: Environment,
    pub log_level: String,
    pub services_path: PathBuf,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub fetch_max_retries: u32,
    pub fetch_backoff_base_ms: u64,
    pub service_format: ServiceFormat,
    pub primary_update: PrimaryUpdateMode,
    pub self_service: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[redacted]"))
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("services_path", &self.services_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("fetch_max_retries", &self.fetch_max_retries)
            .field("fetch_backoff_base_ms", &self.fetch_backoff_base_ms)
            .field("service_format", &self.service_format)
            .field("primary_update", &self.primary_update)
            .field("self_service", &self.self_service)
            .finish()
    }
}
