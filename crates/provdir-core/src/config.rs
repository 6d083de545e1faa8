use crate::app_config::{AppConfig, Environment, PrimaryUpdateMode, ServiceFormat};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so tests can feed a `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let api_base_url = require("PROVDIR_API_BASE_URL")?;
    let api_token = lookup("PROVDIR_API_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty());

    let env = parse_environment(&or_default("PROVDIR_ENV", "development"))?;
    let log_level = or_default("PROVDIR_LOG_LEVEL", "info");
    let services_path = PathBuf::from(or_default(
        "PROVDIR_SERVICES_PATH",
        "./config/services.yaml",
    ));

    let request_timeout_secs = parse_u64("PROVDIR_REQUEST_TIMEOUT_SECS", "30")?;
    let user_agent = or_default("PROVDIR_USER_AGENT", "provdir/0.1 (location-sync)");
    let fetch_max_retries = parse_u32("PROVDIR_FETCH_MAX_RETRIES", "3")?;
    let fetch_backoff_base_ms = parse_u64("PROVDIR_FETCH_BACKOFF_BASE_MS", "500")?;

    let service_format = parse_service_format(&or_default("PROVDIR_SERVICE_FORMAT", "structured"))?;
    let primary_update = parse_primary_update(&or_default("PROVDIR_PRIMARY_UPDATE", "full"))?;
    let self_service = parse_bool("PROVDIR_SELF_SERVICE", &or_default("PROVDIR_SELF_SERVICE", "false"))?;

    Ok(AppConfig {
        api_base_url,
        api_token,
        env,
        log_level,
        services_path,
        request_timeout_secs,
        user_agent,
        fetch_max_retries,
        fetch_backoff_base_ms,
        service_format,
        primary_update,
        self_service,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` for anything other than
/// `development`, `test`, or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "PROVDIR_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

fn parse_service_format(s: &str) -> Result<ServiceFormat, ConfigError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "structured" => Ok(ServiceFormat::Structured),
        "legacy" => Ok(ServiceFormat::Legacy),
        other => Err(ConfigError::InvalidEnvVar {
            var: "PROVDIR_SERVICE_FORMAT".to_string(),
            reason: format!("expected 'structured' or 'legacy', got '{other}'"),
        }),
    }
}

fn parse_primary_update(s: &str) -> Result<PrimaryUpdateMode, ConfigError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "full" => Ok(PrimaryUpdateMode::FullPayload),
        "designator" => Ok(PrimaryUpdateMode::DesignatorOnly),
        other => Err(ConfigError::InvalidEnvVar {
            var: "PROVDIR_PRIMARY_UPDATE".to_string(),
            reason: format!("expected 'full' or 'designator', got '{other}'"),
        }),
    }
}

fn parse_bool(var: &str, s: &str) -> Result<bool, ConfigError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
