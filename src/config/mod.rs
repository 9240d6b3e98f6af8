//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;

/// History limit used when `HISTORY_LIMIT` is not set.
pub const DEFAULT_HISTORY_LIMIT: u64 = 5000;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Maximum length of each processed-history list. `None` means unbounded
    /// (the `-1` sentinel in the environment).
    pub history_limit: Option<u64>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            history_limit: history_limit_var()?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn history_limit_var() -> Result<Option<u64>> {
    match std::env::var("HISTORY_LIMIT") {
        Err(_) => Ok(Some(DEFAULT_HISTORY_LIMIT)),
        Ok(raw) => {
            let parsed: i64 = raw
                .parse()
                .map_err(|_| Error::Config(format!("HISTORY_LIMIT must be an integer, got {raw}")))?;
            if parsed < 0 {
                Ok(None)
            } else {
                Ok(Some(parsed as u64))
            }
        }
    }
}
