//! Runtime configuration, read from the environment.

use thiserror::Error;

pub const MAX_COMMIT_ATTEMPTS_VAR: &str = "PHARMASTOCK_MAX_COMMIT_ATTEMPTS";
pub const SEED_DEMO_VAR: &str = "PHARMASTOCK_SEED_DEMO";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer (got '{value}')")]
    InvalidAttempts { var: &'static str, value: String },

    #[error("{var} must be true or false (got '{value}')")]
    InvalidFlag { var: &'static str, value: String },
}

/// Ledger service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// How many read-decide-commit cycles a movement gets before the engine
    /// gives up with `Conflict`. Always at least 1.
    pub max_commit_attempts: u32,
    /// Load demo categories, drugs and movements into an empty catalog on startup.
    pub seed_demo: bool,
    /// Postgres connection string (used with the `postgres` feature).
    pub database_url: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 3,
            seed_demo: true,
            database_url: None,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing or blank keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(raw) = get(MAX_COMMIT_ATTEMPTS_VAR) {
            config.max_commit_attempts = raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or(ConfigError::InvalidAttempts {
                    var: MAX_COMMIT_ATTEMPTS_VAR,
                    value: raw,
                })?;
        }

        if let Some(raw) = get(SEED_DEMO_VAR) {
            config.seed_demo = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidFlag {
                        var: SEED_DEMO_VAR,
                        value: raw,
                    });
                }
            };
        }

        config.database_url = get(DATABASE_URL_VAR);
        if config.database_url.is_none() {
            tracing::debug!("{DATABASE_URL_VAR} not set; using the in-memory store");
        }

        Ok(config)
    }
}
