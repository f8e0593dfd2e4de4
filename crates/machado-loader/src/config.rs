//! Configuration management

use crate::loaders::FeatureLookup;
use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/machado";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default worker count; one worker loads records sequentially.
pub const DEFAULT_CPU: usize = 1;

/// User recorded in the job ledger when none is given.
pub const DEFAULT_USER: &str = "machado";

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub database: DatabaseConfig,
    pub loader: LoaderSettings,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    /// Apply the bundled migrations on connect
    pub run_migrations: bool,
}

/// Defaults applied to every job unless a CLI flag overrides them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderSettings {
    pub cpu: usize,
    pub user: String,
    pub feature_lookup: FeatureLookup,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl LoaderConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let feature_lookup = match std::env::var("MACHADO_FEATURE_LOOKUP") {
            Ok(value) => value.parse()?,
            Err(_) => FeatureLookup::default(),
        };

        let config = LoaderConfig {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
                run_migrations: env_or("MACHADO_RUN_MIGRATIONS", false),
            },
            loader: LoaderSettings {
                cpu: env_or("MACHADO_CPU", DEFAULT_CPU),
                user: std::env::var("MACHADO_USER").unwrap_or_else(|_| DEFAULT_USER.to_string()),
                feature_lookup,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.loader.cpu == 0 {
            anyhow::bail!("MACHADO_CPU must be at least 1");
        }

        if self.loader.user.trim().is_empty() {
            anyhow::bail!("MACHADO_USER cannot be empty");
        }

        // every worker holds a connection while it writes
        if self.loader.cpu as u32 > self.database.max_connections {
            tracing::warn!(
                cpu = self.loader.cpu,
                max_connections = self.database.max_connections,
                "More workers than pooled connections; workers will wait on the pool"
            );
        }

        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                run_migrations: false,
            },
            loader: LoaderSettings {
                cpu: DEFAULT_CPU,
                user: DEFAULT_USER.to_string(),
                feature_lookup: FeatureLookup::default(),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LoaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.loader.cpu, 1);
        assert_eq!(config.loader.feature_lookup, FeatureLookup::NameFirst);
    }

    #[test]
    fn test_validate_rejects_zero_cpu() {
        let mut config = LoaderConfig::default();
        config.loader.cpu = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_pool_bounds() {
        let mut config = LoaderConfig::default();
        config.database.min_connections = 20;
        config.database.max_connections = 5;
        assert!(config.validate().is_err());
    }
}
