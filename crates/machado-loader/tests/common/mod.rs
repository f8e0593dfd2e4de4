//! PostgreSQL for store tests
//!
//! `DATABASE_URL` is used when set. Otherwise a throwaway PostgreSQL
//! container is started with testcontainers, which needs a running Docker
//! daemon; without one the tests skip.

#![allow(dead_code)]

use anyhow::{Context, Result};
use machado_loader::store::PgStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

// ============================================================================
// PostgreSQL Test Database
// ============================================================================

/// Migrated database plus the container backing it, if one was started
pub struct TestPostgres {
    // dropping the handle stops the container
    container: Option<ContainerAsync<Postgres>>,
    store: Arc<PgStore>,
}

impl TestPostgres {
    /// Connect to `DATABASE_URL` or start a container; `None` when neither
    /// is possible
    pub async fn start() -> Result<Option<Self>> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            info!("Using DATABASE_URL for store tests");
            return Ok(Some(Self {
                container: None,
                store: Arc::new(connect(&url).await?),
            }));
        }

        if !is_docker_available() {
            eprintln!("Neither DATABASE_URL nor Docker available, skipping");
            return Ok(None);
        }

        info!("Starting PostgreSQL test container...");
        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;
        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", url);

        Ok(Some(Self {
            store: Arc::new(connect(&url).await?),
            container: Some(container),
        }))
    }

    pub fn store(&self) -> Arc<PgStore> {
        self.store.clone()
    }
}

async fn connect(url: &str) -> Result<PgStore> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    let store = PgStore::new(pool);
    store.migrate().await.context("Failed to run migrations")?;
    Ok(store)
}

/// Suffix keeping names unique when tests share one database
pub fn unique(prefix: &str) -> String {
    format!(
        "{}-{}-{}",
        prefix,
        std::process::id(),
        chrono::Utc::now().timestamp_micros()
    )
}

// ============================================================================
// Helpers
// ============================================================================

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,machado_loader=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

/// Check if Docker is available
pub fn is_docker_available() -> bool {
    std::process::Command::new("docker")
        .arg("info")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
