// Bootstrap utilities for binary initialization

use crate::config::Settings;
use crate::db::{PgConnector, PgPoolManager};
use crate::errors::DatabaseError;
use crate::retry::ExponentialBackoff;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Load and validate settings from `config/` and `APP__*` environment variables
pub fn load_settings() -> Result<Settings> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|reason| anyhow::anyhow!("Invalid configuration: {}", reason))?;
    Ok(settings)
}

/// Build the process-wide pool manager.
///
/// Nothing connects here; the first `acquire` creates the pool.
#[tracing::instrument(skip(settings))]
pub fn init_pool_manager(settings: &Settings) -> Arc<PgPoolManager> {
    let backoff = ExponentialBackoff::from(&settings.pool);
    info!(
        target_db = %settings.database.redacted_target(),
        max_retries = settings.pool.max_retries,
        base_delay_ms = settings.pool.base_delay_ms,
        max_delay_ms = settings.pool.max_delay_ms,
        "Database pool manager configured"
    );
    Arc::new(PgPoolManager::new(
        PgConnector::new(settings.database.clone()),
        backoff,
    ))
}

/// Apply pending migrations from `migrations/`
#[tracing::instrument(skip(manager))]
pub async fn run_migrations(manager: &PgPoolManager) -> Result<(), DatabaseError> {
    let handle = manager.acquire().await?;
    sqlx::migrate!("../migrations").run(handle.pool()).await?;
    info!("Database migrations applied");
    Ok(())
}
