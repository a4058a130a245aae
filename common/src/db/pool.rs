// Driver seam for the pool manager and its PostgreSQL implementation

use crate::config::DatabaseConfig;
use crate::errors::DatabaseError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tracing::{info, instrument};

/// Creates, probes and closes the pools handed out by [`PoolManager`].
///
/// [`PoolManager`]: crate::db::PoolManager
#[async_trait]
pub trait PoolConnector: Send + Sync + 'static {
    /// Driver pool type; cloning must be cheap and share the same pool
    type Pool: Clone + Send + Sync + 'static;

    /// Open a new pool. Any error is treated as transient and retried.
    async fn connect(&self) -> Result<Self::Pool, DatabaseError>;

    /// Minimal round trip proving the pool still answers
    async fn ping(&self, pool: &Self::Pool) -> Result<(), DatabaseError>;

    async fn close(&self, pool: Self::Pool) -> Result<(), DatabaseError>;

    /// Future that completes when the pool has been shut down behind the
    /// manager's back. `None` when the driver offers no such signal.
    fn closed(&self, _pool: &Self::Pool) -> Option<BoxFuture<'static, ()>> {
        None
    }

    /// Connection target for log lines. Must not contain credentials.
    fn describe(&self) -> String {
        "database".to_string()
    }
}

/// PostgreSQL connector built from [`DatabaseConfig`]
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: DatabaseConfig,
}

impl PgConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// TLS mode derived from the encrypt / trust-certificate pair
    pub fn ssl_mode(&self) -> PgSslMode {
        match (self.config.encrypt, self.config.trust_server_certificate) {
            (false, _) => PgSslMode::Disable,
            (true, true) => PgSslMode::Require,
            (true, false) => PgSslMode::VerifyFull,
        }
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .database(&self.config.name)
            .username(&self.config.user)
            .password(&self.config.password)
            .ssl_mode(self.ssl_mode())
            .options([(
                "statement_timeout",
                self.config.request_timeout_ms.to_string(),
            )])
    }

    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.config.pool_max)
            .min_connections(self.config.pool_min)
            .acquire_timeout(self.config.connection_timeout())
            .idle_timeout(Some(self.config.idle_timeout()))
    }
}

#[async_trait]
impl PoolConnector for PgConnector {
    type Pool = PgPool;

    #[instrument(skip(self), fields(db = %self.config.redacted_target(), max_connections = self.config.pool_max))]
    async fn connect(&self) -> Result<PgPool, DatabaseError> {
        let pool = self
            .pool_options()
            .connect_with(self.connect_options())
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = self.config.pool_max,
            min_connections = self.config.pool_min,
            "Database connection pool opened"
        );
        Ok(pool)
    }

    #[instrument(skip_all)]
    async fn ping(&self, pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1")
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::HealthCheckFailed(e.to_string()))?;

        tracing::debug!("Database health check passed");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn close(&self, pool: PgPool) -> Result<(), DatabaseError> {
        pool.close().await;
        Ok(())
    }

    fn closed(&self, pool: &PgPool) -> Option<BoxFuture<'static, ()>> {
        Some(Box::pin(pool.close_event()))
    }

    fn describe(&self) -> String {
        self.config.redacted_target()
    }
}
