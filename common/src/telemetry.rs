// Telemetry module for structured logging and metrics

use crate::config::LogFormat;
use crate::db::PoolState;
use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize logging
///
/// `RUST_LOG` takes precedence over the configured level. JSON output carries
/// the current span so pool generation and attempt fields land on every line.
pub fn init_logging(log_level: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(
        log_level = log_level,
        log_format = ?format,
        "Logging initialized"
    );

    Ok(())
}

/// Install the Prometheus recorder and describe the pool metrics
///
/// The returned handle renders the exposition text for `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_counter!(
        "db_pool_connect_attempts_total",
        "Total number of database pool creation attempts"
    );
    describe_counter!(
        "db_pool_connect_failures_total",
        "Total number of failed database pool creation attempts"
    );
    describe_counter!(
        "db_pool_discards_total",
        "Pools discarded after a liveness failure, a reported failure or an external close"
    );
    describe_gauge!(
        "db_pool_state",
        "Pool lifecycle state: 0 absent, 1 connecting, 2 connected"
    );

    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

#[inline]
pub fn record_pool_connect_attempt() {
    counter!("db_pool_connect_attempts_total").increment(1);
}

#[inline]
pub fn record_pool_connect_failure() {
    counter!("db_pool_connect_failures_total").increment(1);
}

#[inline]
pub fn record_pool_discard(reason: &'static str) {
    counter!("db_pool_discards_total", "reason" => reason).increment(1);
}

#[inline]
pub fn set_pool_state(state: PoolState) {
    gauge!("db_pool_state").set(state.as_gauge());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_logging_init_is_rejected() {
        // Only one global subscriber can exist per process
        let _ = init_logging("info", LogFormat::Pretty);
        assert!(init_logging("debug", LogFormat::Json).is_err());
    }

    #[test]
    fn test_installed_recorder_renders_pool_metrics() {
        // The only test in this crate that installs the global recorder
        let handle = init_metrics().unwrap();

        record_pool_connect_attempt();
        record_pool_connect_failure();
        record_pool_discard("liveness");
        set_pool_state(PoolState::Connected);

        let text = handle.render();
        assert!(text.contains("db_pool_connect_attempts_total"), "rendered: {}", text);
        assert!(text.contains("db_pool_connect_failures_total"));
        assert!(text.contains("db_pool_discards_total{reason=\"liveness\"}"));
        assert!(text.contains("db_pool_state"));
    }

    #[test]
    fn test_metrics_recording_never_panics() {
        // Runs with or without the global recorder installed
        record_pool_connect_attempt();
        record_pool_connect_failure();
        record_pool_discard("liveness");
        set_pool_state(PoolState::Connected);
    }

    #[test]
    fn test_pool_state_gauge_values() {
        assert_eq!(PoolState::Absent.as_gauge(), 0.0);
        assert_eq!(PoolState::Connecting.as_gauge(), 1.0);
        assert_eq!(PoolState::Connected.as_gauge(), 2.0);
    }
}
