use crate::config::{LoggingConfig, MetricsConfig};
use shared::metrics_defs::describe_all;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("could not build statsd exporter: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
}

/// Installs the global subscriber. The returned guard flushes pending Sentry
/// events on drop and must outlive the runtime.
pub fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let default_level = config.map_or("info", |c| c.level.as_str());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let guard = config
        .and_then(|c| c.sentry_dsn.as_deref())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ))
        });
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

pub fn init_metrics(config: &MetricsConfig) -> Result<(), TelemetryError> {
    let recorder =
        metrics_exporter_statsd::StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
            .build(Some(config.prefix.as_str()))?;
    metrics::set_global_recorder(recorder).map_err(|_| TelemetryError::RecorderInstalled)?;

    describe_all(feature_fetcher::metrics_defs::ALL_METRICS);
    describe_all(feature_proxy::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Exporting metrics to statsd"
    );
    Ok(())
}
