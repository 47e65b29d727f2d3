use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_config::{Config, MetricsBackendKind};
use beacon_dynamic_config::OptionsStore;
use beacon_metrics::{
    LogBackend, MemoryTsdb, Metrics, MetricsBackend, MetricsConfig, NoopBackend, SampleRate,
    StatsdBackend, StatsdConfig,
};
use beacon_seer::SeerClient;

/// Validates settings that depend on each other.
pub fn check_config(config: &Config) -> Result<()> {
    if config.metrics_backend() == MetricsBackendKind::Statsd && config.statsd_addr().is_none() {
        anyhow::bail!(
            "the statsd metrics backend requires a statsd address. \
             Configure `metrics.statsd` or pass --statsd.",
        );
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        beacon_log::info!("launching beacon without config folder");
    } else {
        beacon_log::info!(
            "launching beacon from config folder {}",
            config.path().display()
        );
    }
    beacon_log::info!("  similarity service: {}", config.seer_url());
    beacon_log::info!("  metrics backend: {}", config.metrics_backend());
    beacon_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metrics facade with the configured backend.
pub fn init_metrics(config: &Config) -> Result<Arc<Metrics>> {
    let backend: Arc<dyn MetricsBackend> = match config.metrics_backend() {
        MetricsBackendKind::Statsd => {
            let host = config
                .statsd_addr()
                .context("no statsd address configured")?;

            let backend = StatsdBackend::new(StatsdConfig {
                prefix: config.metrics_prefix(),
                host,
                default_tags: config.metrics_default_tags().clone(),
                buffering: config.metrics_buffering(),
            })
            .with_context(|| format!("failed to set up statsd backend for {host}"))?;

            Arc::new(backend)
        }
        MetricsBackendKind::Log => Arc::new(LogBackend::new(config.metrics_prefix())),
        MetricsBackendKind::Noop => Arc::new(NoopBackend),
    };

    let metrics_config = MetricsConfig {
        sample_rate: SampleRate::new(config.metrics_sample_rate()),
        skip_all_internal: config.metrics_skip_all_internal(),
        skip_internal_prefixes: config.metrics_skip_internal_prefixes().to_vec(),
        allow_high_cardinality_tags: config.metrics_allow_high_cardinality_tags(),
    };

    Ok(Arc::new(Metrics::new(
        backend,
        Arc::new(MemoryTsdb::new()),
        metrics_config,
    )))
}

/// Loads the runtime options, if an options file is configured.
pub fn init_options(config: &Config) -> Result<Arc<OptionsStore>> {
    let store = OptionsStore::default();

    if let Some(path) = config.options_path() {
        let loaded = store
            .reload(&path)
            .with_context(|| format!("failed to load runtime options from {}", path.display()))?;

        if !loaded {
            beacon_log::warn!(
                "runtime options file {} does not exist, using defaults",
                path.display()
            );
        }
    }

    Ok(Arc::new(store))
}

/// Creates the client for the similarity service.
pub fn init_seer(
    config: &Config,
    options: Arc<OptionsStore>,
    metrics: Arc<Metrics>,
) -> Result<SeerClient> {
    let client = SeerClient::new(
        config.seer_url().clone(),
        config.seer_timeout(),
        options,
        metrics,
    )?;

    Ok(match config.seer_shared_secret() {
        Some(secret) => client.with_shared_secret(secret.clone()),
        None => client,
    })
}
