use std::borrow::Cow;
use std::env;
use std::fmt;
use std::str::FromStr;

use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// The full release name including the Beacon version and SHA.
const RELEASE: &str = std::env!("BEACON_RELEASE");

// Import CRATE_NAMES, which lists all crates in the workspace.
include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO beacon_seer: deleted grouping records project_id=42
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2024-06-04T12:10:32.123Z  INFO beacon_seer: deleted grouping records project_id=42
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2024-06-04T12:10:32.123Z","level":"INFO","fields":{"message":"deleted grouping records","project_id":42},"target":"beacon_seer"}
    /// ```
    Json,
}

/// The log level for Beacon, serialized as a lowercase string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LogLevel(pub LevelFilter);

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

impl FromStr for LogLevel {
    type Err = <LevelFilter as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LevelFilter::from_str(s).map(LogLevel)
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Cow::<str>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for Beacon.
    pub level: LogLevel,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,

    /// When set to `true`, backtraces are forced on.
    ///
    /// Otherwise, backtraces can be enabled by setting the `RUST_BACKTRACE` variable to `full`.
    pub enable_backtraces: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel(LevelFilter::INFO),
            format: LogFormat::Auto,
            enable_backtraces: false,
        }
    }
}

/// Controls internal reporting to Sentry.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SentryConfig {
    /// The [`DSN`](sentry::types::Dsn) specifying the Project to report to.
    pub dsn: Option<Dsn>,

    /// Enables reporting to Sentry.
    pub enabled: bool,

    /// Sets the environment for this service.
    pub environment: Option<Cow<'static, str>>,
}

impl SentryConfig {
    /// Returns a reference to the [`DSN`](sentry::types::Dsn) if Sentry is enabled.
    pub fn enabled_dsn(&self) -> Option<&Dsn> {
        self.dsn.as_ref().filter(|_| self.enabled)
    }
}

/// Configures the given log level for all of Beacon's crates.
fn get_default_filters() -> EnvFilter {
    // Configure INFO as default, except for crates that are very spammy on INFO level.
    let mut env_filter = EnvFilter::new("INFO,hyper=WARN,reqwest=WARN");

    // Add all internal modules with maximum log-level.
    for name in CRATE_NAMES {
        env_filter = env_filter.add_directive(format!("{name}=TRACE").parse().unwrap());
    }

    env_filter
}

/// Initialize the logging system and reporting to Sentry.
///
/// Call this once during startup before any other threads are spawned, since it may modify the
/// process environment.
///
/// # Example
///
/// ```no_run
/// let log_config = beacon_log::LogConfig {
///     enable_backtraces: true,
///     ..Default::default()
/// };
///
/// let sentry_config = beacon_log::SentryConfig::default();
///
/// beacon_log::init(&log_config, &sentry_config);
/// ```
pub fn init(config: &LogConfig, sentry: &SentryConfig) {
    if config.enable_backtraces {
        // SAFETY: Called once during startup, before the runtime spawns any threads.
        unsafe { env::set_var("RUST_BACKTRACE", "full") };
    }

    let subscriber = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let format: Box<dyn Layer<Registry> + Send + Sync> =
        match (config.format, console::user_attended()) {
            (LogFormat::Auto, true) | (LogFormat::Pretty, _) => {
                subscriber.compact().without_time().boxed()
            }
            (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
                subscriber.with_ansi(false).boxed()
            }
            (LogFormat::Json, _) => subscriber
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        };

    let env_filter = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => EnvFilter::new(value),
        Err(_) => get_default_filters(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(config.level.0))
        .with(sentry::integrations::tracing::layer())
        .with(env_filter)
        .init();

    if let Some(dsn) = sentry.enabled_dsn() {
        let guard = sentry::init(sentry::ClientOptions {
            dsn: Some(dsn).cloned(),
            in_app_include: vec!["beacon"],
            release: Some(RELEASE.into()),
            attach_stacktrace: config.enable_backtraces,
            environment: sentry.environment.clone(),
            ..Default::default()
        });

        // Keep the client initialized. The client is flushed manually in `main`.
        std::mem::forget(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.level, LogLevel(LevelFilter::INFO));
        assert_eq!(config.format, LogFormat::Auto);
        assert!(!config.enable_backtraces);
    }

    #[test]
    fn test_log_level_roundtrip() {
        let config: LogConfig =
            serde_json::from_str(r#"{"level": "debug", "format": "json"}"#).unwrap();
        assert_eq!(config.level, LogLevel(LevelFilter::DEBUG));
        assert_eq!(config.format, LogFormat::Json);

        let serialized = serde_json::to_value(&config).unwrap();
        assert_eq!(serialized["level"], "debug");
    }

    #[test]
    fn test_sentry_disabled_has_no_dsn() {
        let config = SentryConfig {
            dsn: "https://public@sentry.example.com/1".parse().ok(),
            enabled: false,
            environment: None,
        };
        assert!(config.enabled_dsn().is_none());
    }
}
