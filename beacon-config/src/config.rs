use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use beacon_auth::SharedSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

/// Upper bound for the similarity service timeout in seconds.
const MAX_SEER_TIMEOUT: f64 = 86_400.0;

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
        }
    }

    #[inline]
    fn field(field: &'static str) -> Self {
        Self {
            source: ConfigErrorSource::FieldOverride(field.to_owned()),
            kind: ConfigErrorKind::InvalidValue,
        }
    }

    #[inline]
    fn file(kind: ConfigErrorKind, p: impl AsRef<Path>) -> Self {
        Self {
            source: ConfigErrorSource::File(p.as_ref().to_path_buf()),
            kind,
        }
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl std::error::Error for ConfigError {}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

enum ConfigFormat {
    Yaml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|_| ConfigError::file(ConfigErrorKind::CouldNotOpenFile, &path))?;

        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::from_reader(io::BufReader::new(f))
                .map_err(|_| ConfigError::file(ConfigErrorKind::BadYaml, &path)),
        }
    }

    /// Writes the configuration object to the given writer.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), ConfigError> {
        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::to_writer(writer, self)
                .map_err(|_| ConfigError::new(ConfigErrorKind::CouldNotWriteFile)),
        }
    }

    /// Writes the configuration to a file within the given directory location.
    fn save(&self, base: &Path) -> Result<(), ConfigError> {
        let path = Self::path(base);
        let mut f = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&path)
            .map_err(|_| ConfigError::file(ConfigErrorKind::CouldNotWriteFile, &path))?;

        self.write(&mut f)
            .map_err(|_| ConfigError::file(ConfigErrorKind::CouldNotWriteFile, &path))?;
        f.write_all(b"\n").ok();

        Ok(())
    }
}

/// Structure used to hold information about configuration overrides via CLI parameters or
/// environment variables.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The base URL of the similarity service.
    pub seer_url: Option<String>,
    /// The default timeout for similarity service requests in seconds.
    pub seer_timeout: Option<String>,
    /// The shared secret used to sign similarity service requests.
    pub seer_shared_secret: Option<String>,
    /// The metrics backend to use.
    pub metrics_backend: Option<String>,
    /// The statsd host and port.
    pub statsd: Option<String>,
    /// The default metrics sample rate.
    pub metrics_sample_rate: Option<String>,
}

/// Selects the backend that receives emitted metrics.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsBackendKind {
    /// Emit metrics to a statsd server.
    Statsd,
    /// Write all metrics to the log at debug level.
    Log,
    /// Discard all metrics.
    #[default]
    Noop,
}

impl fmt::Display for MetricsBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsBackendKind::Statsd => write!(f, "statsd"),
            MetricsBackendKind::Log => write!(f, "log"),
            MetricsBackendKind::Noop => write!(f, "noop"),
        }
    }
}

/// Error returned when parsing an unknown [`MetricsBackendKind`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown metrics backend, expected one of 'statsd', 'log', 'noop'")]
pub struct ParseMetricsBackendError;

impl FromStr for MetricsBackendKind {
    type Err = ParseMetricsBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "statsd" => Ok(MetricsBackendKind::Statsd),
            "log" => Ok(MetricsBackendKind::Log),
            "noop" => Ok(MetricsBackendKind::Noop),
            _ => Err(ParseMetricsBackendError),
        }
    }
}

/// Control the metrics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Metrics {
    /// The backend receiving all metrics.
    ///
    /// Defaults to `noop`.
    backend: MetricsBackendKind,
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`.
    statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    ///
    /// Defaults to `"beacon."`.
    prefix: String,
    /// Default tags to apply to all metrics.
    default_tags: BTreeMap<String, String>,
    /// Emitted metrics will be buffered to optimize performance.
    ///
    /// Defaults to `true`.
    buffering: bool,
    /// Default sample rate for emitted metrics between `0.0` and `1.0`.
    ///
    /// For example, a value of `0.3` means that only 30% of the emitted metrics will be sent.
    /// Defaults to `1.0` (100%).
    sample_rate: f64,
    /// Disables the internal relay for all metrics.
    skip_all_internal: bool,
    /// Key prefixes that are never relayed to the internal time series store.
    skip_internal_prefixes: Vec<String>,
    /// If high cardinality tags are passed through to the backend.
    ///
    /// Defaults to `false`.
    allow_high_cardinality_tags: bool,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            backend: MetricsBackendKind::default(),
            statsd: None,
            prefix: "beacon.".into(),
            default_tags: BTreeMap::new(),
            buffering: true,
            sample_rate: 1.0,
            skip_all_internal: false,
            skip_internal_prefixes: Vec::new(),
            allow_high_cardinality_tags: false,
        }
    }
}

fn default_seer_url() -> Url {
    Url::parse("http://127.0.0.1:9091/").expect("valid default URL")
}

/// Controls the connection to the similarity service.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Seer {
    /// Base URL of the similarity service.
    url: Url,
    /// Default request timeout in seconds.
    ///
    /// Individual operations override this with runtime options.
    timeout: f64,
    /// Secret used to sign request bodies.
    #[serde(skip_serializing_if = "Option::is_none")]
    shared_secret: Option<SharedSecret>,
}

impl Default for Seer {
    fn default() -> Self {
        Seer {
            url: default_seer_url(),
            timeout: 1.0,
            shared_secret: None,
        }
    }
}

/// Controls the runtime options source.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
struct RuntimeOptions {
    /// Path to a JSON file with runtime options, relative to the config directory.
    path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    logging: beacon_log::LogConfig,
    #[serde(default)]
    sentry: beacon_log::SentryConfig,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    seer: Seer,
    #[serde(default)]
    options: RuntimeOptions,
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
#[derive(Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let config = Config {
            values: ConfigValues::load(&path)?,
            path,
        };

        config.validate()?;
        Ok(config)
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let config = Config {
            values: serde_json::from_value(value)
                .map_err(|_| ConfigError::new(ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.values.metrics.sample_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::field("metrics.sample_rate"));
        }

        let timeout = self.values.seer.timeout;
        if !(timeout > 0.0 && timeout <= MAX_SEER_TIMEOUT) {
            return Err(ConfigError::field("seer.timeout"));
        }

        Ok(())
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let seer = &mut self.values.seer;

        if let Some(url) = overrides.seer_url {
            seer.url = url
                .parse::<Url>()
                .map_err(|_| ConfigError::field("seer_url"))?;
        }

        if let Some(timeout) = overrides.seer_timeout {
            seer.timeout = timeout
                .parse()
                .map_err(|_| ConfigError::field("seer_timeout"))?;
        }

        if let Some(secret) = overrides.seer_shared_secret {
            seer.shared_secret = Some(SharedSecret::new(secret));
        }

        let metrics = &mut self.values.metrics;

        if let Some(backend) = overrides.metrics_backend {
            metrics.backend = backend
                .parse()
                .map_err(|_| ConfigError::field("metrics_backend"))?;
        }

        if let Some(statsd) = overrides.statsd {
            metrics.statsd = Some(statsd);
        }

        if let Some(sample_rate) = overrides.metrics_sample_rate {
            metrics.sample_rate = sample_rate
                .parse()
                .map_err(|_| ConfigError::field("metrics_sample_rate"))?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Writes the default configuration into the given folder.
    pub fn save_default<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        fs::create_dir_all(path)
            .map_err(|_| ConfigError::file(ConfigErrorKind::CouldNotWriteFile, path))?;
        ConfigValues::default().save(path)
    }

    /// Returns the filename of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|_| ConfigError::new(ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &beacon_log::LogConfig {
        &self.values.logging
    }

    /// Returns logging configuration.
    pub fn sentry(&self) -> &beacon_log::SentryConfig {
        &self.values.sentry
    }

    /// Returns the backend that receives metrics.
    pub fn metrics_backend(&self) -> MetricsBackendKind {
        self.values.metrics.backend
    }

    /// Returns the socket address of statsd if configured.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Return the prefix for statsd metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags for statsd metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns true if metrics should be buffered.
    pub fn metrics_buffering(&self) -> bool {
        self.values.metrics.buffering
    }

    /// Returns the default sample rate for metrics.
    pub fn metrics_sample_rate(&self) -> f64 {
        self.values.metrics.sample_rate
    }

    /// Returns `true` if no metric is ever relayed to the internal time series store.
    pub fn metrics_skip_all_internal(&self) -> bool {
        self.values.metrics.skip_all_internal
    }

    /// Returns the key prefixes that are never relayed to the internal time series store.
    pub fn metrics_skip_internal_prefixes(&self) -> &[String] {
        &self.values.metrics.skip_internal_prefixes
    }

    /// Returns whether high cardinality tags should be passed to the metrics backend.
    pub fn metrics_allow_high_cardinality_tags(&self) -> bool {
        self.values.metrics.allow_high_cardinality_tags
    }

    /// Returns the base URL of the similarity service.
    pub fn seer_url(&self) -> &Url {
        &self.values.seer.url
    }

    /// Returns the default timeout for similarity service requests.
    pub fn seer_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.values.seer.timeout)
            .unwrap_or_else(|_| Duration::from_secs(1))
    }

    /// Returns the secret used to sign similarity service requests.
    pub fn seer_shared_secret(&self) -> Option<&SharedSecret> {
        self.values.seer.shared_secret.as_ref()
    }

    /// Returns the absolute path of the runtime options file, if configured.
    pub fn options_path(&self) -> Option<PathBuf> {
        self.values
            .options
            .path
            .as_ref()
            .map(|path| self.path.join(path))
    }
}
