use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const DEFAULT_BULK_RECORD_UPDATE_TIMEOUT: f64 = 10.0;
const DEFAULT_RECORD_DELETE_TIMEOUT: f64 = 60.0;
const DEFAULT_USE_SHARED_SECRET: f32 = 1.0;

/// Upper bound for timeout options in seconds.
const MAX_TIMEOUT: f64 = 86_400.0;

/// All options that can be changed at runtime.
///
/// Option names are dotted strings. Values that fail to parse or validate fall back to their
/// defaults and log an error, so a bad option never takes down a consumer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Options {
    /// Timeout in seconds for uploading grouping records to the similarity service.
    #[serde(
        rename = "embeddings-grouping.seer.embeddings-bulk-record-update-timeout",
        deserialize_with = "bulk_record_update_timeout"
    )]
    pub seer_bulk_record_update_timeout: f64,

    /// Timeout in seconds for deleting grouping records from the similarity service.
    #[serde(
        rename = "embeddings-grouping.seer.embeddings-record-delete-timeout",
        deserialize_with = "record_delete_timeout"
    )]
    pub seer_record_delete_timeout: f64,

    /// Rate between `0.0` and `1.0` at which requests to the similarity service are signed.
    #[serde(
        rename = "seer.api.use-shared-secret",
        deserialize_with = "use_shared_secret"
    )]
    pub seer_use_shared_secret: f32,

    /// All other unknown options.
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}

impl Options {
    /// Returns the timeout for bulk grouping record uploads.
    ///
    /// Out of range values set directly on the struct resolve to the default.
    pub fn bulk_record_update_timeout(&self) -> Duration {
        timeout_or(
            self.seer_bulk_record_update_timeout,
            DEFAULT_BULK_RECORD_UPDATE_TIMEOUT,
        )
    }

    /// Returns the timeout for grouping record deletions.
    pub fn record_delete_timeout(&self) -> Duration {
        timeout_or(self.seer_record_delete_timeout, DEFAULT_RECORD_DELETE_TIMEOUT)
    }

    /// Returns the signing rate clamped to `[0, 1]`.
    pub fn use_shared_secret_rate(&self) -> f32 {
        self.seer_use_shared_secret.clamp(0.0, 1.0)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            seer_bulk_record_update_timeout: DEFAULT_BULK_RECORD_UPDATE_TIMEOUT,
            seer_record_delete_timeout: DEFAULT_RECORD_DELETE_TIMEOUT,
            seer_use_shared_secret: DEFAULT_USE_SHARED_SECRET,
            other: HashMap::new(),
        }
    }
}

fn fallback_on_error<'de, D, T>(
    deserializer: D,
    is_valid: impl FnOnce(&T) -> bool,
    fallback: T,
) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + std::fmt::Debug,
{
    match T::deserialize(deserializer) {
        Ok(value) if is_valid(&value) => Ok(value),
        Ok(value) => {
            beacon_log::error!(
                value = ?value,
                "invalid runtime option value: {}",
                std::any::type_name::<T>(),
            );
            Ok(fallback)
        }
        Err(error) => {
            beacon_log::error!(
                error = %error,
                "error deserializing runtime option: {}",
                std::any::type_name::<T>(),
            );
            Ok(fallback)
        }
    }
}

fn is_valid_timeout(secs: &f64) -> bool {
    *secs > 0.0 && *secs <= MAX_TIMEOUT
}

fn timeout_or(secs: f64, default: f64) -> Duration {
    if is_valid_timeout(&secs) {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs_f64(default))
    } else {
        Duration::from_secs_f64(default)
    }
}

fn bulk_record_update_timeout<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    fallback_on_error(d, is_valid_timeout, DEFAULT_BULK_RECORD_UPDATE_TIMEOUT)
}

fn record_delete_timeout<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    fallback_on_error(d, is_valid_timeout, DEFAULT_RECORD_DELETE_TIMEOUT)
}

fn use_shared_secret<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
    fallback_on_error(d, |rate: &f32| rate.is_finite(), DEFAULT_USE_SHARED_SECRET)
}

/// Holds the current [`Options`] snapshot.
///
/// Readers obtain the snapshot with [`get`](Self::get) on every use. Writers replace the entire
/// snapshot atomically, so readers never observe a partially updated set of options.
#[derive(Debug)]
pub struct OptionsStore {
    inner: ArcSwap<Options>,
}

impl OptionsStore {
    /// Creates a store initialized with the given options.
    pub fn new(options: Options) -> Self {
        Self {
            inner: ArcSwap::from_pointee(options),
        }
    }

    /// Returns the current options snapshot.
    pub fn get(&self) -> Arc<Options> {
        self.inner.load_full()
    }

    /// Replaces the current options.
    pub fn update(&self, options: Options) {
        self.inner.store(Arc::new(options));
    }

    /// Loads options from a JSON file if it exists.
    pub fn load(path: &Path) -> anyhow::Result<Option<Options>> {
        if path.exists() {
            let file = BufReader::new(File::open(path)?);
            Ok(Some(serde_json::from_reader(file)?))
        } else {
            Ok(None)
        }
    }

    /// Reloads options from a JSON file and replaces the current snapshot.
    ///
    /// Returns `false` if the file does not exist, in which case the options are left unchanged.
    pub fn reload(&self, path: &Path) -> anyhow::Result<bool> {
        match Self::load(path)? {
            Some(options) => {
                beacon_log::debug!(path = %path.display(), "reloaded runtime options");
                self.update(options);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Default for OptionsStore {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults() {
        let options: Options = serde_json::from_str("{}").unwrap();
        assert_eq!(options, Options::default());
        assert_eq!(options.bulk_record_update_timeout(), Duration::from_secs(10));
        assert_eq!(options.record_delete_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_serialize_dotted_names() {
        let options = Options {
            seer_bulk_record_update_timeout: 0.5,
            ..Options::default()
        };

        assert_eq!(
            serde_json::to_value(&options).unwrap(),
            json!({
                "embeddings-grouping.seer.embeddings-bulk-record-update-timeout": 0.5,
                "embeddings-grouping.seer.embeddings-record-delete-timeout": 60.0,
                "seer.api.use-shared-secret": 1.0,
            })
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        beacon_log::init_test!();

        let options: Options = serde_json::from_value(json!({
            "embeddings-grouping.seer.embeddings-bulk-record-update-timeout": "fast",
            "embeddings-grouping.seer.embeddings-record-delete-timeout": -3.0,
            "seer.api.use-shared-secret": 0.25,
        }))
        .unwrap();

        assert_eq!(options.seer_bulk_record_update_timeout, 10.0);
        assert_eq!(options.seer_record_delete_timeout, 60.0);
        assert_eq!(options.seer_use_shared_secret, 0.25);
    }

    #[test]
    fn test_out_of_range_timeouts_fall_back() {
        beacon_log::init_test!();

        let options: Options = serde_json::from_value(json!({
            "embeddings-grouping.seer.embeddings-bulk-record-update-timeout": 1e20,
            "embeddings-grouping.seer.embeddings-record-delete-timeout": -1.0,
        }))
        .unwrap();

        assert_eq!(options.bulk_record_update_timeout(), Duration::from_secs(10));
        assert_eq!(options.record_delete_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_out_of_range_fields_do_not_panic() {
        let store = OptionsStore::default();
        store.update(Options {
            seer_bulk_record_update_timeout: 1e20,
            seer_record_delete_timeout: f64::NAN,
            ..Options::default()
        });

        let options = store.get();
        assert_eq!(options.bulk_record_update_timeout(), Duration::from_secs(10));
        assert_eq!(options.record_delete_timeout(), Duration::from_secs(60));

        store.update(Options {
            seer_bulk_record_update_timeout: -1.0,
            ..Options::default()
        });
        assert_eq!(
            store.get().bulk_record_update_timeout(),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_unknown_options_are_kept() {
        let options: Options = serde_json::from_value(json!({
            "some.other.option": [1, 2, 3],
        }))
        .unwrap();

        assert_eq!(options.other["some.other.option"], json!([1, 2, 3]));
    }

    #[test]
    fn test_rate_is_clamped() {
        let options = Options {
            seer_use_shared_secret: 4.0,
            ..Options::default()
        };
        assert_eq!(options.use_shared_secret_rate(), 1.0);
    }

    #[test]
    fn test_store_is_late_bound() {
        let store = OptionsStore::default();
        let before = store.get();

        store.update(Options {
            seer_record_delete_timeout: 1.0,
            ..Options::default()
        });

        // Snapshots taken earlier are unaffected, new reads see the update.
        assert_eq!(before.seer_record_delete_timeout, 60.0);
        assert_eq!(store.get().seer_record_delete_timeout, 1.0);
    }

    #[test]
    fn test_reload_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"embeddings-grouping.seer.embeddings-record-delete-timeout": 5}}"#
        )
        .unwrap();

        let store = OptionsStore::default();
        assert!(store.reload(file.path()).unwrap());
        assert_eq!(store.get().record_delete_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_reload_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = OptionsStore::default();

        assert!(!store.reload(&dir.path().join("options.json")).unwrap());
        assert_eq!(*store.get(), Options::default());
    }
}
