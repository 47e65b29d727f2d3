use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;

/// The model a time series counter belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TsdbModel {
    /// Internal bookkeeping counters written by the metrics relay.
    Internal,
}

impl TsdbModel {
    /// Returns the name of the model.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for TsdbModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error writing to a [`TimeSeriesStore`].
#[derive(Debug, thiserror::Error)]
pub enum TsdbError {
    /// The key cannot be stored.
    #[error("invalid time series key {0:?}")]
    InvalidKey(String),
    /// The store could not be reached.
    #[error("time series store unavailable")]
    Unavailable,
}

/// A store of time series counters.
pub trait TimeSeriesStore: Send + Sync + fmt::Debug {
    /// Increments the counter `key` of the given model by `count`.
    fn incr(&self, model: TsdbModel, key: &str, count: i64) -> Result<(), TsdbError>;
}

/// A [`TimeSeriesStore`] that keeps totals in memory.
#[derive(Debug, Default)]
pub struct MemoryTsdb {
    counters: Mutex<BTreeMap<(TsdbModel, String), i64>>,
}

impl MemoryTsdb {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current total of a counter, `0` if it was never incremented.
    pub fn get(&self, model: TsdbModel, key: &str) -> i64 {
        self.counters
            .lock()
            .get(&(model, key.to_owned()))
            .copied()
            .unwrap_or_default()
    }

    /// Returns the number of distinct counters.
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    /// Returns `true` if no counter was ever incremented.
    pub fn is_empty(&self) -> bool {
        self.counters.lock().is_empty()
    }
}

impl TimeSeriesStore for MemoryTsdb {
    fn incr(&self, model: TsdbModel, key: &str, count: i64) -> Result<(), TsdbError> {
        if key.is_empty() {
            return Err(TsdbError::InvalidKey(key.to_owned()));
        }

        let mut counters = self.counters.lock();
        let total = counters.entry((model, key.to_owned())).or_default();
        *total = total.saturating_add(count);

        Ok(())
    }
}
