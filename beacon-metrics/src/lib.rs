//! Metrics facade for Beacon.
//!
//! All metrics are emitted through a [`Metrics`] instance, which is created once at startup and
//! shared. It forwards every metric to a [`MetricsBackend`], and relays counters that opt in to an
//! internal [`TimeSeriesStore`] on a background thread.
//!
//! ## Emitting Metrics
//!
//! Metrics are described with builders and passed to the facade. Emission never fails and never
//! blocks on the backend's behalf: errors are logged and dropped.
//!
//! ```
//! use std::time::Duration;
//! use beacon_metrics::{Counter, Gauge, Metrics, Timing};
//!
//! let metrics = Metrics::default();
//!
//! metrics.incr(Counter::new("jobs.started").tag("queue", "default"));
//! metrics.gauge(Gauge::new("queue.size", 12.0).unit("job"));
//! metrics.timing(Timing::new("jobs.duration", Duration::from_millis(30)));
//! ```
//!
//! ## Sampling
//!
//! Every metric has a sample rate, which defaults to the rate in [`MetricsConfig`]. Counter
//! amounts are scaled by the inverse rate, so sampled totals approximate the true total. A rate of
//! `0` disables emission.
//!
//! ## Internal Relay
//!
//! Counters marked with [`Counter::internal`] are additionally written to the time series store,
//! unless relaying is disabled or the key starts with a skipped prefix. The relay is unbounded and
//! never blocks the caller. Use [`Metrics::flush_internal`] to wait for pending writes.
//!
//! ## Timers
//!
//! [`Metrics::timer`] returns a guard that emits exactly one timing with a `result` tag on every
//! exit path, including errors and panics:
//!
//! ```
//! use beacon_metrics::{Metrics, TimerSpec};
//!
//! let metrics = Metrics::default();
//! let value: Result<u32, std::num::ParseIntError> =
//!     metrics.time(TimerSpec::new("parse"), |_tags| "42".parse());
//! assert_eq!(value, Ok(42));
//! ```

#![warn(missing_docs)]

mod backend;
mod facade;
mod metric;
mod middleware;
mod relay;
mod sanitize;
mod timer;
mod tsdb;

pub use self::backend::*;
pub use self::facade::*;
pub use self::metric::*;
pub use self::middleware::*;
pub use self::relay::*;
pub use self::sanitize::*;
pub use self::timer::*;
pub use self::tsdb::*;
