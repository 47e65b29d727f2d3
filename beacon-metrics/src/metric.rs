use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use rand::Rng;
use rand::distr::StandardUniform;

/// Tags attached to a metric.
///
/// The order of tags is irrelevant to backends. A sorted map keeps output deterministic.
pub type Tags = BTreeMap<String, String>;

/// Fraction of emissions that are sent, between `0.0` (none) and `1.0` (all).
///
/// Values outside of this range are clamped, `NaN` disables emission.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct SampleRate(f64);

impl SampleRate {
    /// Emit every value.
    pub const ALWAYS: Self = Self(1.0);

    /// Creates a sample rate, clamping the value into `[0, 1]`.
    pub fn new(rate: f64) -> Self {
        if rate.is_nan() {
            Self(0.0)
        } else {
            Self(rate.clamp(0.0, 1.0))
        }
    }

    /// Returns the rate as float.
    pub fn get(self) -> f64 {
        self.0
    }

    /// Returns `true` if nothing is ever emitted at this rate.
    pub fn is_disabled(self) -> bool {
        self.0 <= 0.0
    }

    /// Returns `true` if only a fraction of values is emitted at this rate.
    pub fn is_sampled(self) -> bool {
        self.0 > 0.0 && self.0 < 1.0
    }

    /// Makes a random sampling decision.
    pub fn sample(self) -> bool {
        if self.0 <= 0.0 {
            false
        } else if self.0 >= 1.0 {
            true
        } else {
            // Thread local RNG with a uniform distribution, as `gen_range` is optimized for the
            // case that only a single sample is drawn.
            let s: f64 = rand::rng().sample(StandardUniform);
            s < self.0
        }
    }

    /// Scales a sampled amount to approximate the true total.
    ///
    /// The result is truncated toward zero.
    pub fn scale(self, amount: i64) -> i64 {
        if self.is_sampled() {
            (amount as f64 * (1.0 / self.0)) as i64
        } else {
            amount
        }
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::ALWAYS
    }
}

impl From<f64> for SampleRate {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<SampleRate> for f64 {
    fn from(value: SampleRate) -> Self {
        value.0
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A metric for capturing counters.
///
/// Implement this on an enum to get type safe metric names:
///
/// ```
/// use beacon_metrics::{Counter, CounterMetric};
///
/// enum JobCounters {
///     Started,
/// }
///
/// impl CounterMetric for JobCounters {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::Started => "jobs.started",
///         }
///     }
/// }
///
/// let counter = Counter::new(JobCounters::Started.name());
/// assert_eq!(counter.key(), "jobs.started");
/// ```
pub trait CounterMetric {
    /// Returns the counter metric name.
    fn name(&self) -> &'static str;
}

/// A metric for capturing timings.
///
/// See [`CounterMetric`] for an example.
pub trait TimerMetric {
    /// Returns the timer metric name.
    fn name(&self) -> &'static str;
}

/// Fields shared by all metric builders.
macro_rules! common_builder_methods {
    () => {
        /// Returns the metric key.
        pub fn key(&self) -> &str {
            &self.key
        }

        /// Sets the instance, which is reported as an additional dimension.
        pub fn instance(mut self, instance: impl Into<String>) -> Self {
            self.instance = Some(instance.into());
            self
        }

        /// Adds a tag.
        pub fn tag(mut self, name: impl Into<String>, value: impl ToString) -> Self {
            self.tags.insert(name.into(), value.to_string());
            self
        }

        /// Adds all tags in the given map.
        pub fn tags(mut self, tags: Tags) -> Self {
            self.tags.extend(tags);
            self
        }

        /// Overrides the default sample rate.
        pub fn sample_rate(mut self, rate: impl Into<SampleRate>) -> Self {
            self.sample_rate = Some(rate.into());
            self
        }
    };
}

macro_rules! unit_builder_method {
    () => {
        /// Sets the unit of the value.
        pub fn unit(mut self, unit: impl Into<String>) -> Self {
            self.unit = Some(unit.into());
            self
        }
    };
}

/// Increments a counter, see [`Metrics::incr`](crate::Metrics::incr).
#[derive(Clone, Debug)]
pub struct Counter {
    pub(crate) key: String,
    pub(crate) amount: i64,
    pub(crate) instance: Option<String>,
    pub(crate) tags: Tags,
    pub(crate) skip_internal: bool,
    pub(crate) sample_rate: Option<SampleRate>,
    pub(crate) unit: Option<String>,
}

impl Counter {
    /// Creates a counter increment by `1`.
    ///
    /// Counters are not relayed to the internal time series store unless
    /// [`internal`](Self::internal) is called.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            amount: 1,
            instance: None,
            tags: Tags::new(),
            skip_internal: true,
            sample_rate: None,
            unit: None,
        }
    }

    /// Sets the amount to increment by.
    pub fn amount(mut self, amount: i64) -> Self {
        self.amount = amount;
        self
    }

    /// Also relays this increment to the internal time series store.
    pub fn internal(mut self) -> Self {
        self.skip_internal = false;
        self
    }

    common_builder_methods!();
    unit_builder_method!();
}

/// Sets a gauge, see [`Metrics::gauge`](crate::Metrics::gauge).
#[derive(Clone, Debug)]
pub struct Gauge {
    pub(crate) key: String,
    pub(crate) value: f64,
    pub(crate) instance: Option<String>,
    pub(crate) tags: Tags,
    pub(crate) sample_rate: Option<SampleRate>,
    pub(crate) unit: Option<String>,
}

impl Gauge {
    /// Creates a gauge with the given value.
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            instance: None,
            tags: Tags::new(),
            sample_rate: None,
            unit: None,
        }
    }

    common_builder_methods!();
    unit_builder_method!();
}

/// Records a duration, see [`Metrics::timing`](crate::Metrics::timing).
#[derive(Clone, Debug)]
pub struct Timing {
    pub(crate) key: String,
    pub(crate) value: Duration,
    pub(crate) instance: Option<String>,
    pub(crate) tags: Tags,
    pub(crate) sample_rate: Option<SampleRate>,
}

impl Timing {
    /// Creates a timing with the given duration.
    pub fn new(key: impl Into<String>, value: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            instance: None,
            tags: Tags::new(),
            sample_rate: None,
        }
    }

    common_builder_methods!();
}

/// Records a value in a distribution, see [`Metrics::distribution`](crate::Metrics::distribution).
#[derive(Clone, Debug)]
pub struct Distribution {
    pub(crate) key: String,
    pub(crate) value: f64,
    pub(crate) instance: Option<String>,
    pub(crate) tags: Tags,
    pub(crate) sample_rate: Option<SampleRate>,
    pub(crate) unit: Option<String>,
}

impl Distribution {
    /// Creates a distribution value.
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            instance: None,
            tags: Tags::new(),
            sample_rate: None,
            unit: None,
        }
    }

    common_builder_methods!();
    unit_builder_method!();
}

/// Describes a timed span, see [`Metrics::timer`](crate::Metrics::timer).
#[derive(Clone, Debug)]
pub struct TimerSpec {
    pub(crate) key: String,
    pub(crate) instance: Option<String>,
    pub(crate) tags: Tags,
    pub(crate) sample_rate: Option<SampleRate>,
}

impl TimerSpec {
    /// Creates a timer specification.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            instance: None,
            tags: Tags::new(),
            sample_rate: None,
        }
    }

    common_builder_methods!();
}

/// An event sent to the metrics backend, see [`Metrics::event`](crate::Metrics::event).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Event {
    /// Title of the event.
    pub title: String,
    /// Text body of the event.
    pub message: String,
    /// Alert type, such as `error`, `warning`, `info`, or `success`.
    pub alert_type: Option<String>,
    /// Key used to group related events.
    pub aggregation_key: Option<String>,
    /// Name of the source that emitted the event.
    pub source_type_name: Option<String>,
    /// Priority, such as `normal` or `low`.
    pub priority: Option<String>,
    /// Instance reported as additional dimension.
    pub instance: Option<String>,
    /// Tags attached to the event.
    pub tags: Tags,
}

impl Event {
    /// Creates an event with a title and message.
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Sets the alert type.
    pub fn alert_type(mut self, alert_type: impl Into<String>) -> Self {
        self.alert_type = Some(alert_type.into());
        self
    }

    /// Sets the aggregation key.
    pub fn aggregation_key(mut self, key: impl Into<String>) -> Self {
        self.aggregation_key = Some(key.into());
        self
    }

    /// Sets the source type name.
    pub fn source_type_name(mut self, name: impl Into<String>) -> Self {
        self.source_type_name = Some(name.into());
        self
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Sets the instance.
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Adds a tag.
    pub fn tag(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.tags.insert(name.into(), value.to_string());
        self
    }
}

/// A sampled counter increment on its way to the internal time series store.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricEvent {
    /// The metric key.
    pub key: String,
    /// Optional instance, appended to the key as `key.instance`.
    pub instance: Option<String>,
    /// Tags of the original increment.
    pub tags: Tags,
    /// The unscaled amount.
    pub amount: i64,
    /// The rate at which this event passed sampling.
    pub sample_rate: SampleRate,
}

impl MetricEvent {
    /// Returns the key under which this event is stored.
    pub fn full_key(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{}.{instance}", self.key),
            None => self.key.clone(),
        }
    }

    /// Returns the amount scaled by the inverse sample rate.
    pub fn scaled_amount(&self) -> i64 {
        self.sample_rate.scale(self.amount)
    }
}
