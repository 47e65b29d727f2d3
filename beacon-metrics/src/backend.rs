use std::collections::BTreeMap;
use std::fmt;
use std::net::{ToSocketAddrs, UdpSocket};
use std::panic::RefUnwindSafe;
use std::time::Duration;

use cadence::prelude::*;
use cadence::{
    BufferedUdpMetricSink, Metric, MetricBuilder, MetricSink, QueuingMetricSink, StatsdClient,
    UdpMetricSink,
};

use crate::metric::{Event, SampleRate, Tags};

/// Maximum number of metrics queued for the statsd socket before they are dropped.
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

/// An error emitting a metric to a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The statsd client failed to send the metric.
    #[error("failed to send metric to statsd")]
    Statsd(#[from] cadence::MetricError),
    /// The socket for the statsd client could not be set up.
    #[error("failed to set up statsd socket")]
    Io(#[from] std::io::Error),
    /// The backend does not accept metrics at this time.
    #[error("metrics backend unavailable")]
    Unavailable,
}

/// Common attributes of a metric passed to a [`MetricsBackend`].
#[derive(Clone, Copy, Debug)]
pub struct MetricMeta<'a> {
    /// The metric key, without the backend's prefix.
    pub key: &'a str,
    /// Optional instance dimension.
    pub instance: Option<&'a str>,
    /// Tags after merging global tags and filtering.
    pub tags: &'a Tags,
    /// The rate at which this metric is sampled.
    pub sample_rate: SampleRate,
    /// Optional unit of the value.
    pub unit: Option<&'a str>,
}

/// A destination for metrics.
///
/// Backends must not panic. Failures are reported as [`BackendError`] and are logged by the
/// caller.
pub trait MetricsBackend: Send + Sync + fmt::Debug {
    /// Increments a counter.
    ///
    /// The amount has already been scaled by the inverse sample rate.
    fn incr(&self, meta: &MetricMeta<'_>, amount: i64) -> Result<(), BackendError>;

    /// Sets a gauge.
    fn gauge(&self, meta: &MetricMeta<'_>, value: f64) -> Result<(), BackendError>;

    /// Records a duration.
    fn timing(&self, meta: &MetricMeta<'_>, value: Duration) -> Result<(), BackendError>;

    /// Records a value in a distribution.
    fn distribution(&self, meta: &MetricMeta<'_>, value: f64) -> Result<(), BackendError>;

    /// Records an event.
    fn event(&self, event: &Event) -> Result<(), BackendError>;
}

/// A backend that discards all metrics.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBackend;

impl MetricsBackend for NoopBackend {
    fn incr(&self, _meta: &MetricMeta<'_>, _amount: i64) -> Result<(), BackendError> {
        Ok(())
    }

    fn gauge(&self, _meta: &MetricMeta<'_>, _value: f64) -> Result<(), BackendError> {
        Ok(())
    }

    fn timing(&self, _meta: &MetricMeta<'_>, _value: Duration) -> Result<(), BackendError> {
        Ok(())
    }

    fn distribution(&self, _meta: &MetricMeta<'_>, _value: f64) -> Result<(), BackendError> {
        Ok(())
    }

    fn event(&self, _event: &Event) -> Result<(), BackendError> {
        Ok(())
    }
}

/// A backend that writes every metric to the debug log.
#[derive(Clone, Debug, Default)]
pub struct LogBackend {
    prefix: String,
}

impl LogBackend {
    /// Creates a log backend that prepends `prefix` to every key.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

impl MetricsBackend for LogBackend {
    fn incr(&self, meta: &MetricMeta<'_>, amount: i64) -> Result<(), BackendError> {
        beacon_log::debug!(
            key = %self.key(meta.key),
            instance = meta.instance,
            tags = ?meta.tags,
            amount,
            sample_rate = meta.sample_rate.get(),
            unit = meta.unit,
            "metrics.incr"
        );
        Ok(())
    }

    fn gauge(&self, meta: &MetricMeta<'_>, value: f64) -> Result<(), BackendError> {
        beacon_log::debug!(
            key = %self.key(meta.key),
            instance = meta.instance,
            tags = ?meta.tags,
            value,
            sample_rate = meta.sample_rate.get(),
            unit = meta.unit,
            "metrics.gauge"
        );
        Ok(())
    }

    fn timing(&self, meta: &MetricMeta<'_>, value: Duration) -> Result<(), BackendError> {
        beacon_log::debug!(
            key = %self.key(meta.key),
            instance = meta.instance,
            tags = ?meta.tags,
            value = ?value,
            sample_rate = meta.sample_rate.get(),
            "metrics.timing"
        );
        Ok(())
    }

    fn distribution(&self, meta: &MetricMeta<'_>, value: f64) -> Result<(), BackendError> {
        beacon_log::debug!(
            key = %self.key(meta.key),
            instance = meta.instance,
            tags = ?meta.tags,
            value,
            sample_rate = meta.sample_rate.get(),
            unit = meta.unit,
            "metrics.distribution"
        );
        Ok(())
    }

    fn event(&self, event: &Event) -> Result<(), BackendError> {
        beacon_log::debug!(
            title = event.title.as_str(),
            message = event.message.as_str(),
            alert_type = event.alert_type.as_deref(),
            aggregation_key = event.aggregation_key.as_deref(),
            source_type_name = event.source_type_name.as_deref(),
            priority = event.priority.as_deref(),
            instance = event.instance.as_deref(),
            tags = ?event.tags,
            "metrics.event"
        );
        Ok(())
    }
}

/// Configuration for [`StatsdBackend`].
#[derive(Debug)]
pub struct StatsdConfig<'a, A> {
    /// Prefix prepended to all metric keys.
    pub prefix: &'a str,
    /// Host of the statsd server.
    pub host: A,
    /// Tags added to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// If metrics should be buffered into fewer packets.
    pub buffering: bool,
}

/// A backend that sends metrics to a statsd server.
///
/// Counters arrive pre-scaled. They are sampled on the client at their sample rate and sent
/// without a rate annotation. All other metric types carry `@rate` when sampled. The instance is
/// sent as `instance` tag. Units and events have no statsd representation: units are dropped and
/// events are written to the debug log.
#[derive(Debug)]
pub struct StatsdBackend {
    client: StatsdClient,
    default_tags: BTreeMap<String, String>,
}

impl StatsdBackend {
    /// Creates a backend that reports to a statsd server over UDP.
    pub fn new<A: ToSocketAddrs>(config: StatsdConfig<'_, A>) -> Result<Self, BackendError> {
        let addrs: Vec<_> = config.host.to_socket_addrs()?.collect();
        if let Some(addr) = addrs.first() {
            beacon_log::info!("reporting metrics to statsd at {addr}");
        }

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;

        let client = if config.buffering {
            let sink = BufferedUdpMetricSink::from(&addrs[..], socket)?;
            StatsdClient::from_sink(
                config.prefix,
                QueuingMetricSink::with_capacity(sink, METRICS_MAX_QUEUE_SIZE),
            )
        } else {
            let sink = UdpMetricSink::from(&addrs[..], socket)?;
            StatsdClient::from_sink(
                config.prefix,
                QueuingMetricSink::with_capacity(sink, METRICS_MAX_QUEUE_SIZE),
            )
        };

        Ok(Self {
            client,
            default_tags: config.default_tags,
        })
    }

    /// Creates a backend from a custom cadence sink.
    pub fn from_sink<T>(prefix: &str, sink: T) -> Self
    where
        T: MetricSink + Send + Sync + RefUnwindSafe + 'static,
    {
        Self {
            client: StatsdClient::from_sink(prefix, sink),
            default_tags: BTreeMap::new(),
        }
    }

    /// Sets the tags added to every metric.
    pub fn with_default_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.default_tags = tags;
        self
    }

    fn send<'a, T>(
        &'a self,
        mut metric: MetricBuilder<'a, '_, T>,
        meta: &MetricMeta<'a>,
        annotate_rate: bool,
    ) -> Result<(), BackendError>
    where
        T: Metric + From<String>,
    {
        if !meta.sample_rate.sample() {
            return Ok(());
        }

        for (name, value) in &self.default_tags {
            if !meta.tags.contains_key(name) {
                metric = metric.with_tag(name, value);
            }
        }

        for (name, value) in meta.tags {
            metric = metric.with_tag(name, value);
        }

        if let Some(instance) = meta.instance {
            metric = metric.with_tag("instance", instance);
        }

        if annotate_rate && meta.sample_rate.is_sampled() {
            metric = metric.with_sampling_rate(meta.sample_rate.get());
        }

        metric.try_send()?;
        Ok(())
    }
}

impl MetricsBackend for StatsdBackend {
    fn incr(&self, meta: &MetricMeta<'_>, amount: i64) -> Result<(), BackendError> {
        self.send(self.client.count_with_tags(meta.key, amount), meta, false)
    }

    fn gauge(&self, meta: &MetricMeta<'_>, value: f64) -> Result<(), BackendError> {
        self.send(self.client.gauge_with_tags(meta.key, value), meta, true)
    }

    fn timing(&self, meta: &MetricMeta<'_>, value: Duration) -> Result<(), BackendError> {
        self.send(self.client.time_with_tags(meta.key, value), meta, true)
    }

    fn distribution(&self, meta: &MetricMeta<'_>, value: f64) -> Result<(), BackendError> {
        self.send(self.client.distribution_with_tags(meta.key, value), meta, true)
    }

    fn event(&self, event: &Event) -> Result<(), BackendError> {
        beacon_log::debug!(
            title = event.title.as_str(),
            message = event.message.as_str(),
            "statsd does not support events"
        );
        Ok(())
    }
}

/// A metric recorded by [`CapturingBackend`].
#[cfg(any(test, feature = "test"))]
#[derive(Clone, Debug, PartialEq)]
pub enum Capture {
    /// A counter increment.
    Incr {
        /// The metric key.
        key: String,
        /// The instance.
        instance: Option<String>,
        /// Tags after merging and filtering.
        tags: Tags,
        /// The scaled amount.
        amount: i64,
        /// The sample rate.
        sample_rate: f64,
        /// The unit.
        unit: Option<String>,
    },
    /// A gauge.
    Gauge {
        /// The metric key.
        key: String,
        /// Tags after merging and filtering.
        tags: Tags,
        /// The gauge value.
        value: f64,
    },
    /// A timing.
    Timing {
        /// The metric key.
        key: String,
        /// The instance.
        instance: Option<String>,
        /// Tags after merging and filtering.
        tags: Tags,
        /// The measured duration.
        value: Duration,
        /// The sample rate.
        sample_rate: f64,
    },
    /// A distribution value.
    Distribution {
        /// The metric key.
        key: String,
        /// Tags after merging and filtering.
        tags: Tags,
        /// The value.
        value: f64,
    },
    /// An event.
    Event(Event),
}

#[cfg(any(test, feature = "test"))]
impl Capture {
    /// Returns the key of the captured metric, or the title of an event.
    pub fn key(&self) -> &str {
        match self {
            Self::Incr { key, .. }
            | Self::Gauge { key, .. }
            | Self::Timing { key, .. }
            | Self::Distribution { key, .. } => key,
            Self::Event(event) => &event.title,
        }
    }

    /// Returns the tags of the captured metric.
    pub fn tags(&self) -> &Tags {
        match self {
            Self::Incr { tags, .. }
            | Self::Gauge { tags, .. }
            | Self::Timing { tags, .. }
            | Self::Distribution { tags, .. } => tags,
            Self::Event(event) => &event.tags,
        }
    }
}

/// A backend that records all metrics in memory for assertions in tests.
#[cfg(any(test, feature = "test"))]
#[derive(Debug, Default)]
pub struct CapturingBackend {
    captures: parking_lot::Mutex<Vec<Capture>>,
    failing: bool,
}

#[cfg(any(test, feature = "test"))]
impl CapturingBackend {
    /// Creates an empty capturing backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that rejects every metric with [`BackendError::Unavailable`].
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Returns a copy of all captured metrics.
    pub fn captures(&self) -> Vec<Capture> {
        self.captures.lock().clone()
    }

    /// Returns all captured metrics and clears the backend.
    pub fn take(&self) -> Vec<Capture> {
        std::mem::take(&mut *self.captures.lock())
    }

    fn record(&self, capture: Capture) -> Result<(), BackendError> {
        if self.failing {
            return Err(BackendError::Unavailable);
        }
        self.captures.lock().push(capture);
        Ok(())
    }
}

#[cfg(any(test, feature = "test"))]
impl MetricsBackend for CapturingBackend {
    fn incr(&self, meta: &MetricMeta<'_>, amount: i64) -> Result<(), BackendError> {
        self.record(Capture::Incr {
            key: meta.key.to_owned(),
            instance: meta.instance.map(str::to_owned),
            tags: meta.tags.clone(),
            amount,
            sample_rate: meta.sample_rate.get(),
            unit: meta.unit.map(str::to_owned),
        })
    }

    fn gauge(&self, meta: &MetricMeta<'_>, value: f64) -> Result<(), BackendError> {
        self.record(Capture::Gauge {
            key: meta.key.to_owned(),
            tags: meta.tags.clone(),
            value,
        })
    }

    fn timing(&self, meta: &MetricMeta<'_>, value: Duration) -> Result<(), BackendError> {
        self.record(Capture::Timing {
            key: meta.key.to_owned(),
            instance: meta.instance.map(str::to_owned),
            tags: meta.tags.clone(),
            value,
            sample_rate: meta.sample_rate.get(),
        })
    }

    fn distribution(&self, meta: &MetricMeta<'_>, value: f64) -> Result<(), BackendError> {
        self.record(Capture::Distribution {
            key: meta.key.to_owned(),
            tags: meta.tags.clone(),
            value,
        })
    }

    fn event(&self, event: &Event) -> Result<(), BackendError> {
        self.record(Capture::Event(event.clone()))
    }
}
