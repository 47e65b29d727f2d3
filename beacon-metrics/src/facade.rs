use std::error::Error;
use std::sync::Arc;

use crate::backend::{BackendError, MetricMeta, MetricsBackend, NoopBackend};
use crate::metric::{
    Counter, Distribution, Event, Gauge, MetricEvent, SampleRate, Tags, TimerSpec, Timing,
};
use crate::middleware;
use crate::relay::InternalRelay;
use crate::timer::Timer;
use crate::tsdb::{MemoryTsdb, TimeSeriesStore};

/// Key of the counter emitted for every increment relayed to the time series store.
pub const INTERNAL_INCR_KEY: &str = "internal_metrics.incr";

/// Behavior of the [`Metrics`] facade.
#[derive(Clone, Debug, Default)]
pub struct MetricsConfig {
    /// Sample rate for metrics that do not specify their own.
    pub sample_rate: SampleRate,
    /// Disables the internal relay entirely.
    pub skip_all_internal: bool,
    /// Keys starting with any of these prefixes are never relayed.
    pub skip_internal_prefixes: Vec<String>,
    /// Passes high cardinality tags through to the backend.
    pub allow_high_cardinality_tags: bool,
}

/// The entry point for all metrics.
///
/// Emission never fails: backend errors are logged and suppressed. Construct this once at startup
/// and share it with an [`Arc`].
///
/// ```
/// use std::sync::Arc;
/// use beacon_metrics::{Counter, Metrics};
///
/// let metrics = Arc::new(Metrics::default());
/// metrics.incr(Counter::new("jobs.started").tag("queue", "default"));
/// ```
#[derive(Debug)]
pub struct Metrics {
    backend: Arc<dyn MetricsBackend>,
    relay: InternalRelay,
    config: MetricsConfig,
}

impl Metrics {
    /// Creates the facade.
    ///
    /// Relayed increments are written to `store` by a background thread that is started on the
    /// first relayed increment.
    pub fn new(
        backend: Arc<dyn MetricsBackend>,
        store: Arc<dyn TimeSeriesStore>,
        config: MetricsConfig,
    ) -> Self {
        if config.sample_rate.is_disabled() {
            beacon_log::debug!("metrics sample rate is 0, no metrics will be reported");
        }

        Self {
            backend,
            relay: InternalRelay::new(store),
            config,
        }
    }

    /// Returns the configuration of this facade.
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Returns `true` once the internal relay has been started.
    pub fn internal_relay_started(&self) -> bool {
        self.relay.is_started()
    }

    /// Increments a counter.
    ///
    /// The amount sent to the backend is scaled by the inverse sample rate. If the counter was
    /// marked [`internal`](Counter::internal), it passes sampling, and its key matches none of the
    /// skipped prefixes, the increment is also relayed to the time series store. Once the backend
    /// accepts the counter, an `internal_metrics.incr` counter is emitted as well.
    pub fn incr(&self, counter: Counter) {
        let sample_rate = self.sample_rate(counter.sample_rate);
        if sample_rate.is_disabled() {
            return;
        }

        let relayed = self.should_relay(&counter, sample_rate);
        let tags = self.prepare_tags(&counter.key, &counter.tags);

        if relayed {
            self.relay.enqueue(MetricEvent {
                key: counter.key.clone(),
                instance: counter.instance.clone(),
                tags: counter.tags,
                amount: counter.amount,
                sample_rate,
            });
        }

        let meta = MetricMeta {
            key: &counter.key,
            instance: counter.instance.as_deref(),
            tags: &tags,
            sample_rate,
            unit: counter.unit.as_deref(),
        };
        let result = self.backend.incr(&meta, sample_rate.scale(counter.amount));
        let failed = result.is_err();
        self.handle_result(&counter.key, result);

        // The bookkeeping counter is only emitted after the counter itself was accepted.
        if relayed && !failed {
            let tags = self.prepare_tags(INTERNAL_INCR_KEY, &Tags::new());
            let meta = MetricMeta {
                key: INTERNAL_INCR_KEY,
                instance: Some(&counter.key),
                tags: &tags,
                sample_rate,
                unit: None,
            };
            let result = self.backend.incr(&meta, 1);
            self.handle_result(INTERNAL_INCR_KEY, result);
        }
    }

    /// Sets a gauge.
    pub fn gauge(&self, gauge: Gauge) {
        let sample_rate = self.sample_rate(gauge.sample_rate);
        if sample_rate.is_disabled() {
            return;
        }

        let tags = self.prepare_tags(&gauge.key, &gauge.tags);
        let meta = MetricMeta {
            key: &gauge.key,
            instance: gauge.instance.as_deref(),
            tags: &tags,
            sample_rate,
            unit: gauge.unit.as_deref(),
        };
        let result = self.backend.gauge(&meta, gauge.value);
        self.handle_result(&gauge.key, result);
    }

    /// Records a duration.
    pub fn timing(&self, timing: Timing) {
        let sample_rate = self.sample_rate(timing.sample_rate);
        if sample_rate.is_disabled() {
            return;
        }

        let tags = self.prepare_tags(&timing.key, &timing.tags);
        let meta = MetricMeta {
            key: &timing.key,
            instance: timing.instance.as_deref(),
            tags: &tags,
            sample_rate,
            unit: None,
        };
        let result = self.backend.timing(&meta, timing.value);
        self.handle_result(&timing.key, result);
    }

    /// Records a value in a distribution.
    pub fn distribution(&self, distribution: Distribution) {
        let sample_rate = self.sample_rate(distribution.sample_rate);
        if sample_rate.is_disabled() {
            return;
        }

        let tags = self.prepare_tags(&distribution.key, &distribution.tags);
        let meta = MetricMeta {
            key: &distribution.key,
            instance: distribution.instance.as_deref(),
            tags: &tags,
            sample_rate,
            unit: distribution.unit.as_deref(),
        };
        let result = self.backend.distribution(&meta, distribution.value);
        self.handle_result(&distribution.key, result);
    }

    /// Records an event.
    pub fn event(&self, mut event: Event) {
        event.tags = self.prepare_tags(&event.title, &event.tags);
        let result = self.backend.event(&event);
        self.handle_result(&event.title, result);
    }

    /// Starts a timer that emits one timing when dropped.
    ///
    /// ```
    /// use beacon_metrics::{Metrics, TimerSpec};
    ///
    /// let metrics = Metrics::default();
    /// {
    ///     let mut timer = metrics.timer(TimerSpec::new("cleanup.duration"));
    ///     timer.tag("batch", 1);
    /// } // emitted with `result:success`
    /// ```
    pub fn timer(&self, spec: TimerSpec) -> Timer<'_> {
        Timer::start(self, spec)
    }

    /// Runs `f` in a timer.
    ///
    /// The closure receives the mutable tags of the timing. An `Err` result is tagged
    /// `result:failure` and returned unchanged, as is a panic.
    pub fn time<T, E, F>(&self, spec: TimerSpec, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Tags) -> Result<T, E>,
    {
        let mut timer = self.timer(spec);
        let result = f(timer.tags_mut());
        if result.is_err() {
            timer.fail();
        }
        result
    }

    /// Wraps a function so that every call is measured by [`time`](Self::time).
    ///
    /// Functions with several arguments take them as a tuple.
    pub fn wraps<A, T, E, F>(&self, spec: TimerSpec, f: F) -> impl Fn(A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
    {
        move |args| self.time(spec.clone(), |_| f(args))
    }

    /// Blocks until all increments relayed so far have been written to the time series store.
    pub fn flush_internal(&self) {
        self.relay.flush();
    }

    fn sample_rate(&self, rate: Option<SampleRate>) -> SampleRate {
        rate.unwrap_or(self.config.sample_rate)
    }

    fn should_relay(&self, counter: &Counter, sample_rate: SampleRate) -> bool {
        !self.config.skip_all_internal
            && !counter.skip_internal
            && !self
                .config
                .skip_internal_prefixes
                .iter()
                .any(|prefix| counter.key.starts_with(prefix.as_str()))
            && sample_rate.sample()
    }

    fn prepare_tags(&self, key: &str, tags: &Tags) -> Tags {
        let mut merged = middleware::current_global_tags();
        merged.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));

        if !self.config.allow_high_cardinality_tags {
            middleware::filter_high_cardinality_tags(key, &mut merged);
        }

        merged
    }

    fn handle_result(&self, key: &str, result: Result<(), BackendError>) {
        if let Err(error) = result {
            beacon_log::error!(
                error = &error as &dyn Error,
                metric = key,
                "unable to record backend metric"
            );
        }
    }
}

impl Default for Metrics {
    /// Creates a facade that discards all metrics.
    fn default() -> Self {
        Self::new(
            Arc::new(NoopBackend),
            Arc::new(MemoryTsdb::new()),
            MetricsConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::panic::{self, AssertUnwindSafe};
    use std::time::Duration;

    use crate::backend::{Capture, CapturingBackend};
    use crate::middleware::global_tags;
    use crate::tsdb::TsdbModel;

    use super::*;

    struct Fixture {
        backend: Arc<CapturingBackend>,
        tsdb: Arc<MemoryTsdb>,
        metrics: Metrics,
    }

    fn fixture(config: MetricsConfig) -> Fixture {
        let backend = Arc::new(CapturingBackend::new());
        let tsdb = Arc::new(MemoryTsdb::new());
        let metrics = Metrics::new(backend.clone(), tsdb.clone(), config);
        Fixture {
            backend,
            tsdb,
            metrics,
        }
    }

    fn incr_amounts(captures: &[Capture]) -> Vec<(String, i64)> {
        captures
            .iter()
            .filter_map(|capture| match capture {
                Capture::Incr { key, amount, .. } => Some((key.clone(), *amount)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_incr_scales_amount() {
        let f = fixture(MetricsConfig::default());

        f.metrics.incr(Counter::new("a").amount(1).sample_rate(0.3));
        f.metrics.incr(Counter::new("b").amount(5).sample_rate(0.5));
        f.metrics.incr(Counter::new("c").amount(5));

        assert_eq!(
            incr_amounts(&f.backend.captures()),
            [
                ("a".to_owned(), 3),
                ("b".to_owned(), 10),
                ("c".to_owned(), 5)
            ]
        );
    }

    #[test]
    fn test_incr_uses_default_sample_rate() {
        let f = fixture(MetricsConfig {
            sample_rate: SampleRate::new(0.5),
            ..Default::default()
        });

        f.metrics.incr(Counter::new("a").amount(2));

        similar_asserts::assert_eq!(
            f.backend.captures(),
            vec![Capture::Incr {
                key: "a".to_owned(),
                instance: None,
                tags: Tags::new(),
                amount: 4,
                sample_rate: 0.5,
                unit: None,
            }]
        );
    }

    #[test]
    fn test_incr_disabled_rate() {
        let f = fixture(MetricsConfig::default());
        f.metrics.incr(Counter::new("a").sample_rate(0.0).internal());

        assert!(f.backend.captures().is_empty());
        assert!(!f.metrics.internal_relay_started());
    }

    #[test]
    fn test_incr_skips_internal_by_default() {
        let f = fixture(MetricsConfig::default());

        for _ in 0..10 {
            f.metrics.incr(Counter::new("jobs.started"));
        }
        f.metrics.flush_internal();

        assert!(!f.metrics.internal_relay_started());
        assert!(f.tsdb.is_empty());
        assert_eq!(f.backend.captures().len(), 10);
    }

    #[test]
    fn test_incr_relays_internal() {
        let f = fixture(MetricsConfig::default());

        f.metrics
            .incr(Counter::new("jobs.started").instance("cleanup").internal());
        f.metrics.flush_internal();

        assert_eq!(
            f.tsdb.get(TsdbModel::Internal, "jobs.started.cleanup"),
            1
        );
        similar_asserts::assert_eq!(
            f.backend.captures(),
            vec![
                Capture::Incr {
                    key: "jobs.started".to_owned(),
                    instance: Some("cleanup".to_owned()),
                    tags: Tags::new(),
                    amount: 1,
                    sample_rate: 1.0,
                    unit: None,
                },
                Capture::Incr {
                    key: INTERNAL_INCR_KEY.to_owned(),
                    instance: Some("jobs.started".to_owned()),
                    tags: Tags::new(),
                    amount: 1,
                    sample_rate: 1.0,
                    unit: None,
                },
            ]
        );
    }

    #[test]
    fn test_incr_skips_internal_at_any_rate() {
        let f = fixture(MetricsConfig::default());

        for _ in 0..100 {
            f.metrics.incr(Counter::new("jobs.started").sample_rate(0.5));
        }
        f.metrics.flush_internal();

        assert!(!f.metrics.internal_relay_started());
        assert!(f.tsdb.is_empty());
        assert!(
            incr_amounts(&f.backend.captures())
                .iter()
                .all(|(key, amount)| key == "jobs.started" && *amount == 2)
        );
    }

    /// Rejects counters with the key `broken` and records every attempted key.
    #[derive(Debug, Default)]
    struct RejectingBackend {
        attempts: parking_lot::Mutex<Vec<String>>,
    }

    impl MetricsBackend for RejectingBackend {
        fn incr(&self, meta: &MetricMeta<'_>, _amount: i64) -> Result<(), BackendError> {
            self.attempts.lock().push(meta.key.to_owned());
            match meta.key {
                "broken" => Err(BackendError::Unavailable),
                _ => Ok(()),
            }
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

    #[test]
    fn test_incr_failure_skips_internal_counter() {
        beacon_log::init_test!();

        let backend = Arc::new(RejectingBackend::default());
        let tsdb = Arc::new(MemoryTsdb::new());
        let metrics = Metrics::new(backend.clone(), tsdb.clone(), MetricsConfig::default());

        metrics.incr(Counter::new("broken").internal());
        metrics.incr(Counter::new("working").internal());
        metrics.flush_internal();

        assert_eq!(tsdb.get(TsdbModel::Internal, "broken"), 1);
        assert_eq!(tsdb.get(TsdbModel::Internal, "working"), 1);
        assert_eq!(
            *backend.attempts.lock(),
            ["broken", "working", INTERNAL_INCR_KEY]
        );
    }

    #[test]
    fn test_incr_skip_prefix() {
        let f = fixture(MetricsConfig {
            skip_internal_prefixes: vec!["jobs.".to_owned()],
            ..Default::default()
        });

        f.metrics.incr(Counter::new("jobs.started").internal());
        f.metrics.incr(Counter::new("tasks.started").internal());
        f.metrics.flush_internal();

        assert_eq!(f.tsdb.get(TsdbModel::Internal, "jobs.started"), 0);
        assert_eq!(f.tsdb.get(TsdbModel::Internal, "tasks.started"), 1);
        assert_eq!(
            incr_amounts(&f.backend.captures()),
            [
                ("jobs.started".to_owned(), 1),
                ("tasks.started".to_owned(), 1),
                (INTERNAL_INCR_KEY.to_owned(), 1),
            ]
        );
    }

    #[test]
    fn test_incr_skip_all_internal() {
        let f = fixture(MetricsConfig {
            skip_all_internal: true,
            ..Default::default()
        });

        f.metrics.incr(Counter::new("jobs.started").internal());

        assert!(!f.metrics.internal_relay_started());
        assert_eq!(f.backend.captures().len(), 1);
    }

    #[test]
    fn test_backend_errors_are_contained() {
        beacon_log::init_test!();

        let metrics = Metrics::new(
            Arc::new(CapturingBackend::failing()),
            Arc::new(MemoryTsdb::new()),
            MetricsConfig::default(),
        );

        metrics.incr(Counter::new("a"));
        metrics.gauge(Gauge::new("b", 1.0));
        metrics.timing(Timing::new("c", Duration::from_millis(1)));
        metrics.distribution(Distribution::new("d", 1.0));
        metrics.event(Event::new("e", "message"));
        let result: Result<(), io::Error> = metrics.time(TimerSpec::new("f"), |_| Ok(()));
        assert!(result.is_ok());
    }

    #[test]
    fn test_global_and_explicit_tags() {
        let f = fixture(MetricsConfig::default());

        let global = Tags::from([
            ("region".to_owned(), "eu".to_owned()),
            ("queue".to_owned(), "default".to_owned()),
        ]);
        global_tags(global, || {
            f.metrics
                .gauge(Gauge::new("queue.size", 3.0).tag("queue", "priority"));
        });

        assert_eq!(
            f.backend.captures()[0].tags(),
            &Tags::from([
                ("queue".to_owned(), "priority".to_owned()),
                ("region".to_owned(), "eu".to_owned()),
            ])
        );
    }

    #[test]
    fn test_high_cardinality_tags() {
        let f = fixture(MetricsConfig::default());
        f.metrics
            .incr(Counter::new("a").tag("project_id", 42).tag("platform", "rust"));

        let allowed = fixture(MetricsConfig {
            allow_high_cardinality_tags: true,
            ..Default::default()
        });
        allowed
            .metrics
            .incr(Counter::new("a").tag("project_id", 42).tag("platform", "rust"));

        assert_eq!(
            f.backend.captures()[0].tags().keys().collect::<Vec<_>>(),
            ["platform"]
        );
        assert_eq!(
            allowed.backend.captures()[0]
                .tags()
                .keys()
                .collect::<Vec<_>>(),
            ["platform", "project_id"]
        );
    }

    fn timing_results(captures: &[Capture]) -> Vec<String> {
        captures
            .iter()
            .filter_map(|capture| match capture {
                Capture::Timing { tags, .. } => tags.get("result").cloned(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_timer_success() {
        let f = fixture(MetricsConfig::default());

        {
            let mut timer = f.metrics.timer(TimerSpec::new("cleanup").instance("batch"));
            timer.tag("kind", "full");
        }

        let captures = f.backend.captures();
        assert_eq!(timing_results(&captures), ["success"]);
        assert_eq!(captures[0].key(), "cleanup");
        assert_eq!(captures[0].tags()["kind"], "full");
    }

    #[test]
    fn test_time_error_propagates() {
        let f = fixture(MetricsConfig::default());

        let result: Result<(), io::Error> = f.metrics.time(TimerSpec::new("cleanup"), |tags| {
            tags.insert("stage".to_owned(), "delete".to_owned());
            Err(io::Error::other("boom"))
        });

        assert_eq!(result.unwrap_err().to_string(), "boom");
        let captures = f.backend.captures();
        assert_eq!(timing_results(&captures), ["failure"]);
        assert_eq!(captures[0].tags()["stage"], "delete");
    }

    #[test]
    fn test_timer_panic() {
        let f = fixture(MetricsConfig::default());

        let fail = true;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _timer = f.metrics.timer(TimerSpec::new("cleanup"));
            if fail {
                panic!("boom");
            }
        }));

        assert!(result.is_err());
        assert_eq!(timing_results(&f.backend.captures()), ["failure"]);
    }

    #[test]
    fn test_timer_explicit_result() {
        let f = fixture(MetricsConfig::default());

        {
            let mut timer = f.metrics.timer(TimerSpec::new("cleanup"));
            timer.fail();
        }

        assert_eq!(timing_results(&f.backend.captures()), ["failure"]);
    }

    #[test]
    fn test_wraps() {
        let f = fixture(MetricsConfig::default());

        let checked_div = f.metrics.wraps(TimerSpec::new("div"), |(a, b): (i32, i32)| {
            a.checked_div(b).ok_or("division by zero")
        });

        assert_eq!(checked_div((6, 3)), Ok(2));
        assert_eq!(checked_div((1, 0)), Err("division by zero"));
        assert_eq!(
            timing_results(&f.backend.captures()),
            ["success", "failure"]
        );
    }

    #[test]
    fn test_event_tags() {
        let f = fixture(MetricsConfig::default());

        f.metrics.event(
            Event::new("deploy", "deployed a new release")
                .alert_type("info")
                .tag("group", 1)
                .tag("env", "prod"),
        );

        let captures = f.backend.captures();
        let Capture::Event(event) = &captures[0] else {
            panic!("expected an event");
        };
        assert_eq!(event.alert_type.as_deref(), Some("info"));
        assert_eq!(
            event.tags,
            Tags::from([("env".to_owned(), "prod".to_owned())])
        );
    }
}
