use std::fmt;
use std::mem;
use std::thread;
use std::time::{Duration, Instant};

use crate::facade::Metrics;
use crate::metric::{SampleRate, Tags, TimerSpec, Timing};

/// Tag carrying the outcome of a timed span.
pub const RESULT_TAG: &str = "result";

/// The outcome of a timed span.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerResult {
    /// The span completed normally.
    Success,
    /// The span failed, returned an error, or panicked.
    Failure,
}

impl TimerResult {
    /// Returns the tag value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for TimerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measures a span of code and emits exactly one timing when dropped.
///
/// Created by [`Metrics::timer`]. The timing is tagged with `result`: the explicitly marked
/// outcome if [`fail`](Self::fail) or [`succeed`](Self::succeed) was called, otherwise
/// `failure` when dropped during a panic and `success` in all other cases.
#[must_use = "the timing is emitted when the timer is dropped"]
pub struct Timer<'a> {
    metrics: &'a Metrics,
    key: String,
    instance: Option<String>,
    tags: Tags,
    sample_rate: Option<SampleRate>,
    start: Instant,
    result: Option<TimerResult>,
}

impl<'a> Timer<'a> {
    pub(crate) fn start(metrics: &'a Metrics, spec: TimerSpec) -> Self {
        Self {
            metrics,
            key: spec.key,
            instance: spec.instance,
            tags: spec.tags,
            sample_rate: spec.sample_rate,
            start: Instant::now(),
            result: None,
        }
    }

    /// Returns the tags of the timing, which may be modified until the timer is dropped.
    pub fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }

    /// Adds a tag to the timing.
    pub fn tag(&mut self, name: impl Into<String>, value: impl ToString) {
        self.tags.insert(name.into(), value.to_string());
    }

    /// Marks the span as failed.
    pub fn fail(&mut self) {
        self.result = Some(TimerResult::Failure);
    }

    /// Marks the span as successful.
    pub fn succeed(&mut self) {
        self.result = Some(TimerResult::Success);
    }

    /// Returns the time elapsed since the timer was started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl fmt::Debug for Timer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("key", &self.key)
            .field("instance", &self.instance)
            .field("tags", &self.tags)
            .field("elapsed", &self.elapsed())
            .field("result", &self.result)
            .finish()
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        let result = self.result.unwrap_or(if thread::panicking() {
            TimerResult::Failure
        } else {
            TimerResult::Success
        });

        let mut tags = mem::take(&mut self.tags);
        tags.insert(RESULT_TAG.to_owned(), result.as_str().to_owned());

        let timing = Timing {
            key: mem::take(&mut self.key),
            value: self.start.elapsed(),
            instance: self.instance.take(),
            tags,
            sample_rate: self.sample_rate,
        };

        self.metrics.timing(timing);
    }
}
