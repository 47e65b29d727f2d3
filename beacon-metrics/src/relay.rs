//! Asynchronous relay of sampled counters into the internal time series store.
//!
//! The relay owns an unbounded channel and a single worker thread. Both are created on the first
//! enqueued event. Producers never block: if the worker falls behind, the queue grows without
//! bound. The worker exits once the relay is dropped and the queue is drained.

use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::metric::MetricEvent;
use crate::tsdb::{TimeSeriesStore, TsdbModel};

/// Name of the worker thread.
const THREAD_NAME: &str = "metrics-relay";

enum RelayMessage {
    Incr(MetricEvent),
    Flush(Sender<()>),
}

/// Relays counter increments to a [`TimeSeriesStore`] on a background thread.
pub struct InternalRelay {
    store: Arc<dyn TimeSeriesStore>,
    sender: OnceLock<Sender<RelayMessage>>,
}

impl InternalRelay {
    /// Creates a relay writing into the given store.
    ///
    /// The worker thread is not started until the first event is enqueued.
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            store,
            sender: OnceLock::new(),
        }
    }

    /// Returns `true` if the worker has been started.
    pub fn is_started(&self) -> bool {
        self.sender.get().is_some()
    }

    /// Enqueues an event that has already passed sampling.
    pub fn enqueue(&self, event: MetricEvent) {
        let sender = self.sender.get_or_init(|| start(Arc::clone(&self.store)));

        if sender.send(RelayMessage::Incr(event)).is_err() {
            beacon_log::error!("internal metrics relay is not running");
        }
    }

    /// Blocks until all previously enqueued events have been written.
    ///
    /// Returns immediately if the worker was never started.
    pub fn flush(&self) {
        let Some(sender) = self.sender.get() else {
            return;
        };

        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if sender.send(RelayMessage::Flush(ack_tx)).is_ok() {
            ack_rx.recv().ok();
        }
    }
}

impl fmt::Debug for InternalRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalRelay")
            .field("store", &self.store)
            .field("started", &self.is_started())
            .finish()
    }
}

fn start(store: Arc<dyn TimeSeriesStore>) -> Sender<RelayMessage> {
    let (tx, rx) = crossbeam_channel::unbounded();

    let result = thread::Builder::new()
        .name(THREAD_NAME.to_owned())
        .spawn(move || run(rx, store));

    match result {
        Ok(_) => beacon_log::debug!("started internal metrics relay"),
        // The receiver is dropped with the closure, so every send reports the failure.
        Err(error) => beacon_log::error!(
            error = &error as &dyn Error,
            "failed to start internal metrics relay"
        ),
    }

    tx
}

fn run(rx: Receiver<RelayMessage>, store: Arc<dyn TimeSeriesStore>) {
    for message in rx {
        match message {
            RelayMessage::Incr(event) => write(store.as_ref(), &event),
            RelayMessage::Flush(ack) => {
                ack.send(()).ok();
            }
        }
    }

    beacon_log::debug!("stopped internal metrics relay");
}

fn write(store: &dyn TimeSeriesStore, event: &MetricEvent) {
    let key = event.full_key();
    let count = event.scaled_amount();

    // A panicking store must not take down the worker.
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        store.incr(TsdbModel::Internal, &key, count)
    }));

    match result {
        Ok(Ok(())) => (),
        Ok(Err(error)) => beacon_log::error!(
            error = &error as &dyn Error,
            key = key.as_str(),
            "unable to incr internal metric"
        ),
        Err(_) => beacon_log::error!(
            key = key.as_str(),
            "internal metric store panicked"
        ),
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use crate::metric::{SampleRate, Tags};
    use crate::tsdb::{MemoryTsdb, TsdbError};

    use super::*;

    fn event(key: &str, amount: i64, sample_rate: f64) -> MetricEvent {
        MetricEvent {
            key: key.to_owned(),
            instance: None,
            tags: Tags::new(),
            amount,
            sample_rate: SampleRate::new(sample_rate),
        }
    }

    #[test]
    fn test_lazy_start() {
        let relay = InternalRelay::new(Arc::new(MemoryTsdb::new()));
        assert!(!relay.is_started());

        relay.flush();
        assert!(!relay.is_started());

        relay.enqueue(event("jobs.started", 1, 1.0));
        assert!(relay.is_started());
    }

    #[test]
    fn test_rescales_and_writes() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let relay = InternalRelay::new(tsdb.clone());

        relay.enqueue(event("jobs.started", 1, 0.25));
        relay.enqueue(MetricEvent {
            instance: Some("cleanup".to_owned()),
            ..event("jobs.started", 2, 1.0)
        });
        relay.flush();

        assert_eq!(tsdb.get(TsdbModel::Internal, "jobs.started"), 4);
        assert_eq!(tsdb.get(TsdbModel::Internal, "jobs.started.cleanup"), 2);
    }

    #[derive(Debug, Default)]
    struct FlakyTsdb {
        written: Mutex<Vec<String>>,
    }

    impl TimeSeriesStore for FlakyTsdb {
        fn incr(&self, _model: TsdbModel, key: &str, _count: i64) -> Result<(), TsdbError> {
            if key.starts_with("broken") {
                return Err(TsdbError::Unavailable);
            }
            self.written.lock().push(key.to_owned());
            Ok(())
        }
    }

    #[test]
    fn test_continues_after_write_failure() {
        beacon_log::init_test!();

        let tsdb = Arc::new(FlakyTsdb::default());
        let relay = InternalRelay::new(tsdb.clone());

        relay.enqueue(event("first", 1, 1.0));
        relay.enqueue(event("broken", 1, 1.0));
        relay.enqueue(event("second", 1, 1.0));
        relay.flush();

        assert_eq!(*tsdb.written.lock(), ["first", "second"]);
    }

    #[test]
    fn test_counter_overflow_keeps_worker_alive() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let relay = InternalRelay::new(tsdb.clone());

        relay.enqueue(event("jobs.started", i64::MAX, 1.0));
        relay.enqueue(event("jobs.started", i64::MAX, 1.0));
        relay.enqueue(event("jobs.started", 1, 1e-300));
        relay.enqueue(event("jobs.finished", 1, 1.0));
        relay.flush();

        assert_eq!(tsdb.get(TsdbModel::Internal, "jobs.started"), i64::MAX);
        assert_eq!(tsdb.get(TsdbModel::Internal, "jobs.finished"), 1);
    }

    #[derive(Debug, Default)]
    struct PanickingTsdb {
        written: Mutex<Vec<String>>,
    }

    impl TimeSeriesStore for PanickingTsdb {
        fn incr(&self, _model: TsdbModel, key: &str, _count: i64) -> Result<(), TsdbError> {
            if key == "explode" {
                panic!("store exploded");
            }
            self.written.lock().push(key.to_owned());
            Ok(())
        }
    }

    #[test]
    fn test_continues_after_store_panic() {
        beacon_log::init_test!();

        let tsdb = Arc::new(PanickingTsdb::default());
        let relay = InternalRelay::new(tsdb.clone());

        relay.enqueue(event("first", 1, 1.0));
        relay.enqueue(event("explode", 1, 1.0));
        relay.enqueue(event("second", 1, 1.0));
        relay.flush();

        assert_eq!(*tsdb.written.lock(), ["first", "second"]);
    }

    #[test]
    fn test_concurrent_producers() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let relay = Arc::new(InternalRelay::new(tsdb.clone()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let relay = Arc::clone(&relay);
                thread::spawn(move || {
                    for _ in 0..100 {
                        relay.enqueue(event("jobs.started", 1, 1.0));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        relay.flush();

        assert_eq!(tsdb.get(TsdbModel::Internal, "jobs.started"), 400);
    }
}
