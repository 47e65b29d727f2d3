//! Client for the similarity search service ("seer").
//!
//! The similarity service stores grouping records, which describe the stack trace of an issue,
//! and finds near duplicates among them. [`SeerClient`] uploads records in bulk and deletes them
//! per project or per hash.
//!
//! The client never returns transport errors to its callers. Every failure is logged, reported
//! as a metric through [`beacon_metrics::Metrics`], and surfaced as an unsuccessful response.
//! There are no retries.
//!
//! Timeouts are read from the [`OptionsStore`](beacon_dynamic_config::OptionsStore) on every
//! call, so they can be changed while the process is running.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use beacon_dynamic_config::OptionsStore;
//! use beacon_metrics::Metrics;
//! use beacon_seer::{CreateGroupingRecordsRequest, SeerClient};
//!
//! let client = SeerClient::new(
//!     "http://127.0.0.1:9091/".parse().unwrap(),
//!     Duration::from_secs(1),
//!     Arc::new(OptionsStore::default()),
//!     Arc::new(Metrics::default()),
//! )
//! .unwrap();
//!
//! let response = client.post_bulk_grouping_records(&CreateGroupingRecordsRequest::default());
//! assert!(response.success);
//! ```

#![warn(missing_docs)]

mod client;
mod statsd;
mod types;

pub use self::client::*;
pub use self::statsd::*;
pub use self::types::*;
