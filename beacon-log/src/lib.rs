//! Logging and error reporting for Beacon.
//!
//! Every Beacon crate logs through the macros re-exported here, which are the `tracing` macros,
//! and reports diagnostics to Sentry through the re-exported scope API. Nothing else in the
//! workspace depends on `tracing` or `sentry` directly.
//!
//! # Setup
//!
//! The binary calls [`init`] once at startup. Both configuration structs deserialize from the
//! `logging` and `sentry` sections of `config.yml`:
//!
//! ```no_run
//! # #[cfg(feature = "init")] {
//! use beacon_log::{LogConfig, LogFormat, SentryConfig};
//!
//! let logging = LogConfig {
//!     format: LogFormat::Json,
//!     ..LogConfig::default()
//! };
//!
//! beacon_log::init(&logging, &SentryConfig::default());
//! # }
//! ```
//!
//! # Logging
//!
//! Messages are lowercase, without trailing punctuation, and short. Identifiers such as project
//! ids or metric keys go into fields rather than the message:
//!
//! ```
//! beacon_log::info!(project_id = 42, hashes = 3, "deleted grouping records by hash");
//! ```
//!
//! Levels:
//!
//! - [`error!`] for bugs and failed operations. These are forwarded to Sentry.
//! - [`warn!`] for misconfiguration and unexpected responses.
//! - [`info!`] for outcomes of operations.
//! - [`debug!`] and [`trace!`] for diagnostics, including the log metrics backend.
//!
//! Errors are attached as fields with `error = &error as &dyn Error`, or formatted with their
//! source chain through [`LogError`]:
//!
//! ```
//! use beacon_log::LogError;
//!
//! let error = std::io::Error::other("connection reset");
//! beacon_log::error!("request failed: {}", LogError(&error));
//! ```
//!
//! # Diagnostics
//!
//! Data problems that are not failures of Beacon itself are sent as messages with their own
//! scope, so tags and extras do not leak into other events:
//!
//! ```
//! use beacon_log::protocol::Level;
//!
//! beacon_log::with_scope(
//!     |scope| scope.set_tag("organization", 1),
//!     || beacon_log::capture_message("crash_free_rate is negative", Level::Info),
//! );
//! ```
//!
//! # Testing
//!
//! Tests call [`init_test!`], which writes to the test runner's captured output. Only logs of the
//! calling crate are enabled, plus any crate names passed to the macro.

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
mod test;
#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{Level, debug, error, info, trace, warn};

// Expose the minimal error reporting API.
#[doc(inline)]
pub use sentry_core::{Hub, capture_error, capture_message, configure_scope, protocol, with_scope};
