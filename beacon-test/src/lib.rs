//! Helpers for testing Beacon's clients.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with [`beacon_log`] will show up for test
//!    failures or when run with `--nocapture`.
//!  - Use [`MockSeer`] instead of a real similarity service. It records every request and
//!    answers with configurable responses.
//!
//! # Example
//!
//! ```no_run
//! #[test]
//! fn my_test() {
//!     beacon_test::setup();
//!
//!     let seer = beacon_test::MockSeer::start();
//!     beacon_log::debug!(url = %seer.url(), "started mock similarity service");
//! }
//! ```

mod mock_seer;

pub use self::mock_seer::*;

/// Setup the test environment.
///
///  - Initializes logs: trace logs of the client crates are captured by the test runner, all other
///    logs are muted.
pub fn setup() {
    beacon_log::init_test!("beacon_seer", "beacon_metrics", "beacon_dynamic_config");
}
