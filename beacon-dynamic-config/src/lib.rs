//! Runtime options for Beacon.
//!
//! Unlike the static configuration in `beacon-config`, options can be changed while the process
//! is running. Consumers never cache option values: they call [`OptionsStore::get`] on every use
//! and always observe the most recent snapshot.
//!
//! ```
//! use beacon_dynamic_config::{Options, OptionsStore};
//!
//! let store = OptionsStore::default();
//! assert_eq!(store.get().seer_bulk_record_update_timeout, 10.0);
//!
//! store.update(Options {
//!     seer_bulk_record_update_timeout: 2.5,
//!     ..Options::default()
//! });
//! assert_eq!(store.get().seer_bulk_record_update_timeout, 2.5);
//! ```

#![warn(missing_docs)]

mod options;

pub use self::options::*;
