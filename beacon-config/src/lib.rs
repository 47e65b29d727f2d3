//! Configuration for the Beacon CLI and clients.

#![warn(missing_docs)]

mod config;

pub use crate::config::*;
