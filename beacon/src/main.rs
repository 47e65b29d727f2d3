//! The Beacon command line.
//!
//! Beacon talks to the similarity search service on behalf of operators: it uploads grouping
//! records in bulk and deletes them per project or per hash. All calls report outcome metrics
//! through the configured metrics backend.
//!
//! # Usage
//!
//! ```text
//! beacon config init
//! beacon seer post-records --file records.json
//! beacon seer delete-project 42
//! beacon seer delete-hashes 42 a1b2 c3d4
//! ```
//!
//! Configuration is read from `config.yml` in the config folder, which defaults to `.beacon`.
//! Most values can be overridden with command line arguments or `BEACON_*` environment
//! variables, see `beacon --help`.

mod cli;
mod cliapp;
mod setup;

use std::process;

use beacon_log::Hub;

#[allow(clippy::print_stderr)]
pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            beacon_log::ensure_error(&err);
            if beacon_log::backtrace_enabled() {
                eprintln!("\n{}", err.backtrace());
            }
            1
        }
    };

    Hub::current().client().map(|x| x.close(None));
    process::exit(exit_code);
}
