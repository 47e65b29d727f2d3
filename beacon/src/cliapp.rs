//! This module implements the definition of the command line app.

use std::path::PathBuf;

use clap::builder::ValueParser;
use clap::{Arg, ArgAction, Command, value_parser};

pub const ABOUT: &str = "Beacon talks to the similarity search service.

Grouping records describe the stack trace of an issue. Beacon uploads them in bulk and deletes
them per project or per hash. Outcomes are reported to the configured metrics backend.";

pub fn make_app() -> Command {
    Command::new("beacon")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .propagate_version(true)
        .max_term_width(79)
        .help_template("{bin} {version}\n{about}\n\n{usage-heading} {usage}\n\n{all-args}")
        .version(env!("CARGO_PKG_VERSION"))
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("CONFIG")
                .value_parser(value_parser!(PathBuf))
                .env("BEACON_CONFIG_PATH")
                .help("The path to the config folder."),
        )
        .arg(
            Arg::new("seer_url")
                .long("seer-url")
                .global(true)
                .value_name("URL")
                .env("BEACON_SEER_URL")
                .help("The base URL of the similarity service."),
        )
        .arg(
            Arg::new("seer_timeout")
                .long("seer-timeout")
                .global(true)
                .value_name("SECONDS")
                .env("BEACON_SEER_TIMEOUT")
                .help("The default timeout for similarity service requests in seconds."),
        )
        .arg(
            Arg::new("seer_shared_secret")
                .long("seer-shared-secret")
                .global(true)
                .value_name("SECRET")
                .env("BEACON_SEER_SHARED_SECRET")
                .hide_env_values(true)
                .help("The secret used to sign requests to the similarity service."),
        )
        .arg(
            Arg::new("metrics_backend")
                .long("metrics-backend")
                .global(true)
                .value_name("BACKEND")
                .value_parser(["statsd", "log", "noop"])
                .env("BEACON_METRICS_BACKEND")
                .help("The backend receiving metrics."),
        )
        .arg(
            Arg::new("statsd")
                .long("statsd")
                .global(true)
                .value_name("HOST:PORT")
                .env("BEACON_STATSD")
                .help("The host and port of the statsd server."),
        )
        .arg(
            Arg::new("metrics_sample_rate")
                .long("metrics-sample-rate")
                .global(true)
                .value_name("RATE")
                .env("BEACON_METRICS_SAMPLE_RATE")
                .help("The default sample rate of metrics between 0 and 1."),
        )
        .subcommand(
            Command::new("seer")
                .about("Manage grouping records in the similarity service")
                .subcommand_required(true)
                .subcommand(
                    Command::new("post-records")
                        .about("Upload a batch of grouping records")
                        .long_about(
                            "Upload a batch of grouping records.\n\nThe file contains a JSON \
                             object with the fields `group_id_list`, `data` and \
                             `stacktrace_list`. The response of the service is printed to \
                             stdout.",
                        )
                        .arg(
                            Arg::new("file")
                                .long("file")
                                .short('f')
                                .required(true)
                                .value_name("PATH")
                                .value_parser(value_parser!(PathBuf))
                                .help("The JSON file with the records, or `-` for stdin."),
                        ),
                )
                .subcommand(
                    Command::new("delete-project")
                        .about("Delete all grouping records of a project")
                        .arg(
                            Arg::new("project_id")
                                .required(true)
                                .value_name("PROJECT_ID")
                                .value_parser(value_parser!(u64))
                                .help("The project whose records are deleted."),
                        ),
                )
                .subcommand(
                    Command::new("delete-hashes")
                        .about("Delete grouping records by hash")
                        .arg(
                            Arg::new("project_id")
                                .required(true)
                                .value_name("PROJECT_ID")
                                .value_parser(value_parser!(u64))
                                .help("The project the hashes belong to."),
                        )
                        .arg(
                            Arg::new("hashes")
                                .required(true)
                                .num_args(1..)
                                .action(ArgAction::Append)
                                .value_name("HASH")
                                .value_parser(ValueParser::string())
                                .help("The hashes of the records to delete."),
                        ),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the beacon config")
                .subcommand_required(true)
                .subcommand(
                    Command::new("init").about("Initialize a new beacon config with defaults"),
                )
                .subcommand(
                    Command::new("show").about("Show the entire config out for debugging purposes"),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_definition() {
        make_app().debug_assert();
    }

    #[test]
    fn test_delete_hashes_arguments() {
        let matches = make_app()
            .try_get_matches_from(["beacon", "seer", "delete-hashes", "7", "a1", "b2"])
            .unwrap();

        let (_, seer) = matches.subcommand().unwrap();
        let (name, delete) = seer.subcommand().unwrap();
        assert_eq!(name, "delete-hashes");
        assert_eq!(delete.get_one::<u64>("project_id"), Some(&7));

        let hashes = delete
            .get_many::<String>("hashes")
            .unwrap()
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(hashes, ["a1", "b2"]);
    }

    #[test]
    fn test_invalid_project_id() {
        let result = make_app().try_get_matches_from(["beacon", "seer", "delete-project", "x"]);
        assert!(result.is_err());
    }
}
