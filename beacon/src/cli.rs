use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use beacon_config::{Config, OverridableConfig};
use beacon_metrics::Metrics;
use beacon_seer::{CreateGroupingRecordsRequest, SeerClient};
use clap::ArgMatches;

use crate::cliapp::make_app;
use crate::setup;

const DEFAULT_CONFIG_PATH: &str = ".beacon";

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .map_or(Path::new(DEFAULT_CONFIG_PATH), PathBuf::as_path);

    // Commands that need to work without config
    if let Some(("config", config_matches)) = matches.subcommand()
        && let Some(("init", _)) = config_matches.subcommand()
    {
        return init_config(config_path);
    }

    let mut config = if Config::config_exists(config_path) {
        Config::from_path(config_path)?
    } else {
        Config::default()
    };
    config.apply_override(extract_config_args(&matches))?;

    beacon_log::init(config.logging(), config.sentry());
    if let Some(dsn) = config.sentry().enabled_dsn() {
        beacon_log::debug!(dsn = %dsn, "reporting errors to sentry");
    }

    match matches.subcommand() {
        Some(("config", config_matches)) => manage_config(&config, config_matches),
        Some(("seer", seer_matches)) => manage_seer(&config, seer_matches),
        _ => unreachable!(),
    }
}

/// Extract config arguments from a parsed command line arguments object
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    OverridableConfig {
        seer_url: matches.get_one("seer_url").cloned(),
        seer_timeout: matches.get_one("seer_timeout").cloned(),
        seer_shared_secret: matches.get_one("seer_shared_secret").cloned(),
        metrics_backend: matches.get_one("metrics_backend").cloned(),
        statsd: matches.get_one("statsd").cloned(),
        metrics_sample_rate: matches.get_one("metrics_sample_rate").cloned(),
    }
}

#[allow(clippy::print_stdout)]
fn init_config(config_path: &Path) -> Result<()> {
    if Config::config_exists(config_path) {
        println!("A config already exists in {}", config_path.display());
        return Ok(());
    }

    Config::save_default(config_path)?;
    println!("Created a default config in {}", config_path.display());
    Ok(())
}

#[allow(clippy::print_stdout)]
fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => {
            print!("{}", config.to_yaml_string()?);
            Ok(())
        }
        _ => unreachable!(),
    }
}

fn manage_seer(config: &Config, matches: &ArgMatches) -> Result<()> {
    setup::check_config(config)?;
    setup::dump_spawn_infos(config);

    let metrics = setup::init_metrics(config)?;
    let options = setup::init_options(config)?;
    let client = setup::init_seer(config, options, Arc::clone(&metrics))?;

    let result = match matches.subcommand() {
        Some(("post-records", matches)) => post_records(&client, matches),
        Some(("delete-project", matches)) => delete_project(&client, matches),
        Some(("delete-hashes", matches)) => delete_hashes(&client, matches),
        _ => unreachable!(),
    };

    flush_metrics(&metrics);
    result
}

#[allow(clippy::print_stdout)]
fn post_records(client: &SeerClient, matches: &ArgMatches) -> Result<()> {
    let path = matches
        .get_one::<PathBuf>("file")
        .context("`file` is required")?;
    let request = read_request(path)?;

    let response = client.post_bulk_grouping_records(&request);
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.success {
        bail!("the similarity service did not store the grouping records");
    }

    Ok(())
}

fn delete_project(client: &SeerClient, matches: &ArgMatches) -> Result<()> {
    let project_id = *matches
        .get_one::<u64>("project_id")
        .context("`project_id` is required")?;

    if !client.delete_project_grouping_records(project_id) {
        bail!("failed to delete grouping records of project {project_id}");
    }

    beacon_log::info!("deleted all grouping records of project {project_id}");
    Ok(())
}

fn delete_hashes(client: &SeerClient, matches: &ArgMatches) -> Result<()> {
    let project_id = *matches
        .get_one::<u64>("project_id")
        .context("`project_id` is required")?;
    let hashes = matches
        .get_many::<String>("hashes")
        .context("`hashes` is required")?
        .cloned()
        .collect::<Vec<_>>();

    if !client.delete_grouping_records_by_hash(project_id, &hashes) {
        bail!(
            "failed to delete {} grouping records of project {project_id}",
            hashes.len()
        );
    }

    beacon_log::info!(
        "deleted {} grouping records of project {project_id}",
        hashes.len()
    );
    Ok(())
}

/// Reads a bulk request from a JSON file, or from stdin if the path is `-`.
fn read_request(path: &Path) -> Result<CreateGroupingRecordsRequest> {
    let reader: Box<dyn Read> = if path == Path::new("-") {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(path)
            .with_context(|| format!("failed to open records file {}", path.display()))?;
        Box::new(file)
    };

    serde_json::from_reader(BufReader::new(reader))
        .with_context(|| format!("invalid records file {}", path.display()))
}

fn flush_metrics(metrics: &Metrics) {
    if metrics.internal_relay_started() {
        metrics.flush_internal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_config_args() {
        let matches = make_app()
            .try_get_matches_from([
                "beacon",
                "--seer-url",
                "http://seer.internal/",
                "--metrics-backend",
                "log",
                "config",
                "show",
            ])
            .unwrap();

        let overrides = extract_config_args(&matches);
        assert_eq!(overrides.seer_url.as_deref(), Some("http://seer.internal/"));
        assert_eq!(overrides.metrics_backend.as_deref(), Some("log"));

        let mut config = Config::default();
        config.apply_override(overrides).unwrap();
        assert_eq!(config.seer_url().as_str(), "http://seer.internal/");
    }

    #[test]
    fn test_read_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(
            &path,
            r#"{
                "group_id_list": [1],
                "data": [{
                    "group_id": 1,
                    "hash": "a1",
                    "project_id": 2,
                    "message": "boom",
                    "exception_type": null
                }],
                "stacktrace_list": ["frame"]
            }"#,
        )
        .unwrap();

        let request = read_request(&path).unwrap();
        assert_eq!(request.group_id_list, [1]);
        assert_eq!(request.project_id(), Some(2));
    }

    #[test]
    fn test_read_request_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_request(&dir.path().join("missing.json")).is_err());
    }
}
