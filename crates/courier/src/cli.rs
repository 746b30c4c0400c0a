//! Command-line interface handling for the Courier server.
//!
//! This module provides command-line argument parsing and CLI interface management
//! using the `clap` crate for robust argument handling.

use crate::config::{AppConfig, TransportBackend};
use clap::{Arg, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// This structure holds all the command-line options that can be used to
/// override configuration file settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the transport backend
    pub transport: Option<TransportBackend>,
}

impl CliArgs {
    fn command() -> Command {
        Command::new("Courier")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Real-time messaging gateway and event router")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Bind address (e.g., 127.0.0.1:8080)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("transport")
                    .short('t')
                    .long("transport")
                    .value_name("BACKEND")
                    .help("Pub/sub backend")
                    .value_parser(["redis", "memory"]),
            )
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            transport: matches
                .get_one::<String>("transport")
                .and_then(|value| value.parse().ok()),
        }
    }

    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::command()
            .try_get_matches_from(args)
            .map(|matches| Self::from_matches(&matches))
    }

    /// Applies the command-line overrides on top of file configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(bind_address) = &self.bind_address {
            config.gateway.bind_address = bind_address.clone();
        }

        if let Some(log_level) = &self.log_level {
            config.logging.level = log_level.clone();
        }

        if self.json_logs {
            config.logging.json_format = true;
        }

        if let Some(transport) = self.transport {
            config.transport.backend = transport;
        }
    }
}
