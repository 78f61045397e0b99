//! Command-line interface for the ng_core resource process.
//!
//! Every option overrides the matching setting from the configuration file.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the kernel log level
    pub log_level: Option<String>,
    /// Optional override for the resource (process) name
    pub resource: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

/// Builds the clap command. Split out so tests can parse fixed argument lists.
pub fn command() -> Command {
    Command::new("ng_core")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Module kernel host for NextGen game-server resources")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, success, warn, error, fatal)"),
        )
        .arg(
            Arg::new("resource")
                .short('r')
                .long("resource")
                .value_name("NAME")
                .help("Resource name this process answers to"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on invalid input.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            resource: matches.get_one::<String>("resource").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
