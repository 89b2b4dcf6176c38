//! Command-line interface for the extension server.

use crate::config::AppConfig;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments. Every option overrides the matching
/// configuration file setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub plugin_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub json_logs: bool,
    /// Load extensions, print them and exit without enabling anything
    pub list: bool,
}

pub fn command() -> Command {
    Command::new("Extension Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Loads, enables and supervises dynamically loaded extensions")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("plugins")
                .short('p')
                .long("plugins")
                .value_name("DIR")
                .help("Extension directory path"),
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
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .help("List loadable extensions and exit")
                .action(ArgAction::SetTrue),
        )
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            plugin_dir: matches.get_one::<String>("plugins").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            list: matches.get_flag("list"),
        }
    }

    /// Applies command-line overrides on top of the file configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.plugin_dir {
            config.loader.directory = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
    }
}
