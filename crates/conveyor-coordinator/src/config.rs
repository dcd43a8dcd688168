use anyhow::Result;
use clap::Parser;
use conveyor_base::peers::PeerTable;
use conveyor_util::config::{self, LogLevel};
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

/// The conveyor coordinator. Runs the worker pool and hands queued jobs to ready workers.
#[derive(Parser, Serialize)]
#[command(
    after_help = r#"Configuration values can be specified in three ways: fields in a config file, environment variables, or command-line options. Command-line options have the highest precedence, followed by environment variables.

The configuration value 'config_value' would be set via the '--config-value' command-line option, the CONVEYOR_COORDINATOR_CONFIG_VALUE environment variable, and the 'config_value' key in a configuration file. Peer addresses are set with keys in the [peers] table, or with variables like CONVEYOR_COORDINATOR_PEERS__REPOSITORY.
"#
)]
#[command(version)]
pub struct CliOptions {
    /// Configuration file. Values set in the configuration file will be overridden by values set
    /// through environment variables and values set on the command line.
    #[arg(short = 'c', long, default_value = "conveyor-coordinator.toml")]
    #[serde(skip)]
    pub config_file: PathBuf,

    /// Print configuration and exit
    #[arg(short = 'P', long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Minimum log level to output
    #[arg(short = 'l', long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    /// The most workers a pool may have
    #[arg(short = 'm', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pool_size: Option<usize>,

    /// The worker executable. Each worker is started with its slot index as the last argument
    #[arg(short = 'w', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Minimum log level to output.
    pub log_level: LogLevel,

    /// Where every node listens.
    pub peers: PeerTable,

    /// Requests for larger pools are clamped to this.
    pub max_pool_size: usize,

    /// The worker executable.
    pub worker_program: PathBuf,

    /// Arguments passed to every worker before its slot index.
    pub worker_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            peers: PeerTable::default(),
            max_pool_size: 10,
            worker_program: default_worker_program(),
            worker_args: vec![],
        }
    }
}

/// `conveyor-worker` in the directory this executable lives in, falling back to a `PATH` lookup.
fn default_worker_program() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("conveyor-worker")))
        .unwrap_or_else(|| "conveyor-worker".into())
}

impl Config {
    pub fn load(cli_options: CliOptions) -> Result<Self> {
        let config_file = cli_options.config_file.clone();
        config::load(
            Config::default(),
            &config_file,
            "CONVEYOR_COORDINATOR_",
            cli_options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli() {
        use clap::CommandFactory;
        CliOptions::command().debug_assert()
    }

    #[test]
    fn cli_overrides_defaults() {
        let cli_options = CliOptions::parse_from([
            "conveyor-coordinator",
            "--config-file",
            "/nonexistent/conveyor-coordinator.toml",
            "--max-pool-size",
            "3",
            "--log-level",
            "debug",
        ]);
        let config = Config::load(cli_options).unwrap();
        assert_eq!(config.max_pool_size, 3);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.peers, PeerTable::default());
        assert!(config.worker_program.ends_with("conveyor-worker"));
    }
}
