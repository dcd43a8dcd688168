use anyhow::Result;
use clap::Parser;
use conveyor_base::peers::PeerTable;
use conveyor_util::config::{self, BlockSize, LogLevel, StorageRoot};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The conveyor test stage. Fetches each successful build's artifact from the worker that built
/// it, runs it, and reports the verdict to the client.
#[derive(Parser, Serialize)]
#[command(
    after_help = r#"Configuration values can be specified in three ways: fields in a config file, environment variables, or command-line options. Command-line options have the highest precedence, followed by environment variables.

The configuration value 'config_value' would be set via the '--config-value' command-line option, the CONVEYOR_TESTER_CONFIG_VALUE environment variable, and the 'config_value' key in a configuration file. Peer addresses are set with keys in the [peers] table, or with variables like CONVEYOR_TESTER_PEERS__REPOSITORY.
"#
)]
#[command(version)]
pub struct CliOptions {
    /// Configuration file. Values set in the configuration file will be overridden by values set
    /// through environment variables and values set on the command line.
    #[arg(short = 'c', long, default_value = "conveyor-tester.toml")]
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

    /// Directory artifacts are received into and test logs are kept in
    #[arg(short = 's', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,

    /// Extension of the artifact a build leaves behind
    #[arg(short = 'e', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_extension: Option<String>,

    /// Program that runs an artifact, which it gets as its last argument. Without one, the
    /// artifact is executed directly
    #[arg(short = 't', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_program: Option<PathBuf>,

    /// Size of the chunks files are sent in
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_size: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Minimum log level to output.
    pub log_level: LogLevel,

    /// Where every node listens.
    pub peers: PeerTable,

    /// Directory artifacts are received into and test logs are kept in.
    pub storage_root: StorageRoot,

    /// Extension of the artifact a build leaves behind.
    pub artifact_extension: String,

    /// Program that runs an artifact.
    pub test_program: Option<PathBuf>,

    /// Arguments passed before the artifact.
    pub test_args: Vec<String>,

    /// Size of the chunks logs are sent in.
    pub block_size: BlockSize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            peers: PeerTable::default(),
            storage_root: "storage/tester".into(),
            artifact_extension: "bin".into(),
            test_program: None,
            test_args: vec![],
            block_size: BlockSize::default(),
        }
    }
}

impl Config {
    pub fn load(cli_options: CliOptions) -> Result<Self> {
        let config_file = cli_options.config_file.clone();
        config::load(
            Config::default(),
            &config_file,
            "CONVEYOR_TESTER_",
            cli_options,
        )
    }
}
