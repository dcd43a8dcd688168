use anyhow::Result;
use clap::Parser;
use conveyor_base::{peers::PeerTable, SlotId};
use conveyor_util::config::{self, BlockSize, LogLevel, StorageRoot};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A conveyor worker. Fetches a job's sources from the repository, builds each element, and hands
/// successful builds to the test stage. Normally started by the coordinator.
#[derive(Parser, Serialize)]
#[command(
    after_help = r#"Configuration values can be specified in three ways: fields in a config file, environment variables, or command-line options. Command-line options have the highest precedence, followed by environment variables.

The configuration value 'config_value' would be set via the '--config-value' command-line option, the CONVEYOR_WORKER_CONFIG_VALUE environment variable, and the 'config_value' key in a configuration file. Peer addresses are set with keys in the [peers] table, or with variables like CONVEYOR_WORKER_PEERS__REPOSITORY.
"#
)]
#[command(version)]
pub struct CliOptions {
    /// The pool slot this worker fills. Its listening address is derived from it.
    pub slot: SlotId,

    /// Configuration file. Values set in the configuration file will be overridden by values set
    /// through environment variables and values set on the command line.
    #[arg(short = 'c', long, default_value = "conveyor-worker.toml")]
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

    /// Directory sources are received into and builds run in
    #[arg(short = 's', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,

    /// The build tool. It is run with the build configuration as its last argument
    #[arg(short = 'b', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_program: Option<PathBuf>,

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

    /// The pool slot this worker fills.
    pub slot: SlotId,

    /// Directory sources are received into and builds run in.
    pub storage_root: StorageRoot,

    /// The build tool.
    pub build_program: PathBuf,

    /// Arguments passed to the build tool before the build configuration.
    pub build_args: Vec<String>,

    /// Size of the chunks artifacts are served in.
    pub block_size: BlockSize,
}

impl Config {
    /// Defaults depend on the slot, so each worker in a pool gets its own storage.
    fn defaults(slot: SlotId) -> Self {
        Self {
            log_level: LogLevel::default(),
            peers: PeerTable::default(),
            slot,
            storage_root: PathBuf::from(format!("storage/worker-{slot}")).into(),
            build_program: "sh".into(),
            build_args: vec![],
            block_size: BlockSize::default(),
        }
    }

    pub fn load(cli_options: CliOptions) -> Result<Self> {
        let config_file = cli_options.config_file.clone();
        config::load(
            Config::defaults(cli_options.slot),
            &config_file,
            "CONVEYOR_WORKER_",
            cli_options,
        )
    }
}
