use anyhow::Result;
use clap::Parser;
use conveyor_base::peers::PeerTable;
use conveyor_util::config::{self, BlockSize, LogLevel, StorageRoot};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The conveyor repository. Keeps sources, submitted build requests, and logs, and streams files
/// to whichever node asks for them.
#[derive(Parser, Serialize)]
#[command(
    after_help = r#"Configuration values can be specified in three ways: fields in a config file, environment variables, or command-line options. Command-line options have the highest precedence, followed by environment variables.

The configuration value 'config_value' would be set via the '--config-value' command-line option, the CONVEYOR_REPOSITORY_CONFIG_VALUE environment variable, and the 'config_value' key in a configuration file. Peer addresses are set with keys in the [peers] table, or with variables like CONVEYOR_REPOSITORY_PEERS__COORDINATOR.
"#
)]
#[command(version)]
pub struct CliOptions {
    /// Configuration file. Values set in the configuration file will be overridden by values set
    /// through environment variables and values set on the command line.
    #[arg(short = 'c', long, default_value = "conveyor-repository.toml")]
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

    /// The repository's storage directory
    #[arg(short = 's', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,

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

    /// The repository's storage directory. Categories are its subdirectories.
    pub storage_root: StorageRoot,

    /// Extensions of the files GetFiles lists.
    pub source_extensions: Vec<String>,

    /// Size of the chunks files are sent in.
    pub block_size: BlockSize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            peers: PeerTable::default(),
            storage_root: "storage/repository".into(),
            source_extensions: ["toml", "sh", "rs"].map(String::from).to_vec(),
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
            "CONVEYOR_REPOSITORY_",
            cli_options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_cli() {
        use clap::CommandFactory;
        CliOptions::command().debug_assert()
    }

    #[test]
    fn file_replaces_source_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conveyor-repository.toml");
        fs::write(&path, "source_extensions = [\"cs\", \"csproj\"]\n").unwrap();
        let cli_options =
            CliOptions::parse_from(["conveyor-repository", "-c", path.to_str().unwrap()]);
        let config = Config::load(cli_options).unwrap();
        assert_eq!(config.source_extensions, vec!["cs", "csproj"]);
        assert_eq!(config.block_size.into_inner(), 1024);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conveyor-repository.toml");
        fs::write(&path, "max_pool_size = 3\n").unwrap();
        let cli_options =
            CliOptions::parse_from(["conveyor-repository", "-c", path.to_str().unwrap()]);
        assert!(Config::load(cli_options).is_err());
    }
}
