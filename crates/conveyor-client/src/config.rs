use anyhow::Result;
use clap::{Parser, Subcommand};
use conveyor_base::peers::PeerTable;
use conveyor_util::config::{self, BlockSize, LogLevel, StorageRoot};
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

/// Command-line client for a conveyor federation. Listens on the client address while a command
/// runs, so replies and notifications can reach it.
#[derive(Parser, Serialize)]
#[command(
    after_help = r#"Configuration values can be specified in three ways: fields in a config file, environment variables, or command-line options. Command-line options have the highest precedence, followed by environment variables.

The configuration value 'config_value' would be set via the '--config-value' command-line option, the CONVEYOR_CLIENT_CONFIG_VALUE environment variable, and the 'config_value' key in a configuration file. Peer addresses are set with keys in the [peers] table, or with variables like CONVEYOR_CLIENT_PEERS__REPOSITORY.
"#
)]
#[command(version)]
pub struct CliOptions {
    /// Configuration file. Values set in the configuration file will be overridden by values set
    /// through environment variables and values set on the command line.
    #[arg(short = 'c', long, default_value = "conveyor-client.toml", global = true)]
    #[serde(skip)]
    pub config_file: PathBuf,

    /// Print configuration and exit
    #[arg(short = 'P', long, global = true)]
    #[serde(skip)]
    pub print_config: bool,

    /// Minimum log level to output
    #[arg(short = 'l', long, value_enum, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    /// Directory fetched files are stored in
    #[arg(short = 's', long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,

    /// Author attached to submitted jobs
    #[arg(short = 'a', long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[command(subcommand)]
    #[serde(skip)]
    pub command: Option<ClientCommand>,
}

#[derive(Clone, Debug, Eq, PartialEq, Subcommand)]
pub enum ClientCommand {
    /// Start a worker pool of the given size
    StartPool {
        #[arg(allow_negative_numbers = true)]
        count: i64,
    },

    /// Shut the worker pool down
    ClosePool,

    /// Submit the job described by a JSON file through the repository
    Submit {
        job: PathBuf,

        /// Wait for every build and test notification the job produces
        #[arg(short = 'w', long)]
        wait: bool,
    },

    /// Resubmit a build request the repository has stored
    SubmitOnRepo { name: String },

    /// List the repository's categories
    Categories,

    /// List source files, in a category or at the top of the repository
    Files { category: Option<String> },

    /// List stored build requests, newest first
    Requests,

    /// List stored logs, newest first
    Logs,

    /// Copy files from the repository into local storage
    Fetch {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Print build and test notifications as they arrive
    Watch {
        /// Stop after this many notifications
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Minimum log level to output.
    pub log_level: LogLevel,

    /// Where every node listens.
    pub peers: PeerTable,

    /// Directory fetched files are stored in.
    pub storage_root: StorageRoot,

    /// Author attached to submitted jobs that don't name one.
    pub author: String,

    /// Size of the chunks files are sent in.
    pub block_size: BlockSize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Warning,
            peers: PeerTable::default(),
            storage_root: "storage/client".into(),
            author: env::var("USER").unwrap_or_else(|_| "anonymous".into()),
            block_size: BlockSize::default(),
        }
    }
}

impl Config {
    pub fn load(cli_options: &CliOptions) -> Result<Self> {
        config::load(
            Config::default(),
            &cli_options.config_file,
            "CONVEYOR_CLIENT_",
            cli_options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_cli() {
        use clap::CommandFactory;
        CliOptions::command().debug_assert()
    }

    fn parse(args: &[&str]) -> CliOptions {
        CliOptions::parse_from(
            ["conveyor-client", "--config-file", "/nonexistent/conveyor-client.toml"]
                .iter()
                .chain(args),
        )
    }

    #[test]
    fn subcommands() {
        assert_eq!(
            parse(&["start-pool", "-2"]).command,
            Some(ClientCommand::StartPool { count: -2 })
        );
        assert_eq!(
            parse(&["submit", "job.json", "--wait"]).command,
            Some(ClientCommand::Submit {
                job: "job.json".into(),
                wait: true
            })
        );
        assert_eq!(
            parse(&["files"]).command,
            Some(ClientCommand::Files { category: None })
        );
        assert_eq!(
            parse(&["fetch", "A.toml", "A.rs"]).command,
            Some(ClientCommand::Fetch {
                names: vec!["A.toml".into(), "A.rs".into()]
            })
        );
        assert_eq!(
            parse(&["watch", "-n", "3"]).command,
            Some(ClientCommand::Watch { count: Some(3) })
        );
    }

    #[test]
    fn global_options_after_subcommand() {
        let cli_options = parse(&["logs", "--author", "bo", "--storage-root", "/tmp/c"]);
        let config = Config::load(&cli_options).unwrap();
        assert_eq!(config.author, "bo");
        assert_eq!(config.storage_root.inner(), Path::new("/tmp/c"));
        assert_eq!(config.log_level, LogLevel::Warning);
    }
}
