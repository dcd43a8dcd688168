//! Configuration values shared between nodes, and the layered loader every binary uses.
//!
//! Values are merged from lowest to highest precedence: built-in defaults, the TOML config file,
//! environment variables, then command-line options.

use anyhow::{Context as _, Result};
use clap::ValueEnum;
use derive_more::From;
use figment::{
    error::Kind,
    providers::{Env, Format as _, Serialized, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use slog::Level;
use std::{
    fmt::{self, Debug, Formatter},
    path::{Path, PathBuf},
};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, ValueEnum)]
#[clap(rename_all = "kebab_case")]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_slog_level(&self) -> Level {
        match self {
            LogLevel::Error => Level::Error,
            LogLevel::Warning => Level::Warning,
            LogLevel::Info => Level::Info,
            LogLevel::Debug => Level::Debug,
        }
    }
}

/// Directory a node reads files from and writes received files to.
#[derive(Clone, Deserialize, From, Serialize)]
#[serde(transparent)]
pub struct StorageRoot(PathBuf);

impl StorageRoot {
    pub fn inner(&self) -> &Path {
        &self.0
    }

    pub fn into_inner(self) -> PathBuf {
        self.0
    }
}

impl From<&str> for StorageRoot {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl Debug for StorageRoot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Size of the chunks files are sent in. Never zero.
#[derive(Clone, Copy, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct BlockSize(usize);

impl BlockSize {
    pub const DEFAULT: usize = 1024;

    pub fn into_inner(self) -> usize {
        self.0
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<usize> for BlockSize {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        if value == 0 {
            Err("block size must be greater than zero".into())
        } else {
            Ok(Self(value))
        }
    }
}

impl From<BlockSize> for usize {
    fn from(value: BlockSize) -> Self {
        value.0
    }
}

impl Debug for BlockSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Merge the configuration layers and extract a `ConfigT`.
///
/// `env_prefix` is something like `CONVEYOR_WORKER_`. Nested keys are separated with a double
/// underscore in environment variable names, e.g. `CONVEYOR_WORKER_PEERS__REPOSITORY`.
pub fn load<ConfigT: DeserializeOwned>(
    defaults: impl Serialize,
    config_file: &Path,
    env_prefix: &str,
    cli_options: impl Serialize,
) -> Result<ConfigT> {
    Figment::new()
        .merge(Serialized::defaults(defaults))
        .merge(Toml::file(config_file))
        .merge(Env::prefixed(env_prefix).split("__"))
        .merge(Serialized::globals(cli_options))
        .extract()
        .map_err(|mut e| {
            if let Kind::MissingField(field) = &e.kind {
                e.kind = Kind::Message(format!("configuration value \"{field}\" was not provided"));
            }
            e
        })
        .context("reading configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::fs;

    #[derive(Serialize)]
    struct Defaults {
        log_level: LogLevel,
        block_size: usize,
        storage_root: PathBuf,
    }

    impl Default for Defaults {
        fn default() -> Self {
            Self {
                log_level: LogLevel::Info,
                block_size: BlockSize::DEFAULT,
                storage_root: "storage/test".into(),
            }
        }
    }

    #[derive(Default, Serialize)]
    struct Cli {
        #[serde(skip_serializing_if = "Option::is_none")]
        log_level: Option<LogLevel>,
    }

    #[derive(Debug, Deserialize)]
    struct Config {
        log_level: LogLevel,
        block_size: BlockSize,
        storage_root: StorageRoot,
    }

    #[test]
    fn defaults_apply_without_file() {
        let config: Config = load(
            Defaults::default(),
            Path::new("/nonexistent/conveyor-test.toml"),
            "CONVEYOR_UTIL_TEST_DEFAULTS_",
            Cli::default(),
        )
        .unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.block_size.into_inner(), 1024);
        assert_eq!(config.storage_root.inner(), Path::new("storage/test"));
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conveyor-test.toml");
        fs::write(
            &path,
            indoc! {r#"
                log_level = "debug"
                block_size = 16
            "#},
        )
        .unwrap();

        let config: Config = load(
            Defaults::default(),
            &path,
            "CONVEYOR_UTIL_TEST_LAYERS_",
            Cli {
                log_level: Some(LogLevel::Error),
            },
        )
        .unwrap();
        assert_eq!(config.log_level, LogLevel::Error);
        assert_eq!(config.block_size.into_inner(), 16);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conveyor-test.toml");
        fs::write(&path, "block_size = 0\n").unwrap();
        let result: Result<Config> = load(
            Defaults::default(),
            &path,
            "CONVEYOR_UTIL_TEST_ZERO_",
            Cli::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_field_message_is_rewritten() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Needy {
            author: String,
        }
        let err = load::<Needy>(
            Cli::default(),
            Path::new("/nonexistent/conveyor-test.toml"),
            "CONVEYOR_UTIL_TEST_MISSING_",
            Cli::default(),
        )
        .unwrap_err();
        let message = format!("{err:#}");
        assert!(
            message.contains("configuration value \"author\" was not provided"),
            "{message}"
        );
    }
}
