use anyhow::Result;
use clap::Parser as _;
use conveyor_repository::config::{CliOptions, Config};
use slog::{info, Logger};
use std::process;

#[tokio::main]
async fn repository_main(config: Config, log: Logger) -> Result<()> {
    info!(log, "started"; "config" => ?config, "pid" => process::id());
    let result = conveyor_repository::main(config, log.clone()).await;
    info!(log, "exiting");
    result
}

fn main() -> Result<()> {
    let cli_options = CliOptions::parse();
    let print_config = cli_options.print_config;
    let config = Config::load(cli_options)?;
    if print_config {
        println!("{config:#?}");
        return Ok(());
    }
    conveyor_util::log::run_with_logger(config.log_level, |log| repository_main(config, log))
}
