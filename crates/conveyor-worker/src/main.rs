use anyhow::Result;
use clap::Parser as _;
use conveyor_worker::config::{CliOptions, Config};
use slog::{info, o, Logger};
use std::process;

#[tokio::main]
async fn worker_main(config: Config, log: Logger) -> Result<()> {
    let log = log.new(o!("slot" => config.slot.as_u32()));
    info!(log, "started"; "config" => ?config, "pid" => process::id());
    let result = conveyor_worker::main(config, log.clone()).await;
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
    conveyor_util::log::run_with_logger(config.log_level, |log| worker_main(config, log))
}
