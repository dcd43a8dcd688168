use anyhow::Result;
use clap::{CommandFactory as _, Parser as _};
use conveyor_client::config::{CliOptions, ClientCommand, Config};
use slog::Logger;

#[tokio::main]
async fn client_main(config: Config, command: ClientCommand, log: Logger) -> Result<()> {
    conveyor_client::main(config, command, log).await
}

fn main() -> Result<()> {
    let cli_options = CliOptions::parse();
    let config = Config::load(&cli_options)?;
    if cli_options.print_config {
        println!("{config:#?}");
        return Ok(());
    }
    let Some(command) = cli_options.command else {
        CliOptions::command().print_help()?;
        return Ok(());
    };
    conveyor_util::log::run_with_logger(config.log_level, |log| {
        client_main(config, command, log)
    })
}
