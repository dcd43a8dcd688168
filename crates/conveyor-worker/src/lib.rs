//! Code for the worker binary.

pub mod build_tool;
pub mod config;
mod handlers;

use anyhow::{anyhow, Context as _, Result};
use build_tool::CommandBuildTool;
use config::Config;
use conveyor_comm::{node, outbox, Channel, Outbox, Sender};
use conveyor_util::fs::Fs;
use slog::{info, o, Logger};
use std::sync::Arc;

/// The main function for a worker. It returns when the receive loop ends or a signal is received.
pub async fn main(config: Config, log: Logger) -> Result<()> {
    let address = config
        .peers
        .worker(config.slot)
        .ok_or_else(|| anyhow!("slot {} has no address", config.slot))?;

    // Builds run with the storage directory as their working directory, so every path handed to
    // the build tool has to be absolute.
    let fs = Fs::new();
    fs.create_dir_all(config.storage_root.inner()).await?;
    let storage = std::path::absolute(config.storage_root.inner())
        .with_context(|| format!("resolving {:?}", config.storage_root))?;

    let mut channel = Channel::bind(&address, Some(storage.clone()), log.clone()).await?;
    info!(log, "listening"; "addr" => channel.local_addr(), "storage" => %storage.display());

    let (outbox, outbox_receiver) = Outbox::new();
    let writer = tokio::task::spawn(outbox::writer_main(
        outbox_receiver,
        Sender::new(
            Some(storage.clone()),
            config.block_size.into_inner(),
            log.clone(),
        ),
        log.new(o!("task" => "outbox")),
    ));

    let mut context = handlers::Context {
        slot: config.slot,
        address,
        peers: config.peers,
        storage: storage.clone(),
        outbox: outbox.clone(),
        build_tool: Arc::new(CommandBuildTool {
            program: config.build_program,
            args: config.build_args,
            working_dir: storage,
        }),
        log: log.new(o!("task" => "build")),
    };
    let dispatcher = handlers::dispatcher();
    node::until_signaled(
        node::serve(&mut channel, &dispatcher, &mut context, &outbox, &log),
        &log,
    )
    .await?;

    // Build tasks still running hold outbox clones; the writer is not awaited so a hung build
    // can't keep the process alive.
    drop(context);
    drop(outbox);
    writer.abort();
    Ok(())
}
