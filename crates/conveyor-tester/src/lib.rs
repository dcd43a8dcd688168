//! Code for the test stage binary.

pub mod config;
mod handlers;
pub mod loader;

use anyhow::{Context as _, Result};
use config::Config;
use conveyor_comm::{node, outbox, Channel, Outbox, Sender};
use conveyor_util::fs::Fs;
use loader::CommandTestLoader;
use slog::{info, o, Logger};
use std::sync::Arc;

/// The main function for the test stage. It returns when the receive loop ends or a signal is
/// received.
pub async fn main(config: Config, log: Logger) -> Result<()> {
    let fs = Fs::new();
    fs.create_dir_all(config.storage_root.inner()).await?;
    let storage = std::path::absolute(config.storage_root.inner())
        .with_context(|| format!("resolving {:?}", config.storage_root))?;

    let address = config.peers.test_stage.clone();
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
        address,
        peers: config.peers,
        storage: storage.clone(),
        artifact_extension: config.artifact_extension,
        outbox: outbox.clone(),
        loader: Arc::new(CommandTestLoader {
            program: config.test_program,
            args: config.test_args,
            working_dir: storage,
        }),
        log: log.new(o!("task" => "test")),
    };
    let dispatcher = handlers::dispatcher();
    node::until_signaled(
        node::serve(&mut channel, &dispatcher, &mut context, &outbox, &log),
        &log,
    )
    .await?;

    drop(context);
    drop(outbox);
    writer.abort();
    Ok(())
}
