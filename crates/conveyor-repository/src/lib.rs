//! Code for the repository binary.

pub mod config;
mod handlers;

use anyhow::{Context as _, Result};
use config::Config;
use conveyor_comm::{node, outbox, Channel, Outbox, Sender};
use conveyor_util::{fs::Fs, time::SystemClock};
use slog::{info, o, Logger};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The main function for the repository. It returns when the receive loop ends or a signal is
/// received.
pub async fn main(config: Config, log: Logger) -> Result<()> {
    let fs = Fs::new();
    fs.create_dir_all(config.storage_root.inner()).await?;
    let storage = std::path::absolute(config.storage_root.inner())
        .with_context(|| format!("resolving {:?}", config.storage_root))?;

    let address = config.peers.repository.clone();
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

    let (submissions, submissions_receiver) = mpsc::unbounded_channel();
    let mut context = handlers::Context {
        address,
        peers: config.peers,
        storage,
        source_extensions: config.source_extensions,
        outbox: outbox.clone(),
        submissions,
        clock: Arc::new(SystemClock),
        log: log.new(o!("task" => "submissions")),
    };
    let submitter = tokio::task::spawn(handlers::submissions_main(
        context.clone(),
        submissions_receiver,
    ));
    context.log = log.clone();
    let dispatcher = handlers::dispatcher();
    node::until_signaled(
        node::serve(&mut channel, &dispatcher, &mut context, &outbox, &log),
        &log,
    )
    .await?;

    drop(context);
    drop(outbox);
    submitter.abort();
    writer.abort();
    Ok(())
}
