//! Code for the coordinator binary.

pub mod config;
mod handlers;
pub mod scheduler;
mod scheduler_task;

use anyhow::Result;
use config::Config;
use conveyor_comm::{node, outbox, Channel, Outbox, Sender};
use conveyor_util::config::BlockSize;
use scheduler::{Message, Scheduler};
use scheduler_task::{PoolDeps, SchedulerTask};
use slog::{info, o, Logger};

/// The main function for the coordinator. It returns when the receive loop ends or a signal is
/// received. The pool is shut down on the way out.
pub async fn main(config: Config, log: Logger) -> Result<()> {
    let mut channel = Channel::bind(&config.peers.coordinator, None, log.clone()).await?;
    info!(log, "listening"; "addr" => channel.local_addr());

    let (outbox, outbox_receiver) = Outbox::new();
    let writer = tokio::task::spawn(outbox::writer_main(
        outbox_receiver,
        Sender::new(None, BlockSize::default().into_inner(), log.clone()),
        log.new(o!("task" => "outbox")),
    ));

    let scheduler_log = log.new(o!("task" => "scheduler"));
    let scheduler_task = SchedulerTask::new(
        Scheduler::new(
            config.max_pool_size,
            config.peers.clone(),
            scheduler_log.clone(),
        ),
        PoolDeps {
            worker_program: config.worker_program,
            worker_args: config.worker_args,
            peers: config.peers.clone(),
            outbox: outbox.clone(),
            log: scheduler_log,
        },
    );
    let mut context = handlers::Context {
        scheduler: scheduler_task.scheduler_sender().clone(),
        max_pool_size: config.max_pool_size,
        log: log.clone(),
    };
    let scheduler = tokio::task::spawn(scheduler_task.run());

    let dispatcher = handlers::dispatcher();
    node::until_signaled(
        node::serve(&mut channel, &dispatcher, &mut context, &outbox, &log),
        &log,
    )
    .await?;

    context.scheduler.send(Message::ShutdownPool).ok();
    drop(context);
    drop(outbox);
    scheduler.await?;
    writer.await?;
    Ok(())
}
