use crate::scheduler::{Message, Scheduler, SchedulerDeps};
use anyhow::{Context as _, Result};
use conveyor_base::{peers::PeerTable, Command, EndPoint, Envelope, JobDescriptor, SlotId};
use conveyor_comm::Outbox;
use conveyor_util::sync;
use slog::{error, warn, Logger};
use std::path::PathBuf;
use tokio::{
    process::{Child, Command as ProcessCommand},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};

/// The production implementation of [`SchedulerDeps`]: workers are child processes, and jobs go
/// out through the coordinator's [`Outbox`].
pub struct PoolDeps {
    pub worker_program: PathBuf,
    pub worker_args: Vec<String>,
    /// Handed to every worker, so that it listens where the coordinator dispatches to.
    pub peers: PeerTable,
    pub outbox: Outbox,
    pub log: Logger,
}

impl SchedulerDeps for PoolDeps {
    type WorkerProcess = Child;

    fn spawn_worker(&mut self, slot: SlotId, address: &EndPoint) -> Result<Child> {
        self.worker_command(slot).spawn().with_context(|| {
            format!("spawning {} for {address}", self.worker_program.display())
        })
    }

    fn kill_worker(&mut self, slot: SlotId, mut process: Child) {
        if let Err(err) = process.start_kill() {
            warn!(self.log, "killing worker failed"; "slot" => %slot, "error" => %err);
        }
        // Reap it in the background.
        tokio::task::spawn(async move { process.wait().await.ok() });
    }

    fn send_job(&mut self, slot: SlotId, address: &EndPoint, job: JobDescriptor) {
        match job.to_json() {
            Ok(json) => self.outbox.send(
                Envelope::request(
                    Command::TestRequest,
                    address.clone(),
                    self.peers.coordinator.clone(),
                )
                .with_author(job.author)
                .with_argument(json),
            ),
            Err(err) => error!(self.log, "serializing job failed"; "slot" => %slot, "error" => %err),
        }
    }
}

impl PoolDeps {
    fn worker_command(&self, slot: SlotId) -> ProcessCommand {
        let PeerTable {
            coordinator,
            client,
            repository,
            test_stage,
            worker_host,
            worker_base_port,
        } = &self.peers;
        let mut command = ProcessCommand::new(&self.worker_program);
        command
            .args(&self.worker_args)
            .arg(slot.to_string())
            .env("CONVEYOR_WORKER_PEERS__COORDINATOR", coordinator.as_str())
            .env("CONVEYOR_WORKER_PEERS__CLIENT", client.as_str())
            .env("CONVEYOR_WORKER_PEERS__REPOSITORY", repository.as_str())
            .env("CONVEYOR_WORKER_PEERS__TEST_STAGE", test_stage.as_str())
            .env("CONVEYOR_WORKER_PEERS__WORKER_HOST", worker_host)
            .env(
                "CONVEYOR_WORKER_PEERS__WORKER_BASE_PORT",
                worker_base_port.to_string(),
            )
            .kill_on_drop(true);
        command
    }
}

/// This type is used often enough to warrant an alias.
pub type SchedulerSender = UnboundedSender<Message>;

pub struct SchedulerTask {
    scheduler: Scheduler<PoolDeps>,
    deps: PoolDeps,
    sender: SchedulerSender,
    receiver: UnboundedReceiver<Message>,
}

impl SchedulerTask {
    pub fn new(scheduler: Scheduler<PoolDeps>, deps: PoolDeps) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        SchedulerTask {
            scheduler,
            deps,
            sender,
            receiver,
        }
    }

    pub fn scheduler_sender(&self) -> &SchedulerSender {
        &self.sender
    }

    /// Main loop for the scheduler. This should be run on a task of its own. There should be
    /// exactly one of these in a coordinator process. It will return when every
    /// [`SchedulerSender`] has been dropped, after which the pool's processes are killed as the
    /// scheduler is dropped.
    pub async fn run(self) {
        let SchedulerTask {
            mut scheduler,
            mut deps,
            sender,
            receiver,
        } = self;
        drop(sender);
        sync::channel_reader(receiver, |msg| scheduler.receive_message(&mut deps, msg))
            .await
            .ok();
    }
}
