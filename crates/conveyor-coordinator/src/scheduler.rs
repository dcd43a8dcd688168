//! The worker pool. Pairs queued jobs with ready workers, strictly first-in first-out on both
//! sides.

use anyhow::{anyhow, Result};
use conveyor_base::{peers::PeerTable, EndPoint, JobDescriptor, SlotId};
use slog::{debug, error, info, warn, Logger};
use std::collections::{BTreeMap, VecDeque};

/*              _     _ _
 *  _ __  _   _| |__ | (_) ___
 * | '_ \| | | | '_ \| | |/ __|
 * | |_) | |_| | |_) | | | (__
 * | .__/ \__,_|_.__/|_|_|\___|
 * |_|
 *  FIGLET: public
 */

/// All methods are completely nonblocking. They will never block the task or the thread.
pub struct Scheduler<DepsT: SchedulerDeps> {
    workers: BTreeMap<SlotId, WorkerHandle<DepsT>>,
    pending_jobs: VecDeque<JobDescriptor>,
    ready_workers: VecDeque<SlotId>,
    max_pool_size: usize,
    peers: PeerTable,
    log: Logger,
}

/// The external dependencies for [`Scheduler`]. None of these methods may block.
pub trait SchedulerDeps {
    type WorkerProcess;

    /// Start the worker process for `slot`. It will listen on `address`.
    fn spawn_worker(&mut self, slot: SlotId, address: &EndPoint) -> Result<Self::WorkerProcess>;

    fn kill_worker(&mut self, slot: SlotId, process: Self::WorkerProcess);

    /// Send `job` to the worker listening on `address` as a TestRequest.
    fn send_job(&mut self, slot: SlotId, address: &EndPoint, job: JobDescriptor);
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Start this many workers, up to the maximum pool size.
    StartPool(usize),
    ShutdownPool,
    EnqueueJob(JobDescriptor),
    /// The worker in this slot finished its job.
    WorkerReady(SlotId),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotState {
    Ready,
    Busy,
}

impl<DepsT: SchedulerDeps> Scheduler<DepsT> {
    pub fn new(max_pool_size: usize, peers: PeerTable, log: Logger) -> Self {
        Self {
            workers: BTreeMap::new(),
            pending_jobs: VecDeque::new(),
            ready_workers: VecDeque::new(),
            max_pool_size,
            peers,
            log,
        }
    }

    pub fn receive_message(&mut self, deps: &mut DepsT, msg: Message) {
        match msg {
            Message::StartPool(count) => self.receive_start_pool(deps, count),
            Message::ShutdownPool => self.receive_shutdown_pool(deps),
            Message::EnqueueJob(job) => self.receive_enqueue_job(deps, job),
            Message::WorkerReady(slot) => self.receive_worker_ready(deps, slot),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.workers.len()
    }

    pub fn slot_state(&self, slot: SlotId) -> Option<SlotState> {
        self.workers.get(&slot).map(|worker| worker.state)
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending_jobs.len()
    }

    pub fn ready_workers(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.ready_workers.iter().copied()
    }
}

/*             _            _
 *  _ __  _ __(_)_   ____ _| |_ ___
 * | '_ \| '__| \ \ / / _` | __/ _ \
 * | |_) | |  | |\ V / (_| | ||  __/
 * | .__/|_|  |_| \_/ \__,_|\__\___|
 * |_|
 *  FIGLET: private
 */

struct WorkerHandle<DepsT: SchedulerDeps> {
    process: DepsT::WorkerProcess,
    state: SlotState,
    address: EndPoint,
}

impl<DepsT: SchedulerDeps> Scheduler<DepsT> {
    fn receive_start_pool(&mut self, deps: &mut DepsT, count: usize) {
        if !self.workers.is_empty() {
            warn!(self.log, "pool already running, shut it down first";
                "pool_size" => self.workers.len());
            return;
        }
        let count = count.min(self.max_pool_size);
        for index in 0..count {
            let slot = SlotId::from(index as u32);
            if let Err(err) = self.spawn_worker(deps, slot) {
                // Workers already started stay up.
                error!(self.log, "starting pool failed";
                    "slot" => %slot,
                    "started" => self.workers.len(),
                    "error" => %err);
                break;
            }
        }
        info!(self.log, "pool started"; "pool_size" => self.workers.len());
        self.possibly_dispatch_jobs(deps);
    }

    fn spawn_worker(&mut self, deps: &mut DepsT, slot: SlotId) -> Result<()> {
        let address = self
            .peers
            .worker(slot)
            .ok_or_else(|| anyhow!("no port available for slot {slot}"))?;
        let process = deps.spawn_worker(slot, &address)?;
        debug!(self.log, "worker spawned"; "slot" => %slot, "address" => %address);
        self.workers.insert(
            slot,
            WorkerHandle {
                process,
                state: SlotState::Ready,
                address,
            },
        );
        self.ready_workers.push_back(slot);
        Ok(())
    }

    fn receive_shutdown_pool(&mut self, deps: &mut DepsT) {
        for (slot, worker) in std::mem::take(&mut self.workers) {
            deps.kill_worker(slot, worker.process);
        }
        self.ready_workers.clear();
        if !self.pending_jobs.is_empty() {
            warn!(self.log, "pool shut down with jobs still queued";
                "pending_jobs" => self.pending_jobs.len());
        }
    }

    fn receive_enqueue_job(&mut self, deps: &mut DepsT, job: JobDescriptor) {
        self.pending_jobs.push_back(job);
        self.possibly_dispatch_jobs(deps);
    }

    fn receive_worker_ready(&mut self, deps: &mut DepsT, slot: SlotId) {
        match self.workers.get_mut(&slot) {
            Some(worker) => worker.state = SlotState::Ready,
            None => warn!(self.log, "ready signal from slot with no worker"; "slot" => %slot),
        }
        self.ready_workers.push_back(slot);
        self.possibly_dispatch_jobs(deps);
    }

    fn possibly_dispatch_jobs(&mut self, deps: &mut DepsT) {
        while !self.pending_jobs.is_empty() && !self.ready_workers.is_empty() {
            let Some(job) = self.pending_jobs.pop_front() else {
                break;
            };
            let Some(slot) = self.ready_workers.pop_front() else {
                break;
            };
            match self.workers.get_mut(&slot) {
                Some(worker) => {
                    worker.state = SlotState::Busy;
                    debug!(self.log, "job dispatched";
                        "slot" => %slot,
                        "author" => &job.author,
                        "elements" => job.tests.len());
                    deps.send_job(slot, &worker.address, job);
                }
                None => {
                    error!(self.log, "dropping job: slot has no live worker";
                        "slot" => %slot,
                        "author" => &job.author);
                }
            }
        }
    }
}

/*  _            _
 * | |_ ___  ___| |_ ___
 * | __/ _ \/ __| __/ __|
 * | ||  __/\__ \ |_\__ \
 *  \__\___||___/\__|___/
 *  FIGLET: tests
 */
