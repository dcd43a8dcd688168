//! The worker's commands and its build task.

use crate::build_tool::BuildTool;
use anyhow::Result;
use conveyor_base::{
    peers::PeerTable, Command, EndPoint, Envelope, JobDescriptor, MessageKind, SlotId, Verdict,
};
use conveyor_comm::{dispatcher, node, Dispatcher, Outbox};
use conveyor_util::{
    fs::{self, Fs},
    time::{self, Clock as _, SystemClock},
};
use slog::{debug, info, o, warn, Logger};
use std::{path::PathBuf, sync::Arc};

/// Everything a build task needs. Cheap to clone, so each task gets its own copy.
pub struct Context<BuildToolT> {
    pub slot: SlotId,
    pub address: EndPoint,
    pub peers: PeerTable,
    pub storage: PathBuf,
    pub outbox: Outbox,
    pub build_tool: Arc<BuildToolT>,
    pub log: Logger,
}

impl<BuildToolT> Clone for Context<BuildToolT> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot,
            address: self.address.clone(),
            peers: self.peers.clone(),
            storage: self.storage.clone(),
            outbox: self.outbox.clone(),
            build_tool: self.build_tool.clone(),
            log: self.log.clone(),
        }
    }
}

impl<BuildToolT> Context<BuildToolT> {
    /// Tell the coordinator this slot can take another job.
    fn send_ready(&self) {
        self.outbox.send(
            Envelope::new(MessageKind::Reply, Command::Ready)
                .addressed(self.peers.coordinator.clone(), self.address.clone())
                .with_argument(self.slot.to_string()),
        );
    }
}

pub fn dispatcher<BuildToolT: BuildTool>() -> Dispatcher<Context<BuildToolT>> {
    Dispatcher::builder()
        .register(Command::TestRequest, test_request)
        .register(Command::SendFile, send_file)
        .register(Command::Show, dispatcher::show)
        .build()
}

/// A job from the coordinator: ask the repository for every file it names. The descriptor rides
/// along so it comes back with the completion signal.
fn test_request<BuildToolT>(context: &mut Context<BuildToolT>, msg: &Envelope) -> Result<Envelope> {
    if !msg.is_request() {
        // The test stage acknowledging a forwarded element.
        return Ok(msg.reply(MessageKind::NoReply));
    }
    match JobDescriptor::from_json(&msg.argument) {
        Ok(job) => {
            let files = job.files();
            info!(context.log, "job received";
                "author" => &job.author,
                "elements" => job.tests.len(),
                "files" => files.len());
            context.outbox.send(
                Envelope::request(
                    Command::SendFile,
                    context.peers.repository.clone(),
                    context.address.clone(),
                )
                .with_author(job.author)
                .with_argument(msg.argument.clone())
                .with_arguments(files),
            );
        }
        Err(err) => {
            warn!(context.log, "dropping malformed job descriptor"; "error" => %err);
            context.send_ready();
        }
    }
    Ok(msg.reply(MessageKind::NoReply))
}

/// A request means the test stage wants an artifact. Anything else is the repository signaling
/// that a job's files have all arrived, so the build starts.
fn send_file<BuildToolT: BuildTool>(
    context: &mut Context<BuildToolT>,
    msg: &Envelope,
) -> Result<Envelope> {
    if msg.is_request() {
        debug!(context.log, "artifacts requested";
            "from" => %msg.from,
            "names" => msg.arguments.join(" "));
        return Ok(node::send_requested_files(&context.outbox, msg));
    }
    match JobDescriptor::from_json(&msg.argument) {
        Ok(job) => {
            tokio::task::spawn(build_job(context.clone(), job));
        }
        Err(err) => {
            warn!(context.log, "files arrived for malformed job descriptor"; "error" => %err);
            context.send_ready();
        }
    }
    Ok(Envelope::new(MessageKind::NoReply, Command::SendFile))
}

/// Build every element of `job` in order, report each verdict, forward each success to the test
/// stage, and finally tell the coordinator the slot is free again.
pub async fn build_job<BuildToolT: BuildTool>(context: Context<BuildToolT>, job: JobDescriptor) {
    let log = context.log.new(o!("author" => job.author.clone()));
    for element in &job.tests {
        let name = element.name();
        let log_name = time::stamped_name(name, "BuildLog", "log", SystemClock.now());
        let verdict = build_element(&context, &element.build_config, &log_name, &log).await;
        info!(log, "build finished"; "element" => name, "verdict" => %verdict);

        context
            .outbox
            .post_file(context.peers.repository.clone(), log_name);
        context.outbox.send(
            Envelope::notification(
                Command::BuildResult,
                context.peers.client.clone(),
                context.address.clone(),
            )
            .with_author(job.author.clone())
            .with_argument(format!("{name} build: {verdict}")),
        );

        if verdict.is_success() {
            match job.single(element).to_json() {
                Ok(json) => context.outbox.send(
                    Envelope::request(
                        Command::TestRequest,
                        context.peers.test_stage.clone(),
                        context.address.clone(),
                    )
                    .with_author(job.author.clone())
                    .with_argument(json),
                ),
                Err(err) => warn!(log, "serializing element failed"; "error" => %err),
            }
        }
    }
    context.send_ready();
}

/// Run the build tool. Any failure to run it at all is written to the log and counts as a failed
/// build.
async fn build_element<BuildToolT: BuildTool>(
    context: &Context<BuildToolT>,
    build_config: &str,
    log_name: &str,
    log: &Logger,
) -> Verdict {
    let result = async {
        let config = fs::path_in(&context.storage, build_config)?;
        let log_file = fs::path_in(&context.storage, log_name)?;
        context.build_tool.build(&config, &log_file).await
    }
    .await;
    match result {
        Ok(verdict) => verdict,
        Err(err) => {
            warn!(log, "build tool failed"; "config" => build_config, "error" => %err);
            let fs = Fs::new();
            if let Err(err) = fs
                .write(context.storage.join(log_name), format!("build tool failed: {err:#}\n"))
                .await
            {
                warn!(log, "writing build log failed"; "error" => %err);
            }
            Verdict::Failure
        }
    }
}
