//! The repository's commands. Anything touching storage runs on a task, which sends the answer
//! through the outbox when it's done. Submissions share one task so that they reach the
//! coordinator in the order they arrived.

use anyhow::{bail, Result};
use conveyor_base::{peers::PeerTable, Command, EndPoint, Envelope, MessageKind};
use conveyor_comm::{dispatcher, node, Dispatcher, Outbox};
use conveyor_util::{
    fs::{self, FileInfo, Fs},
    time::{self, Clock},
};
use slog::{debug, info, warn, Logger};
use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

#[derive(Clone)]
pub struct Context {
    pub address: EndPoint,
    pub peers: PeerTable,
    pub storage: PathBuf,
    pub source_extensions: Vec<String>,
    pub outbox: Outbox,
    pub submissions: UnboundedSender<Envelope>,
    pub clock: Arc<dyn Clock + Send + Sync>,
    pub log: Logger,
}

pub fn dispatcher() -> Dispatcher<Context> {
    Dispatcher::builder()
        .register(Command::TestRequest, test_request)
        .register(Command::TestRequestOnRepo, test_request_on_repo)
        .register(Command::GetCategories, listing)
        .register(Command::GetFiles, listing)
        .register(Command::GetRequests, listing)
        .register(Command::GetLogs, listing)
        .register(Command::SendFile, send_file)
        .register(Command::Show, dispatcher::show)
        .build()
}

/// Run `f` on its own task. The receive loop gets an unaddressed envelope back, so it sends
/// nothing itself.
fn defer<F>(
    context: &Context,
    msg: &Envelope,
    f: impl FnOnce(Context, Envelope) -> F,
) -> Envelope
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::task::spawn(f(context.clone(), msg.clone()));
    Envelope::new(MessageKind::NoReply, msg.command)
}

/// A client's submission. The coordinator's acknowledgment of a forwarded request carries the
/// same command and is ignored.
fn test_request(context: &mut Context, msg: &Envelope) -> Result<Envelope> {
    if !msg.is_request() {
        return Ok(msg.reply(MessageKind::NoReply));
    }
    submit(context, msg)
}

fn test_request_on_repo(context: &mut Context, msg: &Envelope) -> Result<Envelope> {
    submit(context, msg)
}

fn submit(context: &Context, msg: &Envelope) -> Result<Envelope> {
    if context.submissions.send(msg.clone()).is_err() {
        bail!("submission task has stopped");
    }
    Ok(msg.reply(MessageKind::NoReply))
}

fn listing(context: &mut Context, msg: &Envelope) -> Result<Envelope> {
    Ok(defer(context, msg, send_listing))
}

/// Requests are served from storage. The repository never asks anyone for files, so there are
/// no completion signals to act on.
fn send_file(context: &mut Context, msg: &Envelope) -> Result<Envelope> {
    if msg.is_request() {
        debug!(context.log, "files requested";
            "from" => %msg.from,
            "names" => msg.arguments.join(" "));
        Ok(node::send_requested_files(&context.outbox, msg))
    } else {
        Ok(Envelope::new(MessageKind::NoReply, Command::SendFile))
    }
}

fn forward(context: &Context, author: &str, descriptor: String) {
    context.outbox.send(
        Envelope::request(
            Command::TestRequest,
            context.peers.coordinator.clone(),
            context.address.clone(),
        )
        .with_author(author)
        .with_argument(descriptor),
    );
}

/// Main loop for the submission task: store or look up each submission in turn and forward it.
/// Returns when every sender has been dropped.
pub async fn submissions_main(context: Context, mut receiver: UnboundedReceiver<Envelope>) {
    while let Some(msg) = receiver.recv().await {
        match msg.command {
            Command::TestRequestOnRepo => forward_stored(&context, msg).await,
            _ => store_and_forward(&context, msg).await,
        }
    }
}

/// Keep the submitted descriptor verbatim as `BuildRequest-<timestamp>.json`, then hand it to the
/// coordinator. A request that can't be stored is still forwarded.
pub async fn store_and_forward(context: &Context, msg: Envelope) {
    match store(context, &msg.argument).await {
        Ok(name) => info!(context.log, "request stored"; "name" => name, "author" => &msg.author),
        Err(err) => warn!(context.log, "storing request failed"; "error" => %err),
    }
    forward(context, &msg.author, msg.argument);
}

/// Requests stored within the same millisecond get a numeric suffix.
async fn store(context: &Context, descriptor: &str) -> Result<String> {
    let stamp = time::timestamp(context.clock.now());
    let fs = Fs::new();
    for attempt in 0u32.. {
        let name = match attempt {
            0 => format!("BuildRequest-{stamp}.json"),
            n => format!("BuildRequest-{stamp}_{n}.json"),
        };
        if fs.write_new(context.storage.join(&name), descriptor).await? {
            return Ok(name);
        }
    }
    bail!("no free name for request stamped {stamp}")
}

/// Resubmit a request stored earlier. The argument names the stored file.
pub async fn forward_stored(context: &Context, msg: Envelope) {
    let result = async {
        let path = fs::path_in(&context.storage, msg.argument.trim())?;
        Fs::new().read_to_string(path).await
    }
    .await;
    match result {
        Ok(descriptor) => {
            info!(context.log, "resubmitting stored request"; "name" => msg.argument.trim());
            forward(context, &msg.author, descriptor);
        }
        Err(err) => warn!(context.log, "reading stored request failed"; "error" => %err),
    }
}

/// Answer a listing request with a [`MessageKind::Reply`] whose `arguments` are the names. A
/// listing that fails is logged and answered with no names.
pub async fn send_listing(context: Context, msg: Envelope) {
    let names = list(&context, &msg).await.unwrap_or_else(|err| {
        warn!(context.log, "listing failed"; "command" => %msg.command, "error" => %err);
        vec![]
    });
    context
        .outbox
        .send(msg.reply(MessageKind::Reply).with_arguments(names));
}

async fn list(context: &Context, msg: &Envelope) -> Result<Vec<String>> {
    let fs = Fs::new();
    let storage = &context.storage;
    match msg.command {
        Command::GetCategories => fs.list_directories(storage).await,
        Command::GetFiles => {
            let category = msg.argument.trim();
            let dir = if category.is_empty() {
                storage.clone()
            } else {
                fs::path_in(storage, category)?
            };
            let mut files = fs
                .list_files(dir, |name| {
                    has_extension(name, &context.source_extensions)
                })
                .await?;
            files.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(names(files))
        }
        Command::GetRequests => Ok(names(newest_first(
            fs.list_files(storage, |name| name.ends_with(".json")).await?,
        ))),
        Command::GetLogs => Ok(names(newest_first(
            fs.list_files(storage, |name| name.ends_with(".log")).await?,
        ))),
        command => bail!("{command} is not a listing"),
    }
}

fn has_extension(name: &str, extensions: &[String]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extensions.iter().any(|e| e == extension))
}

/// Timestamped names sort chronologically, so they break ties between equal modification times.
fn newest_first(mut files: Vec<FileInfo>) -> Vec<FileInfo> {
    files.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| b.name.cmp(&a.name))
    });
    files
}

fn names(files: Vec<FileInfo>) -> Vec<String> {
    files.into_iter().map(|file| file.name).collect()
}
