//! Code for the client binary.

pub mod config;
mod progress;
mod session;

use anyhow::{Context as _, Result};
use config::{ClientCommand, Config};
use conveyor_base::{Command, EndPoint, JobDescriptor};
use conveyor_util::fs::Fs;
use progress::Progress;
use session::Session;
use slog::{info, Logger};
use std::{path::Path, time::Duration};

/// How long to wait for a node to answer a request.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Run one client command against the nodes in `config.peers`.
pub async fn main(config: Config, command: ClientCommand, log: Logger) -> Result<()> {
    let peers = config.peers;
    let storage = config.storage_root.into_inner();
    let mut session = Session::open(
        &peers.client,
        storage.clone(),
        config.block_size.into_inner(),
        config.author.clone(),
        log.clone(),
    )
    .await?;

    match command {
        ClientCommand::StartPool { count } => {
            session
                .request(Command::StartPool, &peers.coordinator, count.to_string(), vec![])
                .await?;
            session.reply(Command::StartPool, REPLY_TIMEOUT).await?;
            println!("pool start requested");
        }
        ClientCommand::ClosePool => {
            session
                .request(Command::ClosePool, &peers.coordinator, "", vec![])
                .await?;
            session.reply(Command::ClosePool, REPLY_TIMEOUT).await?;
            println!("pool shutdown requested");
        }
        ClientCommand::Submit { job, wait } => {
            let text = Fs::new().read_to_string(&job).await?;
            let mut descriptor = JobDescriptor::from_json(&text)
                .with_context(|| format!("parsing job in {}", job.display()))?;
            if descriptor.author.is_empty() {
                descriptor.author = config.author;
            }
            let mut progress = Progress::new(&descriptor);
            session
                .request(
                    Command::TestRequest,
                    &peers.repository,
                    descriptor.to_json()?,
                    vec![],
                )
                .await?;
            session.reply(Command::TestRequest, REPLY_TIMEOUT).await?;
            info!(log, "job submitted"; "elements" => descriptor.tests.len());
            println!("submitted {} element(s)", descriptor.tests.len());
            while wait && !progress.is_done() {
                let notification = session.notification().await?;
                println!("{}", notification.argument);
                progress.record(&notification.argument);
            }
        }
        ClientCommand::SubmitOnRepo { name } => {
            session
                .request(Command::TestRequestOnRepo, &peers.repository, name, vec![])
                .await?;
            session.reply(Command::TestRequestOnRepo, REPLY_TIMEOUT).await?;
            println!("resubmission requested");
        }
        ClientCommand::Categories => {
            list(&mut session, Command::GetCategories, &peers.repository, "").await?;
        }
        ClientCommand::Files { category } => {
            list(
                &mut session,
                Command::GetFiles,
                &peers.repository,
                category.as_deref().unwrap_or_default(),
            )
            .await?;
        }
        ClientCommand::Requests => {
            list(&mut session, Command::GetRequests, &peers.repository, "").await?;
        }
        ClientCommand::Logs => {
            list(&mut session, Command::GetLogs, &peers.repository, "").await?;
        }
        ClientCommand::Fetch { names } => {
            session
                .request(Command::SendFile, &peers.repository, "", names)
                .await?;
            let completion = session.reply(Command::SendFile, REPLY_TIMEOUT).await?;
            // Files are stored under their base names.
            for name in &completion.arguments {
                let path = Path::new(name)
                    .file_name()
                    .map(|base| storage.join(base))
                    .filter(|path| path.is_file());
                match path {
                    Some(path) => println!("{}", path.display()),
                    None => println!("{name}: not received"),
                }
            }
        }
        ClientCommand::Watch { count } => {
            let mut seen = 0;
            while count.is_none_or(|count| seen < count) {
                let notification = session.notification().await?;
                println!("{}", notification.argument);
                seen += 1;
            }
        }
    }
    Ok(())
}

async fn list(
    session: &mut Session,
    command: Command,
    repository: &EndPoint,
    argument: &str,
) -> Result<()> {
    session.request(command, repository, argument, vec![]).await?;
    let reply = session.reply(command, REPLY_TIMEOUT).await?;
    for name in reply.arguments {
        println!("{name}");
    }
    Ok(())
}
