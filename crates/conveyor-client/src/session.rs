//! A client's connection to the federation: the client address's listener plus a sender.

use anyhow::{anyhow, Result};
use conveyor_base::{Command, EndPoint, Envelope, MessageKind};
use conveyor_comm::{Channel, Sender};
use slog::{debug, Logger};
use std::{path::PathBuf, time::Duration};
use tokio::time;

pub struct Session {
    channel: Channel,
    sender: Sender,
    address: EndPoint,
    author: String,
    log: Logger,
}

impl Session {
    /// Listen on `address`, storing fetched files in `storage`.
    pub async fn open(
        address: &EndPoint,
        storage: PathBuf,
        block_size: usize,
        author: String,
        log: Logger,
    ) -> Result<Self> {
        let channel = Channel::bind(address, Some(storage.clone()), log.clone()).await?;
        Ok(Self {
            channel,
            sender: Sender::new(Some(storage), block_size, log.clone()),
            address: address.clone(),
            author,
            log,
        })
    }

    /// Send a request from this session's address, signed with its author.
    pub async fn request(
        &mut self,
        command: Command,
        to: &EndPoint,
        argument: impl Into<String>,
        arguments: Vec<String>,
    ) -> Result<()> {
        let envelope = Envelope::request(command, to.clone(), self.address.clone())
            .with_author(self.author.clone())
            .with_argument(argument)
            .with_arguments(arguments);
        self.sender.send(&envelope).await?;
        Ok(())
    }

    /// Wait up to `limit` for the answer to a `command` request. Anything else that arrives in the
    /// meantime is skipped.
    pub async fn reply(&mut self, command: Command, limit: Duration) -> Result<Envelope> {
        time::timeout(limit, async {
            loop {
                let envelope = self.channel.receive().await?;
                if envelope.command == command && !envelope.is_request() {
                    return Ok::<_, anyhow::Error>(envelope);
                }
                debug!(self.log, "skipping envelope while waiting";
                    "waiting_for" => %command,
                    "kind" => %envelope.kind,
                    "command" => %envelope.command);
            }
        })
        .await
        .map_err(|_| anyhow!("no answer to {command} within {limit:?}"))?
    }

    /// The next build or test notification.
    pub async fn notification(&mut self) -> Result<Envelope> {
        loop {
            let envelope = self.channel.receive().await?;
            if envelope.kind == MessageKind::NoReply
                && matches!(envelope.command, Command::BuildResult | Command::TestResult)
            {
                return Ok(envelope);
            }
            debug!(self.log, "skipping envelope while watching";
                "kind" => %envelope.kind,
                "command" => %envelope.command);
        }
    }
}
