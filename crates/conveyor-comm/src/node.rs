//! The receive loop every node runs.

use crate::{
    dispatcher::{self, Dispatcher},
    Channel, Outbox,
};
use anyhow::{Context as _, Result};
use conveyor_base::{Command, Envelope, MessageKind};
use slog::{debug, info, warn, Logger};
use std::future::Future;
use tokio::signal::unix::{self, SignalKind};

/// Receive and dispatch until the channel closes or a [`MessageKind::CloseReceiver`] envelope
/// arrives. Replies that are owed go out through `outbox`; a reply for [`Command::Show`] is
/// rendered to the log instead.
pub async fn serve<ContextT>(
    channel: &mut Channel,
    dispatcher: &Dispatcher<ContextT>,
    context: &mut ContextT,
    outbox: &Outbox,
    log: &Logger,
) {
    loop {
        let envelope = match channel.receive().await {
            Ok(envelope) => envelope,
            Err(err) => {
                info!(log, "receive loop ending"; "reason" => %err);
                break;
            }
        };
        if envelope.kind == MessageKind::CloseReceiver {
            info!(log, "close requested"; "from" => %envelope.from);
            break;
        }
        debug!(log, "dispatching";
            "kind" => %envelope.kind,
            "command" => %envelope.command,
            "from" => %envelope.from);
        let reply = dispatcher.dispatch(context, &envelope);
        if reply.kind == MessageKind::ProcessingError {
            warn!(log, "handler failed";
                "command" => %envelope.command,
                "from" => %envelope.from,
                "error" => reply.error_message.as_deref().unwrap_or_default());
        } else if reply.command == Command::Show && dispatcher.handles(Command::Show) {
            info!(log, "{reply}");
        } else if dispatcher::should_reply(&envelope, &reply) {
            outbox.send(reply);
        }
    }
}

/// Answer a SendFile request: queue every file named in `request.arguments` for its sender, and
/// build the completion reply. Since the reply goes out through the same outbox after the files,
/// the requester sees it only once every readable file has arrived. Unreadable files are logged
/// by the outbox writer and skipped.
pub fn send_requested_files(outbox: &Outbox, request: &Envelope) -> Envelope {
    for name in &request.arguments {
        outbox.post_file(request.from.clone(), name.clone());
    }
    request
        .reply(MessageKind::NoReply)
        .with_arguments(request.arguments.iter().cloned())
}

/// Run `future` until it completes or the process receives SIGINT or SIGTERM.
pub async fn until_signaled(future: impl Future<Output = ()>, log: &Logger) -> Result<()> {
    let mut interrupt =
        unix::signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut terminate =
        unix::signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        () = future => {}
        _ = interrupt.recv() => info!(log, "received SIGINT"),
        _ = terminate.recv() => info!(log, "received SIGTERM"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Outbound;
    use conveyor_test::{envelope, ep};

    #[test]
    fn requested_files_precede_completion() {
        let (outbox, mut receiver) = Outbox::new();
        let request = envelope!(Request, SendFile, "localhost:8082" => "localhost:8090",
            argument: "{}",
            arguments: ["A.toml", "A.rs"]);
        let reply = send_requested_files(&outbox, &request);

        assert_eq!(
            receiver.try_recv().unwrap(),
            Outbound::File {
                to: ep!("localhost:8090"),
                name: "A.toml".into()
            }
        );
        assert_eq!(
            receiver.try_recv().unwrap(),
            Outbound::File {
                to: ep!("localhost:8090"),
                name: "A.rs".into()
            }
        );
        assert!(receiver.try_recv().is_err());

        assert_eq!(reply.kind, MessageKind::NoReply);
        assert_eq!(reply.command, Command::SendFile);
        assert_eq!(reply.to, ep!("localhost:8090"));
        assert_eq!(reply.argument, "{}");
        assert_eq!(reply.arguments, vec!["A.toml", "A.rs"]);
    }
}
