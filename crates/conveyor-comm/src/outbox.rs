//! The ordered outbound queue every part of a node sends through.

use crate::sender::Sender;
use conveyor_base::{EndPoint, Envelope, MessageKind};
use slog::{debug, warn, Logger};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// One unit of outbound work.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outbound {
    Envelope(Envelope),
    /// Stream a file from local storage.
    File { to: EndPoint, name: String },
}

/// Cloneable handle for queuing outbound work. Posting never blocks and never fails: transport
/// errors are logged by the writer, which processes the queue strictly in order. A SendFile
/// completion reply posted after a node's files therefore arrives after them.
#[derive(Clone, Debug)]
pub struct Outbox(UnboundedSender<Outbound>);

impl Outbox {
    pub fn new() -> (Self, UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self(sender), receiver)
    }

    /// Queue an envelope for `envelope.to`. An envelope of kind [`MessageKind::CloseSender`]
    /// isn't transmitted: it drops the connection to its destination instead.
    pub fn send(&self, envelope: Envelope) {
        self.post(Outbound::Envelope(envelope));
    }

    pub fn post_file(&self, to: impl Into<EndPoint>, name: impl Into<String>) {
        self.post(Outbound::File {
            to: to.into(),
            name: name.into(),
        });
    }

    fn post(&self, outbound: Outbound) {
        // The writer only goes away when the node is shutting down.
        self.0.send(outbound).ok();
    }
}

/// Main loop for the writer task. Returns when every [`Outbox`] clone has been dropped.
pub async fn writer_main(
    mut receiver: UnboundedReceiver<Outbound>,
    mut sender: Sender,
    log: Logger,
) {
    while let Some(outbound) = receiver.recv().await {
        match outbound {
            Outbound::Envelope(envelope) if envelope.kind == MessageKind::CloseSender => {
                sender.disconnect(&envelope.to);
            }
            Outbound::Envelope(envelope) if envelope.to.is_unset() => {
                debug!(log, "dropping envelope with no destination";
                    "kind" => %envelope.kind,
                    "command" => %envelope.command);
            }
            Outbound::Envelope(envelope) => {
                debug!(log, "sending envelope";
                    "kind" => %envelope.kind,
                    "command" => %envelope.command,
                    "to" => %envelope.to);
                if let Err(err) = sender.send(&envelope).await {
                    warn!(log, "sending envelope failed";
                        "command" => %envelope.command,
                        "error" => %err);
                }
            }
            Outbound::File { to, name } => {
                if let Err(err) = sender.post_file(&to, &name).await {
                    warn!(log, "sending file failed"; "name" => name, "error" => %err);
                }
            }
        }
    }
}
