//! The message unit exchanged between nodes.

use crate::EndPoint;
use derive_more::Display;
use enum_map::Enum;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Formatter},
    thread,
};

/// What kind of message an [`Envelope`] is. The kind decides whether the receiving node answers.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
pub enum MessageKind {
    /// Sent to a destination when a connection is first made.
    Connect,
    /// Announces that a listener has started.
    Listen,
    /// Asks the receiver to act. Always answered.
    Request,
    /// Answers a previous request.
    Reply,
    /// Debugging traffic.
    Test,
    /// Must never be answered.
    NoReply,
    /// Produced locally when the channel failed.
    ChannelError,
    /// Produced by the dispatcher when a handler failed. Never sent.
    ProcessingError,
    /// Asks the local sender to drop its connection to the destination.
    CloseSender,
    /// Asks the receiving node to stop its receive loop.
    CloseReceiver,
}

/// The operation an [`Envelope`] names. Each node's handler table is keyed on this.
#[derive(Clone, Copy, Debug, Deserialize, Display, Enum, Eq, Hash, PartialEq, Serialize)]
pub enum Command {
    StartPool,
    ClosePool,
    TestRequest,
    TestRequestOnRepo,
    BuildResult,
    TestResult,
    Ready,
    GetCategories,
    GetFiles,
    GetRequests,
    GetLogs,
    SendFile,
    AcceptFile,
    Show,
    Connect,
    DoTest,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Envelope {
    pub kind: MessageKind,
    pub command: Command,
    pub to: EndPoint,
    pub from: EndPoint,
    pub author: String,
    /// Single string payload, e.g. a serialized job descriptor or a file name.
    pub argument: String,
    /// Ordered list payload, e.g. a batch of file names.
    pub arguments: Vec<String>,
    /// Names the thread that built the envelope. Diagnostic only.
    pub origin_tag: String,
    pub error_message: Option<String>,
}

impl Envelope {
    pub fn new(kind: MessageKind, command: Command) -> Self {
        Self {
            kind,
            command,
            to: EndPoint::default(),
            from: EndPoint::default(),
            author: String::new(),
            argument: String::new(),
            arguments: Vec::new(),
            origin_tag: format!("{:?}", thread::current().id()),
            error_message: None,
        }
    }

    /// A [`MessageKind::Request`] from `from` to `to`.
    pub fn request(command: Command, to: impl Into<EndPoint>, from: impl Into<EndPoint>) -> Self {
        Self::new(MessageKind::Request, command).addressed(to, from)
    }

    /// A [`MessageKind::NoReply`] notification from `from` to `to`.
    pub fn notification(
        command: Command,
        to: impl Into<EndPoint>,
        from: impl Into<EndPoint>,
    ) -> Self {
        Self::new(MessageKind::NoReply, command).addressed(to, from)
    }

    /// Build a reply of the given kind: addressed back to the sender, from the address this
    /// envelope was delivered to, for the same command, echoing the scalar argument.
    pub fn reply(&self, kind: MessageKind) -> Self {
        Self::new(kind, self.command)
            .addressed(self.from.clone(), self.to.clone())
            .with_argument(self.argument.clone())
    }

    /// The reply produced when a handler fails. It is addressed, but the receive loop never
    /// sends it.
    pub fn processing_error(&self, error: impl fmt::Display) -> Self {
        let mut reply = self.reply(MessageKind::ProcessingError);
        reply.error_message = Some(error.to_string());
        reply
    }

    pub fn addressed(mut self, to: impl Into<EndPoint>, from: impl Into<EndPoint>) -> Self {
        self.to = to.into();
        self.from = from.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.argument = argument.into();
        self
    }

    pub fn with_arguments<T: Into<String>>(mut self, arguments: impl IntoIterator<Item = T>) -> Self {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }
}

/// Multi-line rendering of every field. Used for [`Command::Show`].
impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Envelope:")?;
        writeln!(f, "  kind      : {}", self.kind)?;
        writeln!(f, "  to        : {}", self.to)?;
        writeln!(f, "  from      : {}", self.from)?;
        writeln!(f, "  author    : {}", self.author)?;
        writeln!(f, "  command   : {}", self.command)?;
        writeln!(f, "  argument  : {}", self.argument)?;
        writeln!(f, "  arguments : {}", self.arguments.join(" "))?;
        writeln!(f, "  origin    : {}", self.origin_tag)?;
        write!(
            f,
            "  error     : {}",
            self.error_message.as_deref().unwrap_or("no error")
        )
    }
}
