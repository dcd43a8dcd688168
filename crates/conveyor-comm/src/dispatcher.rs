//! Per-node table from [`Command`] to handler.

use anyhow::Result;
use conveyor_base::{Command, Envelope, MessageKind};
use enum_map::EnumMap;

/// A handler consumes an inbound envelope and builds its reply. It may mutate the node's context
/// but must not wait on another inbound message to the same node: long-running work belongs on a
/// spawned task.
pub type Handler<ContextT> = Box<dyn Fn(&mut ContextT, &Envelope) -> Result<Envelope> + Send + Sync>;

/// An immutable handler table. Built once at node startup with [`Dispatcher::builder`].
pub struct Dispatcher<ContextT> {
    handlers: EnumMap<Command, Option<Handler<ContextT>>>,
}

pub struct DispatcherBuilder<ContextT> {
    handlers: EnumMap<Command, Option<Handler<ContextT>>>,
}

impl<ContextT> DispatcherBuilder<ContextT> {
    /// Add the handler for `command`. Each command may have at most one handler.
    pub fn register(
        mut self,
        command: Command,
        handler: impl Fn(&mut ContextT, &Envelope) -> Result<Envelope> + Send + Sync + 'static,
    ) -> Self {
        assert!(
            self.handlers[command].is_none(),
            "handler for {command} registered twice"
        );
        self.handlers[command] = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Dispatcher<ContextT> {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

impl<ContextT> Dispatcher<ContextT> {
    pub fn builder() -> DispatcherBuilder<ContextT> {
        DispatcherBuilder {
            handlers: EnumMap::default(),
        }
    }

    pub fn handles(&self, command: Command) -> bool {
        self.handlers[command].is_some()
    }

    /// Run the handler for `envelope.command`. Never fails: an unknown command yields an
    /// unaddressed [`MessageKind::NoReply`] envelope, and a failing handler yields a
    /// [`MessageKind::ProcessingError`] reply.
    pub fn dispatch(&self, context: &mut ContextT, envelope: &Envelope) -> Envelope {
        match &self.handlers[envelope.command] {
            None => Envelope::new(MessageKind::NoReply, envelope.command),
            Some(handler) => handler(context, envelope)
                .unwrap_or_else(|err| envelope.processing_error(format!("{err:#}"))),
        }
    }
}

/// Whether `reply` should be sent back for `inbound`. Notifications and connection announcements
/// are never answered, processing errors are never sent, and neither is a reply without a
/// destination.
pub fn should_reply(inbound: &Envelope, reply: &Envelope) -> bool {
    !matches!(inbound.kind, MessageKind::NoReply | MessageKind::Connect)
        && reply.kind != MessageKind::ProcessingError
        && !reply.to.is_unset()
}

/// Handler for [`Command::Show`]: hands the inbound envelope back so the receive loop renders it.
pub fn show<ContextT>(_: &mut ContextT, envelope: &Envelope) -> Result<Envelope> {
    Ok(envelope.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use assert_matches::assert_matches;

    #[derive(Default)]
    struct Counter {
        requests: usize,
    }

    fn dispatcher() -> Dispatcher<Counter> {
        Dispatcher::builder()
            .register(Command::TestRequest, |counter: &mut Counter, msg| {
                counter.requests += 1;
                Ok(msg.reply(MessageKind::NoReply))
            })
            .register(Command::GetLogs, |_, _| bail!("disk on fire"))
            .build()
    }

    #[test]
    fn handler_runs_and_mutates_context() {
        let dispatcher = dispatcher();
        let mut counter = Counter::default();
        let msg = Envelope::request(Command::TestRequest, "localhost:8080", "localhost:8082");
        let reply = dispatcher.dispatch(&mut counter, &msg);
        assert_eq!(counter.requests, 1);
        assert_eq!(reply.kind, MessageKind::NoReply);
        assert_eq!(reply.to.as_str(), "localhost:8082");
        assert!(should_reply(&msg, &reply));
    }

    #[test]
    fn unknown_command_is_dropped() {
        let dispatcher = dispatcher();
        let msg = Envelope::request(Command::StartPool, "localhost:8080", "localhost:8081");
        let reply = dispatcher.dispatch(&mut Counter::default(), &msg);
        assert_eq!(reply.kind, MessageKind::NoReply);
        assert!(reply.to.is_unset());
        assert!(!should_reply(&msg, &reply));
        assert!(!dispatcher.handles(Command::StartPool));
    }

    #[test]
    fn handler_error_becomes_processing_error() {
        let dispatcher = dispatcher();
        let msg = Envelope::request(Command::GetLogs, "localhost:8082", "localhost:8081");
        let reply = dispatcher.dispatch(&mut Counter::default(), &msg);
        assert_eq!(reply.kind, MessageKind::ProcessingError);
        assert_matches!(reply.error_message.as_deref(), Some(m) if m.contains("disk on fire"));
        assert!(!should_reply(&msg, &reply));
    }

    #[test]
    fn notifications_are_never_answered() {
        let dispatcher = dispatcher();
        for kind in [MessageKind::NoReply, MessageKind::Connect] {
            let msg = Envelope::new(kind, Command::TestRequest)
                .addressed("localhost:8080", "localhost:8082");
            let reply = dispatcher.dispatch(&mut Counter::default(), &msg);
            assert!(!should_reply(&msg, &reply), "{kind}");
        }
    }

    #[test]
    fn show_echoes_the_envelope() {
        let dispatcher = Dispatcher::builder()
            .register(Command::Show, show::<()>)
            .build();
        let msg = Envelope::request(Command::Show, "localhost:8080", "localhost:8081")
            .with_argument("hello");
        assert_eq!(dispatcher.dispatch(&mut (), &msg), msg);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        Dispatcher::<()>::builder()
            .register(Command::Show, show)
            .register(Command::Show, show);
    }
}
