//! The coordinator's commands. Every handler just turns the envelope into a scheduler message.

use crate::scheduler::Message;
use anyhow::{anyhow, Context as _, Result};
use conveyor_base::{Command, Envelope, JobDescriptor, MessageKind, SlotId};
use conveyor_comm::{dispatcher, Dispatcher};
use slog::{info, warn, Logger};
use tokio::sync::mpsc::UnboundedSender;

pub struct Context {
    pub scheduler: UnboundedSender<Message>,
    pub max_pool_size: usize,
    pub log: Logger,
}

impl Context {
    fn schedule(&self, msg: Message) -> Result<()> {
        self.scheduler
            .send(msg)
            .map_err(|_| anyhow!("scheduler has exited"))
    }
}

pub fn dispatcher() -> Dispatcher<Context> {
    Dispatcher::builder()
        .register(Command::StartPool, start_pool)
        .register(Command::ClosePool, close_pool)
        .register(Command::TestRequest, test_request)
        .register(Command::Ready, ready)
        .register(Command::Show, dispatcher::show)
        .build()
}

/// The argument is a signed count, clamped into `0..=max_pool_size`.
fn start_pool(context: &mut Context, msg: &Envelope) -> Result<Envelope> {
    let requested: i64 = msg
        .argument
        .trim()
        .parse()
        .with_context(|| format!("pool size {:?} isn't a number", msg.argument))?;
    let max = i64::try_from(context.max_pool_size).unwrap_or(i64::MAX);
    let count = requested.clamp(0, max);
    info!(context.log, "starting pool"; "requested" => requested, "count" => count);
    context.schedule(Message::StartPool(count as usize))?;
    Ok(msg.reply(MessageKind::NoReply))
}

fn close_pool(context: &mut Context, msg: &Envelope) -> Result<Envelope> {
    info!(context.log, "shutting down pool");
    context.schedule(Message::ShutdownPool)?;
    Ok(msg.reply(MessageKind::NoReply))
}

/// Only requests are queued: the worker's acknowledgment of a job it was sent carries the same
/// command. A descriptor that doesn't parse is dropped.
fn test_request(context: &mut Context, msg: &Envelope) -> Result<Envelope> {
    if msg.is_request() {
        match JobDescriptor::from_json(&msg.argument) {
            Ok(job) => {
                info!(context.log, "job queued";
                    "author" => &job.author,
                    "elements" => job.tests.len());
                context.schedule(Message::EnqueueJob(job))?;
            }
            Err(err) => {
                warn!(context.log, "dropping malformed job descriptor";
                    "from" => %msg.from,
                    "error" => %err);
            }
        }
    }
    Ok(msg.reply(MessageKind::NoReply))
}

fn ready(context: &mut Context, msg: &Envelope) -> Result<Envelope> {
    let slot: SlotId = msg
        .argument
        .parse()
        .with_context(|| format!("ready signal with bad slot {:?}", msg.argument))?;
    context.schedule(Message::WorkerReady(slot))?;
    Ok(msg.reply(MessageKind::NoReply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_test::{element, envelope, job, slot};
    use conveyor_util::log::test_logger;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn context() -> (Context, UnboundedReceiver<Message>) {
        let (scheduler, receiver) = mpsc::unbounded_channel();
        let context = Context {
            scheduler,
            max_pool_size: 10,
            log: test_logger(),
        };
        (context, receiver)
    }

    fn drain(receiver: &mut UnboundedReceiver<Message>) -> Vec<Message> {
        let mut messages = vec![];
        while let Ok(msg) = receiver.try_recv() {
            messages.push(msg);
        }
        messages
    }

    fn start_pool_msg(argument: &str) -> Envelope {
        envelope!(Request, StartPool, "localhost:8080" => "localhost:8081", argument: argument)
    }

    #[test]
    fn start_pool_clamps_count() {
        let dispatcher = dispatcher();
        let (mut context, mut receiver) = context();
        for (argument, expected) in [("3", 3), ("-4", 0), ("25", 10), (" 10 ", 10)] {
            let reply = dispatcher.dispatch(&mut context, &start_pool_msg(argument));
            assert_eq!(reply.kind, MessageKind::NoReply);
            assert_eq!(drain(&mut receiver), vec![Message::StartPool(expected)]);
        }
    }

    #[test]
    fn unparsable_start_pool_is_ignored() {
        let dispatcher = dispatcher();
        let (mut context, mut receiver) = context();
        let reply = dispatcher.dispatch(&mut context, &start_pool_msg("many"));
        assert_eq!(reply.kind, MessageKind::ProcessingError);
        assert_eq!(drain(&mut receiver), vec![]);
    }

    #[test]
    fn close_pool_shuts_down() {
        let dispatcher = dispatcher();
        let (mut context, mut receiver) = context();
        let msg = envelope!(Request, ClosePool, "localhost:8080" => "localhost:8081");
        let reply = dispatcher.dispatch(&mut context, &msg);
        assert_eq!(reply.to.as_str(), "localhost:8081");
        assert_eq!(drain(&mut receiver), vec![Message::ShutdownPool]);
    }

    #[test]
    fn test_request_enqueues_parsed_job() {
        let dispatcher = dispatcher();
        let (mut context, mut receiver) = context();
        let job = job!([element!(1), element!(2)]);
        let msg = envelope!(Request, TestRequest, "localhost:8080" => "localhost:8082",
            argument: job.to_json().unwrap());
        dispatcher.dispatch(&mut context, &msg);
        assert_eq!(drain(&mut receiver), vec![Message::EnqueueJob(job)]);
    }

    #[test]
    fn test_request_acknowledgment_is_not_queued() {
        let dispatcher = dispatcher();
        let (mut context, mut receiver) = context();
        let job = job!([element!(1)]);
        let msg = envelope!(NoReply, TestRequest, "localhost:8080" => "localhost:8090",
            argument: job.to_json().unwrap());
        dispatcher.dispatch(&mut context, &msg);
        assert_eq!(drain(&mut receiver), vec![]);
    }

    #[test]
    fn malformed_descriptor_is_dropped_quietly() {
        let dispatcher = dispatcher();
        let (mut context, mut receiver) = context();
        let msg = envelope!(Request, TestRequest, "localhost:8080" => "localhost:8082",
            argument: "<TestRequest/>");
        let reply = dispatcher.dispatch(&mut context, &msg);
        assert_eq!(reply.kind, MessageKind::NoReply);
        assert_eq!(drain(&mut receiver), vec![]);
    }

    #[test]
    fn ready_marks_slot() {
        let dispatcher = dispatcher();
        let (mut context, mut receiver) = context();
        let msg = envelope!(Reply, Ready, "localhost:8080" => "localhost:8093", argument: "3");
        dispatcher.dispatch(&mut context, &msg);
        assert_eq!(drain(&mut receiver), vec![Message::WorkerReady(slot![3])]);
    }

    #[test]
    fn ready_with_bad_slot_fails() {
        let dispatcher = dispatcher();
        let (mut context, mut receiver) = context();
        let msg = envelope!(Reply, Ready, "localhost:8080" => "localhost:8093", argument: "-1");
        let reply = dispatcher.dispatch(&mut context, &msg);
        assert_eq!(reply.kind, MessageKind::ProcessingError);
        assert_eq!(drain(&mut receiver), vec![]);
    }

    #[test]
    fn handler_fails_once_scheduler_exits() {
        let dispatcher = dispatcher();
        let (mut context, receiver) = context();
        drop(receiver);
        let reply = dispatcher.dispatch(&mut context, &start_pool_msg("1"));
        assert_eq!(reply.kind, MessageKind::ProcessingError);
    }
}
