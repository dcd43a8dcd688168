//! The test stage's commands and its test task.

use crate::loader::{TestLoader, TestOutcome};
use anyhow::Result;
use conveyor_base::{
    peers::PeerTable, Command, EndPoint, Envelope, JobDescriptor, MessageKind, TestElement,
    Verdict,
};
use conveyor_comm::{dispatcher, Dispatcher, Outbox};
use conveyor_util::{
    fs::{self, Fs},
    time::{self, Clock as _, SystemClock},
};
use slog::{debug, info, o, warn, Logger};
use std::{path::PathBuf, sync::Arc};

pub struct Context<TestLoaderT> {
    pub address: EndPoint,
    pub peers: PeerTable,
    pub storage: PathBuf,
    pub artifact_extension: String,
    pub outbox: Outbox,
    pub loader: Arc<TestLoaderT>,
    pub log: Logger,
}

impl<TestLoaderT> Clone for Context<TestLoaderT> {
    fn clone(&self) -> Self {
        Self {
            address: self.address.clone(),
            peers: self.peers.clone(),
            storage: self.storage.clone(),
            artifact_extension: self.artifact_extension.clone(),
            outbox: self.outbox.clone(),
            loader: self.loader.clone(),
            log: self.log.clone(),
        }
    }
}

pub fn dispatcher<TestLoaderT: TestLoader>() -> Dispatcher<Context<TestLoaderT>> {
    Dispatcher::builder()
        .register(Command::TestRequest, test_request)
        .register(Command::SendFile, send_file)
        .register(Command::Show, dispatcher::show)
        .build()
}

/// A successful build from a worker: ask that worker for the artifacts. The descriptor rides
/// along and comes back with the completion signal.
fn test_request<TestLoaderT>(context: &mut Context<TestLoaderT>, msg: &Envelope) -> Result<Envelope> {
    if !msg.is_request() {
        return Ok(msg.reply(MessageKind::NoReply));
    }
    match JobDescriptor::from_json(&msg.argument) {
        Ok(job) => {
            let artifacts: Vec<_> = job
                .tests
                .iter()
                .map(|element| element.artifact_name(&context.artifact_extension))
                .collect();
            debug!(context.log, "requesting artifacts";
                "from" => %msg.from,
                "names" => artifacts.join(" "));
            context.outbox.send(
                Envelope::request(Command::SendFile, msg.from.clone(), context.address.clone())
                    .with_author(job.author)
                    .with_argument(msg.argument.clone())
                    .with_arguments(artifacts),
            );
        }
        Err(err) => {
            warn!(context.log, "dropping malformed job descriptor";
                "from" => %msg.from,
                "error" => %err);
        }
    }
    Ok(msg.reply(MessageKind::NoReply))
}

/// The completion signal for an artifact batch starts a test task. Nothing is served from here,
/// so requests are refused.
fn send_file<TestLoaderT: TestLoader>(
    context: &mut Context<TestLoaderT>,
    msg: &Envelope,
) -> Result<Envelope> {
    if msg.is_request() {
        anyhow::bail!("the test stage doesn't serve files");
    }
    match JobDescriptor::from_json(&msg.argument) {
        Ok(job) => {
            tokio::task::spawn(test_job(context.clone(), job));
        }
        Err(err) => {
            warn!(context.log, "artifacts arrived for malformed job descriptor";
                "from" => %msg.from,
                "error" => %err);
        }
    }
    Ok(Envelope::new(MessageKind::NoReply, Command::SendFile))
}

/// Test every element of `job`, keeping each log locally, posting it to the repository, and
/// telling the client the verdict.
pub async fn test_job<TestLoaderT: TestLoader>(context: Context<TestLoaderT>, job: JobDescriptor) {
    let log = context.log.new(o!("author" => job.author.clone()));
    let fs = Fs::new();
    for element in &job.tests {
        let name = element.name();
        let outcome = test_element(&context, element).await;
        info!(log, "test finished"; "element" => name, "verdict" => %outcome.verdict);

        let log_name = time::stamped_name(name, "TestLog", "log", SystemClock.now());
        match fs.write(context.storage.join(&log_name), &outcome.log).await {
            Ok(()) => context
                .outbox
                .post_file(context.peers.repository.clone(), log_name),
            Err(err) => warn!(log, "writing test log failed"; "error" => %err),
        }
        context.outbox.send(
            Envelope::notification(
                Command::BuildResult,
                context.peers.client.clone(),
                context.address.clone(),
            )
            .with_author(job.author.clone())
            .with_argument(format!("{name} test: {}", outcome.verdict)),
        );
    }
}

/// A missing artifact or a loader that can't run counts as a failed test.
async fn test_element<TestLoaderT: TestLoader>(
    context: &Context<TestLoaderT>,
    element: &TestElement,
) -> TestOutcome {
    let artifact_name = element.artifact_name(&context.artifact_extension);
    let result = async {
        let artifact = fs::path_in(&context.storage, &artifact_name)?;
        if !Fs::new().exists(&artifact).await {
            anyhow::bail!("artifact {artifact_name} was not received");
        }
        context.loader.run(&artifact).await
    }
    .await;
    result.unwrap_or_else(|err| TestOutcome {
        verdict: Verdict::Failure,
        log: format!("{err:#}\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_comm::Outbound;
    use conveyor_test::{element, envelope, ep, job};
    use conveyor_util::log::test_logger;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Passes any artifact whose contents are `pass`.
    struct FakeLoader;

    impl TestLoader for FakeLoader {
        async fn run(&self, artifact: &Path) -> Result<TestOutcome> {
            let contents = std::fs::read_to_string(artifact)?;
            Ok(TestOutcome {
                verdict: Verdict::from_success(contents == "pass"),
                log: format!("ran {contents}\n"),
            })
        }
    }

    struct Fixture {
        context: Context<FakeLoader>,
        outbound: UnboundedReceiver<Outbound>,
        _storage: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let storage = TempDir::new().unwrap();
            let (outbox, outbound) = Outbox::new();
            Self {
                context: Context {
                    address: ep!("localhost:8083"),
                    peers: PeerTable::default(),
                    storage: storage.path().to_owned(),
                    artifact_extension: "bin".into(),
                    outbox,
                    loader: Arc::new(FakeLoader),
                    log: test_logger(),
                },
                outbound,
                _storage: storage,
            }
        }

        fn artifact(&self, name: &str, contents: &str) {
            std::fs::write(self.context.storage.join(name), contents).unwrap();
        }

        fn drain(&mut self) -> Vec<Outbound> {
            let mut outbound = vec![];
            while let Ok(item) = self.outbound.try_recv() {
                outbound.push(item);
            }
            outbound
        }
    }

    /// The log file posted to the repository and the notification sent to the client.
    fn report(fixture: &mut Fixture) -> (String, Envelope) {
        let outbound = fixture.drain();
        match <[Outbound; 2]>::try_from(outbound) {
            Ok([Outbound::File { to, name }, Outbound::Envelope(notification)]) => {
                assert_eq!(to, ep!("localhost:8082"));
                let text = std::fs::read_to_string(fixture.context.storage.join(&name)).unwrap();
                assert!(name.ends_with(".log"), "{name}");
                assert_eq!(notification.kind, MessageKind::NoReply);
                assert_eq!(notification.command, Command::BuildResult);
                assert_eq!(notification.to, ep!("localhost:8081"));
                (text, notification)
            }
            other => panic!("unexpected outbound traffic: {other:?}"),
        }
    }

    #[test]
    fn test_request_asks_worker_for_artifact() {
        let mut fixture = Fixture::new();
        let json = job!([element!(1)]).to_json().unwrap();
        let msg = envelope!(Request, TestRequest, "localhost:8083" => "localhost:8091",
            argument: json.as_str());
        let reply = dispatcher().dispatch(&mut fixture.context, &msg);
        assert_eq!(reply.kind, MessageKind::NoReply);
        assert_eq!(reply.to, ep!("localhost:8091"));

        let expected = Envelope::request(Command::SendFile, "localhost:8091", "localhost:8083")
            .with_author("ana")
            .with_argument(json)
            .with_arguments(["Test1.bin"]);
        assert_eq!(fixture.drain(), vec![Outbound::Envelope(expected)]);
    }

    #[test]
    fn malformed_test_request_is_dropped() {
        let mut fixture = Fixture::new();
        let msg = envelope!(Request, TestRequest, "localhost:8083" => "localhost:8091",
            argument: "{");
        let reply = dispatcher().dispatch(&mut fixture.context, &msg);
        assert_eq!(reply.kind, MessageKind::NoReply);
        assert_eq!(fixture.drain(), vec![]);
    }

    #[test]
    fn file_requests_are_refused() {
        let mut fixture = Fixture::new();
        let msg = envelope!(Request, SendFile, "localhost:8083" => "localhost:8081",
            arguments: ["Test1.bin"]);
        let reply = dispatcher().dispatch(&mut fixture.context, &msg);
        assert_eq!(reply.kind, MessageKind::ProcessingError);
        assert_eq!(fixture.drain(), vec![]);
    }

    #[tokio::test]
    async fn passing_artifact_is_reported() {
        let mut fixture = Fixture::new();
        fixture.artifact("Test1.bin", "pass");
        test_job(fixture.context.clone(), job!([element!(1)])).await;
        let (text, notification) = report(&mut fixture);
        assert_eq!(text, "ran pass\n");
        assert_eq!(notification.argument, "Test1 test: Success");
        assert_eq!(notification.author, "ana");
    }

    #[tokio::test]
    async fn failing_artifact_is_reported() {
        let mut fixture = Fixture::new();
        fixture.artifact("Test2.bin", "fail");
        test_job(fixture.context.clone(), job!([element!(2)])).await;
        let (text, notification) = report(&mut fixture);
        assert_eq!(text, "ran fail\n");
        assert_eq!(notification.argument, "Test2 test: Failure");
    }

    #[tokio::test]
    async fn missing_artifact_fails_with_log() {
        let mut fixture = Fixture::new();
        test_job(fixture.context.clone(), job!([element!(3)])).await;
        let (text, notification) = report(&mut fixture);
        assert_eq!(text, "artifact Test3.bin was not received\n");
        assert_eq!(notification.argument, "Test3 test: Failure");
    }

    #[tokio::test]
    async fn log_is_named_after_element() {
        let mut fixture = Fixture::new();
        fixture.artifact("Test1.bin", "pass");
        test_job(fixture.context.clone(), job!([element!(1)])).await;
        let files: Vec<_> = fixture
            .drain()
            .into_iter()
            .filter_map(|item| match item {
                Outbound::File { name, .. } => Some(name),
                Outbound::Envelope(_) => None,
            })
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("Test1-TestLog-"), "{}", files[0]);
    }

    #[tokio::test]
    async fn completion_signal_starts_test_task() {
        let mut fixture = Fixture::new();
        fixture.artifact("Test1.bin", "pass");
        let msg = envelope!(NoReply, SendFile, "localhost:8083" => "localhost:8091",
            argument: job!([element!(1)]).to_json().unwrap(),
            arguments: ["Test1.bin"]);
        let reply = dispatcher().dispatch(&mut fixture.context, &msg);
        assert!(reply.to.is_unset());

        let mut notification = None;
        while let Some(item) = fixture.outbound.recv().await {
            if let Outbound::Envelope(envelope) = item {
                notification = Some(envelope);
                break;
            }
        }
        assert_eq!(notification.unwrap().argument, "Test1 test: Success");
    }
}
