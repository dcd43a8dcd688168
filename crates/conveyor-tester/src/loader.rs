//! The test step. Given a built artifact, produce a verdict and the text it printed.

use anyhow::{Context as _, Result};
use conveyor_base::Verdict;
use std::{
    fs::Permissions,
    future::Future,
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{fs, process::Command};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestOutcome {
    pub verdict: Verdict,
    pub log: String,
}

pub trait TestLoader: Send + Sync + 'static {
    /// Exercise `artifact`. An `Err` means it couldn't be run at all.
    fn run(&self, artifact: &Path) -> impl Future<Output = Result<TestOutcome>> + Send;
}

/// Runs `program [args...] <artifact>`, or the artifact itself when there is no program. Exit
/// status zero is a pass; stdout then stderr make up the log.
pub struct CommandTestLoader {
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl TestLoader for CommandTestLoader {
    async fn run(&self, artifact: &Path) -> Result<TestOutcome> {
        let mut command = match &self.program {
            Some(program) => {
                let mut command = Command::new(program);
                command.args(&self.args).arg(artifact);
                command
            }
            None => {
                // Received files are written without the executable bit.
                fs::set_permissions(artifact, Permissions::from_mode(0o755))
                    .await
                    .with_context(|| format!("making {} executable", artifact.display()))?;
                let mut command = Command::new(artifact);
                command.args(&self.args);
                command
            }
        };
        let output = command
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("running test for {}", artifact.display()))?;
        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(TestOutcome {
            verdict: Verdict::from_success(output.status.success()),
            log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn program_runs_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("Test1.bin");
        std::fs::write(&artifact, "echo passing\necho noise >&2\n").unwrap();
        let loader = CommandTestLoader {
            program: Some("sh".into()),
            args: vec![],
            working_dir: dir.path().to_owned(),
        };
        assert_eq!(
            loader.run(&artifact).await.unwrap(),
            TestOutcome {
                verdict: Verdict::Success,
                log: "passing\nnoise\n".into()
            }
        );
    }

    #[tokio::test]
    async fn artifact_runs_directly_without_program() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("Test2.bin");
        std::fs::write(&artifact, "#!/bin/sh\necho failing\nexit 1\n").unwrap();
        let loader = CommandTestLoader {
            program: None,
            args: vec![],
            working_dir: dir.path().to_owned(),
        };
        assert_eq!(
            loader.run(&artifact).await.unwrap(),
            TestOutcome {
                verdict: Verdict::Failure,
                log: "failing\n".into()
            }
        );
    }

    #[tokio::test]
    async fn missing_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = CommandTestLoader {
            program: None,
            args: vec![],
            working_dir: dir.path().to_owned(),
        };
        assert_matches!(loader.run(&dir.path().join("absent.bin")).await, Err(_));
    }
}
