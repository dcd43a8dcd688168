//! The build step. The worker treats it as a black box: a build configuration and a log path
//! in, a verdict out.

use anyhow::{Context as _, Result};
use conveyor_base::Verdict;
use std::{
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{fs::File, process::Command};

pub trait BuildTool: Send + Sync + 'static {
    /// Build the project described by `config`, writing everything the build prints to
    /// `log_file`. An `Err` means the tool couldn't be run at all.
    fn build(
        &self,
        config: &Path,
        log_file: &Path,
    ) -> impl Future<Output = Result<Verdict>> + Send;
}

/// Runs `program [args...] <config>` in the storage directory. Exit status zero is a success.
pub struct CommandBuildTool {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl BuildTool for CommandBuildTool {
    async fn build(&self, config: &Path, log_file: &Path) -> Result<Verdict> {
        let stdout = File::create(log_file)
            .await
            .with_context(|| format!("creating {}", log_file.display()))?
            .into_std()
            .await;
        let stderr = stdout
            .try_clone()
            .with_context(|| format!("duplicating {}", log_file.display()))?;
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(config)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .await
            .with_context(|| format!("running {}", self.program.display()))?;
        Ok(Verdict::from_success(status.success()))
    }
}
