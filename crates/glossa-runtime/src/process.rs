//! Worker process ownership.
//!
//! The channel owns a handle to its worker process but not the spawning
//! policy: hosts provide a [`WorkerLauncher`] and the channel calls it
//! exactly once per lifetime. [`ProcessLauncher`] is the default policy,
//! spawning the configured executable with the endpoint and worker id in
//! its environment.
//!
//! Disposal cascades to the handle so no orphan processes remain; the
//! spawned child is also killed on drop as a backstop.

use crate::error::LaunchError;
use async_trait::async_trait;
use glossa_types::{WorkerConfig, WorkerId};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// Environment variable carrying the worker's id.
pub const ENV_WORKER_ID: &str = "GLOSSA_WORKER_ID";

/// Environment variable carrying the endpoint the worker must serve.
pub const ENV_WORKER_ENDPOINT: &str = "GLOSSA_WORKER_ENDPOINT";

/// Spawning policy for worker processes.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Launches the worker for `worker_id` rooted at `script_root`.
    ///
    /// # Errors
    ///
    /// Fails when the process cannot be started.
    async fn launch(
        &self,
        worker_id: &WorkerId,
        config: &WorkerConfig,
        script_root: &Path,
    ) -> Result<WorkerHandle, LaunchError>;
}

/// Handle to a running worker process.
///
/// A handle without a child is used when the worker is managed
/// externally (tests, attach-to-running scenarios).
#[derive(Debug)]
pub struct WorkerHandle {
    child: Option<tokio::process::Child>,
}

impl WorkerHandle {
    /// Wraps a spawned child process.
    #[must_use]
    pub fn from_child(child: tokio::process::Child) -> Self {
        Self { child: Some(child) }
    }

    /// A handle with no owned process.
    #[must_use]
    pub fn detached() -> Self {
        Self { child: None }
    }

    /// Returns the OS process id, when a process is owned and running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(tokio::process::Child::id)
    }

    /// Kills the owned process, if any.
    pub async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(error) = child.kill().await {
                warn!(error = %error, "worker process kill failed");
            }
        }
    }
}

/// Default launcher: spawn an executable per worker.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Creates a launcher for `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends fixed arguments passed on every launch.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        worker_id: &WorkerId,
        config: &WorkerConfig,
        script_root: &Path,
    ) -> Result<WorkerHandle, LaunchError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(ENV_WORKER_ID, worker_id.as_str())
            .env(ENV_WORKER_ENDPOINT, config.endpoint().to_string())
            .current_dir(script_root)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if let Some(stderr) = child.stderr.take() {
            let id = worker_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(worker_id = %id, stderr = %line, "worker stderr");
                }
            });
        }

        info!(
            worker_id = %worker_id,
            language = config.language(),
            pid = child.id(),
            "worker process launched"
        );

        Ok(WorkerHandle::from_child(child))
    }
}
