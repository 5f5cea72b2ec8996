//! Lifecycle of a locally launched ComfyUI server.
//!
//! [`EngineHandle`] owns at most one child process. Whether the engine is
//! up is never cached: [`EngineHandle::probe`] asks the engine each time.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, Command};

use crate::engine::ImageEngine;

/// How long [`EngineHandle::start`] waits for the engine to answer.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between start-up probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// How long [`EngineHandle::stop`] waits for the child to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Entry script expected in the engine directory.
const ENGINE_ENTRY_POINT: &str = "main.py";

/// Where and how to launch the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Directory containing the engine's `main.py`.
    pub install_dir: PathBuf,
    /// Python interpreter used to run it.
    pub python: String,
    pub startup_timeout: Duration,
    pub probe_interval: Duration,
}

impl EngineSettings {
    pub fn new(install_dir: impl Into<PathBuf>, python: impl Into<String>) -> Self {
        Self {
            install_dir: install_dir.into(),
            python: python.into(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

/// Observed state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// The engine answers health probes.
    Running,
    /// A child was launched but the engine does not answer yet.
    Starting,
    /// Nothing answers and no launched child is alive.
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineProcessError {
    #[error("Engine entry point not found: {0}")]
    MissingEntryPoint(PathBuf),

    #[error("Failed to launch engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to stop engine: {0}")]
    Kill(#[source] std::io::Error),

    #[error("Engine did not exit within {}s", STOP_TIMEOUT.as_secs())]
    StopTimeout,

    /// There is no child process launched by this handle.
    #[error("No engine process is owned by this handle")]
    NotOwned,
}

/// Handle to the engine process, probed through an [`ImageEngine`].
pub struct EngineHandle<E> {
    engine: E,
    child: Option<Child>,
}

impl<E: ImageEngine> EngineHandle<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            child: None,
        }
    }

    /// Whether this handle launched a child that has not been stopped.
    pub fn owns_process(&self) -> bool {
        self.child.is_some()
    }

    /// Ask the engine whether it is up.
    pub async fn probe(&mut self) -> EngineStatus {
        if self.engine.health_check().await.is_ok() {
            return EngineStatus::Running;
        }
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => EngineStatus::Starting,
            Some(Ok(Some(status))) => {
                tracing::warn!(%status, "Engine process exited");
                self.child = None;
                EngineStatus::Stopped
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Could not query engine process");
                EngineStatus::Starting
            }
            None => EngineStatus::Stopped,
        }
    }

    /// Launch the engine unless it already answers.
    ///
    /// Probes every `probe_interval` until the engine answers or
    /// `startup_timeout` passes. Returns [`EngineStatus::Starting`] when
    /// the child is alive but still silent at the end of the wait.
    pub async fn start(&mut self, settings: &EngineSettings) -> Result<EngineStatus, EngineProcessError> {
        if self.engine.health_check().await.is_ok() {
            tracing::info!("Engine already running");
            return Ok(EngineStatus::Running);
        }
        if self.child.is_none() {
            self.spawn(settings)?;
        }

        let deadline = tokio::time::Instant::now() + settings.startup_timeout;
        loop {
            match self.probe().await {
                EngineStatus::Running => {
                    tracing::info!("Engine is answering");
                    return Ok(EngineStatus::Running);
                }
                EngineStatus::Stopped => {
                    return Err(EngineProcessError::Spawn(std::io::Error::other(
                        "engine process exited during start-up",
                    )));
                }
                EngineStatus::Starting => {}
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    timeout_secs = settings.startup_timeout.as_secs(),
                    "Engine launched but not answering yet",
                );
                return Ok(EngineStatus::Starting);
            }
            tokio::time::sleep(settings.probe_interval).await;
        }
    }

    /// Kill the owned child and wait for it to exit.
    pub async fn stop(&mut self) -> Result<(), EngineProcessError> {
        let mut child = self.child.take().ok_or(EngineProcessError::NotOwned)?;

        child.start_kill().map_err(EngineProcessError::Kill)?;
        match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(%status, "Engine stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(EngineProcessError::Kill(e)),
            Err(_elapsed) => Err(EngineProcessError::StopTimeout),
        }
    }

    fn spawn(&mut self, settings: &EngineSettings) -> Result<(), EngineProcessError> {
        let entry = settings.install_dir.join(ENGINE_ENTRY_POINT);
        if !entry.is_file() {
            return Err(EngineProcessError::MissingEntryPoint(entry));
        }

        tracing::info!(
            python = %settings.python,
            dir = %settings.install_dir.display(),
            "Launching engine",
        );
        let child = Command::new(&settings.python)
            .arg(ENGINE_ENTRY_POINT)
            .current_dir(&settings.install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(EngineProcessError::Spawn)?;

        self.child = Some(child);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
