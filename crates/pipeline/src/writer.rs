//! Text-generation service that writes the comic script.
//!
//! [`ScriptWriter`] is the text-in/text-out seam; [`OllamaWriter`] runs a
//! local model through the `ollama` CLI, passing the instruction on stdin.

use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};

use comiccraft_core::script::ComicScript;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Maximum stdout or stderr size captured per stream (1 MiB).
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Default wall-clock limit for one script.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Reported when the service fails without saying why.
const UNKNOWN_ERROR: &str = "Unknown error occurred.";

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("Failed to run text service: {0}")]
    Io(#[from] std::io::Error),

    #[error("Text service timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Text service failed with exit code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    #[error("Text service returned no script")]
    EmptyOutput,
}

/// Produces a raw comic script for a topic.
pub trait ScriptWriter: Send + Sync {
    fn write_script(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<ComicScript, WriterError>> + Send;
}

/// Instruction sent to the text model for `topic`.
pub fn comic_prompt(topic: &str) -> String {
    format!(
        "Generate a 4-panel comic strip script about: {topic}. \
         Please format it as 'Panel 1: [description of visual scene] - \
         [character dialogue/text]', and so on for all 4 panels. \
         Make each panel concise and visual."
    )
}

/// Runs `<program> run <model>` and reads the script from stdout.
#[derive(Debug, Clone)]
pub struct OllamaWriter {
    program: String,
    model: String,
    timeout: Duration,
}

impl OllamaWriter {
    pub fn new(program: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            model: model.into(),
            timeout: DEFAULT_SCRIPT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ScriptWriter for OllamaWriter {
    async fn write_script(&self, topic: &str) -> Result<ComicScript, WriterError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(WriterError::EmptyTopic);
        }

        tracing::info!(model = %self.model, topic, "Requesting comic script");
        let start = Instant::now();

        // `kill_on_drop(true)` kills the model process if the timeout fires.
        let mut child = Command::new(&self.program)
            .arg("run")
            .arg(&self.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Feed stdin from its own task so a service that stops reading
        // cannot stall us past the timeout. Write errors surface through
        // the exit status.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = comic_prompt(topic);
            tokio::spawn(async move {
                let _ = stdin.write_all(prompt.as_bytes()).await;
            });
        }

        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_elapsed) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                tracing::warn!(model = %self.model, elapsed_ms, "Text service timed out");
                return Err(WriterError::Timeout { elapsed_ms });
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        if !status.success() {
            let stderr = match stderr.trim() {
                "" => UNKNOWN_ERROR.to_string(),
                text => text.to_string(),
            };
            return Err(WriterError::Failed {
                exit_code: status.code().unwrap_or(-1),
                stderr,
            });
        }

        let script = stdout.trim();
        if script.is_empty() {
            return Err(WriterError::EmptyOutput);
        }

        tracing::info!(
            model = %self.model,
            chars = script.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Comic script received",
        );
        Ok(ComicScript::new(script))
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
