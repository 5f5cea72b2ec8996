//! Job submission and the completion state machine.
//!
//! A [`GenerationJob`] moves `Queued -> Running -> Complete | Failed |
//! TimedOut`, driven purely by history polls. The job deadline is the
//! only circuit breaker: transient poll errors are retried with backoff
//! for as long as the deadline allows.

use std::path::Path;

use chrono::{DateTime, Utc};
use comiccraft_core::workflow::{WorkflowError, WorkflowGraph};
use serde::Serialize;
use tokio::time::Instant;

use crate::api::ComfyUIApiError;
use crate::backoff::PollSettings;
use crate::engine::ImageEngine;
use crate::events::{EventBus, GenerationEvent};
use crate::history::{interpret_history, HistoryState, ImageReference};

// ---------------------------------------------------------------------------
// Job types
// ---------------------------------------------------------------------------

/// Lifecycle state of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::TimedOut)
    }
}

/// A job accepted by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationJob {
    /// Opaque prompt id issued by the engine.
    pub job_id: String,
    pub submitted_at: DateTime<Utc>,
    pub status: JobStatus,
    /// Last reported progress, `0.0..=1.0`.
    pub progress: f32,
    /// Queue position reported at submission, if any.
    pub queue_position: Option<i64>,
}

/// A downloaded output image.
#[derive(Clone, PartialEq)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub subfolder: String,
    /// Engine storage bucket (`output`, `temp`).
    pub image_type: String,
    pub mime_type: String,
}

impl std::fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAsset")
            .field("filename", &self.filename)
            .field("subfolder", &self.subfolder)
            .field("image_type", &self.image_type)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl ImageAsset {
    fn new(reference: ImageReference, bytes: Vec<u8>) -> Self {
        let mime_type = mime_type_for(&reference.filename).to_string();
        Self {
            bytes,
            filename: reference.filename,
            subfolder: reference.subfolder,
            image_type: reference.image_type,
            mime_type,
        }
    }
}

/// MIME type guessed from a file extension.
pub fn mime_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a workflow never became a job.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// The graph failed validation; nothing was sent.
    #[error("Workflow failed validation: {0}")]
    InvalidGraph(#[from] WorkflowError),

    /// The engine could not be reached.
    #[error("Image engine unreachable: {0}")]
    Unreachable(#[source] ComfyUIApiError),

    /// The engine answered but refused the workflow.
    #[error("Image engine rejected the workflow: {0}")]
    Rejected(String),
}

/// Why a submitted job produced no usable result.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Job {prompt_id} failed: {message}")]
    ExecutionFailed { prompt_id: String, message: String },

    /// `partial` holds any images downloaded before the deadline.
    #[error("Job {prompt_id} timed out after {elapsed_ms}ms")]
    TimedOut {
        prompt_id: String,
        elapsed_ms: u64,
        partial: Vec<ImageAsset>,
    },
}

// ---------------------------------------------------------------------------
// JobClient
// ---------------------------------------------------------------------------

/// Submits workflows to an [`ImageEngine`] and tracks them to completion.
///
/// The client id is generated once per client and sent with every
/// submission, so one `JobClient` should be shared for the whole process.
pub struct JobClient<E> {
    engine: E,
    client_id: String,
    events: Option<EventBus>,
}

impl<E: ImageEngine> JobClient<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            client_id: uuid::Uuid::new_v4().to_string(),
            events: None,
        }
    }

    /// Publish job events on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Validate `graph` and queue it on the engine.
    ///
    /// An invalid graph fails before any request is made.
    pub async fn submit(&self, graph: &WorkflowGraph) -> Result<GenerationJob, SubmissionError> {
        graph.validate()?;

        let response = self
            .engine
            .submit(&graph.to_json(), &self.client_id)
            .await
            .map_err(|e| match e {
                ComfyUIApiError::Request(err) => {
                    SubmissionError::Unreachable(ComfyUIApiError::Request(err))
                }
                ComfyUIApiError::ApiError { status, body } => {
                    SubmissionError::Rejected(format!("HTTP {status}: {body}"))
                }
                ComfyUIApiError::UnexpectedResponse(msg) => SubmissionError::Rejected(msg),
            })?;

        if let Some(reason) = response.rejection() {
            return Err(SubmissionError::Rejected(reason));
        }
        let job_id = response
            .prompt_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SubmissionError::Rejected("response carried no prompt_id".to_string()))?;

        tracing::info!(prompt_id = %job_id, queue_position = ?response.number, "Workflow queued");
        self.publish(GenerationEvent::JobSubmitted {
            prompt_id: job_id.clone(),
        });

        Ok(GenerationJob {
            job_id,
            submitted_at: Utc::now(),
            status: JobStatus::Queued,
            progress: 0.0,
            queue_position: response.number,
        })
    }

    /// Poll until the job completes, fails, or runs out of time.
    ///
    /// On completion every listed image is downloaded; images that fail
    /// to download are skipped. Returns no later than `settings.timeout`
    /// plus scheduling slack.
    pub async fn await_completion(
        &self,
        job: &mut GenerationJob,
        settings: &PollSettings,
    ) -> Result<Vec<ImageAsset>, GenerationError> {
        let start = Instant::now();
        let deadline = start + settings.timeout;
        let mut failures = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.time_out(job, start, Vec::new()));
            }

            let polled = match tokio::time::timeout(remaining, self.engine.history(&job.job_id)).await
            {
                Ok(result) => result,
                Err(_elapsed) => return Err(self.time_out(job, start, Vec::new())),
            };

            match polled.and_then(|body| interpret_history(&job.job_id, &body)) {
                Ok(HistoryState::Pending) => {
                    failures = 0;
                    tracing::debug!(prompt_id = %job.job_id, "Job not started yet");
                }
                Ok(HistoryState::Running { progress }) => {
                    failures = 0;
                    job.status = JobStatus::Running;
                    if let Some(progress) = progress {
                        job.progress = progress;
                        tracing::debug!(prompt_id = %job.job_id, progress, "Job progress");
                        self.publish(GenerationEvent::JobProgress {
                            prompt_id: job.job_id.clone(),
                            progress,
                        });
                    }
                }
                Ok(HistoryState::Complete(images)) => {
                    return self.download(job, images, start, deadline).await;
                }
                Ok(HistoryState::Failed(message)) => {
                    job.status = JobStatus::Failed;
                    tracing::warn!(prompt_id = %job.job_id, error = %message, "Job failed on engine");
                    self.publish(GenerationEvent::JobFailed {
                        prompt_id: job.job_id.clone(),
                        error: message.clone(),
                    });
                    return Err(GenerationError::ExecutionFailed {
                        prompt_id: job.job_id.clone(),
                        message,
                    });
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        prompt_id = %job.job_id,
                        error = %e,
                        failures,
                        "Transient error while polling job",
                    );
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(settings.delay_within(failures, remaining)).await;
        }
    }

    // ---- private helpers ----

    async fn download(
        &self,
        job: &mut GenerationJob,
        images: Vec<ImageReference>,
        start: Instant,
        deadline: Instant,
    ) -> Result<Vec<ImageAsset>, GenerationError> {
        let listed = images.len();
        let mut assets = Vec::with_capacity(listed);

        for image in images {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.time_out(job, start, assets));
            }
            match tokio::time::timeout(remaining, self.engine.fetch_image(&image)).await {
                Ok(Ok(bytes)) => assets.push(ImageAsset::new(image, bytes)),
                Ok(Err(e)) => {
                    tracing::warn!(
                        prompt_id = %job.job_id,
                        filename = %image.filename,
                        error = %e,
                        "Skipping image that failed to download",
                    );
                }
                Err(_elapsed) => return Err(self.time_out(job, start, assets)),
            }
        }

        job.status = JobStatus::Complete;
        job.progress = 1.0;
        tracing::info!(
            prompt_id = %job.job_id,
            listed,
            downloaded = assets.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Job complete",
        );
        self.publish(GenerationEvent::JobCompleted {
            prompt_id: job.job_id.clone(),
            images: assets.len(),
        });
        Ok(assets)
    }

    fn time_out(
        &self,
        job: &mut GenerationJob,
        start: Instant,
        partial: Vec<ImageAsset>,
    ) -> GenerationError {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        job.status = JobStatus::TimedOut;
        tracing::warn!(
            prompt_id = %job.job_id,
            elapsed_ms,
            partial = partial.len(),
            "Job timed out",
        );
        self.publish(GenerationEvent::JobTimedOut {
            prompt_id: job.job_id.clone(),
            elapsed_ms,
        });
        GenerationError::TimedOut {
            prompt_id: job.job_id.clone(),
            elapsed_ms,
            partial,
        }
    }

    fn publish(&self, event: GenerationEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
