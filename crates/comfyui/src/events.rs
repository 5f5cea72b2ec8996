//! Progress events emitted while a strip is generated.
//!
//! Events are advisory: they let a presentation layer follow along but
//! never influence control flow. They travel over an [`EventBus`] backed
//! by a `tokio::sync::broadcast` channel.

use serde::Serialize;
use tokio::sync::broadcast;

/// Something observable happened to a job or a panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// The engine accepted a workflow and issued a prompt id.
    JobSubmitted { prompt_id: String },

    /// A poll reported progress as a fraction in `[0, 1]`.
    JobProgress { prompt_id: String, progress: f32 },

    /// The job finished and `images` outputs were downloaded.
    JobCompleted { prompt_id: String, images: usize },

    /// The engine reported an execution error.
    JobFailed { prompt_id: String, error: String },

    /// The deadline passed before the job finished.
    JobTimedOut { prompt_id: String, elapsed_ms: u64 },

    /// Generation of a panel started.
    PanelStarted { panel: u32 },

    /// Generation of a panel ended, with or without an image.
    PanelFinished { panel: u32, success: bool },

    /// The template's encoder roles may have been guessed wrong.
    ClassificationWarning {
        node_id: Option<String>,
        message: String,
    },
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out channel for [`GenerationEvent`]s.
///
/// Cloning shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GenerationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// Slow receivers observe `RecvError::Lagged` once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: GenerationEvent) {
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
