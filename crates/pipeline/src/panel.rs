//! Generation of a single panel image.

use comiccraft_comfyui::backoff::PollSettings;
use comiccraft_comfyui::engine::ImageEngine;
use comiccraft_comfyui::events::{EventBus, GenerationEvent};
use comiccraft_comfyui::job::{GenerationError, ImageAsset, JobClient, SubmissionError};
use comiccraft_core::generation::{prepare_panel_workflow, GenerationConfig};
use comiccraft_core::script::Panel;
use comiccraft_core::workflow::WorkflowGraph;

/// Why a panel produced no image. Never leaves this module as an error;
/// it is logged and turned into a missing image.
#[derive(Debug, thiserror::Error)]
enum PanelError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Job finished without any images")]
    NoImages,
}

/// Turns one [`Panel`] into at most one image.
pub struct PanelGenerator<E> {
    client: JobClient<E>,
    poll: PollSettings,
    events: Option<EventBus>,
}

impl<E: ImageEngine> PanelGenerator<E> {
    pub fn new(client: JobClient<E>, poll: PollSettings) -> Self {
        Self {
            client,
            poll,
            events: None,
        }
    }

    /// Publish panel events on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn client(&self) -> &JobClient<E> {
        &self.client
    }

    /// Generate the image for `panel` from a private copy of `template`.
    ///
    /// Only the first image of the job is used. Every failure is logged
    /// and reported as `None`, so one panel can never stop the others.
    pub async fn generate(
        &self,
        panel: &Panel,
        template: &WorkflowGraph,
        config: &GenerationConfig,
    ) -> Option<ImageAsset> {
        self.publish(GenerationEvent::PanelStarted {
            panel: panel.number,
        });
        let graph = prepare_panel_workflow(template, config, panel);

        let image = match self.run(&graph).await {
            Ok(image) => {
                tracing::info!(panel = panel.number, filename = %image.filename, "Panel generated");
                Some(image)
            }
            Err(e) => {
                tracing::warn!(panel = panel.number, error = %e, "Panel generation failed");
                None
            }
        };

        self.publish(GenerationEvent::PanelFinished {
            panel: panel.number,
            success: image.is_some(),
        });
        image
    }

    async fn run(&self, graph: &WorkflowGraph) -> Result<ImageAsset, PanelError> {
        let mut job = self.client.submit(graph).await?;
        let images = match self.client.await_completion(&mut job, &self.poll).await {
            Ok(images) => images,
            // Keep whatever made it down before the deadline.
            Err(GenerationError::TimedOut { partial, .. }) if !partial.is_empty() => partial,
            Err(e) => return Err(e.into()),
        };
        images.into_iter().next().ok_or(PanelError::NoImages)
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
