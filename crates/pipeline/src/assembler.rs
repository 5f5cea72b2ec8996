//! Assembly of a full strip from per-panel generations.
//!
//! Panels may complete in any order; results land in index-addressed
//! slots so the strip is always ordered by panel number. A failed panel
//! stays in the strip as [`PanelOutcome::Failed`].

use futures::stream::{self, StreamExt};
use serde::Serialize;

use comiccraft_comfyui::api::ComfyUIApiError;
use comiccraft_comfyui::engine::ImageEngine;
use comiccraft_comfyui::events::{EventBus, GenerationEvent};
use comiccraft_comfyui::job::ImageAsset;
use comiccraft_core::error::CoreError;
use comiccraft_core::generation::GenerationConfig;
use comiccraft_core::roles::classification_warnings;
use comiccraft_core::script::{ComicScript, Panel};
use comiccraft_core::workflow::{WorkflowError, WorkflowGraph};

use crate::panel::PanelGenerator;
use crate::writer::{ScriptWriter, WriterError};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Image for one panel, or the marker left by a failed generation.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelOutcome {
    Image(ImageAsset),
    Failed,
}

impl PanelOutcome {
    pub fn image(&self) -> Option<&ImageAsset> {
        match self {
            Self::Image(image) => Some(image),
            Self::Failed => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// One entry of the strip.
#[derive(Debug, Clone)]
pub struct ComicPanel {
    pub panel: Panel,
    pub outcome: PanelOutcome,
}

/// Overall verdict for a strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StripStatus {
    /// Every panel has an image.
    Complete,
    /// Some panels have images; `failed` lists the panel numbers without.
    Partial { failed: Vec<u32> },
    /// No panel has an image.
    Failed,
}

/// Panels in order, each with its outcome.
#[derive(Debug, Clone)]
pub struct ComicResult {
    pub panels: Vec<ComicPanel>,
    pub status: StripStatus,
    /// Base seed actually used, after resolving a random one.
    pub base_seed: u64,
}

impl ComicResult {
    fn new(panels: Vec<ComicPanel>, base_seed: u64) -> Self {
        let failed: Vec<u32> = panels
            .iter()
            .filter(|p| p.outcome.is_failed())
            .map(|p| p.panel.number)
            .collect();

        let status = if failed.is_empty() {
            StripStatus::Complete
        } else if failed.len() == panels.len() {
            StripStatus::Failed
        } else {
            StripStatus::Partial { failed }
        };

        Self {
            panels,
            status,
            base_seed,
        }
    }

    pub fn images_generated(&self) -> usize {
        self.panels.iter().filter(|p| !p.outcome.is_failed()).count()
    }
}

/// A script and the strip drawn from it.
#[derive(Debug, Clone)]
pub struct ComicStrip {
    pub topic: String,
    pub script: ComicScript,
    pub result: ComicResult,
}

/// Conditions that stop a strip before any panel is attempted.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("Invalid generation settings: {0}")]
    InvalidConfig(#[from] CoreError),

    #[error("Invalid workflow template: {0}")]
    InvalidTemplate(#[from] WorkflowError),

    #[error("Image engine is not reachable: {0}")]
    EngineUnreachable(#[source] ComfyUIApiError),

    #[error("Script generation failed: {0}")]
    Writer(#[from] WriterError),

    #[error("No panels to generate")]
    NoPanels,
}

// ---------------------------------------------------------------------------
// ComicAssembler
// ---------------------------------------------------------------------------

/// Runs [`PanelGenerator`] for every panel of a strip.
pub struct ComicAssembler<E> {
    generator: PanelGenerator<E>,
    parallelism: usize,
    events: Option<EventBus>,
}

impl<E: ImageEngine> ComicAssembler<E> {
    /// `parallelism` is clamped to at least 1; 1 means sequential.
    pub fn new(generator: PanelGenerator<E>, parallelism: usize) -> Self {
        Self {
            generator,
            parallelism: parallelism.max(1),
            events: None,
        }
    }

    /// Publish assembly events on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn generator(&self) -> &PanelGenerator<E> {
        &self.generator
    }

    /// Generate an image for each panel.
    ///
    /// Fails as a whole only when nothing could be attempted: bad
    /// settings, a broken template, or an engine that does not answer.
    /// Per-panel failures become [`PanelOutcome::Failed`] entries.
    pub async fn assemble(
        &self,
        panels: &[Panel],
        template: &WorkflowGraph,
        config: &GenerationConfig,
    ) -> Result<ComicResult, AssemblyError> {
        if panels.is_empty() {
            return Err(AssemblyError::NoPanels);
        }
        config.validate()?;
        template.validate()?;
        self.report_classification(template);

        self.generator
            .client()
            .engine()
            .health_check()
            .await
            .map_err(AssemblyError::EngineUnreachable)?;

        let config = config.clone().resolve_seed();
        tracing::info!(
            panels = panels.len(),
            parallelism = self.parallelism,
            base_seed = config.base_seed,
            "Assembling comic strip",
        );

        let mut slots: Vec<Option<ImageAsset>> = vec![None; panels.len()];
        let config = &config;
        let mut finished = stream::iter(panels.iter().enumerate())
            .map(|(index, panel)| async move {
                (index, self.generator.generate(panel, template, config).await)
            })
            .buffer_unordered(self.parallelism);

        while let Some((index, image)) = finished.next().await {
            slots[index] = image;
        }

        let entries = panels
            .iter()
            .cloned()
            .zip(slots)
            .map(|(panel, image)| ComicPanel {
                panel,
                outcome: image.map_or(PanelOutcome::Failed, PanelOutcome::Image),
            })
            .collect();

        let result = ComicResult::new(entries, config.base_seed);
        match &result.status {
            StripStatus::Complete => tracing::info!("Comic strip complete"),
            StripStatus::Partial { failed } => {
                tracing::warn!(?failed, "Comic strip is missing panels");
            }
            StripStatus::Failed => tracing::error!("No panel could be generated"),
        }
        Ok(result)
    }

    /// Write a script for `topic`, parse it and assemble the strip.
    pub async fn create_strip<W: ScriptWriter>(
        &self,
        writer: &W,
        topic: &str,
        template: &WorkflowGraph,
        config: &GenerationConfig,
    ) -> Result<ComicStrip, AssemblyError> {
        let script = writer.write_script(topic).await?;
        let panels = script.panels();
        let result = self.assemble(&panels, template, config).await?;
        Ok(ComicStrip {
            topic: topic.trim().to_string(),
            script,
            result,
        })
    }

    fn report_classification(&self, template: &WorkflowGraph) {
        for warning in classification_warnings(template) {
            tracing::warn!(
                node_id = ?warning.node_id,
                message = %warning.message,
                "Prompt encoder role may be misclassified",
            );
            if let Some(bus) = &self.events {
                bus.publish(GenerationEvent::ClassificationWarning {
                    node_id: warning.node_id,
                    message: warning.message,
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
