//! Role classification for workflow nodes.
//!
//! Templates are mutated by role, never by node id, because ids are
//! chosen by whoever authored the template. Most roles follow directly
//! from the node's class type. Positive and negative text encoders share
//! a class type, so they are told apart by a heuristic:
//!
//! 1. an id or editor title containing "neg" marks a negative encoder;
//! 2. otherwise, existing text containing [`NEGATIVE_MARKER`] marks one;
//! 3. anything else is positive.
//!
//! This is best-effort. Custom templates that phrase their negative
//! prompt differently are misclassified. [`classification_warnings`]
//! cross-checks the heuristic against the sampler's `positive` and
//! `negative` edges so that callers can surface disagreements.

use serde::Serialize;

use crate::workflow::{WorkflowGraph, WorkflowNode};

// ---------------------------------------------------------------------------
// Class type aliases
// ---------------------------------------------------------------------------

/// Checkpoint loader class types (API names and display names).
pub const CHECKPOINT_LOADER_CLASSES: &[&str] =
    &["CheckpointLoaderSimple", "CheckpointLoader", "Load Checkpoint"];

/// Latent image sizer class types.
pub const LATENT_IMAGE_CLASSES: &[&str] =
    &["EmptyLatentImage", "Empty Latent Image", "EmptySD3LatentImage"];

/// Sampler class types.
pub const SAMPLER_CLASSES: &[&str] = &["KSampler", "KSamplerAdvanced"];

/// Text encoders whose role needs the positive/negative heuristic.
pub const CLIP_TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";

/// Text encoders that only ever carry the positive prompt.
pub const POSITIVE_ONLY_ENCODER_CLASSES: &[&str] = &["T5TextEncode"];

/// Latent decoder class types.
pub const DECODER_CLASSES: &[&str] = &["VAEDecode"];

/// Image saver class types.
pub const IMAGE_SAVER_CLASSES: &[&str] = &["SaveImage", "Save Image"];

/// Image loader class types.
pub const IMAGE_LOADER_CLASSES: &[&str] = &["LoadImage", "Load Image"];

/// Substring of existing encoder text that marks a negative prompt.
pub const NEGATIVE_MARKER: &str = "ugly";

/// Substring of an id or title that marks a negative encoder.
const NEGATIVE_NAME_MARKER: &str = "neg";

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// The part a node plays in a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    CheckpointLoader,
    PositiveTextEncoder,
    NegativeTextEncoder,
    LatentImage,
    Sampler,
    Decoder,
    ImageSaver,
    ImageLoader,
    Other,
}

/// What a classification was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationBasis {
    /// The class type alone determines the role.
    ClassType,
    /// The node id or editor title mentions a negative prompt.
    Naming,
    /// The existing prompt text contains [`NEGATIVE_MARKER`].
    Content,
    /// A text encoder with no negative signal, assumed positive.
    Default,
}

/// Role assigned to a single node and the evidence used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoleClassification {
    pub role: NodeRole,
    pub basis: ClassificationBasis,
}

/// A place where the heuristic may have guessed wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleWarning {
    /// Offending node, or `None` for graph-wide warnings.
    pub node_id: Option<String>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Public functions
// ---------------------------------------------------------------------------

/// Classify one node.
pub fn classify_node(node_id: &str, node: &WorkflowNode) -> RoleClassification {
    let class = node.class_type.as_str();
    let by_class = |role| RoleClassification {
        role,
        basis: ClassificationBasis::ClassType,
    };

    if CHECKPOINT_LOADER_CLASSES.contains(&class) {
        by_class(NodeRole::CheckpointLoader)
    } else if LATENT_IMAGE_CLASSES.contains(&class) {
        by_class(NodeRole::LatentImage)
    } else if SAMPLER_CLASSES.contains(&class) {
        by_class(NodeRole::Sampler)
    } else if POSITIVE_ONLY_ENCODER_CLASSES.contains(&class) {
        by_class(NodeRole::PositiveTextEncoder)
    } else if DECODER_CLASSES.contains(&class) {
        by_class(NodeRole::Decoder)
    } else if IMAGE_SAVER_CLASSES.contains(&class) {
        by_class(NodeRole::ImageSaver)
    } else if IMAGE_LOADER_CLASSES.contains(&class) {
        by_class(NodeRole::ImageLoader)
    } else if class == CLIP_TEXT_ENCODE_CLASS {
        classify_text_encoder(node_id, node)
    } else {
        by_class(NodeRole::Other)
    }
}

/// Cross-check text-encoder classification against sampler wiring.
///
/// Returns one warning per encoder whose heuristic role contradicts the
/// sampler input it feeds, and a graph-wide warning when no positive
/// encoder exists (the panel prompt would then never reach the engine).
pub fn classification_warnings(graph: &WorkflowGraph) -> Vec<RoleWarning> {
    let mut warnings = Vec::new();

    for (sampler_id, sampler) in graph.nodes() {
        if !SAMPLER_CLASSES.contains(&sampler.class_type.as_str()) {
            continue;
        }
        for (input, expected) in [
            ("positive", NodeRole::PositiveTextEncoder),
            ("negative", NodeRole::NegativeTextEncoder),
        ] {
            let Some(link) = sampler.inputs.get(input) else {
                continue;
            };
            let Some(source) = graph.node(&link.node_id) else {
                continue;
            };
            if source.class_type != CLIP_TEXT_ENCODE_CLASS {
                continue;
            }
            let found = classify_node(&link.node_id, source);
            if found.role != expected {
                warnings.push(RoleWarning {
                    node_id: Some(link.node_id.clone()),
                    message: format!(
                        "Node '{}' feeds the '{input}' input of sampler '{sampler_id}' \
                         but was classified as {:?} ({:?} heuristic)",
                        link.node_id, found.role, found.basis,
                    ),
                });
            }
        }
    }

    let has_positive = graph
        .nodes()
        .any(|(id, node)| classify_node(id, node).role == NodeRole::PositiveTextEncoder);
    if !has_positive {
        warnings.push(RoleWarning {
            node_id: None,
            message: "No positive text encoder found; panel prompts will not be applied"
                .to_string(),
        });
    }

    warnings
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn classify_text_encoder(node_id: &str, node: &WorkflowNode) -> RoleClassification {
    let named_negative = node_id.to_lowercase().contains(NEGATIVE_NAME_MARKER)
        || node
            .title()
            .is_some_and(|t| t.to_lowercase().contains(NEGATIVE_NAME_MARKER));

    if named_negative {
        RoleClassification {
            role: NodeRole::NegativeTextEncoder,
            basis: ClassificationBasis::Naming,
        }
    } else if node.text().to_lowercase().contains(NEGATIVE_MARKER) {
        RoleClassification {
            role: NodeRole::NegativeTextEncoder,
            basis: ClassificationBasis::Content,
        }
    } else {
        RoleClassification {
            role: NodeRole::PositiveTextEncoder,
            basis: ClassificationBasis::Default,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
