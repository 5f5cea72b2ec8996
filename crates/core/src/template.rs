//! Built-in workflow template used when no custom one is supplied.
//!
//! A text-to-image graph for Flux-style checkpoints that expose both a
//! CLIP-L and a T5 text encoder.

use serde_json::json;

use crate::workflow::WorkflowGraph;

/// Checkpoint referenced by the built-in template.
pub const DEFAULT_MODEL: &str = "flux1-dev-Q4_0.gguf";

/// Negative prompt baked into the built-in template.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "ugly, bad quality, blurry, distorted";

/// The built-in template in the engine's API format.
pub fn default_template_json() -> serde_json::Value {
    json!({
        "1": {
            "class_type": "Load Checkpoint",
            "inputs": { "ckpt_name": DEFAULT_MODEL }
        },
        "2": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": "A beautiful landscape", "clip": ["1", 1] }
        },
        "3": {
            "class_type": "T5TextEncode",
            "inputs": { "text": "A beautiful landscape", "t5": ["1", 3] }
        },
        "4": {
            "class_type": "Empty Latent Image",
            "inputs": { "width": 768, "height": 768, "batch_size": 1 }
        },
        "5": {
            "class_type": "KSampler",
            "inputs": {
                "model": ["1", 0],
                "positive": ["2", 0],
                "negative": ["7", 0],
                "latent_image": ["4", 0],
                "seed": 0,
                "steps": 30,
                "cfg": 7.5,
                "sampler_name": "euler_a",
                "scheduler": "normal",
                "denoise": 1.0
            }
        },
        "6": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["5", 0], "vae": ["1", 2] }
        },
        "7": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": DEFAULT_NEGATIVE_PROMPT, "clip": ["1", 1] }
        },
        "8": {
            "class_type": "Save Image",
            "inputs": { "filename_prefix": "flux1_", "images": ["6", 0] }
        }
    })
}

/// The built-in template as a graph.
pub fn default_template() -> WorkflowGraph {
    WorkflowGraph::from_json(&default_template_json()).expect("built-in template is well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::{classification_warnings, NodeRole};

    #[test]
    fn default_template_parses_and_validates() {
        let graph = default_template();
        assert_eq!(graph.len(), 8);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn default_template_roles_are_unambiguous() {
        let graph = default_template();
        assert_eq!(
            graph.find_nodes_by_kind(NodeRole::PositiveTextEncoder),
            vec!["2", "3"]
        );
        assert_eq!(graph.find_nodes_by_kind(NodeRole::NegativeTextEncoder), vec!["7"]);
        assert!(classification_warnings(&graph).is_empty());
    }
}
