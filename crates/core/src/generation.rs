//! Generation settings and the per-panel template mutation protocol.
//!
//! [`prepare_panel_workflow`] turns a shared template into the graph for
//! one panel. It always clones first, so the template is never touched,
//! and applies updates in a fixed order: latent size, sampler, checkpoint,
//! then prompts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::roles::NodeRole;
use crate::script::Panel;
use crate::template::DEFAULT_MODEL;
use crate::workflow::{WorkflowError, WorkflowGraph};

// ---------------------------------------------------------------------------
// Limits & defaults
// ---------------------------------------------------------------------------

pub const MIN_DIMENSION: u32 = 256;
pub const MAX_DIMENSION: u32 = 1024;
/// Width and height must be multiples of this.
pub const DIMENSION_STEP: u32 = 64;

pub const MIN_STEPS: u32 = 10;
pub const MAX_STEPS: u32 = 100;

pub const MIN_CFG: f64 = 1.0;
pub const MAX_CFG: f64 = 20.0;

/// Largest accepted base seed. `0` means "pick one at random".
pub const MAX_SEED: u64 = 999_999_999;

/// Sampler names offered by the control surface.
pub const KNOWN_SAMPLERS: &[&str] = &["euler_a", "euler", "dpm++_2m", "dpm++_sde", "ddim", "heun"];

/// Scheduler names offered by the control surface.
pub const KNOWN_SCHEDULERS: &[&str] = &["normal", "karras", "exponential", "sgm_uniform"];

/// Prefix that steers every panel towards a comic look.
pub const COMIC_STYLE_PREFIX: &str = "comic panel, cartoon style, ";

// ---------------------------------------------------------------------------
// GenerationConfig
// ---------------------------------------------------------------------------

/// Image-generation settings shared by every panel of a strip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Checkpoint file name as known to the engine.
    pub model_name: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f64,
    /// Per-panel seed is `base_seed + panel number`.
    pub base_seed: u64,
    pub sampler_name: String,
    pub scheduler_name: String,
    /// Replaces the text of negative encoders when set.
    pub negative_prompt: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            width: 512,
            height: 512,
            steps: 30,
            cfg_scale: 7.5,
            base_seed: 0,
            sampler_name: "euler_a".to_string(),
            scheduler_name: "normal".to_string(),
            negative_prompt: None,
        }
    }
}

impl GenerationConfig {
    /// Check every field against the control-surface ranges.
    ///
    /// Sampler and scheduler names outside the known lists only log a
    /// warning, since custom engines ship their own.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.model_name.trim().is_empty() {
            return Err(CoreError::Validation(
                "Model name must not be empty".to_string(),
            ));
        }
        validate_dimension("width", self.width)?;
        validate_dimension("height", self.height)?;

        if !(MIN_STEPS..=MAX_STEPS).contains(&self.steps) {
            return Err(CoreError::Validation(format!(
                "Steps must be between {MIN_STEPS} and {MAX_STEPS}, got {}",
                self.steps
            )));
        }
        if !(MIN_CFG..=MAX_CFG).contains(&self.cfg_scale) {
            return Err(CoreError::Validation(format!(
                "CFG scale must be between {MIN_CFG} and {MAX_CFG}, got {}",
                self.cfg_scale
            )));
        }
        if self.base_seed > MAX_SEED {
            return Err(CoreError::Validation(format!(
                "Seed must be at most {MAX_SEED}, got {}",
                self.base_seed
            )));
        }
        if self.sampler_name.trim().is_empty() || self.scheduler_name.trim().is_empty() {
            return Err(CoreError::Validation(
                "Sampler and scheduler names must not be empty".to_string(),
            ));
        }

        if !KNOWN_SAMPLERS.contains(&self.sampler_name.as_str()) {
            tracing::warn!(sampler = %self.sampler_name, "Unknown sampler name");
        }
        if !KNOWN_SCHEDULERS.contains(&self.scheduler_name.as_str()) {
            tracing::warn!(scheduler = %self.scheduler_name, "Unknown scheduler name");
        }
        Ok(())
    }

    /// Replace a zero base seed with a random one.
    ///
    /// Call once per strip so that every panel derives from the same base.
    pub fn resolve_seed(mut self) -> Self {
        if self.base_seed == 0 {
            self.base_seed = rand::random_range(1..=MAX_SEED);
            tracing::info!(base_seed = self.base_seed, "Resolved random base seed");
        }
        self
    }

    /// Seed for one panel: distinct per panel, reproducible per base seed.
    pub fn panel_seed(&self, panel_number: u32) -> u64 {
        self.base_seed + u64::from(panel_number)
    }
}

fn validate_dimension(name: &str, value: u32) -> Result<(), CoreError> {
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) || value % DIMENSION_STEP != 0 {
        return Err(CoreError::Validation(format!(
            "{name} must be a multiple of {DIMENSION_STEP} between {MIN_DIMENSION} and {MAX_DIMENSION}, got {value}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Prompt & mutation protocol
// ---------------------------------------------------------------------------

/// Positive prompt for a panel: style prefix plus the panel's image prompt.
pub fn comic_style_prompt(panel: &Panel) -> String {
    format!("{COMIC_STYLE_PREFIX}{}", panel.image_prompt)
}

/// Clone `template` and apply `config` and `panel` to the copy.
///
/// Inputs that the template wires to another node are left alone and
/// logged, so custom templates that drive e.g. the seed from a separate
/// node keep working.
pub fn prepare_panel_workflow(
    template: &WorkflowGraph,
    config: &GenerationConfig,
    panel: &Panel,
) -> WorkflowGraph {
    let mut graph = template.clone();

    for id in graph.find_nodes_by_kind(NodeRole::LatentImage) {
        set_unless_linked(&mut graph, &id, "width", config.width);
        set_unless_linked(&mut graph, &id, "height", config.height);
    }

    let seed = config.panel_seed(panel.number);
    for id in graph.find_nodes_by_kind(NodeRole::Sampler) {
        set_unless_linked(&mut graph, &id, "steps", config.steps);
        set_unless_linked(&mut graph, &id, "cfg", config.cfg_scale);
        let seed_key = graph
            .node(&id)
            .map_or(SEED_INPUT, |node| seed_input_for(&node.class_type));
        set_unless_linked(&mut graph, &id, seed_key, seed);
        set_unless_linked(&mut graph, &id, "sampler_name", config.sampler_name.as_str());
        set_unless_linked(&mut graph, &id, "scheduler", config.scheduler_name.as_str());
    }

    for id in graph.find_nodes_by_kind(NodeRole::CheckpointLoader) {
        set_unless_linked(&mut graph, &id, "ckpt_name", config.model_name.as_str());
    }

    // Classify both encoder roles before writing any text: a positive
    // prompt containing the negative marker would otherwise flip roles.
    let positive = graph.find_nodes_by_kind(NodeRole::PositiveTextEncoder);
    let negative = graph.find_nodes_by_kind(NodeRole::NegativeTextEncoder);

    let prompt = comic_style_prompt(panel);
    for id in &positive {
        set_unless_linked(&mut graph, id, "text", prompt.as_str());
    }
    if let Some(negative_prompt) = config.negative_prompt.as_deref().filter(|p| !p.is_empty()) {
        for id in &negative {
            set_unless_linked(&mut graph, id, "text", negative_prompt);
        }
    }

    graph
}

const SEED_INPUT: &str = "seed";

/// Name of the seed input on a sampler of class `class_type`.
fn seed_input_for(class_type: &str) -> &'static str {
    match class_type {
        "KSamplerAdvanced" => "noise_seed",
        _ => SEED_INPUT,
    }
}

fn set_unless_linked(graph: &mut WorkflowGraph, node_id: &str, key: &str, value: impl Into<Value>) {
    match graph.set_parameter(node_id, key, value) {
        Ok(()) => {}
        Err(WorkflowError::LinkedInput { .. }) => {
            tracing::debug!(node_id, input = key, "Input is linked, leaving it unchanged");
        }
        Err(e) => {
            tracing::warn!(node_id, input = key, error = %e, "Failed to update workflow input");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{default_template, DEFAULT_NEGATIVE_PROMPT};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn panel(number: u32, prompt: &str) -> Panel {
        Panel {
            number,
            visual_description: prompt.to_string(),
            dialogue: String::new(),
            image_prompt: prompt.to_string(),
        }
    }

    fn config() -> GenerationConfig {
        GenerationConfig {
            model_name: "sdxl.safetensors".to_string(),
            width: 640,
            height: 384,
            steps: 25,
            cfg_scale: 6.0,
            base_seed: 1000,
            sampler_name: "euler".to_string(),
            scheduler_name: "karras".to_string(),
            negative_prompt: None,
        }
    }

    // -- validation -----------------------------------------------------------

    #[test]
    fn default_config_is_valid() {
        assert!(GenerationConfig::default().validate().is_ok());
    }

    #[test]
    fn dimension_must_be_multiple_of_step() {
        let cfg = GenerationConfig {
            width: 500,
            ..config()
        };
        assert_matches!(cfg.validate(), Err(CoreError::Validation(msg)) if msg.contains("width"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let bad = [
            GenerationConfig { height: 2048, ..config() },
            GenerationConfig { steps: 5, ..config() },
            GenerationConfig { cfg_scale: 0.5, ..config() },
            GenerationConfig { base_seed: MAX_SEED + 1, ..config() },
            GenerationConfig { model_name: " ".into(), ..config() },
            GenerationConfig { sampler_name: String::new(), ..config() },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{cfg:?} should be rejected");
        }
    }

    #[test]
    fn unknown_sampler_is_only_a_warning() {
        let cfg = GenerationConfig {
            sampler_name: "my_custom_sampler".to_string(),
            ..config()
        };
        assert!(cfg.validate().is_ok());
    }

    // -- seeds ----------------------------------------------------------------

    #[test]
    fn panel_seed_adds_panel_number() {
        let cfg = config();
        assert_eq!(cfg.panel_seed(1), 1001);
        assert_eq!(cfg.panel_seed(4), 1004);
    }

    #[test]
    fn resolve_seed_keeps_explicit_seed() {
        assert_eq!(config().resolve_seed().base_seed, 1000);
    }

    #[test]
    fn resolve_seed_replaces_zero() {
        let cfg = GenerationConfig {
            base_seed: 0,
            ..config()
        }
        .resolve_seed();
        assert!((1..=MAX_SEED).contains(&cfg.base_seed));
    }

    // -- mutation protocol ----------------------------------------------------

    #[test]
    fn prepare_updates_every_role() {
        let template = default_template();
        let graph = prepare_panel_workflow(&template, &config(), &panel(2, "a cat on a roof"));

        assert_eq!(graph.parameter("4", "width"), Some(&json!(640)));
        assert_eq!(graph.parameter("4", "height"), Some(&json!(384)));
        assert_eq!(graph.parameter("5", "steps"), Some(&json!(25)));
        assert_eq!(graph.parameter("5", "cfg"), Some(&json!(6.0)));
        assert_eq!(graph.parameter("5", "seed"), Some(&json!(1002)));
        assert_eq!(graph.parameter("5", "sampler_name"), Some(&json!("euler")));
        assert_eq!(graph.parameter("5", "scheduler"), Some(&json!("karras")));
        assert_eq!(graph.parameter("1", "ckpt_name"), Some(&json!("sdxl.safetensors")));

        let expected_prompt = json!("comic panel, cartoon style, a cat on a roof");
        assert_eq!(graph.parameter("2", "text"), Some(&expected_prompt));
        assert_eq!(graph.parameter("3", "text"), Some(&expected_prompt));
        // No negative prompt supplied: the template's stays.
        assert_eq!(graph.parameter("7", "text"), Some(&json!(DEFAULT_NEGATIVE_PROMPT)));
    }

    #[test]
    fn prepare_never_touches_the_template() {
        let template = default_template();
        let before = template.clone();
        let _ = prepare_panel_workflow(&template, &config(), &panel(1, "x"));
        assert_eq!(template, before);
    }

    #[test]
    fn prepare_applies_negative_prompt_when_supplied() {
        let cfg = GenerationConfig {
            negative_prompt: Some("text, watermark".to_string()),
            ..config()
        };
        let graph = prepare_panel_workflow(&default_template(), &cfg, &panel(1, "x"));
        assert_eq!(graph.parameter("7", "text"), Some(&json!("text, watermark")));
        assert_eq!(
            graph.parameter("2", "text"),
            Some(&json!("comic panel, cartoon style, x"))
        );
    }

    #[test]
    fn prepare_is_deterministic_for_same_seed() {
        let template = default_template();
        let a = prepare_panel_workflow(&template, &config(), &panel(3, "y"));
        let b = prepare_panel_workflow(&template, &config(), &panel(3, "y"));
        assert_eq!(a.to_json(), b.to_json());
        assert_eq!(a.parameter("5", "seed"), Some(&json!(1003)));
    }

    #[test]
    fn prepare_skips_linked_inputs() {
        let template = WorkflowGraph::from_json(&json!({
            "1": { "class_type": "PrimitiveNode", "inputs": { "value": 5 } },
            "2": { "class_type": "KSampler", "inputs": { "seed": ["1", 0], "steps": 10 } }
        }))
        .unwrap();
        let graph = prepare_panel_workflow(&template, &config(), &panel(1, "z"));
        let sampler = graph.node("2").unwrap();
        assert_eq!(sampler.inputs["seed"].node_id, "1");
        assert!(!sampler.parameters.contains_key("seed"));
        assert_eq!(sampler.parameters["steps"], json!(25));
    }

    #[test]
    fn prepare_uses_noise_seed_for_advanced_sampler() {
        let template = WorkflowGraph::from_json(&json!({
            "2": { "class_type": "KSamplerAdvanced", "inputs": { "noise_seed": 0 } }
        }))
        .unwrap();
        let graph = prepare_panel_workflow(&template, &config(), &panel(4, "z"));
        assert_eq!(graph.parameter("2", "noise_seed"), Some(&json!(1004)));
        assert!(graph.parameter("2", "seed").is_none());
    }

    #[test]
    fn linked_noise_seed_on_advanced_sampler_is_left_alone() {
        let template = WorkflowGraph::from_json(&json!({
            "1": { "class_type": "PrimitiveNode", "inputs": { "value": 7 } },
            "2": { "class_type": "KSamplerAdvanced", "inputs": { "noise_seed": ["1", 0] } }
        }))
        .unwrap();
        let graph = prepare_panel_workflow(&template, &config(), &panel(2, "z"));

        let sampler = graph.node("2").unwrap();
        assert_eq!(sampler.inputs["noise_seed"].node_id, "1");
        assert!(graph.parameter("2", "seed").is_none());
        assert!(graph.parameter("2", "noise_seed").is_none());
    }

    #[test]
    fn prompt_with_negative_marker_does_not_flip_roles() {
        let graph = prepare_panel_workflow(
            &default_template(),
            &GenerationConfig {
                negative_prompt: Some("blurry".to_string()),
                ..config()
            },
            &panel(1, "an ugly duckling"),
        );
        assert_eq!(
            graph.parameter("2", "text"),
            Some(&json!("comic panel, cartoon style, an ugly duckling"))
        );
        assert_eq!(graph.parameter("7", "text"), Some(&json!("blurry")));
    }
}
