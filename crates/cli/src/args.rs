use std::path::PathBuf;

use clap::Parser;
use comiccraft_core::generation::GenerationConfig;
use comiccraft_core::template::DEFAULT_MODEL;

/// Generate a four-panel comic strip from a topic.
#[derive(Debug, Parser)]
#[command(name = "comiccraft", version)]
pub struct Cli {
    /// What the comic is about.
    pub topic: String,

    /// Checkpoint name as known to the image engine.
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, default_value_t = 512)]
    pub width: u32,

    #[arg(long, default_value_t = 512)]
    pub height: u32,

    /// Sampling steps.
    #[arg(long, default_value_t = 30)]
    pub steps: u32,

    /// Classifier-free guidance scale.
    #[arg(long, default_value_t = 7.5)]
    pub cfg: f64,

    /// Base seed; 0 picks a random one.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[arg(long, default_value = "euler_a")]
    pub sampler: String,

    #[arg(long, default_value = "normal")]
    pub scheduler: String,

    /// Negative prompt applied to every panel.
    #[arg(long)]
    pub negative: Option<String>,

    /// Workflow template in ComfyUI API JSON format.
    #[arg(long)]
    pub workflow: Option<PathBuf>,

    /// Panels generated at the same time.
    #[arg(long, default_value_t = 4)]
    pub parallel: usize,

    /// Directory the strip is written to.
    #[arg(long, short, default_value = "comic_output")]
    pub output: PathBuf,

    /// Launch the image engine from COMFYUI_PATH if it is not running.
    #[arg(long)]
    pub start_engine: bool,

    /// Stop the image engine afterwards, if this run started it.
    #[arg(long)]
    pub stop_engine: bool,
}

impl Cli {
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            model_name: self.model.clone(),
            width: self.width,
            height: self.height,
            steps: self.steps,
            cfg_scale: self.cfg,
            base_seed: self.seed,
            sampler_name: self.sampler.clone(),
            scheduler_name: self.scheduler.clone(),
            negative_prompt: self.negative.clone().filter(|n| !n.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_generation_defaults() {
        let cli = Cli::parse_from(["comiccraft", "a robot bakes bread"]);
        assert_eq!(cli.topic, "a robot bakes bread");
        assert_eq!(cli.generation_config(), GenerationConfig::default());
        assert_eq!(cli.parallel, 4);
        assert!(!cli.start_engine);
    }

    #[test]
    fn flags_map_onto_generation_config() {
        let cli = Cli::parse_from([
            "comiccraft",
            "topic",
            "--width",
            "768",
            "--steps",
            "20",
            "--cfg",
            "5.5",
            "--seed",
            "1234",
            "--sampler",
            "dpm++_2m",
            "--negative",
            "blurry",
            "-o",
            "out",
        ]);
        let config = cli.generation_config();
        assert_eq!(config.width, 768);
        assert_eq!(config.height, 512);
        assert_eq!(config.steps, 20);
        assert_eq!(config.cfg_scale, 5.5);
        assert_eq!(config.base_seed, 1234);
        assert_eq!(config.sampler_name, "dpm++_2m");
        assert_eq!(config.negative_prompt.as_deref(), Some("blurry"));
        assert_eq!(cli.output, PathBuf::from("out"));
    }

    #[test]
    fn blank_negative_is_ignored() {
        let cli = Cli::parse_from(["comiccraft", "topic", "--negative", "  "]);
        assert_eq!(cli.generation_config().negative_prompt, None);
    }
}
