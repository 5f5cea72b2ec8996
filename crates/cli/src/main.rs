//! `comiccraft`: turn a topic into a four-panel comic strip.
//!
//! Writes a script with a local text model, renders each panel on a
//! ComfyUI instance and saves the result to an output directory. Exits
//! with status 1 only when no panel could be produced.

mod args;
mod config;
mod output;

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comiccraft_comfyui::api::ComfyUIApi;
use comiccraft_comfyui::backoff::PollSettings;
use comiccraft_comfyui::events::{EventBus, GenerationEvent};
use comiccraft_comfyui::job::JobClient;
use comiccraft_comfyui::process::{EngineHandle, EngineSettings, EngineStatus};
use comiccraft_core::template::default_template;
use comiccraft_core::workflow::WorkflowGraph;
use comiccraft_pipeline::assembler::{ComicAssembler, StripStatus};
use comiccraft_pipeline::panel::PanelGenerator;
use comiccraft_pipeline::writer::OllamaWriter;

use crate::args::Cli;
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run(Cli::parse()).await {
        Ok(StripStatus::Failed) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("comiccraft failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "comiccraft=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<StripStatus> {
    let config = AppConfig::from_env()?;
    let generation = cli.generation_config();
    generation.validate().context("Invalid generation settings")?;
    let template = load_template(cli.workflow.as_deref())?;

    let api = ComfyUIApi::with_timeout(&config.comfyui_url, config.http_timeout)
        .context("Failed to build HTTP client")?;

    let mut engine = EngineHandle::new(api.clone());
    if cli.start_engine {
        start_engine(&mut engine, &config).await?;
    }

    let bus = EventBus::default();
    let progress = tokio::spawn(log_progress(bus.subscribe()));

    let writer = OllamaWriter::new(&config.ollama_bin, &config.ollama_model)
        .with_timeout(config.script_timeout);
    let client = JobClient::new(api).with_events(bus.clone());
    let generator = PanelGenerator::new(
        client,
        PollSettings::new(config.job_timeout, config.poll_interval),
    )
    .with_events(bus.clone());
    let assembler = ComicAssembler::new(generator, cli.parallel).with_events(bus);

    let strip = assembler
        .create_strip(&writer, &cli.topic, &template, &generation)
        .await;

    if cli.stop_engine {
        if let Err(e) = engine.stop().await {
            tracing::warn!(error = %e, "Could not stop image engine");
        }
    }
    progress.abort();

    let strip = strip.context("Comic generation failed")?;
    let manifest = output::write_strip(&cli.output, &strip)?;

    let result = &strip.result;
    tracing::info!(
        manifest = %manifest.display(),
        generated = result.images_generated(),
        total = result.panels.len(),
        "Comic written",
    );
    Ok(result.status.clone())
}

fn load_template(path: Option<&Path>) -> anyhow::Result<WorkflowGraph> {
    let Some(path) = path else {
        return Ok(default_template());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow {}", path.display()))?;
    let graph = WorkflowGraph::from_json_str(&text)
        .with_context(|| format!("Invalid workflow {}", path.display()))?;
    tracing::info!(path = %path.display(), nodes = graph.len(), "Loaded workflow template");
    Ok(graph)
}

async fn start_engine(
    engine: &mut EngineHandle<ComfyUIApi>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let dir = config
        .comfyui_path
        .as_ref()
        .context("COMFYUI_PATH must be set to start the image engine")?;
    let settings = EngineSettings::new(dir, &config.comfyui_python);

    match engine.start(&settings).await? {
        EngineStatus::Running => Ok(()),
        status => {
            tracing::warn!(?status, "Image engine is not answering yet; continuing");
            Ok(())
        }
    }
}

/// Mirror progress events into the log until the bus closes.
async fn log_progress(mut rx: broadcast::Receiver<GenerationEvent>) {
    loop {
        match rx.recv().await {
            Ok(GenerationEvent::JobProgress { prompt_id, progress }) => {
                tracing::info!(%prompt_id, percent = (progress * 100.0).round() as u32, "Rendering");
            }
            Ok(GenerationEvent::PanelFinished { panel, success }) => {
                tracing::debug!(panel, success, "Panel finished");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Progress log fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
