//! Writing a finished strip to disk.
//!
//! Layout of the output directory:
//!
//! - `script.txt`: the raw script from the text service
//! - `comic_panel_{n}_{filename}`: one file per generated panel image
//! - `comic.json`: manifest tying panels, images and the strip status together

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use comiccraft_pipeline::assembler::{ComicStrip, StripStatus};
use serde::Serialize;

pub const SCRIPT_FILE: &str = "script.txt";
pub const MANIFEST_FILE: &str = "comic.json";

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    topic: &'a str,
    created_at: DateTime<Utc>,
    base_seed: u64,
    #[serde(flatten)]
    status: &'a StripStatus,
    panels: Vec<ManifestPanel<'a>>,
}

#[derive(Debug, Serialize)]
struct ManifestPanel<'a> {
    number: u32,
    description: &'a str,
    dialogue: &'a str,
    /// File name inside the output directory, `null` for a failed panel.
    image: Option<String>,
}

/// Write `strip` into `dir`, creating it if needed. Returns the manifest path.
pub fn write_strip(dir: &Path, strip: &ComicStrip) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let script_path = dir.join(SCRIPT_FILE);
    std::fs::write(&script_path, strip.script.as_str())
        .with_context(|| format!("Failed to write {}", script_path.display()))?;

    let mut panels = Vec::with_capacity(strip.result.panels.len());
    for entry in &strip.result.panels {
        let image = match entry.outcome.image() {
            Some(asset) => {
                let name = panel_file_name(entry.panel.number, &asset.filename);
                let path = dir.join(&name);
                std::fs::write(&path, &asset.bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                tracing::info!(panel = entry.panel.number, path = %path.display(), "Saved panel image");
                Some(name)
            }
            None => None,
        };
        panels.push(ManifestPanel {
            number: entry.panel.number,
            description: &entry.panel.visual_description,
            dialogue: &entry.panel.dialogue,
            image,
        });
    }

    let manifest = Manifest {
        topic: &strip.topic,
        created_at: Utc::now(),
        base_seed: strip.result.base_seed,
        status: &strip.result.status,
        panels,
    };
    let manifest_path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;
    std::fs::write(&manifest_path, json)
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

    Ok(manifest_path)
}

/// `comic_panel_{n}_{filename}`, keeping only the last path component of
/// the engine-supplied name.
fn panel_file_name(number: u32, engine_filename: &str) -> String {
    let base = Path::new(engine_filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image.png");
    format!("comic_panel_{number}_{base}")
}
