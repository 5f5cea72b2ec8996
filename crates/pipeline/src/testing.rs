//! In-memory engine shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use comiccraft_comfyui::api::{ComfyUIApiError, SubmitResponse};
use comiccraft_comfyui::engine::ImageEngine;
use comiccraft_comfyui::history::ImageReference;
use comiccraft_core::script::{parse_comic_script, Panel};
use serde_json::{json, Value};

pub(crate) const SCRIPT: &str = "\
Panel 1: A cat sits on a roof - \"Meow.\"
Panel 2: The cat eyes a bird - \"Lunch?\"
Panel 3: The bird flies away - \"Nope!\"
Panel 4: The cat sulks - \"Next time.\"";

pub(crate) fn panels() -> Vec<Panel> {
    parse_comic_script(SCRIPT)
}

/// Engine that completes every job on the first poll.
///
/// Jobs are keyed by the sampler seed of the submitted workflow, so tests
/// can target a panel via `base_seed + panel number`.
pub(crate) struct FakeEngine {
    healthy: bool,
    failing_seeds: Vec<u64>,
    delay: fn(u64) -> Duration,
    slow_second_image: bool,
    next_id: AtomicUsize,
    jobs: Mutex<HashMap<String, u64>>,
    submitted: Mutex<Vec<Value>>,
    completed: Mutex<Vec<u64>>,
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        Self {
            healthy: true,
            failing_seeds: Vec::new(),
            delay: |_| Duration::ZERO,
            slow_second_image: false,
            next_id: AtomicUsize::new(0),
            jobs: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Refuse submissions whose sampler seed is in `seeds`.
    pub(crate) fn failing_seeds(mut self, seeds: &[u64]) -> Self {
        self.failing_seeds = seeds.to_vec();
        self
    }

    /// Delay the completing poll by `delay(seed)`.
    pub(crate) fn with_delay(mut self, delay: fn(u64) -> Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make the second image of every job take far longer than any test deadline.
    pub(crate) fn with_slow_second_image(mut self) -> Self {
        self.slow_second_image = true;
        self
    }

    pub(crate) fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Sampler seeds of every submitted workflow, in submission order.
    pub(crate) fn submitted_seeds(&self) -> Vec<u64> {
        self.submitted.lock().unwrap().iter().filter_map(sampler_seed).collect()
    }

    pub(crate) fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().unwrap().clone()
    }

    /// Seeds of completed jobs, in completion order.
    pub(crate) fn completion_order(&self) -> Vec<u64> {
        self.completed.lock().unwrap().clone()
    }
}

fn sampler_seed(workflow: &Value) -> Option<u64> {
    workflow
        .as_object()?
        .values()
        .find_map(|node| node.get("inputs")?.get("seed")?.as_u64())
}

impl ImageEngine for FakeEngine {
    async fn submit(&self, workflow: &Value, _client_id: &str) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submitted.lock().unwrap().push(workflow.clone());
        let seed = sampler_seed(workflow).unwrap_or_default();
        if self.failing_seeds.contains(&seed) {
            return Err(ComfyUIApiError::ApiError {
                status: 400,
                body: "forced failure".to_string(),
            });
        }

        let prompt_id = format!("p{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.jobs.lock().unwrap().insert(prompt_id.clone(), seed);
        Ok(SubmitResponse {
            prompt_id: Some(prompt_id),
            ..Default::default()
        })
    }

    async fn history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        let seed = self.jobs.lock().unwrap().get(prompt_id).copied();
        let Some(seed) = seed else {
            return Ok(json!({}));
        };
        tokio::time::sleep((self.delay)(seed)).await;
        self.completed.lock().unwrap().push(seed);

        Ok(json!({
            (prompt_id): {
                "outputs": { "9": { "images": [
                    { "filename": format!("panel-{seed}.png"), "subfolder": "", "type": "output" },
                    { "filename": format!("panel-{seed}-alt.png"), "subfolder": "", "type": "output" }
                ] } },
                "status": { "status_str": "success", "completed": true, "messages": [] }
            }
        }))
    }

    async fn fetch_image(&self, image: &ImageReference) -> Result<Vec<u8>, ComfyUIApiError> {
        if self.slow_second_image && image.filename.ends_with("-alt.png") {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        Ok(image.filename.as_bytes().to_vec())
    }

    async fn health_check(&self) -> Result<(), ComfyUIApiError> {
        if self.healthy {
            Ok(())
        } else {
            Err(ComfyUIApiError::ApiError {
                status: 503,
                body: "down".to_string(),
            })
        }
    }
}
