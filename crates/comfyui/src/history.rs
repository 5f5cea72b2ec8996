//! Interpretation of `GET /history/{prompt_id}` bodies.
//!
//! The history endpoint is the only job-status source used here, so every
//! state transition of a job is derived from one of these snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::ComfyUIApiError;

/// Location of one output image on the engine, as listed in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage bucket on the engine, e.g. `output` or `temp`.
    #[serde(rename = "type", default = "default_image_type")]
    pub image_type: String,
}

fn default_image_type() -> String {
    "output".to_string()
}

/// What one history poll says about a prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryState {
    /// The engine has not recorded the prompt yet.
    Pending,
    /// Recorded but not finished. `progress` is a fraction in `[0, 1]`.
    Running { progress: Option<f32> },
    /// Finished; the listed images are ready for download.
    Complete(Vec<ImageReference>),
    /// The engine reported an execution error.
    Failed(String),
}

/// Classify a history body for `prompt_id`.
///
/// Returns [`ComfyUIApiError::UnexpectedResponse`] for bodies that are not
/// JSON objects, which callers treat like any other transient poll error.
pub fn interpret_history(prompt_id: &str, body: &Value) -> Result<HistoryState, ComfyUIApiError> {
    let map = body.as_object().ok_or_else(|| {
        ComfyUIApiError::UnexpectedResponse(format!("history body is not an object: {body}"))
    })?;

    let Some(entry) = map.get(prompt_id) else {
        return Ok(HistoryState::Pending);
    };
    let entry = entry.as_object().ok_or_else(|| {
        ComfyUIApiError::UnexpectedResponse(format!("history entry for {prompt_id} is not an object"))
    })?;

    let status = entry.get("status");
    if status
        .and_then(|s| s.get("status_str"))
        .and_then(Value::as_str)
        == Some("error")
    {
        return Ok(HistoryState::Failed(execution_error_message(status)));
    }

    let images = output_images(entry.get("outputs"));
    if !images.is_empty() {
        return Ok(HistoryState::Complete(images));
    }

    let completed = status
        .and_then(|s| s.get("completed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if completed {
        return Ok(HistoryState::Complete(Vec::new()));
    }

    Ok(HistoryState::Running {
        progress: entry.get("progress").and_then(parse_progress),
    })
}

/// Collect image references from every output node, in node-id order.
fn output_images(outputs: Option<&Value>) -> Vec<ImageReference> {
    let Some(outputs) = outputs.and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut images = Vec::new();
    for (node_id, output) in outputs {
        let Some(list) = output.get("images").and_then(Value::as_array) else {
            continue;
        };
        for item in list {
            match serde_json::from_value::<ImageReference>(item.clone()) {
                Ok(image) => images.push(image),
                Err(e) => {
                    tracing::warn!(node_id = %node_id, error = %e, "Skipping malformed image reference");
                }
            }
        }
    }
    images
}

/// Accepts either a bare fraction or a `{value, max}` step counter.
fn parse_progress(value: &Value) -> Option<f32> {
    let fraction = match value {
        Value::Number(n) => n.as_f64()?,
        Value::Object(map) => {
            let done = map.get("value")?.as_f64()?;
            let max = map.get("max")?.as_f64()?;
            if max <= 0.0 {
                return None;
            }
            done / max
        }
        _ => return None,
    };
    Some(fraction.clamp(0.0, 1.0) as f32)
}

/// Pull a readable message out of `status.messages`.
///
/// Messages are `[event_name, data]` pairs; the `execution_error` event
/// carries `exception_message` and `node_type`.
fn execution_error_message(status: Option<&Value>) -> String {
    let messages = status
        .and_then(|s| s.get("messages"))
        .and_then(Value::as_array);

    let error = messages.and_then(|list| {
        list.iter().find_map(|msg| {
            let pair = msg.as_array()?;
            if pair.first()?.as_str()? != "execution_error" {
                return None;
            }
            pair.get(1)
        })
    });

    match error {
        Some(data) => {
            let text = data
                .get("exception_message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .trim();
            match data.get("node_type").and_then(Value::as_str) {
                Some(node_type) => format!("{node_type}: {text}"),
                None => text.to_string(),
            }
        }
        None => "Execution failed".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
