use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Process configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local ComfyUI and Ollama.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Base URL of the image engine.
    pub comfyui_url: String,
    /// Directory holding the engine's `main.py`; only needed to start it.
    pub comfyui_path: Option<PathBuf>,
    /// Interpreter used to launch the engine.
    pub comfyui_python: String,
    /// Text service executable.
    pub ollama_bin: String,
    /// Text model used to write scripts.
    pub ollama_model: String,
    pub script_timeout: Duration,
    /// Per-job completion deadline.
    pub job_timeout: Duration,
    pub poll_interval: Duration,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default                 |
    /// |-----------------------|-------------------------|
    /// | `COMFYUI_URL`         | `http://127.0.0.1:8188` |
    /// | `COMFYUI_PATH`        | unset                   |
    /// | `COMFYUI_PYTHON`      | `python3`               |
    /// | `OLLAMA_BIN`          | `ollama`                |
    /// | `OLLAMA_MODEL`        | `comiccrafter`          |
    /// | `SCRIPT_TIMEOUT_SECS` | `300`                   |
    /// | `JOB_TIMEOUT_SECS`    | `3600`                  |
    /// | `POLL_INTERVAL_MS`    | `500`                   |
    /// | `HTTP_TIMEOUT_SECS`   | `5`                     |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let string = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            comfyui_url: string("COMFYUI_URL", "http://127.0.0.1:8188"),
            comfyui_path: get("COMFYUI_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            comfyui_python: string("COMFYUI_PYTHON", default_python()),
            ollama_bin: string("OLLAMA_BIN", "ollama"),
            ollama_model: string("OLLAMA_MODEL", "comiccrafter"),
            script_timeout: Duration::from_secs(parse(&get, "SCRIPT_TIMEOUT_SECS", 300)?),
            job_timeout: Duration::from_secs(parse(&get, "JOB_TIMEOUT_SECS", 3600)?),
            poll_interval: Duration::from_millis(parse(&get, "POLL_INTERVAL_MS", 500)?),
            http_timeout: Duration::from_secs(parse(&get, "HTTP_TIMEOUT_SECS", 5)?),
        })
    }
}

fn default_python() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number, got {raw:?}")),
        None => Ok(default),
    }
}
