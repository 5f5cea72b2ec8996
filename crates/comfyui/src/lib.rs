//! ComfyUI REST client and job tracking.
//!
//! Provides the HTTP API wrapper, the [`engine::ImageEngine`] port that the
//! rest of the workspace programs against, history interpretation, the
//! submit/poll/download state machine, progress events, and a handle for
//! the locally launched engine process.

pub mod api;
pub mod backoff;
pub mod engine;
pub mod events;
pub mod history;
pub mod job;
pub mod process;
