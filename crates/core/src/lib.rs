//! Pure domain logic for comic strip generation.
//!
//! Nothing in this crate performs I/O: it parses panel scripts, models
//! image-engine workflow graphs, and validates generation settings.
//! The network protocol lives in `comiccraft-comfyui` and orchestration
//! in `comiccraft-pipeline`.

pub mod error;
pub mod generation;
pub mod roles;
pub mod script;
pub mod template;
pub mod workflow;
