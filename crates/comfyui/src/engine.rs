//! The image-engine port.
//!
//! [`ImageEngine`] is the network seam of the workspace: the job state
//! machine and the process handle talk to the engine only through it.
//! [`ComfyUIApi`] is the production implementation.

use std::future::Future;

use crate::api::{ComfyUIApi, ComfyUIApiError, SubmitResponse};
use crate::history::ImageReference;

/// Operations an image-synthesis engine must offer.
pub trait ImageEngine: Send + Sync {
    /// Queue a workflow graph (API format) under `client_id`.
    fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> impl Future<Output = Result<SubmitResponse, ComfyUIApiError>> + Send;

    /// Fetch the raw history body for a prompt.
    fn history(
        &self,
        prompt_id: &str,
    ) -> impl Future<Output = Result<serde_json::Value, ComfyUIApiError>> + Send;

    /// Download one output image.
    fn fetch_image(
        &self,
        image: &ImageReference,
    ) -> impl Future<Output = Result<Vec<u8>, ComfyUIApiError>> + Send;

    /// Succeeds when the engine answers requests.
    fn health_check(&self) -> impl Future<Output = Result<(), ComfyUIApiError>> + Send;
}

impl ImageEngine for ComfyUIApi {
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submit_workflow(workflow, client_id).await
    }

    async fn history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        self.get_history(prompt_id).await
    }

    async fn fetch_image(&self, image: &ImageReference) -> Result<Vec<u8>, ComfyUIApiError> {
        self.view_image(image).await
    }

    async fn health_check(&self) -> Result<(), ComfyUIApiError> {
        ComfyUIApi::health_check(self).await
    }
}

impl<E: ImageEngine> ImageEngine for std::sync::Arc<E> {
    fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> impl Future<Output = Result<SubmitResponse, ComfyUIApiError>> + Send {
        (**self).submit(workflow, client_id)
    }

    fn history(
        &self,
        prompt_id: &str,
    ) -> impl Future<Output = Result<serde_json::Value, ComfyUIApiError>> + Send {
        (**self).history(prompt_id)
    }

    fn fetch_image(
        &self,
        image: &ImageReference,
    ) -> impl Future<Output = Result<Vec<u8>, ComfyUIApiError>> + Send {
        (**self).fetch_image(image)
    }

    fn health_check(&self) -> impl Future<Output = Result<(), ComfyUIApiError>> + Send {
        (**self).health_check()
    }
}
