// src/ai/connector.rs
use crate::capture::CapturedImage;
use crate::error::RequestError;

/// Trait defining the interface for multimodal AI processing.
/// Implementations are shared read-only across threads.
pub trait AiConnector: Send + Sync {
    /// Send the prompt followed by the image and return the model's text
    fn process_image(&self, image: &CapturedImage, prompt: &str) -> Result<String, RequestError>;

    fn model_name(&self) -> &str;
}
