// src/ai/diagnosis.rs
use log::{error, info};
use std::time::Instant;

use super::connector::AiConnector;
use crate::capture::CapturedImage;

/// The only thing a user ever sees when a request fails.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Could not retrieve AI diagnosis. Please check the console for errors or try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosisResult {
    Success(String),
    Failed,
}

/// One round trip to the model. Every error stops here: it is logged with
/// full detail and turned into `DiagnosisResult::Failed`.
pub fn request_diagnosis(connector: &dyn AiConnector, image: &CapturedImage, prompt: &str) -> DiagnosisResult {
    let (width, height) = image.dimensions();
    info!("Requesting diagnosis from {} for {}x{} image", connector.model_name(), width, height);
    let start = Instant::now();

    match connector.process_image(image, prompt) {
        Ok(text) => {
            info!("Diagnosis received after {}ms ({} chars)", start.elapsed().as_millis(), text.len());
            DiagnosisResult::Success(text)
        }
        Err(e) => {
            error!(
                "Gemini API error after {}ms from model {}: {}",
                start.elapsed().as_millis(),
                connector.model_name(),
                e
            );
            DiagnosisResult::Failed
        }
    }
}
