// src/ai/mod.rs
pub mod connector;
pub mod diagnosis;
pub mod gemini;
pub mod prompt;

pub use connector::AiConnector;
pub use diagnosis::{request_diagnosis, DiagnosisResult, GENERIC_FAILURE_MESSAGE};
pub use gemini::GeminiModel;
pub use prompt::DIAGNOSIS_PROMPT;
