// src/error.rs
use thiserror::Error;

/// Problems with the process configuration. These are fatal: startup stops
/// before any window is shown or any request is sent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Google API key not found. Please set the GOOGLE_API_KEY environment variable in your .env file.")]
    MissingCredential,

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Failure to set up the model client. Fatal for the session.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid model name '{0}'")]
    InvalidModelName(String),

    #[error("Failed to build HTTP client for model '{model}': {source}")]
    Client {
        model: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Model '{model}' could not be verified: {reason}")]
    Unavailable { model: String, reason: String },
}

/// A single diagnosis request went wrong. Recoverable: the user may press
/// the trigger again.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Gemini API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Prompt was blocked by the provider: {0}")]
    Blocked(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Response contained no text")]
    EmptyResponse,

    #[error("Image could not be prepared: {0}")]
    Image(#[from] image::ImageError),

    #[error("Prompt must not be empty")]
    EmptyPrompt,
}

impl From<reqwest::Error> for RequestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RequestError::Timeout(e)
        } else {
            RequestError::Transport(e)
        }
    }
}
