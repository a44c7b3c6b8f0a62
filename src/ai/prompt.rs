// src/ai/prompt.rs

/// Instruction sent ahead of every captured image.
pub const DIAGNOSIS_PROMPT: &str = "Analyze this image of human teeth and provide a concise diagnosis of their condition.
Focus on general health, presence of cavities, gum health, and any other visible issues.
If the image is not clearly of teeth or is of poor quality, please state that.
Provide the diagnosis in a clear, easy-to-understand format.";
