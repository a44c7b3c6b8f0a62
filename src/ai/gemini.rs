// src/ai/gemini.rs
use base64::{Engine as _, engine::general_purpose};
use image::{ImageFormat, ImageOutputFormat};
use log::{info, warn};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::connector::AiConnector;
use crate::capture::CapturedImage;
use crate::config::Config;
use crate::error::{ModelError, RequestError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for the Gemini `generateContent` REST endpoint, bound to one model.
pub struct GeminiModel {
    config: Arc<Config>,
    model: String,
    client: Client,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Part<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

/// Text and token usage extracted from a successful reply.
#[derive(Debug)]
pub(crate) struct GeminiReply {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl GeminiModel {
    pub fn new(config: Arc<Config>) -> Result<Self, ModelError> {
        let model = normalize_model_name(&config.model)?;

        info!("Initializing Gemini model: {} at {}", model, config.api_base);

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|source| ModelError::Client {
                model: model.clone(),
                source,
            })?;

        Ok(Self {
            config,
            model,
            client,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.config.api_base, self.model)
    }

    /// Fetch the model's metadata to confirm that the key and model name are accepted.
    pub fn verify(&self) -> Result<(), ModelError> {
        let url = format!("{}/models/{}", self.config.api_base, self.model);
        info!("Verifying model {}", self.model);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, self.config.api_key())
            .send()
            .map_err(|e| ModelError::Unavailable {
                model: self.model.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Unavailable {
                model: self.model.clone(),
                reason: format!("{}: {}", status, body.trim()),
            });
        }
        Ok(())
    }
}

impl AiConnector for GeminiModel {
    fn process_image(&self, image: &CapturedImage, prompt: &str) -> Result<String, RequestError> {
        let (mime_type, payload) = encode_image(image)?;
        let request = build_request(prompt, mime_type, &payload)?;

        info!("Sending {} image ({} bytes) to Gemini model {}", mime_type, payload.len(), self.model);
        let start = Instant::now();

        let response = self
            .client
            .post(self.generate_url())
            .header(API_KEY_HEADER, self.config.api_key())
            .json(&request)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(RequestError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply = parse_response(&body)?;
        info!(
            "Gemini responded in {}ms (input tokens: {}, output tokens: {})",
            start.elapsed().as_millis(),
            reply.input_tokens,
            reply.output_tokens
        );
        Ok(reply.text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn normalize_model_name(raw: &str) -> Result<String, ModelError> {
    let name = raw.trim();
    let name = name.strip_prefix("models/").unwrap_or(name);
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
    if valid {
        Ok(name.to_string())
    } else {
        Err(ModelError::InvalidModelName(raw.to_string()))
    }
}

/// Formats the API takes directly go through untouched; anything else is re-encoded as PNG.
fn encode_image(image: &CapturedImage) -> Result<(&'static str, Cow<'_, [u8]>), RequestError> {
    let mime_type = match image.format() {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        ImageFormat::WebP => "image/webp",
        other => {
            warn!("{:?} is not accepted by Gemini, re-encoding as PNG", other);
            let mut buffer = Vec::new();
            image
                .decoded()
                .write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Png)?;
            return Ok(("image/png", Cow::Owned(buffer)));
        }
    };
    Ok((mime_type, Cow::Borrowed(image.bytes())))
}

fn build_request<'a>(
    prompt: &'a str,
    mime_type: &'static str,
    image_bytes: &[u8],
) -> Result<GenerateContentRequest<'a>, RequestError> {
    if prompt.trim().is_empty() {
        return Err(RequestError::EmptyPrompt);
    }
    Ok(GenerateContentRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![
                Part {
                    text: Some(prompt),
                    inline_data: None,
                },
                Part {
                    text: None,
                    inline_data: Some(InlineData {
                        mime_type,
                        data: general_purpose::STANDARD.encode(image_bytes),
                    }),
                },
            ],
        }],
    })
}

pub(crate) fn parse_response(body: &str) -> Result<GeminiReply, RequestError> {
    let parsed: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| RequestError::Malformed(e.to_string()))?;

    let (input_tokens, output_tokens) = parsed
        .usage_metadata
        .map(|u| (u.prompt_token_count, u.candidates_token_count))
        .unwrap_or((0, 0));

    let candidate = match parsed.candidates.into_iter().next() {
        Some(c) => c,
        None => {
            return Err(match parsed.prompt_feedback.and_then(|f| f.block_reason) {
                Some(reason) => RequestError::Blocked(reason),
                None => RequestError::Malformed("response has no candidates".to_string()),
            });
        }
    };

    let finish_reason = candidate.finish_reason;
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(match finish_reason {
            Some(reason) if matches!(reason.as_str(), "SAFETY" | "BLOCKLIST" | "PROHIBITED_CONTENT") => {
                RequestError::Blocked(reason)
            }
            _ => RequestError::EmptyResponse,
        });
    }

    Ok(GeminiReply {
        text,
        input_tokens,
        output_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{request_diagnosis, DiagnosisResult};
    use crate::capture::still::tests::encoded;
    use crate::config::Overrides;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    fn config(model: &str) -> Arc<Config> {
        config_at(model, "http://127.0.0.1:9/v1beta", None)
    }

    fn config_at(model: &str, api_base: &str, timeout_secs: Option<u64>) -> Arc<Config> {
        let model = model.to_string();
        let api_base = api_base.to_string();
        Arc::new(
            Config::from_lookup(
                move |key: &str| match key {
                    "GOOGLE_API_KEY" => Some("test-key".to_string()),
                    "GEMINI_MODEL" => Some(model.clone()),
                    "GEMINI_API_BASE" => Some(api_base.clone()),
                    _ => None,
                },
                &Overrides { model: None, timeout_secs },
            )
            .unwrap(),
        )
    }

    /// Answers exactly one HTTP request on loopback with a canned reply after
    /// `delay`. Returns the API base URL and a handle yielding the raw request.
    fn serve_once(status_line: &str, body: &str, delay: Duration) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/v1beta", listener.local_addr().unwrap());
        let reply = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            let header_end = loop {
                let n = stream.read(&mut chunk).unwrap();
                assert!(n > 0, "client closed before sending headers");
                request.extend_from_slice(&chunk[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .map(|v| v.trim().parse::<usize>().unwrap())
                .unwrap_or(0);
            while request.len() < header_end + content_length {
                let n = stream.read(&mut chunk).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }

            thread::sleep(delay);
            // The client may have given up already.
            let _ = stream.write_all(reply.as_bytes());
            let _ = stream.flush();
            String::from_utf8_lossy(&request).into_owned()
        });

        (base, handle)
    }

    fn small_jpeg() -> CapturedImage {
        CapturedImage::from_bytes(encoded(16, 16, ImageOutputFormat::Jpeg(80))).unwrap()
    }

    #[test]
    fn url_targets_generate_content() {
        let model = GeminiModel::new(config("models/gemini-2.0-flash")).unwrap();
        assert_eq!(model.model_name(), "gemini-2.0-flash");
        assert_eq!(
            model.generate_url(),
            "http://127.0.0.1:9/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn bad_model_names_fail_initialization() {
        for bad in ["gemini 2.0", "../secrets", "models/"] {
            let err = GeminiModel::new(config(bad)).err().unwrap();
            assert!(matches!(err, ModelError::InvalidModelName(_)), "{}", bad);
        }
    }

    #[test]
    fn request_puts_prompt_before_image() {
        let bytes = encoded(8, 8, ImageOutputFormat::Jpeg(80));
        let request = build_request("look at these teeth", "image/jpeg", &bytes).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "look at these teeth");
        assert!(parts[0].get("inlineData").is_none());
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");

        let data = parts[1]["inlineData"]["data"].as_str().unwrap();
        assert_eq!(general_purpose::STANDARD.decode(data).unwrap(), bytes);
    }

    #[test]
    fn blank_prompt_is_refused() {
        assert!(matches!(
            build_request("  \n", "image/png", &[1, 2, 3]),
            Err(RequestError::EmptyPrompt)
        ));
    }

    #[test]
    fn jpeg_is_sent_as_captured() {
        let bytes = encoded(16, 16, ImageOutputFormat::Jpeg(80));
        let image = CapturedImage::from_bytes(bytes.clone()).unwrap();
        let (mime, payload) = encode_image(&image).unwrap();
        assert_eq!(mime, "image/jpeg");
        assert!(matches!(payload, Cow::Borrowed(_)));
        assert_eq!(&*payload, bytes.as_slice());
    }

    #[test]
    fn unsupported_formats_are_reencoded_as_png() {
        let image = CapturedImage::from_bytes(encoded(16, 16, ImageOutputFormat::Bmp)).unwrap();
        let (mime, payload) = encode_image(&image).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(image::guess_format(&payload).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn parses_text_and_usage() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "No visible cavities; "}, {"text": "mild plaque buildup."}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 270, "candidatesTokenCount": 12, "totalTokenCount": 282}
        }"#;
        let reply = parse_response(body).unwrap();
        assert_eq!(reply.text, "No visible cavities; mild plaque buildup.");
        assert_eq!(reply.input_tokens, 270);
        assert_eq!(reply.output_tokens, 12);
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        assert!(matches!(parse_response(body), Err(RequestError::Blocked(r)) if r == "SAFETY"));
    }

    #[test]
    fn safety_stop_without_text_is_an_error() {
        let body = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        assert!(matches!(parse_response(body), Err(RequestError::Blocked(_))));
    }

    #[test]
    fn empty_or_odd_shapes_are_errors() {
        assert!(matches!(parse_response("{}"), Err(RequestError::Malformed(_))));
        assert!(matches!(parse_response("not json"), Err(RequestError::Malformed(_))));
        assert!(matches!(
            parse_response(r#"{"candidates": [{"content": {"parts": [{"text": "   "}]}}]}"#),
            Err(RequestError::EmptyResponse)
        ));
        assert!(matches!(
            parse_response(r#"{"candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]}"#),
            Err(RequestError::EmptyResponse)
        ));
    }

    #[test]
    fn unreachable_endpoint_is_a_request_error() {
        let model = GeminiModel::new(config("gemini-2.0-flash")).unwrap();
        let image = CapturedImage::from_bytes(encoded(8, 8, ImageOutputFormat::Png)).unwrap();
        let err = model.process_image(&image, "prompt").unwrap_err();
        assert!(matches!(err, RequestError::Transport(_) | RequestError::Timeout(_)));
    }

    #[test]
    fn successful_round_trip_returns_the_joined_text() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "No visible cavities; "}, {"text": "mild plaque buildup."}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 270, "candidatesTokenCount": 12}
        }"#;
        let (base, server) = serve_once("200 OK", body, Duration::ZERO);
        let model = GeminiModel::new(config_at("gemini-2.0-flash", &base, None)).unwrap();

        let text = model.process_image(&small_jpeg(), "look at these teeth").unwrap();
        assert_eq!(text, "No visible cavities; mild plaque buildup.");

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /v1beta/models/gemini-2.0-flash:generateContent "));
        assert!(request.to_lowercase().contains("x-goog-api-key: test-key"));
        assert!(!request.contains("key=test-key"));
        let json_start = request.find('{').unwrap();
        let sent: serde_json::Value = serde_json::from_str(&request[json_start..]).unwrap();
        assert_eq!(sent["contents"][0]["parts"][0]["text"], "look at these teeth");
        assert_eq!(sent["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");
    }

    #[test]
    fn quota_rejection_is_an_api_error() {
        let (base, server) = serve_once("429 Too Many Requests", r#"{"error":"quota"}"#, Duration::ZERO);
        let model = GeminiModel::new(config_at("gemini-2.0-flash", &base, None)).unwrap();

        match model.process_image(&small_jpeg(), "prompt") {
            Err(RequestError::Api { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, r#"{"error":"quota"}"#);
            }
            other => panic!("expected an API error, got {:?}", other),
        }
        server.join().unwrap();
    }

    #[test]
    fn slow_reply_times_out_and_shows_as_failure() {
        let slow = Duration::from_secs(3);

        let (base, _server) = serve_once("200 OK", "{}", slow);
        let model = GeminiModel::new(config_at("gemini-2.0-flash", &base, Some(1))).unwrap();
        let err = model.process_image(&small_jpeg(), "prompt").unwrap_err();
        assert!(matches!(err, RequestError::Timeout(_)), "got {:?}", err);

        let (base, _server) = serve_once("200 OK", "{}", slow);
        let model = GeminiModel::new(config_at("gemini-2.0-flash", &base, Some(1))).unwrap();
        assert_eq!(request_diagnosis(&model, &small_jpeg(), "prompt"), DiagnosisResult::Failed);
    }
}
