//! Gemini `generateContent` client.
//!
//! Sends the prompt and a single side-by-side PNG (reference left, composite
//! right) and parses the first candidate's text as a feedback document.

use super::parse::parse_response;
use super::prompt::build_prompt;
use super::{AdjustmentResult, FeedbackEngine, FeedbackRequest};
use crate::error::FeedbackError;
use crate::render::{encode_png, side_by_side};
use crate::theme::Theme;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub temperature: f32,
}

impl GeminiConfig {
    /// Reads the engine settings from the environment.
    ///
    /// Required:
    /// - `GEMINI_API_KEY`
    ///
    /// Optional:
    /// - `FEEDBACK_MODEL`: default `gemini-2.5-pro`
    /// - `FEEDBACK_BASE_URL`: default Generative Language API v1beta
    /// - `FEEDBACK_CONNECT_TIMEOUT_SECS`: default 10
    pub fn from_env() -> Result<Self, FeedbackError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FeedbackError> {
        let api_key = lookup(API_KEY_VAR)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| FeedbackError::MissingApiKey {
                var: API_KEY_VAR.to_string(),
            })?;
        let model = lookup("FEEDBACK_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
        let base_url = lookup("FEEDBACK_BASE_URL")
            .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let connect_timeout_secs = lookup("FEEDBACK_CONNECT_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
        Ok(Self {
            api_key,
            model,
            base_url,
            connect_timeout_secs,
            temperature: 0.2,
        })
    }
}

pub struct GeminiEngine {
    http: reqwest::Client,
    config: GeminiConfig,
    theme: Theme,
}

impl GeminiEngine {
    /// No request timeout is set here; the refinement controller bounds each
    /// call itself.
    pub fn new(config: GeminiConfig, theme: Theme) -> Result<Self, FeedbackError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| FeedbackError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            config,
            theme,
        })
    }

    pub fn from_env(theme: Theme) -> Result<Self, FeedbackError> {
        Self::new(GeminiConfig::from_env()?, theme)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str, png: &[u8]) -> Result<String, FeedbackError> {
        let encoded = STANDARD.encode(png);
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [
                    Part::Text { text: prompt },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/png",
                            data: &encoded,
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                response_mime_type: "application/json",
            },
        };
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FeedbackError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| FeedbackError::Transport(e.to_string()))?;
        if status != 200 {
            return Err(FeedbackError::Api { status, body: text });
        }
        candidate_text(&text)
    }
}

#[async_trait::async_trait]
impl FeedbackEngine for GeminiEngine {
    async fn suggest_adjustments(
        &self,
        request: &FeedbackRequest<'_>,
    ) -> Result<AdjustmentResult, FeedbackError> {
        let panel = request.composite.width();
        let comparison = side_by_side(request.reference, request.composite, panel, &self.theme);
        let png = encode_png(&comparison).map_err(|e| FeedbackError::Transport(e.to_string()))?;
        let prompt = build_prompt(request);
        tracing::debug!(
            model = %self.config.model,
            iteration = request.iteration,
            image_bytes = png.len(),
            "requesting feedback"
        );
        let reply = self.generate(&prompt, &png).await?;
        parse_response(&reply)
    }
}

/// Concatenated text parts of the first candidate.
fn candidate_text(body: &str) -> Result<String, FeedbackError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| FeedbackError::Parse(e.to_string()))?;
    let parts = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| FeedbackError::Parse("response has no candidate content".to_string()))?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        return Err(FeedbackError::Parse("candidate has no text".to_string()));
    }
    Ok(text)
}

// Wire types

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: [Part<'a>; 2],
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig<'a> {
    temperature: f32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'a str,
}
