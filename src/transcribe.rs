//! Speech-to-text for spoken arguments.
//!
//! Uploaded audio is forwarded as-is to an OpenAI-compatible
//! `/v1/audio/transcriptions` endpoint; the transcript comes back as plain text
//! for the client to edit before submitting.

use async_trait::async_trait;
use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::api::ApiError;
use crate::llm::env_non_empty;

/// Largest clip accepted for transcription (25 MB, the OpenAI limit)
pub const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

/// Request body limit for uploads: one clip plus multipart framing
pub const MAX_UPLOAD_BYTES: usize = MAX_AUDIO_BYTES + 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("Speech-to-text request failed: {0}")]
    Request(String),

    #[error("Speech-to-text API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid speech-to-text response: {0}")]
    Parse(String),
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        filename: String,
        content_type: Option<String>,
    ) -> Result<String, TranscribeError>;
}

pub type SharedTranscriber = Option<Arc<dyn SpeechToText>>;

#[derive(Debug, Clone)]
pub struct TranscribeConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: u64,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com".to_string(),
            model: "whisper-1".to_string(),
            timeout: 60,
        }
    }
}

impl TranscribeConfig {
    /// STT_API_KEY falls back to OPENAI_API_KEY
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env_non_empty("STT_API_KEY").or_else(|| env_non_empty("OPENAI_API_KEY")),
            base_url: env_non_empty("STT_BASE_URL").unwrap_or(defaults.base_url),
            model: env_non_empty("STT_MODEL").unwrap_or(defaults.model),
            timeout: env_non_empty("STT_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout),
        }
    }

    /// None when no API key is configured
    pub fn build(&self) -> SharedTranscriber {
        let api_key = self.api_key.clone()?;
        Some(Arc::new(WhisperApi {
            client: reqwest::Client::new(),
            api_key,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            model: self.model.clone(),
            timeout: Duration::from_secs(self.timeout),
        }))
    }
}

/// OpenAI-compatible transcription endpoint
pub struct WhisperApi {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl SpeechToText for WhisperApi {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        filename: String,
        content_type: Option<String>,
    ) -> Result<String, TranscribeError> {
        let mut part = reqwest::multipart::Part::bytes(audio).file_name(filename);
        if let Some(mime) = content_type {
            part = part
                .mime_str(&mime)
                .map_err(|e| TranscribeError::Request(e.to_string()))?;
        }
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let url = format!("{}/v1/audio/transcriptions", self.base_url);
        tracing::debug!("Sending audio to {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TranscribeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::Parse(e.to_string()))?;
        Ok(parsed.text.trim().to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptResponse {
    pub transcript: String,
}

/// POST /api/transcribe
///
/// Expects a multipart form with the audio clip in a `file` (or `audio`) field.
pub async fn transcribe_handler(
    State(transcriber): State<SharedTranscriber>,
    mut multipart: Multipart,
) -> Result<Json<TranscriptResponse>, ApiError> {
    let transcriber = transcriber
        .ok_or_else(|| ApiError::Unavailable("speech-to-text is not configured".to_string()))?;

    let mut clip = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if !matches!(field.name(), Some("file") | Some("audio")) {
            continue;
        }
        let filename = field.file_name().unwrap_or("audio.webm").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        clip = Some((bytes.to_vec(), filename, content_type));
        break;
    }

    let (audio, filename, content_type) =
        clip.ok_or_else(|| ApiError::BadRequest("missing audio file".to_string()))?;
    if audio.is_empty() {
        return Err(ApiError::BadRequest("audio file is empty".to_string()));
    }
    if audio.len() > MAX_AUDIO_BYTES {
        return Err(ApiError::BadRequest("audio file is too large".to_string()));
    }

    tracing::info!("Transcribing {} ({} bytes)", filename, audio.len());
    let transcript = transcriber
        .transcribe(audio, filename, content_type)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;
    Ok(Json(TranscriptResponse { transcript }))
}
