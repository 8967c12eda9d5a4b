//! Deepgram speech-to-text client.

use async_trait::async_trait;
use concierge_core::speech::{SpeechError, SpeechToText};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};

pub const DEFAULT_STT_URL: &str = "https://api.deepgram.com/v1/listen";
const STT_MODEL: &str = "nova-3";
const STT_LANGUAGE: &str = "en-US";

pub struct DeepgramClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
}

impl DeepgramClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            http,
            url: url.into(),
            api_key,
        }
    }
}

/// Pulls the first alternative's transcript out of a listen response.
pub fn transcript_from(body: &Value) -> Result<String, SpeechError> {
    let transcript = body
        .pointer("/results/channels/0/alternatives/0/transcript")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if transcript.is_empty() {
        return Err(SpeechError::NoTranscript);
    }
    Ok(transcript.to_string())
}

#[async_trait]
impl SpeechToText for DeepgramClient {
    #[instrument(skip(self, audio), fields(bytes = audio.len()))]
    async fn transcribe(&self, audio: &[u8], sample_rate: u32) -> Result<String, SpeechError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| SpeechError::Service("no speech-to-text credential is configured".into()))?;

        let sample_rate = sample_rate.to_string();
        let response = self
            .http
            .post(&self.url)
            .query(&[
                ("model", STT_MODEL),
                ("encoding", "linear16"),
                ("sample_rate", sample_rate.as_str()),
                ("channels", "1"),
                ("smart_format", "true"),
                ("language", STT_LANGUAGE),
            ])
            .header("Authorization", format!("Token {}", api_key.expose_secret()))
            .header("Content-Type", "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| SpeechError::Service(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Service(format!("{}: {}", status, body)));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| SpeechError::Service(e.to_string()))?;
        debug!(?body, "Speech-to-text response");
        transcript_from(&body)
    }
}
