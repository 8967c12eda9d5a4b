//! The speech-to-text collaborator seam.

use async_trait::async_trait;
use base64::Engine;

#[cfg(test)]
use mockall::automock;

/// Sample rate assumed when an inbound mime type does not carry one.
pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("audio payload is not valid base64: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
    #[error("speech-to-text service failed: {0}")]
    Service(String),
    #[error("No transcription received")]
    NoTranscript,
}

/// Converts caller audio (16-bit little-endian mono PCM) into text.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &[u8], sample_rate: u32) -> Result<String, SpeechError>;
}

/// Reads the `rate` parameter of a mime type such as `audio/pcm;rate=44100`.
pub fn parse_sample_rate(mime_type: &str) -> u32 {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(DEFAULT_INPUT_SAMPLE_RATE)
}

pub fn decode_audio(payload: &str) -> Result<Vec<u8>, SpeechError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(payload.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_rate() {
        assert_eq!(parse_sample_rate("audio/pcm;rate=44100"), 44_100);
        assert_eq!(parse_sample_rate("audio/pcm; rate=8000"), 8_000);
        assert_eq!(parse_sample_rate("audio/pcm"), DEFAULT_INPUT_SAMPLE_RATE);
        assert_eq!(parse_sample_rate("audio/pcm;rate=fast"), DEFAULT_INPUT_SAMPLE_RATE);
    }

    #[test]
    fn test_decode_audio() {
        assert_eq!(decode_audio("AAH/").unwrap(), vec![0x00, 0x01, 0xff]);
        assert!(matches!(
            decode_audio("not base64!"),
            Err(SpeechError::InvalidPayload(_))
        ));
    }
}
