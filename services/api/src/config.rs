use concierge_core::Modality;
use secrecy::SecretString;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Placeholder that `STORE_CONFIG_URL` must contain.
pub const STORE_ID_PLACEHOLDER: &str = "{store_id}";

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: SecretString,
    pub gemini_model: String,
    pub gemini_voice: String,
    pub response_modality: Modality,
    pub max_connect_retries: u32,
    pub backoff_base_secs: u64,
    pub retrieval_url: String,
    pub retrieval_token: Option<SecretString>,
    pub retrieval_top_k: u32,
    pub stt_url: String,
    pub stt_api_key: Option<SecretString>,
    pub store_config_url: Option<String>,
    pub log_level: Level,
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parsed::<SocketAddr>("BIND_ADDRESS", "0.0.0.0:8000")?;

        let gemini_api_key = SecretString::from(required("GEMINI_API_KEY")?);
        let gemini_model = optional("GEMINI_MODEL")
            .unwrap_or_else(|| gemini_realtime::client::DEFAULT_MODEL.to_string());
        let gemini_voice = optional("GEMINI_VOICE")
            .unwrap_or_else(|| gemini_realtime::client::DEFAULT_VOICE.to_string());
        let response_modality = parsed::<Modality>("RESPONSE_MODALITY", "text")?;

        let max_connect_retries = parsed::<u32>("MAX_CONNECT_RETRIES", "3")?;
        if max_connect_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONNECT_RETRIES".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let backoff_base_secs = parsed::<u64>("BACKOFF_BASE_SECS", "2")?;

        let retrieval_url = required("RETRIEVAL_URL")?;
        let retrieval_token = optional("RETRIEVAL_TOKEN").map(SecretString::from);
        let retrieval_top_k = parsed::<u32>("RETRIEVAL_TOP_K", "4")?;
        if retrieval_top_k == 0 {
            return Err(ConfigError::InvalidValue(
                "RETRIEVAL_TOP_K".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let stt_url = optional("STT_URL")
            .unwrap_or_else(|| crate::speech::DEFAULT_STT_URL.to_string());
        let stt_api_key = optional("STT_API_KEY").map(SecretString::from);

        let store_config_url = optional("STORE_CONFIG_URL");
        if let Some(url) = &store_config_url {
            if !url.contains(STORE_ID_PLACEHOLDER) {
                return Err(ConfigError::InvalidValue(
                    "STORE_CONFIG_URL".to_string(),
                    format!("'{}' does not contain {}", url, STORE_ID_PLACEHOLDER),
                ));
            }
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            gemini_api_key,
            gemini_model,
            gemini_voice,
            response_modality,
            max_connect_retries,
            backoff_base_secs,
            retrieval_url,
            retrieval_token,
            retrieval_top_k,
            stt_url,
            stt_api_key,
            store_config_url,
            log_level,
        })
    }
}
