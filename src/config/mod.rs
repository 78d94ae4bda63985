//! Configuration management for Vienta

pub mod file;

use std::path::PathBuf;

use secrecy::SecretString;

use crate::{Error, Result};

/// Default realtime model
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Default voice for new sessions
pub const DEFAULT_VOICE: &str = "sol";

/// Default control channel label
pub const DEFAULT_CHANNEL_LABEL: &str = "oai-events";

/// Default wake phrase label
pub const DEFAULT_WAKE_LABEL: &str = "vienta";

/// Upstream endpoint minting ephemeral session credentials
pub const DEFAULT_SESSIONS_URL: &str = "https://api.openai.com/v1/realtime/sessions";

/// Remote signaling endpoint
pub const DEFAULT_SIGNALING_URL: &str = "https://api.openai.com/v1/realtime";

/// Vienta configuration
#[derive(Debug)]
pub struct Config {
    /// Credential gateway service configuration
    pub gateway: GatewayConfig,

    /// Realtime session configuration
    pub session: SessionConfig,

    /// Wake word configuration
    pub wake_word: WakeWordConfig,
}

/// Credential gateway service configuration
#[derive(Debug)]
pub struct GatewayConfig {
    /// Port to listen on
    pub port: u16,

    /// Server-held API key (from `OPENAI_API_KEY`)
    pub api_key: Option<SecretString>,

    /// Wake word engine access key (from `WAKE_WORD_ACCESS_KEY`)
    pub wake_word_key: Option<SecretString>,

    /// Upstream endpoint minting ephemeral credentials
    pub sessions_url: String,

    /// Model requested for new sessions
    pub model: String,

    /// Voice requested for new sessions
    pub voice: String,

    /// Credential requests allowed per minute
    pub requests_per_minute: u32,
}

/// Realtime session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the credential gateway
    pub gateway_url: String,

    /// Remote signaling endpoint
    pub signaling_url: String,

    /// Realtime model identifier
    pub model: String,

    /// Label of the control channel opened alongside the audio leg
    pub channel_label: String,

    /// Caller-held long-lived key overriding the gateway's server key
    pub api_key: Option<SecretString>,
}

/// Wake word configuration
#[derive(Debug, Clone)]
pub struct WakeWordConfig {
    /// Listen for the wake phrase at startup
    pub enabled: bool,

    /// Label reported with detections
    pub label: String,

    /// Keyword file for the spotter
    pub keyword_path: PathBuf,

    /// Optional acoustic model reference
    pub model_path: Option<PathBuf>,

    /// Detection sensitivity (0.0 to 1.0)
    pub sensitivity: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:3000".to_string(),
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            api_key: None,
        }
    }
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            label: DEFAULT_WAKE_LABEL.to_string(),
            keyword_path: PathBuf::from("vienta.rpw"),
            model_path: None,
            sensitivity: 0.5,
        }
    }
}

impl Config {
    /// Load configuration from the environment and the TOML config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration with priority env > toml > default
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL is invalid
    pub fn resolve(
        fc: file::VientaConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let gateway = GatewayConfig {
            port: env("PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.gateway.port)
                .unwrap_or(3000),
            api_key: env("OPENAI_API_KEY")
                .or(fc.gateway.api_key)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            wake_word_key: env("WAKE_WORD_ACCESS_KEY")
                .or(fc.gateway.wake_word_key)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            sessions_url: fc
                .gateway
                .sessions_url
                .unwrap_or_else(|| DEFAULT_SESSIONS_URL.to_string()),
            model: fc
                .gateway
                .model
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: fc
                .gateway
                .voice
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            requests_per_minute: fc.gateway.requests_per_minute.unwrap_or(60),
        };

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            gateway_url: env("VIENTA_GATEWAY_URL")
                .or(fc.session.gateway_url)
                .unwrap_or(defaults.gateway_url),
            signaling_url: env("VIENTA_SIGNALING_URL")
                .or(fc.session.signaling_url)
                .unwrap_or(defaults.signaling_url),
            model: fc.session.model.unwrap_or(defaults.model),
            channel_label: fc.session.channel_label.unwrap_or(defaults.channel_label),
            api_key: env("VIENTA_USER_API_KEY")
                .or(fc.session.api_key)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
        };

        validate_url("session.gateway_url", &session.gateway_url)?;
        validate_url("session.signaling_url", &session.signaling_url)?;
        validate_url("gateway.sessions_url", &gateway.sessions_url)?;

        let ww_defaults = WakeWordConfig::default();
        let wake_word = WakeWordConfig {
            enabled: fc.wake_word.enabled.unwrap_or(ww_defaults.enabled),
            label: fc.wake_word.label.unwrap_or(ww_defaults.label),
            keyword_path: env("VIENTA_KEYWORD_PATH")
                .or(fc.wake_word.keyword_path)
                .map_or(ww_defaults.keyword_path, PathBuf::from),
            model_path: fc.wake_word.model_path.map(PathBuf::from),
            sensitivity: fc
                .wake_word
                .sensitivity
                .unwrap_or(ww_defaults.sensitivity)
                .clamp(0.0, 1.0),
        };

        Ok(Self {
            gateway,
            session,
            wake_word,
        })
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| Error::Config(format!("{field}: invalid url {value:?}: {e}")))
}
