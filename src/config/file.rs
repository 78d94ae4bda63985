//! TOML configuration file loading
//!
//! Supports `~/.config/vienta/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VientaConfigFile {
    /// Credential gateway service configuration
    #[serde(default)]
    pub gateway: GatewayFileConfig,

    /// Realtime session configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Wake word configuration
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,
}

/// Credential gateway configuration
#[derive(Debug, Default, Deserialize)]
pub struct GatewayFileConfig {
    /// Port the gateway listens on
    pub port: Option<u16>,

    /// Server-held long-lived API key
    pub api_key: Option<String>,

    /// Wake word engine access key handed out to clients
    pub wake_word_key: Option<String>,

    /// Upstream endpoint minting ephemeral session credentials
    pub sessions_url: Option<String>,

    /// Realtime model requested for new sessions
    pub model: Option<String>,

    /// Voice requested for new sessions
    pub voice: Option<String>,

    /// Credential requests allowed per minute
    pub requests_per_minute: Option<u32>,
}

/// Realtime session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Base URL of the credential gateway
    pub gateway_url: Option<String>,

    /// Remote signaling endpoint for the offer/answer exchange
    pub signaling_url: Option<String>,

    /// Realtime model identifier
    pub model: Option<String>,

    /// Label of the control channel
    pub channel_label: Option<String>,

    /// Caller-held API key overriding the gateway's server key
    pub api_key: Option<String>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    /// Listen for the wake phrase at startup
    pub enabled: Option<bool>,

    /// Label reported with detections (e.g. "vienta")
    pub label: Option<String>,

    /// Keyword file for the spotter
    pub keyword_path: Option<String>,

    /// Optional acoustic model reference
    pub model_path: Option<String>,

    /// Detection sensitivity (0.0 to 1.0)
    pub sensitivity: Option<f32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VientaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VientaConfigFile {
    config_file_path().map_or_else(VientaConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Returns `VientaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_from(path: &Path) -> VientaConfigFile {
    if !path.exists() {
        return VientaConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VientaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VientaConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/vienta/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("vienta").join("config.toml"))
}
