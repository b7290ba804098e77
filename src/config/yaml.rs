use serde::Deserialize;
use std::path::PathBuf;

use super::{ConfigError, ConfigResult};

/// Complete YAML configuration structure
///
/// Every field is optional so a file may configure only what it needs.
/// Values present here take precedence over environment variables.
///
/// # Example YAML structure
/// ```yaml
/// gemini:
///   api_key: "your-gemini-key"
///   model: "gemini-2.5-flash-native-audio-preview-09-2025"
///   voice: "Kore"
///   endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent"
///
/// audio:
///   capture_sample_rate: 16000
///   capture_frame_size: 4096
///   playback_sample_rate: 24000
///
/// session:
///   greeting_delay_ms: 100
///   confirmation_delay_ms: 500
///   log_capacity: 5
///   system_instruction: "You are the front desk of a hair salon..."
///   greeting_prompt: "Greet the caller."
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub gemini: Option<GeminiYaml>,
    pub audio: Option<AudioYaml>,
    pub session: Option<SessionYaml>,
}

/// Gemini Live connection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GeminiYaml {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub endpoint: Option<String>,
}

/// Audio pipeline settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub capture_sample_rate: Option<u32>,
    pub capture_frame_size: Option<usize>,
    pub playback_sample_rate: Option<u32>,
}

/// Session behaviour from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub greeting_delay_ms: Option<u64>,
    pub confirmation_delay_ms: Option<u64>,
    pub log_capacity: Option<usize>,
    pub system_instruction: Option<String>,
    pub greeting_prompt: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &PathBuf) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        Self::parse(&contents)
    }

    /// Parse YAML configuration from a string
    pub fn parse(contents: &str) -> ConfigResult<Self> {
        // An empty document deserializes to unit, not to an empty mapping
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}
