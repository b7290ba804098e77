//! Configuration for the booking agent
//!
//! Settings come from a YAML file, environment variables and `.env` values.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use booking_agent::config::AgentConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = AgentConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config_path = PathBuf::from("config.yaml");
//! let config = AgentConfig::from_file(&config_path)?;
//!
//! println!("Using model {}", config.gemini.model);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::audio::{CAPTURE_SAMPLE_RATE, DEFAULT_FRAME_SIZE, PLAYBACK_SAMPLE_RATE};
use crate::core::realtime::{GEMINI_LIVE_DEFAULT_MODEL, GEMINI_LIVE_URL, GeminiVoice};

mod env;
mod yaml;

pub use env::{
    API_KEY_FALLBACK_VAR, API_KEY_VAR, CONFIRMATION_DELAY_VAR, ENDPOINT_VAR, GREETING_DELAY_VAR,
    MODEL_VAR, VOICE_VAR,
};
pub use yaml::{AudioYaml, GeminiYaml, SessionYaml, YamlConfig};

/// Default delay before the greeting trigger is sent.
pub const DEFAULT_GREETING_DELAY_MS: u64 = 100;

/// Default simulated confirmation latency for `book_appointment`.
pub const DEFAULT_CONFIRMATION_DELAY_MS: u64 = 500;

/// Upper bound on the simulated confirmation latency.
pub const MAX_CONFIRMATION_DELAY_MS: u64 = 5000;

/// Default number of log entries kept.
pub const DEFAULT_LOG_CAPACITY: usize = 5;

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are the friendly front-desk assistant of a \
hair and beauty salon, speaking with a caller on the phone. Help the caller book an \
appointment. Collect their name, the service they want, the date, the time and their email \
address. Every time you learn a detail, call update_draft_booking with what you know so far. \
Once you have all five details, read them back, and when the caller agrees call \
book_appointment with every field. Keep your replies short and conversational.";

pub const DEFAULT_GREETING_PROMPT: &str =
    "The caller has just connected. Greet them warmly and ask how you can help.";

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Configuration Sections
// =============================================================================

/// Gemini Live connection settings.
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key; a missing key fails `connect`, not loading
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub endpoint: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: GEMINI_LIVE_DEFAULT_MODEL.to_string(),
            voice: GeminiVoice::default().to_string(),
            endpoint: GEMINI_LIVE_URL.to_string(),
        }
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Drop for GeminiConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

/// Audio pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    /// Samples per outbound capture frame
    pub capture_frame_size: usize,
    pub playback_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            capture_frame_size: DEFAULT_FRAME_SIZE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
        }
    }
}

/// Session behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub greeting_delay_ms: u64,
    pub confirmation_delay_ms: u64,
    pub log_capacity: usize,
    pub system_instruction: String,
    pub greeting_prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            greeting_delay_ms: DEFAULT_GREETING_DELAY_MS,
            confirmation_delay_ms: DEFAULT_CONFIRMATION_DELAY_MS,
            log_capacity: DEFAULT_LOG_CAPACITY,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            greeting_prompt: DEFAULT_GREETING_PROMPT.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn greeting_delay(&self) -> Duration {
        Duration::from_millis(self.greeting_delay_ms)
    }

    pub fn confirmation_delay(&self) -> Duration {
        Duration::from_millis(self.confirmation_delay_ms)
    }
}

/// Complete agent configuration.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub gemini: GeminiConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

impl AgentConfig {
    /// Load configuration from environment variables only.
    ///
    /// `.env` values must already be in the environment; `main` loads them
    /// with `dotenvy` at startup.
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self::merge(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment fallbacks.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// variable has an invalid format, or validation fails.
    pub fn from_file(path: &PathBuf) -> ConfigResult<Self> {
        let yaml = YamlConfig::from_file(path)?;
        let config = Self::merge(Some(yaml))?;
        config.validate()?;
        Ok(config)
    }

    fn merge(yaml: Option<YamlConfig>) -> ConfigResult<Self> {
        let mut env = env::EnvConfig::load()?;
        let yaml = yaml.unwrap_or_default();
        let gemini_yaml = yaml.gemini.unwrap_or_default();
        let audio_yaml = yaml.audio.unwrap_or_default();
        let session_yaml = yaml.session.unwrap_or_default();

        let mut config = Self::default();

        config.gemini.api_key = gemini_yaml.api_key.or_else(|| env.api_key.take());
        if let Some(model) = gemini_yaml.model.or_else(|| env.model.take()) {
            config.gemini.model = model;
        }
        if let Some(voice) = gemini_yaml.voice.or_else(|| env.voice.take()) {
            config.gemini.voice = voice;
        }
        if let Some(endpoint) = gemini_yaml.endpoint.or_else(|| env.endpoint.take()) {
            config.gemini.endpoint = endpoint;
        }

        if let Some(rate) = audio_yaml.capture_sample_rate {
            config.audio.capture_sample_rate = rate;
        }
        if let Some(size) = audio_yaml.capture_frame_size {
            config.audio.capture_frame_size = size;
        }
        if let Some(rate) = audio_yaml.playback_sample_rate {
            config.audio.playback_sample_rate = rate;
        }

        if let Some(ms) = session_yaml.greeting_delay_ms.or(env.greeting_delay_ms) {
            config.session.greeting_delay_ms = ms;
        }
        if let Some(ms) = session_yaml
            .confirmation_delay_ms
            .or(env.confirmation_delay_ms)
        {
            config.session.confirmation_delay_ms = ms;
        }
        if let Some(capacity) = session_yaml.log_capacity {
            config.session.log_capacity = capacity;
        }
        if let Some(instruction) = session_yaml.system_instruction {
            config.session.system_instruction = instruction;
        }
        if let Some(prompt) = session_yaml.greeting_prompt {
            config.session.greeting_prompt = prompt;
        }

        Ok(config)
    }

    /// Check the merged configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let frame = self.audio.capture_frame_size;
        if !frame.is_power_of_two() || !(256..=16384).contains(&frame) {
            return Err(ConfigError::Invalid(format!(
                "capture_frame_size must be a power of two between 256 and 16384, got {frame}"
            )));
        }
        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "sample rates must be greater than zero".to_string(),
            ));
        }
        // Model speech always arrives at the fixed output rate
        if self.audio.playback_sample_rate != PLAYBACK_SAMPLE_RATE {
            return Err(ConfigError::Invalid(format!(
                "playback_sample_rate must be {PLAYBACK_SAMPLE_RATE}, got {}",
                self.audio.playback_sample_rate
            )));
        }
        if self.session.log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "log_capacity must be at least 1".to_string(),
            ));
        }
        if self.session.confirmation_delay_ms > MAX_CONFIRMATION_DELAY_MS {
            return Err(ConfigError::Invalid(format!(
                "confirmation_delay_ms must not exceed {MAX_CONFIRMATION_DELAY_MS}, got {}",
                self.session.confirmation_delay_ms
            )));
        }
        if GeminiVoice::parse(&self.gemini.voice).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown voice '{}'",
                self.gemini.voice
            )));
        }
        if !(self.gemini.endpoint.starts_with("ws://") || self.gemini.endpoint.starts_with("wss://"))
        {
            return Err(ConfigError::Invalid(format!(
                "endpoint must be a ws:// or wss:// URL, got '{}'",
                self.gemini.endpoint
            )));
        }
        Ok(())
    }

    /// Whether a credential is configured.
    pub fn has_api_key(&self) -> bool {
        self.gemini
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        unsafe {
            for name in [
                API_KEY_VAR,
                API_KEY_FALLBACK_VAR,
                MODEL_VAR,
                VOICE_VAR,
                ENDPOINT_VAR,
                GREETING_DELAY_VAR,
                CONFIRMATION_DELAY_VAR,
            ] {
                env::remove_var(name);
            }
        }
    }

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, contents).unwrap();
        (temp_dir, path)
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = AgentConfig::from_env().unwrap();

        assert!(config.gemini.api_key.is_none());
        assert!(!config.has_api_key());
        assert_eq!(config.gemini.model, GEMINI_LIVE_DEFAULT_MODEL);
        assert_eq!(config.gemini.voice, "Kore");
        assert_eq!(config.audio.capture_sample_rate, 16000);
        assert_eq!(config.audio.capture_frame_size, 4096);
        assert_eq!(config.audio.playback_sample_rate, 24000);
        assert_eq!(config.session.greeting_delay(), Duration::from_millis(100));
        assert_eq!(
            config.session.confirmation_delay(),
            Duration::from_millis(500)
        );
        assert_eq!(config.session.log_capacity, 5);
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();

        unsafe {
            env::set_var(API_KEY_VAR, "env-key");
            env::set_var(MODEL_VAR, "env-model");
            env::set_var(VOICE_VAR, "puck");
            env::set_var(GREETING_DELAY_VAR, "40");
        }

        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.gemini.api_key.as_deref(), Some("env-key"));
        assert_eq!(config.gemini.model, "env-model");
        assert_eq!(config.gemini.voice, "puck");
        assert_eq!(config.session.greeting_delay_ms, 40);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let (_dir, path) = write_config(
            r#"
gemini:
  api_key: "yaml-key"
  voice: "Zephyr"
audio:
  capture_frame_size: 2048
session:
  log_capacity: 8
  greeting_prompt: "Say hello."
"#,
        );

        let config = AgentConfig::from_file(&path).unwrap();
        assert_eq!(config.gemini.api_key.as_deref(), Some("yaml-key"));
        assert_eq!(config.gemini.voice, "Zephyr");
        assert_eq!(config.audio.capture_frame_size, 2048);
        assert_eq!(config.session.log_capacity, 8);
        assert_eq!(config.session.greeting_prompt, "Say hello.");
        assert_eq!(config.session.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let (_dir, path) = write_config(
            r#"
gemini:
  api_key: "yaml-key"
session:
  confirmation_delay_ms: 250
"#,
        );

        unsafe {
            env::set_var(API_KEY_VAR, "env-key");
            env::set_var(MODEL_VAR, "env-model");
            env::set_var(CONFIRMATION_DELAY_VAR, "900");
        }

        let config = AgentConfig::from_file(&path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.gemini.api_key.as_deref(), Some("yaml-key"));
        assert_eq!(config.session.confirmation_delay_ms, 250);
        // ENV fills what YAML leaves out
        assert_eq!(config.gemini.model, "env-model");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let result = AgentConfig::from_file(&PathBuf::from("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    #[serial]
    fn test_validation_rejects_bad_frame_size() {
        cleanup_env_vars();

        let (_dir, path) = write_config("audio:\n  capture_frame_size: 1000\n");
        let err = AgentConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("capture_frame_size"));

        let (_dir, path) = write_config("audio:\n  capture_frame_size: 32768\n");
        assert!(AgentConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_validation_rules() {
        let mut config = AgentConfig::default();
        assert!(config.validate().is_ok());

        config.session.log_capacity = 0;
        assert!(config.validate().is_err());
        config.session.log_capacity = 5;

        config.session.confirmation_delay_ms = MAX_CONFIRMATION_DELAY_MS + 1;
        assert!(config.validate().is_err());
        config.session.confirmation_delay_ms = MAX_CONFIRMATION_DELAY_MS;
        assert!(config.validate().is_ok());

        config.audio.playback_sample_rate = 0;
        assert!(config.validate().is_err());
        config.audio.playback_sample_rate = 24000;

        config.gemini.voice = "alloy".to_string();
        assert!(config.validate().is_err());
        config.gemini.voice = "Kore".to_string();

        config.gemini.endpoint = "https://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_playback_rate_other_than_model_output() {
        let mut config = AgentConfig::default();
        config.audio.playback_sample_rate = 48000;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("playback_sample_rate must be 24000"));

        config.audio.playback_sample_rate = PLAYBACK_SAMPLE_RATE;
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_mismatched_playback_rate() {
        cleanup_env_vars();

        let (_dir, path) = write_config(
            r#"
audio:
  playback_sample_rate: 16000
"#,
        );

        let result = AgentConfig::from_file(&path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let mut config = AgentConfig::default();
        config.gemini.api_key = Some("super-secret".to_string());

        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_blank_api_key_is_not_a_credential() {
        let mut config = AgentConfig::default();
        config.gemini.api_key = Some("  ".to_string());
        assert!(!config.has_api_key());
    }
}
