//! Environment variable loading.
//!
//! Values set in the process environment (including those loaded from `.env`
//! at startup) sit between the defaults and the YAML file.

use std::env;
use std::str::FromStr;

use super::{ConfigError, ConfigResult};

pub const API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const API_KEY_FALLBACK_VAR: &str = "GOOGLE_API_KEY";
pub const MODEL_VAR: &str = "BOOKING_AGENT_MODEL";
pub const VOICE_VAR: &str = "BOOKING_AGENT_VOICE";
pub const ENDPOINT_VAR: &str = "BOOKING_AGENT_ENDPOINT";
pub const GREETING_DELAY_VAR: &str = "BOOKING_AGENT_GREETING_DELAY_MS";
pub const CONFIRMATION_DELAY_VAR: &str = "BOOKING_AGENT_CONFIRMATION_DELAY_MS";

/// Settings read from the environment. `None` means unset.
#[derive(Debug, Default)]
pub(crate) struct EnvConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub endpoint: Option<String>,
    pub greeting_delay_ms: Option<u64>,
    pub confirmation_delay_ms: Option<u64>,
}

impl EnvConfig {
    pub fn load() -> ConfigResult<Self> {
        Ok(Self {
            api_key: var(API_KEY_VAR).or_else(|| var(API_KEY_FALLBACK_VAR)),
            model: var(MODEL_VAR),
            voice: var(VOICE_VAR),
            endpoint: var(ENDPOINT_VAR),
            greeting_delay_ms: parse_var(GREETING_DELAY_VAR)?,
            confirmation_delay_ms: parse_var(CONFIRMATION_DELAY_VAR)?,
        })
    }
}

impl Drop for EnvConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

/// Read a variable, treating blank values as unset.
fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &str) -> ConfigResult<Option<T>> {
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{name} must be a number, got '{raw}'"))),
        None => Ok(None),
    }
}
