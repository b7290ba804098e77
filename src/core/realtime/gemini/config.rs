//! Gemini Live API configuration types.
//!
//! This module contains configuration types for the Gemini Live API:
//! - Endpoint and model defaults
//! - Prebuilt voice selection
//! - Audio formats on the wire

use serde::{Deserialize, Serialize};

/// Gemini Live API WebSocket endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model.
pub const GEMINI_LIVE_DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Sample rate the Live API expects for input audio.
pub const GEMINI_LIVE_INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio produced by the Live API.
pub const GEMINI_LIVE_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Mime type for outbound PCM at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Model resource name as the setup message expects it.
pub fn model_resource(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Prebuilt voices for Gemini Live speech output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeminiVoice {
    Puck,
    Charon,
    /// Kore voice (default)
    #[default]
    Kore,
    Fenrir,
    Aoede,
    Leda,
    Orus,
    Zephyr,
}

impl GeminiVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Aoede => "Aoede",
            Self::Leda => "Leda",
            Self::Orus => "Orus",
            Self::Zephyr => "Zephyr",
        }
    }

    /// Parse case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// Get all available voices.
    pub fn all() -> &'static [GeminiVoice] {
        &[
            Self::Puck,
            Self::Charon,
            Self::Kore,
            Self::Fenrir,
            Self::Aoede,
            Self::Leda,
            Self::Orus,
            Self::Zephyr,
        ]
    }
}

impl std::fmt::Display for GeminiVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
