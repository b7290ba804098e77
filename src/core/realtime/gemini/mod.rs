//! Gemini Live API module.
//!
//! This module provides real-time audio-to-audio streaming using the Gemini
//! Live `BidiGenerateContent` WebSocket API.
//!
//! # Features
//!
//! - Bidirectional audio streaming
//! - Input and output transcription
//! - Function calling with explicit tool responses
//! - Barge-in interruption signalling
//!
//! # Supported Voices
//!
//! Puck, Charon, Kore, Fenrir, Aoede, Leda, Orus, Zephyr
//!
//! # Example
//!
//! ```rust,ignore
//! use booking_agent::core::realtime::{GeminiLiveConnector, RealtimeConnector, SessionSetup};
//! use std::sync::Arc;
//!
//! let connector = GeminiLiveConnector::default();
//! let session = connector
//!     .connect(setup, Arc::new(|event| Box::pin(async move {
//!         println!("{:?}", event);
//!     })))
//!     .await?;
//!
//! session.send_text("Hello").await?;
//! ```

mod client;
mod config;
pub mod messages;

pub use client::{GeminiLiveClient, GeminiLiveConnector, build_setup};
pub use config::{
    GEMINI_LIVE_DEFAULT_MODEL, GEMINI_LIVE_INPUT_SAMPLE_RATE, GEMINI_LIVE_OUTPUT_SAMPLE_RATE,
    GEMINI_LIVE_URL, GeminiVoice, model_resource, pcm_mime_type,
};
