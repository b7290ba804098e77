//! Mock collaborators for integration tests
//!
//! - `devices`: in-memory microphone and output device
//! - `transport`: scripted realtime connector recording outbound calls
//! - `gemini_mock`: local WebSocket server speaking the Gemini Live protocol

// Each test binary uses a different subset of these helpers
#![allow(dead_code)]

pub mod devices;
pub mod gemini_mock;
pub mod transport;
