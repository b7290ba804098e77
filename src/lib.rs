pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use config::AgentConfig;
pub use core::*;
pub use errors::{AgentError, AgentResult};
