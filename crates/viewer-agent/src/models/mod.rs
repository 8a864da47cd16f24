//! Objects passed around by the agent runtime.
//!
//! The internal message model is the single source of truth; provider
//! wire formats (OpenRouter chat completions) and host-facing tool
//! payloads are converted to and from these structs at the edges.

pub mod content;
pub mod message;
pub mod role;
pub mod tool;
