//! Reasoning-model providers.
//!
//! The session loop only knows the [`Provider`] trait; the OpenRouter
//! implementation converts the internal message model to and from the
//! chat-completions wire format at this boundary.

pub mod base;
pub mod mock;
pub mod openrouter;

pub use base::{Provider, Usage};
pub use mock::MockProvider;
pub use openrouter::OpenRouterProvider;
