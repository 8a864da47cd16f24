//! Agent tool-execution runtime for a molecular viewer.
//!
//! The embedding application supplies a [`host::ViewerHost`]; this crate
//! supplies credential resolution, the tool registry, the gateway
//! client, and the conversation loop that drives a remote reasoning
//! model against them.

pub mod credentials;
pub mod errors;
pub mod gateway;
pub mod host;
pub mod models;
pub mod providers;
pub mod registry;
pub mod session;
pub mod settings;
pub mod supervisor;

pub use errors::{AgentError, AgentResult};
pub use session::{ConversationSession, SessionEvent, SessionState, TurnOutcome};
pub use supervisor::{SessionMode, SessionSupervisor};
