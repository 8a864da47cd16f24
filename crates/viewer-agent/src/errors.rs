use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("No credential available for {0}")]
    CredentialUnavailable(String),

    #[error("Secure store backend unavailable: {0}")]
    StoreBackendUnavailable(String),

    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Host command failed: {0}")]
    HostCommandFailure(String),

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
