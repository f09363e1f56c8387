//! Error types for the conversational agent core

use thiserror::Error;

/// Errors from a capability server connection
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Server process failed to start or the handshake never completed
    #[error("Capability server unreachable: {0}")]
    Unreachable(String),

    /// Unknown tool, resource, or prompt name
    #[error("Not found: {0}")]
    NotFound(String),

    /// Well-formed transport message that violates the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Tool ran but reported or raised a failure
    #[error("Tool execution error: {0}")]
    ToolExecution(String),
}

/// Errors from the language-model gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Gateway rejected the call
    #[error("Gateway API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Missing or invalid credentials
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Gateway not reachable
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed gateway response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_connect() {
            GatewayError::Network(format!("Connection error: {}", err))
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

/// Errors surfaced by a conversation run
#[derive(Debug, Error)]
pub enum SessionError {
    /// Gateway invocation failed; the turn is aborted with no assistant
    /// response recorded
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Capability failure outside tool dispatch (setup, catalog gathering,
    /// resource resolution)
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// Configured turn cap exceeded without a terminal response
    #[error("Turn limit ({0}) reached without a final answer")]
    TurnLimit(u32),
}

/// Result type alias for capability operations
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;
