/// Ошибки агента (для разбора, логирования и показа пользователю)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    /// Location/background capability refused. Fatal to `start()`.
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),
    #[error("Network: {0}")]
    Network(String),
    #[error("Unauthorized (401)")]
    Unauthorized,
    /// Refresh token itself was rejected or missing; the user must log in again.
    #[error("Session expired: {0}")]
    TerminalAuthFailure(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Parse: {0}")]
    Parse(String),
    #[error("Storage: {0}")]
    Storage(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl AgentError {
    /// Only these two reach the UI layer; everything else stays inside the cycle.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            AgentError::PermissionDenied | AgentError::TerminalAuthFailure(_)
        )
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Parse(e.to_string())
    }
}
