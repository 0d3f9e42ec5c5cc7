use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("{0}")]
    Message(String),
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    Validation(String),
    #[error("tool execution failed: {0}")]
    HandlerExecution(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("iteration limit exceeded after {0} model round trips")]
    IterationLimitExceeded(u32),
    #[error("session cancelled")]
    Cancelled,
    #[error("session '{0}' not found")]
    SessionNotFound(String),
    #[error("session '{0}' is already processing a turn")]
    SessionBusy(String),
    #[error("session limit of {0} reached")]
    TooManySessions(usize),
    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Message(_) => "internal",
            AppError::DuplicateTool(_) => "duplicate_tool",
            AppError::UnknownTool(_) => "unknown_tool",
            AppError::Validation(_) => "validation",
            AppError::HandlerExecution(_) => "handler_execution",
            AppError::ModelUnavailable(_) => "model_unavailable",
            AppError::IterationLimitExceeded(_) => "iteration_limit_exceeded",
            AppError::Cancelled => "cancelled",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::SessionBusy(_) => "session_busy",
            AppError::TooManySessions(_) => "too_many_sessions",
            AppError::Config(_) => "config",
        }
    }

    /// Errors that end an orchestration turn in the failed state.
    pub fn is_loop_fatal(&self) -> bool {
        matches!(
            self,
            AppError::ModelUnavailable(_) | AppError::IterationLimitExceeded(_) | AppError::Cancelled
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::Message(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::Message(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        AppError::Message(value.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(value: toml::de::Error) -> Self {
        AppError::Config(value.to_string())
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
