use serde::Serialize;
use std::fmt;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum CellyardError {
    CellNotFound {
        cell_id: String,
    },
    StepTimeout {
        step: String,
        budget_ms: u64,
    },
    TerminalNotRunning {
        owner: String,
    },
    WorktreeRemovalFailed {
        path: String,
        message: String,
    },
    DatabaseError {
        message: String,
    },
    InvalidInput {
        field: String,
        message: String,
    },
    ConfigError {
        key: String,
        message: String,
    },
    ServiceNotFound {
        service_id: String,
    },
    PortUnavailable {
        port: u16,
    },
}

impl CellyardError {
    pub fn step_timeout(step: &str, budget: std::time::Duration) -> Self {
        CellyardError::StepTimeout {
            step: step.to_string(),
            budget_ms: budget.as_millis() as u64,
        }
    }

    pub fn worktree(path: impl ToString, error: impl ToString) -> Self {
        CellyardError::WorktreeRemovalFailed {
            path: path.to_string(),
            message: error.to_string(),
        }
    }

    pub fn invalid_input(field: &str, message: impl ToString) -> Self {
        CellyardError::InvalidInput {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn config(key: &str, message: impl ToString) -> Self {
        CellyardError::ConfigError {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::StepTimeout { .. })
    }
}

impl fmt::Display for CellyardError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::CellNotFound { cell_id } => write!(f, "Cell '{cell_id}' not found"),
            Self::StepTimeout { step, budget_ms } => {
                write!(f, "Step '{step}' timed out after {budget_ms}ms")
            }
            Self::TerminalNotRunning { owner } => {
                write!(f, "Terminal for '{owner}' is not running")
            }
            Self::WorktreeRemovalFailed { path, message } => {
                write!(f, "Failed to remove worktree at {path}: {message}")
            }
            Self::DatabaseError { message } => write!(f, "Database error: {message}"),
            Self::InvalidInput { field, message } => {
                write!(f, "Invalid input for field '{field}': {message}")
            }
            Self::ConfigError { key, message } => {
                write!(f, "Configuration error for key '{key}': {message}")
            }
            Self::ServiceNotFound { service_id } => {
                write!(f, "Service '{service_id}' not found")
            }
            Self::PortUnavailable { port } => write!(f, "Port {port} is not available"),
        }
    }
}

impl std::error::Error for CellyardError {}

impl From<pty_host::PtyHostError> for CellyardError {
    fn from(error: pty_host::PtyHostError) -> Self {
        match error {
            pty_host::PtyHostError::NotRunning { owner } => Self::TerminalNotRunning { owner },
            other => Self::InvalidInput {
                field: "terminal".to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<CellyardError> for String {
    fn from(error: CellyardError) -> Self {
        error.to_string()
    }
}
