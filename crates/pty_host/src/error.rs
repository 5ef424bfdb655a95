use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyHostError {
    #[error("terminal '{owner}' is not running")]
    NotRunning { owner: String },

    #[error("failed to spawn terminal for '{owner}': {message}")]
    Spawn { owner: String, message: String },

    #[error("terminal i/o failed for '{owner}': {source}")]
    Io {
        owner: String,
        #[source]
        source: std::io::Error,
    },
}

impl PtyHostError {
    pub fn not_running(owner: impl ToString) -> Self {
        Self::NotRunning {
            owner: owner.to_string(),
        }
    }

    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning { .. })
    }
}

pub type Result<T> = std::result::Result<T, PtyHostError>;
