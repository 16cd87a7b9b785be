use thiserror::Error;

/// Every failure the workflow core can report. None of these are fatal to the
/// process: the worst case is a stale queue view that the next refresh repairs.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    /// 2xx response whose envelope carries `success: false`.
    #[error("rejected by server: {message}")]
    Rejected { message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl WorkflowError {
    /// True for failures a later retry could plausibly fix.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkflowError::Transport(_) => true,
            WorkflowError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        WorkflowError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
