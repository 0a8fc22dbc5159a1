use urbanwatch_core::error::CoreError;
use urbanwatch_core::status::IssueStatus;
use urbanwatch_core::types::IssueId;
use urbanwatch_db::StoreError;

/// Errors from resolving and persisting issues.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Issue {0} not found")]
    IssueNotFound(IssueId),

    #[error("Invalid status transition for issue {id}: {from} -> {to}")]
    InvalidTransition {
        id: IssueId,
        from: IssueStatus,
        to: IssueStatus,
    },

    /// Every compare-and-swap attempt lost to a concurrent writer.
    #[error("Gave up after {attempts} conflicting attempts")]
    ContentionExhausted { attempts: u32 },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl PipelineError {
    /// Whether the whole operation may succeed if run again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::ContentionExhausted { .. } => true,
            Self::IssueNotFound(_) | Self::InvalidTransition { .. } | Self::Core(_) => false,
        }
    }
}
