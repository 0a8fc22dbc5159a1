use crate::status::IssueStatus;
use crate::types::IssueId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: IssueId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: IssueStatus, to: IssueStatus },

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
