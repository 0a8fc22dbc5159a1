use std::time::Duration;

/// Ways a classifier call can fail. All of them mean "the model is
/// unavailable for this observation"; callers fall back rather than fail.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// The model service could not be reached.
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    #[error("Classifier timed out after {0:?}")]
    Timeout(Duration),

    /// The model service answered with a non-2xx status.
    #[error("Classifier API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The answer did not honour the classification contract.
    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ClassifierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClassifierError::Unavailable(format!("request timed out: {e}"))
        } else if e.is_decode() {
            ClassifierError::InvalidResponse(e.to_string())
        } else {
            ClassifierError::Unavailable(e.to_string())
        }
    }
}
