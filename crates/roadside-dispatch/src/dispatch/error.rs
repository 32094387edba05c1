use super::admission::QuotaDenial;
use super::repository::RepositoryError;

/// Outcome taxonomy shared by every dispatch operation. Each call fails with exactly one of
/// these and nothing is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    /// Lost the accept race or the request left `Pending`.
    #[error("request is no longer available")]
    Conflict,
    #[error("quota exceeded: {0}")]
    QuotaExceeded(QuotaDenial),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for DispatchError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => DispatchError::NotFound("record"),
            other => DispatchError::Internal(other.to_string()),
        }
    }
}

impl From<QuotaDenial> for DispatchError {
    fn from(value: QuotaDenial) -> Self {
        DispatchError::QuotaExceeded(value)
    }
}
