use std::error::Error;
use thiserror::Error;

/// Result alias for save operations.
pub type SaveResult<T> = Result<T, SaveError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Failure classes reported by the score persistence collaborator.
#[derive(Debug, Error)]
pub enum SaveError {
    /// The collaborator rejected the score.
    #[error("score rejected: {0}")]
    Validation(String),
    /// The match does not exist (anymore).
    #[error("match not found: {0}")]
    NotFound(String),
    /// The caller is not allowed to record scores for this match.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The backend could not be reached.
    #[error(transparent)]
    Unavailable(#[from] StorageError),
}

impl SaveError {
    /// Whether the same save may succeed if the caller tries again later.
    ///
    /// Nothing retries automatically; the caller decides.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SaveError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn only_unavailable_backends_are_retryable() {
        let offline = StorageError::unavailable(
            "score backend offline".into(),
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(SaveError::from(offline).is_retryable());
        assert!(!SaveError::Validation("set 2 incomplete".into()).is_retryable());
        assert!(!SaveError::Unauthorized("expired session".into()).is_retryable());
    }
}
