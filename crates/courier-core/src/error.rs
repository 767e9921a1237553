use thiserror::Error;

/// Failure of a messaging operation. Every core operation returns one of
/// these explicitly; nothing is swallowed on the way to the caller.
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Malformed input: empty participant list, empty message, bad emoji.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Actor is not a participant, or does not own the message.
    #[error("Not allowed: {0}")]
    Authorization(String),

    /// Referenced conversation or message does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Storage failed underneath the operation. No partial write is visible.
    #[error("Storage unavailable: {0}")]
    TransientIo(#[from] anyhow::Error),
}

pub type MessagingResult<T> = Result<T, MessagingError>;

impl MessagingError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_failures_are_transient() {
        assert!(MessagingError::from(anyhow::anyhow!("database is locked")).is_transient());
        assert!(!MessagingError::validation("empty").is_transient());
        assert!(!MessagingError::authorization("outsider").is_transient());
        assert!(!MessagingError::not_found("message").is_transient());
    }
}
