//! Error types for the job engine

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for jobforge
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Backend I/O fault in a storage operation
    #[error("storage error: {0}")]
    Storage(String),

    /// An update targeted a job that does not exist
    #[error("job not found: {0}")]
    NotFound(String),

    /// Payload could not be serialized at the client boundary
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Payload could not be deserialized into the handler's input type
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Cron expression failed to parse
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression {
        /// The offending expression
        expression: String,
        /// Why it was rejected
        reason: String,
    },

    /// Cron search exhausted the four-year horizon without a match
    #[error("no occurrence of '{0}' within the next four years")]
    NoNextOccurrence(String),

    /// Generic errors with description
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a new storage error
    pub fn storage<T: Into<String>>(msg: T) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(id: T) -> Self {
        Error::NotFound(id.into())
    }

    /// Create a new invalid cron expression error
    pub fn invalid_cron<E: Into<String>, R: Into<String>>(expression: E, reason: R) -> Self {
        Error::InvalidCronExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Check whether this error is a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::storage("connection refused");
        assert_eq!(err.to_string(), "storage error: connection refused");

        let err = Error::invalid_cron("* * *", "expected 5 fields, found 3");
        assert!(err.to_string().contains("* * *"));
        assert!(err.to_string().contains("5 fields"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::not_found("abc").is_not_found());
        assert!(!Error::storage("boom").is_not_found());
    }
}
