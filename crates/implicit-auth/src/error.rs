//! Error types for correlation operations
//!
//! Only request initiation and storage can fail. Classifying an incoming
//! response never returns an error: unknown, spent or malformed responses are
//! reported through the envelope instead.

/// Errors from correlation operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("login already in progress")]
    AlreadyInProgress,

    #[error("token renewal already in progress for resource {0}")]
    RenewalAlreadyInProgress(String),

    #[error("token renewal timed out (state {0})")]
    RenewalTimeout(String),

    #[error("token renewal abandoned before completion (state {0})")]
    Abandoned(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Config(#[from] common::Error),
}

/// Result alias for correlation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages_are_descriptive() {
        assert_eq!(
            Error::AlreadyInProgress.to_string(),
            "login already in progress"
        );
        assert!(
            Error::RenewalAlreadyInProgress("https://graph.example".into())
                .to_string()
                .contains("https://graph.example")
        );
        assert!(Error::RenewalTimeout("abc".into()).to_string().contains("abc"));
    }

    #[test]
    fn config_error_is_transparent() {
        let err: Error = common::Error::Config("client_id is required".into()).into();
        assert_eq!(err.to_string(), "Configuration error: client_id is required");
    }
}
