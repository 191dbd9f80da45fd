use thiserror::Error;

/// Core error taxonomy for the engine.
///
/// Retry policy is decided by the caller through [`RagError::is_retryable`]:
/// retryable provider failures and store write failures are retried with
/// backoff at the call sites that allow it, everything else surfaces
/// immediately.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("invalid configuration at `{path}`: {reason}")]
    InvalidConfig { path: String, reason: String },

    #[error(
        "embedding dimension mismatch: store expects {expected}, backend returned {actual}; \
         re-ingest with a matching embedding model or clear the store"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("provider error{}: {message}", match .status { Some(s) => format!(" (status {s})"), None => String::new() })]
    Provider {
        message: String,
        retryable: bool,
        status: Option<u16>,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("malformed model output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("query cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    /// A transient provider failure worth another attempt.
    pub fn provider_retryable(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: true,
            status: None,
        }
    }

    /// A provider failure that must not be retried.
    pub fn provider_fatal(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: false,
            status: None,
        }
    }

    pub fn invalid_config(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether a backoff-wrapped call site may try this operation again.
    ///
    /// Store errors are only retried where the caller opts in (document
    /// upserts); read paths surface them directly.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Store(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(RagError::provider_retryable("429").is_retryable());
        assert!(!RagError::provider_fatal("401").is_retryable());
        assert!(RagError::Store("write conflict".into()).is_retryable());
        assert!(!RagError::Cancelled.is_retryable());
        assert!(!RagError::invalid_config("llm.model", "empty").is_retryable());
    }

    #[test]
    fn provider_error_renders_status() {
        let err = RagError::Provider {
            message: "rate limited".into(),
            retryable: true,
            status: Some(429),
        };
        assert_eq!(err.to_string(), "provider error (status 429): rate limited");
    }
}
