//! Protocol-facing errors of the publish handler.

use imagevol_common::error::ImagevolError;
use thiserror::Error;

/// Outcome of a failed node call, in the node agent's status vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The request is malformed. Retrying the same request will not help.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The volume is not ready yet. The caller is expected to retry later.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The node failed to serve a well-formed request.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NodeError {
    /// Returns true if the caller should retry the same request later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns the status code name reported to the node agent.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Unavailable(_) => "Unavailable",
            Self::Internal(_) => "Internal",
        }
    }
}

impl From<ImagevolError> for NodeError {
    fn from(err: ImagevolError) -> Self {
        match err {
            ImagevolError::Fetch { .. } | ImagevolError::Busy { .. } => {
                Self::Unavailable(err.to_string())
            }
            ImagevolError::Config { .. } => Self::InvalidArgument(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(NodeError::Unavailable("extraction started".into()).is_retryable());
        assert!(!NodeError::InvalidArgument("x".into()).is_retryable());
        assert!(!NodeError::Internal("x".into()).is_retryable());
    }

    #[test]
    fn fetch_failures_map_to_unavailable() {
        let err = NodeError::from(ImagevolError::Fetch {
            image: "repo/app:v1".into(),
            message: "timeout".into(),
        });
        assert_eq!(err.code(), "Unavailable");
    }

    #[test]
    fn io_failures_map_to_internal() {
        let err = NodeError::from(ImagevolError::Io {
            path: "/store".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        assert_eq!(err.code(), "Internal");
    }
}
