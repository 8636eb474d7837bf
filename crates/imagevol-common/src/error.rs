//! Unified error types for the imagevol workspace.
//!
//! Higher-level crates wrap these variants into their own protocol-facing
//! error enums where a caller needs a different taxonomy.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ImagevolError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A hash validation failed.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// A permission or mount error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// The bytes handed to the manifest reader are not a supported manifest.
    #[error("invalid image manifest: {message}")]
    Manifest {
        /// Why the manifest was rejected.
        message: String,
    },

    /// The image copy tool failed for an image.
    #[error("fetching {image} failed: {message}")]
    Fetch {
        /// Image reference being fetched.
        image: String,
        /// Output or reason reported by the copy tool.
        message: String,
    },

    /// A resource is in use and the operation was refused.
    #[error("{id} is busy: {message}")]
    Busy {
        /// Identifier of the busy resource.
        id: String,
        /// What the resource is busy with.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl ImagevolError {
    /// Builds a closure mapping an [`std::io::Error`] to [`ImagevolError::Io`] at `path`.
    pub fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ImagevolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_at_keeps_path_in_message() {
        let err = ImagevolError::io_at(Path::new("/store/extract"))(std::io::Error::from(
            std::io::ErrorKind::PermissionDenied,
        ));
        assert!(err.to_string().starts_with("I/O error at /store/extract"));
    }

    #[test]
    fn fetch_error_names_image() {
        let err = ImagevolError::Fetch {
            image: "repo/app:v1".into(),
            message: "manifest unknown".into(),
        };
        assert_eq!(err.to_string(), "fetching repo/app:v1 failed: manifest unknown");
    }
}
