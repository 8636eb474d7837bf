//! Domain primitive types used across the imagevol workspace.

use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ImagevolError, Result};

/// Reference naming a container image, e.g. `registry.local/repo/app:v1`.
///
/// The string is kept verbatim and used as the cache key for an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference(String);

impl ImageReference {
    /// Creates a reference from a non-empty string.
    ///
    /// # Errors
    ///
    /// Returns `ImagevolError::Config` if the reference is empty, contains a
    /// NUL byte, or would escape the store through `..` segments.
    pub fn new(reference: impl Into<String>) -> Result<Self> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(ImagevolError::Config {
                message: "image reference is empty".into(),
            });
        }
        if reference.contains('\0') {
            return Err(ImagevolError::Config {
                message: format!("image reference contains a NUL byte: {reference:?}"),
            });
        }
        if Path::new(&reference)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ImagevolError::Config {
                message: format!("image reference is not a relative name: {reference}"),
            });
        }
        Ok(Self(reference))
    }

    /// Returns the reference as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the reference as a single path component, with `/` replaced by `_`.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.0.replace('/', "_")
    }

    /// Returns the source argument handed to the image copy tool.
    #[must_use]
    pub fn transport_source(&self) -> String {
        format!("docker://{}", self.0)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ImageReference {
    type Err = ImagevolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Content-addressed identifier of the form `<algorithm>:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    encoded: String,
}

impl Digest {
    /// Parses a digest string such as `sha256:790b5255...`.
    ///
    /// # Errors
    ///
    /// Returns `ImagevolError::Config` if the separator is missing, either
    /// half is empty, or a sha256 digest is not 64 lowercase hex characters.
    pub fn parse(value: &str) -> Result<Self> {
        let Some((algorithm, encoded)) = value.split_once(':') else {
            return Err(ImagevolError::Config {
                message: format!("digest {value} malformed"),
            });
        };
        if algorithm.is_empty() || encoded.is_empty() {
            return Err(ImagevolError::Config {
                message: format!("digest {value} malformed"),
            });
        }
        if !encoded
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, 'a'..='z' | 'A'..='Z' | '=' | '_' | '-'))
        {
            return Err(ImagevolError::Config {
                message: format!("digest {value} has invalid characters"),
            });
        }
        if algorithm == "sha256"
            && (encoded.len() != crate::constants::SHA256_HEX_LENGTH
                || !encoded.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')))
        {
            return Err(ImagevolError::Config {
                message: format!("invalid SHA-256 digest: {value}"),
            });
        }
        Ok(Self {
            algorithm: algorithm.to_string(),
            encoded: encoded.to_string(),
        })
    }

    /// Builds a sha256 digest from its hex encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if `hex` is not a valid SHA-256 hex string.
    pub fn sha256(hex: &str) -> Result<Self> {
        Self::parse(&format!("sha256:{hex}"))
    }

    /// Returns the algorithm part, e.g. `sha256`.
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Returns the encoded part without the algorithm prefix.
    ///
    /// This is the blob file name in a fetched image directory.
    #[must_use]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for Digest {
    type Err = ImagevolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = ImagevolError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "790b52558236313f0939403be37e5e5e7c767602975ba3f740ad887a3e28f1ed";

    #[test]
    fn reference_file_name_replaces_separators() {
        let image = ImageReference::new("registry.local/repo/app:v1").expect("valid");
        assert_eq!(image.file_name(), "registry.local_repo_app:v1");
    }

    #[test]
    fn reference_rejects_empty_and_traversal() {
        assert!(ImageReference::new("").is_err());
        assert!(ImageReference::new("   ").is_err());
        assert!(ImageReference::new("../etc/passwd").is_err());
        assert!(ImageReference::new("/abs/app:v1").is_err());
    }

    #[test]
    fn reference_transport_source_uses_docker_scheme() {
        let image = ImageReference::new("repo/app:v1").expect("valid");
        assert_eq!(image.transport_source(), "docker://repo/app:v1");
    }

    #[test]
    fn digest_parse_splits_algorithm() {
        let digest = Digest::parse(&format!("sha256:{HEX}")).expect("valid");
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.encoded(), HEX);
        assert_eq!(digest.to_string(), format!("sha256:{HEX}"));
    }

    #[test]
    fn digest_parse_rejects_malformed() {
        assert!(Digest::parse(HEX).is_err());
        assert!(Digest::parse("sha256:").is_err());
        assert!(Digest::parse("sha256:abc").is_err());
        assert!(Digest::parse("sha256:../../etc").is_err());
    }

    #[test]
    fn digest_serializes_as_string() {
        let digest = Digest::sha256(HEX).expect("valid");
        let json = serde_json::to_string(&digest).expect("serialize");
        assert_eq!(json, format!("\"sha256:{HEX}\""));
        let back: Digest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, digest);
    }
}
