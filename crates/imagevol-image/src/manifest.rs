//! Image manifest parsing.
//!
//! The copy tool stores the image manifest next to the layer blobs. The
//! manifest determines which blobs are layers and the order in which they
//! must be applied: bottom layer first.

use imagevol_common::error::{ImagevolError, Result};
use imagevol_common::types::Digest;
use serde::Deserialize;

/// Docker image manifest, schema 2.
pub const DOCKER_V2S2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker image manifest, schema 1 (unsigned).
pub const DOCKER_V2S1_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+json";
/// Docker image manifest, schema 1 (signed).
pub const DOCKER_V2S1_SIGNED_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
/// Docker multi-platform manifest list.
pub const DOCKER_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image manifest.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Encoding a manifest was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Docker schema 2.
    DockerV2Schema2,
    /// Docker schema 1, layers listed top-most first.
    DockerV2Schema1,
    /// OCI image manifest.
    Oci,
}

/// One layer referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    /// Content digest of the compressed layer blob.
    pub digest: Digest,
    /// Declared blob size, when the encoding carries one.
    pub size: Option<u64>,
    /// Declared media type, when the encoding carries one.
    pub media_type: Option<String>,
}

/// A parsed single-image manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageManifest {
    /// Encoding of the manifest.
    pub kind: ManifestKind,
    /// Layers in application order, bottom first.
    pub layers: Vec<LayerDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    schema_version: Option<u32>,
    media_type: Option<String>,
    layers: Option<Vec<RawDescriptor>>,
    fs_layers: Option<Vec<RawFsLayer>>,
    manifests: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    media_type: Option<String>,
    digest: String,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFsLayer {
    blob_sum: String,
}

impl ImageManifest {
    /// Parses manifest bytes, guessing the encoding from its content.
    ///
    /// # Errors
    ///
    /// Returns `ImagevolError::Manifest` if the bytes are not JSON, are a
    /// manifest list or index, or carry a malformed layer digest.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawManifest =
            serde_json::from_slice(bytes).map_err(|e| ImagevolError::Manifest {
                message: e.to_string(),
            })?;

        let kind = guess_kind(&raw)?;
        let layers = match kind {
            ManifestKind::DockerV2Schema2 | ManifestKind::Oci => raw
                .layers
                .ok_or_else(|| ImagevolError::Manifest {
                    message: "manifest has no layers field".into(),
                })?
                .into_iter()
                .map(|d| {
                    Ok(LayerDescriptor {
                        digest: parse_layer_digest(&d.digest)?,
                        size: d.size,
                        media_type: d.media_type,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            ManifestKind::DockerV2Schema1 => raw
                .fs_layers
                .ok_or_else(|| ImagevolError::Manifest {
                    message: "schema 1 manifest has no fsLayers field".into(),
                })?
                .into_iter()
                .rev()
                .map(|l| {
                    Ok(LayerDescriptor {
                        digest: parse_layer_digest(&l.blob_sum)?,
                        size: None,
                        media_type: None,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        if layers.len() > imagevol_common::constants::MAX_IMAGE_LAYERS {
            return Err(ImagevolError::Manifest {
                message: format!(
                    "manifest lists {} layers, at most {} are supported",
                    layers.len(),
                    imagevol_common::constants::MAX_IMAGE_LAYERS
                ),
            });
        }

        Ok(Self { kind, layers })
    }

    /// Returns the layer digests in application order.
    #[must_use]
    pub fn layer_digests(&self) -> Vec<Digest> {
        self.layers.iter().map(|l| l.digest.clone()).collect()
    }
}

/// Reads the ordered list of layer digests from manifest bytes.
///
/// # Errors
///
/// Returns `ImagevolError::Manifest` if the bytes are not a recognized
/// single-image manifest.
pub fn read_layer_list(bytes: &[u8]) -> Result<Vec<Digest>> {
    Ok(ImageManifest::parse(bytes)?.layer_digests())
}

fn guess_kind(raw: &RawManifest) -> Result<ManifestKind> {
    match raw.media_type.as_deref() {
        Some(DOCKER_V2S2_MEDIA_TYPE) => return Ok(ManifestKind::DockerV2Schema2),
        Some(OCI_MANIFEST_MEDIA_TYPE) => return Ok(ManifestKind::Oci),
        Some(DOCKER_V2S1_MEDIA_TYPE | DOCKER_V2S1_SIGNED_MEDIA_TYPE) => {
            return Ok(ManifestKind::DockerV2Schema1);
        }
        Some(media_type @ (DOCKER_LIST_MEDIA_TYPE | OCI_INDEX_MEDIA_TYPE)) => {
            return Err(ImagevolError::Manifest {
                message: format!("{media_type} is a multi-image list, not an image manifest"),
            });
        }
        Some(_) | None => {}
    }

    if raw.manifests.is_some() {
        return Err(ImagevolError::Manifest {
            message: "manifest list or index is not an image manifest".into(),
        });
    }
    match raw.schema_version {
        Some(1) if raw.fs_layers.is_some() => Ok(ManifestKind::DockerV2Schema1),
        Some(2) if raw.layers.is_some() => Ok(if raw.media_type.is_none() {
            ManifestKind::Oci
        } else {
            ManifestKind::DockerV2Schema2
        }),
        _ => Err(ImagevolError::Manifest {
            message: format!(
                "unrecognized manifest (schemaVersion {:?}, mediaType {:?})",
                raw.schema_version, raw.media_type
            ),
        }),
    }
}

fn parse_layer_digest(value: &str) -> Result<Digest> {
    Digest::parse(value).map_err(|e| ImagevolError::Manifest {
        message: format!("invalid layer digest: {e}"),
    })
}
