//! Node publish handler.
//!
//! Publishing never waits for materialization. A request for an image that
//! is not ready returns [`NodeError::Unavailable`] and the node agent calls
//! again later. Unpublishing only removes the mount: the extracted image
//! stays cached for the next volume using it.

use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use imagevol_common::config::DriverConfig;
use imagevol_common::error::ImagevolError;
use imagevol_common::types::{Digest, ImageReference};
use imagevol_core::filesystem::mount::{BindOptions, HostMounter, Mounter};
use imagevol_image::coordinator::{Coordinator, Readiness};
use imagevol_image::fetch::{ImageFetcher, SkopeoFetcher};
use tokio::runtime::Handle;

use crate::error::NodeError;
use crate::request::{PublishVolumeRequest, UnpublishVolumeRequest};

/// Mode of target directories created by a publish.
const TARGET_DIR_MODE: u32 = 0o750;

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishVolumeResponse {
    /// Extracted image directory backing the volume.
    pub source: PathBuf,
    /// Manifest digest of the mounted image.
    pub digest: Digest,
    /// False if the target was already mounted and left untouched.
    pub mounted: bool,
}

/// Serves publish and unpublish calls for one node.
pub struct NodeServer {
    driver_name: String,
    node_id: String,
    coordinator: Coordinator,
    mounter: Arc<dyn Mounter>,
}

impl std::fmt::Debug for NodeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeServer")
            .field("driver_name", &self.driver_name)
            .field("node_id", &self.node_id)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl NodeServer {
    /// Builds a server from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the image store
    /// is unavailable.
    pub fn new(
        config: &DriverConfig,
        fetcher: Arc<dyn ImageFetcher>,
        mounter: Arc<dyn Mounter>,
        runtime: Handle,
    ) -> imagevol_common::error::Result<Self> {
        config.validate()?;
        let coordinator = Coordinator::new(&config.store, fetcher, runtime)?;
        tracing::info!(
            driver = %config.driver_name,
            version = %config.vendor_version,
            node = %config.node_id,
            "node server initialized"
        );
        Ok(Self {
            driver_name: config.driver_name.clone(),
            node_id: config.node_id.clone(),
            coordinator,
            mounter,
        })
    }

    /// Builds a server using `skopeo` and host mounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy tool cannot be found, the configuration
    /// is invalid, or the image store is unavailable.
    pub fn from_config(
        config: &DriverConfig,
        runtime: Handle,
    ) -> imagevol_common::error::Result<Self> {
        let fetcher = SkopeoFetcher::new(&config.fetcher)?;
        Self::new(config, Arc::new(fetcher), Arc::new(HostMounter), runtime)
    }

    /// Returns the materialization coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Publishes the requested image at the target path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed request, `Unavailable` while
    /// the image is being materialized, and `Internal` if mounting fails.
    pub fn publish_volume(
        &self,
        request: &PublishVolumeRequest,
    ) -> Result<PublishVolumeResponse, NodeError> {
        let Some(capability) = &request.capability else {
            return Err(NodeError::InvalidArgument(
                "Volume capability missing in request".into(),
            ));
        };
        if request.volume_id.is_empty() {
            return Err(NodeError::InvalidArgument(
                "Volume ID missing in request".into(),
            ));
        }
        if request.target_path.as_os_str().is_empty() {
            return Err(NodeError::InvalidArgument(
                "Target path missing in request".into(),
            ));
        }
        let image = request
            .image_reference()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| NodeError::InvalidArgument("Image missing in volume context".into()))?;
        let image = ImageReference::new(image)
            .map_err(|e| NodeError::InvalidArgument(e.to_string()))?;

        let (source, digest) = match self.coordinator.ensure_materialized(&image)? {
            Readiness::Ready { path, digest } => (path, digest),
            not_ready => {
                tracing::debug!(image = %image, volume = %request.volume_id, status = %not_ready, "image not ready");
                return Err(NodeError::Unavailable(format!("image {image}: {not_ready}")));
            }
        };

        let target = &request.target_path;
        if self.prepare_target(target)? {
            tracing::debug!(target = %target.display(), "target already mounted");
            return Ok(PublishVolumeResponse {
                source,
                digest,
                mounted: false,
            });
        }

        let options = BindOptions {
            readonly: request.readonly,
            flags: capability.mount_flags.clone(),
        };
        tracing::debug!(
            target = %target.display(),
            fs_type = %capability.fs_type,
            readonly = request.readonly,
            volume = %request.volume_id,
            flags = ?capability.mount_flags,
            "publishing volume"
        );
        self.mounter
            .bind_mount(&source, target, &options)
            .map_err(|e| NodeError::Internal(e.to_string()))?;

        tracing::info!(image = %image, volume = %request.volume_id, target = %target.display(), "volume published");
        Ok(PublishVolumeResponse {
            source,
            digest,
            mounted: true,
        })
    }

    /// Unmounts the volume at the target path. Cached image state is kept.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed request and `Internal` if the
    /// target cannot be inspected or unmounted.
    pub fn unpublish_volume(&self, request: &UnpublishVolumeRequest) -> Result<(), NodeError> {
        if request.volume_id.is_empty() {
            return Err(NodeError::InvalidArgument(
                "Volume ID missing in request".into(),
            ));
        }
        if request.target_path.as_os_str().is_empty() {
            return Err(NodeError::InvalidArgument(
                "Target path missing in request".into(),
            ));
        }
        let target = &request.target_path;

        match self.mounter.is_mount_point(target) {
            Ok(true) => self
                .mounter
                .unmount(target)
                .map_err(|e| NodeError::Internal(e.to_string()))?,
            Ok(false) => {}
            Err(e) if is_not_found(&e) => {
                tracing::debug!(target = %target.display(), "target already gone");
            }
            Err(e) => return Err(NodeError::Internal(e.to_string())),
        }
        tracing::info!(volume = %request.volume_id, target = %target.display(), "volume unpublished");
        Ok(())
    }

    /// Ensures the target directory exists. Returns true if it is already a mount point.
    fn prepare_target(&self, target: &Path) -> Result<bool, NodeError> {
        match self.mounter.is_mount_point(target) {
            Ok(mounted) => Ok(mounted),
            Err(e) if is_not_found(&e) => {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(TARGET_DIR_MODE)
                    .create(target)
                    .map_err(|e| NodeError::Internal(format!("{}: {e}", target.display())))?;
                Ok(false)
            }
            Err(e) => Err(NodeError::Internal(e.to_string())),
        }
    }
}

fn is_not_found(err: &ImagevolError) -> bool {
    matches!(err, ImagevolError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
}
