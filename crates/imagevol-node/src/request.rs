//! Publish and unpublish requests as delivered by the node agent.

use std::collections::HashMap;
use std::path::PathBuf;

use imagevol_common::constants::IMAGE_CONTEXT_KEY;

/// Mount capability requested for a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountCapability {
    /// Filesystem type requested by the workload. Informational for bind mounts.
    pub fs_type: String,
    /// Extra mount flags such as `nosuid` or `noexec`.
    pub mount_flags: Vec<String>,
}

/// Request to expose an image at a target path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishVolumeRequest {
    /// Volume identifier assigned by the cluster.
    pub volume_id: String,
    /// Path where the volume must appear.
    pub target_path: PathBuf,
    /// Whether the volume is mounted read-only.
    pub readonly: bool,
    /// Requested mount capability. Required.
    pub capability: Option<MountCapability>,
    /// Volume attributes. The image reference is stored under `image`.
    pub volume_context: HashMap<String, String>,
}

impl PublishVolumeRequest {
    /// Creates a request with a default mount capability.
    #[must_use]
    pub fn new(volume_id: impl Into<String>, target_path: impl Into<PathBuf>) -> Self {
        Self {
            volume_id: volume_id.into(),
            target_path: target_path.into(),
            readonly: false,
            capability: Some(MountCapability::default()),
            volume_context: HashMap::new(),
        }
    }

    /// Sets the image reference attribute.
    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        let _ = self
            .volume_context
            .insert(IMAGE_CONTEXT_KEY.to_string(), image.into());
        self
    }

    /// Requests a read-only mount.
    #[must_use]
    pub const fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Adds a mount flag to the capability.
    #[must_use]
    pub fn mount_flag(mut self, flag: impl Into<String>) -> Self {
        self.capability
            .get_or_insert_with(MountCapability::default)
            .mount_flags
            .push(flag.into());
        self
    }

    /// Removes the mount capability.
    #[must_use]
    pub fn without_capability(mut self) -> Self {
        self.capability = None;
        self
    }

    /// Returns the image reference attribute, if present.
    #[must_use]
    pub fn image_reference(&self) -> Option<&str> {
        self.volume_context.get(IMAGE_CONTEXT_KEY).map(String::as_str)
    }
}

/// Request to remove a volume from a target path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpublishVolumeRequest {
    /// Volume identifier assigned by the cluster.
    pub volume_id: String,
    /// Path where the volume was published.
    pub target_path: PathBuf,
}

impl UnpublishVolumeRequest {
    /// Creates an unpublish request.
    #[must_use]
    pub fn new(volume_id: impl Into<String>, target_path: impl Into<PathBuf>) -> Self {
        Self {
            volume_id: volume_id.into(),
            target_path: target_path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_image_attribute() {
        let request = PublishVolumeRequest::new("vol-1", "/mnt/target").image("repo/app:v1");
        assert_eq!(request.image_reference(), Some("repo/app:v1"));
        assert_eq!(
            request.volume_context.get("image").map(String::as_str),
            Some("repo/app:v1")
        );
    }

    #[test]
    fn builder_collects_mount_flags() {
        let request = PublishVolumeRequest::new("vol-1", "/mnt/target")
            .readonly(true)
            .mount_flag("nosuid")
            .mount_flag("nodev");
        assert!(request.readonly);
        assert_eq!(
            request.capability.map(|c| c.mount_flags),
            Some(vec!["nosuid".to_string(), "nodev".to_string()])
        );
    }

    #[test]
    fn capability_can_be_removed() {
        let request = PublishVolumeRequest::new("vol-1", "/mnt/target").without_capability();
        assert!(request.capability.is_none());
    }
}
