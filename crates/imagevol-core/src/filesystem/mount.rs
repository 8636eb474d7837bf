//! Bind-mount utilities for exposing extracted images as volumes.
//!
//! The materialized tree is attached at the volume target with a bind
//! mount. Read-only and other per-mount flags need a second remount pass
//! because the kernel ignores them on the initial `MS_BIND` call.

use std::path::Path;

use imagevol_common::error::{ImagevolError, Result};

/// Options applied to a bind mount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindOptions {
    /// Remount the target read-only.
    pub readonly: bool,
    /// Extra mount flags requested by the caller (`nosuid`, `nodev`, `noexec`, `ro`).
    pub flags: Vec<String>,
}

impl BindOptions {
    /// Returns true if the mount must be read-only, either explicitly or via an `ro` flag.
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.readonly || self.flags.iter().any(|f| f == "ro")
    }

    /// Returns the option strings in `mount(8)` notation, starting with `bind`.
    #[must_use]
    pub fn to_options(&self) -> Vec<String> {
        let mut options = vec!["bind".to_string()];
        if self.is_readonly() {
            options.push("ro".into());
        }
        for flag in &self.flags {
            if flag != "ro" && flag != "bind" && !options.contains(flag) {
                options.push(flag.clone());
            }
        }
        options
    }
}

/// Host mount operations needed to publish and unpublish a volume.
pub trait Mounter: Send + Sync {
    /// Returns true if `path` is probably a mount point.
    ///
    /// # Errors
    ///
    /// Returns an `Io` error with `NotFound` kind if `path` does not exist.
    fn is_mount_point(&self, path: &Path) -> Result<bool>;

    /// Bind-mounts `source` onto `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `mount(2)` syscall fails.
    fn bind_mount(&self, source: &Path, target: &Path, options: &BindOptions) -> Result<()>;

    /// Unmounts whatever is mounted at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `umount(2)` syscall fails.
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// [`Mounter`] backed by the host kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostMounter;

impl Mounter for HostMounter {
    fn is_mount_point(&self, path: &Path) -> Result<bool> {
        is_likely_mount_point(path)
    }

    fn bind_mount(&self, source: &Path, target: &Path, options: &BindOptions) -> Result<()> {
        bind_mount(source, target, options)
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        unmount(target)
    }
}

/// Compares the device of `path` with the device of its parent.
///
/// A bind mount of a directory on the same device is not detected, which
/// matches the usual "likely not a mount point" heuristic.
///
/// # Errors
///
/// Returns an error if `path` or its parent cannot be inspected.
#[cfg(unix)]
pub fn is_likely_mount_point(path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::symlink_metadata(path).map_err(ImagevolError::io_at(path))?;
    let Some(parent) = path.parent() else {
        return Ok(true);
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let parent_meta = std::fs::symlink_metadata(parent).map_err(ImagevolError::io_at(parent))?;
    Ok(meta.dev() != parent_meta.dev() || meta.ino() == parent_meta.ino())
}

/// Stub for non-Unix platforms.
///
/// # Errors
///
/// Always returns an error. Mount points are only inspected on Unix.
#[cfg(not(unix))]
pub fn is_likely_mount_point(_path: &Path) -> Result<bool> {
    Err(ImagevolError::Config {
        message: "Unix required for mount point detection".into(),
    })
}

/// Creates a bind mount from `source` to `target`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall or the flag remount fails.
#[cfg(target_os = "linux")]
pub fn bind_mount(source: &Path, target: &Path, options: &BindOptions) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        options = ?options.to_options(),
        "creating bind mount"
    );

    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|e| ImagevolError::PermissionDenied {
        message: format!(
            "bind mount {} -> {} failed: {e}",
            source.display(),
            target.display()
        ),
    })?;

    let extra = remount_flags(options);
    if !extra.is_empty() {
        mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | extra,
            None::<&str>,
        )
        .map_err(|e| ImagevolError::PermissionDenied {
            message: format!("remount {} failed: {e}", target.display()),
        })?;
    }

    tracing::info!(target = %target.display(), readonly = options.is_readonly(), "bind mount created");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error. Bind mounts require Linux.
#[cfg(not(target_os = "linux"))]
pub fn bind_mount(_source: &Path, _target: &Path, _options: &BindOptions) -> Result<()> {
    Err(ImagevolError::Config {
        message: "Linux required for bind mounts".into(),
    })
}

/// Unmounts the filesystem at `target`.
///
/// # Errors
///
/// Returns an error if the `umount(2)` syscall fails.
#[cfg(target_os = "linux")]
pub fn unmount(target: &Path) -> Result<()> {
    nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(|e| {
        ImagevolError::PermissionDenied {
            message: format!("unmount {} failed: {e}", target.display()),
        }
    })?;
    tracing::info!(path = %target.display(), "unmounted");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error. Unmounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn unmount(_target: &Path) -> Result<()> {
    Err(ImagevolError::Config {
        message: "Linux required for unmount".into(),
    })
}

/// Maps requested flags to the remount flag set. Unknown flags are ignored.
#[cfg(target_os = "linux")]
fn remount_flags(options: &BindOptions) -> nix::mount::MsFlags {
    use nix::mount::MsFlags;

    let mut flags = MsFlags::empty();
    if options.is_readonly() {
        flags |= MsFlags::MS_RDONLY;
    }
    for flag in &options.flags {
        match flag.as_str() {
            "ro" | "bind" | "rw" => {}
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "nodev" => flags |= MsFlags::MS_NODEV,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            other => tracing::warn!(flag = other, "ignoring unsupported mount flag"),
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_start_with_bind() {
        let options = BindOptions::default();
        assert_eq!(options.to_options(), vec!["bind"]);
        assert!(!options.is_readonly());
    }

    #[test]
    fn readonly_adds_ro_once() {
        let options = BindOptions {
            readonly: true,
            flags: vec!["ro".into(), "nosuid".into()],
        };
        assert_eq!(options.to_options(), vec!["bind", "ro", "nosuid"]);
    }

    #[test]
    fn ro_flag_implies_readonly() {
        let options = BindOptions {
            readonly: false,
            flags: vec!["ro".into()],
        };
        assert!(options.is_readonly());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn remount_flags_map_known_flags() {
        use nix::mount::MsFlags;

        let options = BindOptions {
            readonly: true,
            flags: vec!["nodev".into(), "noexec".into(), "bogus".into()],
        };
        let flags = remount_flags(&options);
        assert!(flags.contains(MsFlags::MS_RDONLY));
        assert!(flags.contains(MsFlags::MS_NODEV));
        assert!(flags.contains(MsFlags::MS_NOEXEC));
        assert!(!flags.contains(MsFlags::MS_NOSUID));
    }

    #[cfg(unix)]
    #[test]
    fn plain_directory_is_not_a_mount_point() {
        let dir = tempfile::tempdir().expect("tempdir");
        let child = dir.path().join("target");
        std::fs::create_dir(&child).expect("mkdir");
        assert!(!is_likely_mount_point(&child).expect("inspect"));
    }

    #[cfg(unix)]
    #[test]
    fn missing_path_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = is_likely_mount_point(&dir.path().join("missing")).expect_err("missing");
        assert!(matches!(
            err,
            ImagevolError::Io { ref source, .. } if source.kind() == std::io::ErrorKind::NotFound
        ));
    }
}
