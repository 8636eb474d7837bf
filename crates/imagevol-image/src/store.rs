//! On-disk layout of the image store.
//!
//! All materialization state lives under one root directory so it can be
//! inspected and recovered after a restart:
//!
//! ```text
//! <root>/inprogress/<ref>      in-progress marker (JSON attempt token + digest)
//! <root>/inprogress/<ref>.reclaim-<uuid>   marker being reclaimed, short-lived
//! <root>/request/<ref>         request marker, mtime = last publish request
//! <root>/copy/<ref>/           staging area: manifest.json + layer blobs
//! <root>/extract/<digest>/     complete materialized tree
//! <root>/extract/<digest>.partial-<token>/   tree of a running attempt
//! <root>/digest/<ref>          digest last materialized for the reference
//! ```
//!
//! `<ref>` is the image reference with `/` replaced by `_`.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use imagevol_common::config::StoreConfig;
use imagevol_common::constants::{COPY_DIR, DIGEST_DIR, EXTRACT_DIR, IN_PROGRESS_DIR, REQUEST_DIR};
use imagevol_common::error::{ImagevolError, Result};
use imagevol_common::types::{Digest, ImageReference};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Contents of an in-progress marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptMarker {
    /// Generation token of the attempt owning the marker.
    pub token: Uuid,
    /// Manifest digest the attempt is materializing.
    pub digest: Digest,
}

impl AttemptMarker {
    /// Creates a marker with a fresh token.
    #[must_use]
    pub fn new(digest: Digest) -> Self {
        Self {
            token: Uuid::new_v4(),
            digest,
        }
    }
}

/// An in-progress marker as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InProgress {
    /// Last modification time of the marker.
    pub since: SystemTime,
    /// Parsed marker contents. `None` if the marker is empty or unreadable,
    /// e.g. after a crash between creating and writing it.
    pub marker: Option<AttemptMarker>,
}

/// Paths and marker operations of the image store.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Opens the store at an existing root and creates its subareas.
    ///
    /// # Errors
    ///
    /// Returns `ImagevolError::Config` for an invalid configuration,
    /// `ImagevolError::NotFound` if the root does not exist, or an I/O error
    /// if a subarea cannot be created.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let root = config.store_dir.clone();
        if !root.is_dir() {
            return Err(ImagevolError::NotFound {
                kind: "image store",
                id: root.display().to_string(),
            });
        }
        for area in [IN_PROGRESS_DIR, REQUEST_DIR, COPY_DIR, EXTRACT_DIR, DIGEST_DIR] {
            let dir = root.join(area);
            fs::create_dir_all(&dir).map_err(ImagevolError::io_at(&dir))?;
        }
        tracing::info!(path = %root.display(), "image store opened");
        Ok(Self { root })
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the in-progress marker path of an image.
    #[must_use]
    pub fn in_progress_path(&self, image: &ImageReference) -> PathBuf {
        self.root.join(IN_PROGRESS_DIR).join(image.file_name())
    }

    /// Returns the request marker path of an image.
    #[must_use]
    pub fn request_path(&self, image: &ImageReference) -> PathBuf {
        self.root.join(REQUEST_DIR).join(image.file_name())
    }

    /// Returns the staging directory of an image.
    #[must_use]
    pub fn copy_dir(&self, image: &ImageReference) -> PathBuf {
        self.root.join(COPY_DIR).join(image.file_name())
    }

    /// Returns the digest pointer path of an image.
    #[must_use]
    pub fn digest_path(&self, image: &ImageReference) -> PathBuf {
        self.root.join(DIGEST_DIR).join(image.file_name())
    }

    /// Returns the complete materialized tree for a digest.
    #[must_use]
    pub fn extract_dir(&self, digest: &Digest) -> PathBuf {
        self.root.join(EXTRACT_DIR).join(digest.encoded())
    }

    /// Returns the working tree of one attempt for a digest.
    #[must_use]
    pub fn partial_extract_dir(&self, digest: &Digest, token: &Uuid) -> PathBuf {
        self.root
            .join(EXTRACT_DIR)
            .join(format!("{}.partial-{}", digest.encoded(), token.simple()))
    }

    /// Returns true if a complete tree exists for `digest`.
    #[must_use]
    pub fn is_extracted(&self, digest: &Digest) -> bool {
        self.extract_dir(digest).is_dir()
    }

    /// Creates or touches the request marker of an image.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be created or its mtime updated.
    pub fn record_request(&self, image: &ImageReference) -> Result<()> {
        touch(&self.request_path(image))
    }

    /// Returns the time of the last recorded request, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker exists but cannot be inspected.
    pub fn last_request(&self, image: &ImageReference) -> Result<Option<SystemTime>> {
        modified(&self.request_path(image))
    }

    /// Reads the in-progress marker of an image, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker exists but cannot be inspected.
    pub fn read_in_progress(&self, image: &ImageReference) -> Result<Option<InProgress>> {
        read_marker(&self.in_progress_path(image))
    }

    /// Creates the in-progress marker if none exists.
    ///
    /// Returns `false` without touching the store if another caller already
    /// holds the marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be created or written.
    pub fn try_begin(&self, image: &ImageReference, marker: &AttemptMarker) -> Result<bool> {
        let path = self.in_progress_path(image);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(ImagevolError::io_at(&path)(e)),
        };
        let json = serde_json::to_vec(marker)?;
        file.write_all(&json).map_err(ImagevolError::io_at(&path))?;
        Ok(true)
    }

    /// Returns true if the in-progress marker still belongs to `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be inspected.
    pub fn owns_attempt(&self, image: &ImageReference, token: &Uuid) -> Result<bool> {
        Ok(self
            .read_in_progress(image)?
            .and_then(|p| p.marker)
            .is_some_and(|m| &m.token == token))
    }

    /// Removes the in-progress marker. A missing marker is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing marker cannot be removed.
    pub fn finish(&self, image: &ImageReference) -> Result<()> {
        remove_file_if_exists(&self.in_progress_path(image))
    }

    /// Reclaims the attempt described by `attempt`, a marker snapshot taken
    /// by the caller, and discards its state: the marker, the staging
    /// directory and the attempt's working tree.
    ///
    /// The marker is first moved aside under a unique name, so among callers
    /// racing on the same snapshot exactly one wins. A marker that no longer
    /// matches the snapshot (it was reclaimed and a new attempt started, or
    /// the attempt finished) is left alone and `false` is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be moved or state cannot be
    /// removed.
    pub fn reclaim(&self, image: &ImageReference, attempt: &InProgress) -> Result<bool> {
        let live = self.in_progress_path(image);
        if read_marker(&live)?.as_ref() != Some(attempt) {
            return Ok(false);
        }

        let claimed = live.with_file_name(format!(
            "{}.reclaim-{}",
            image.file_name(),
            Uuid::new_v4().simple()
        ));
        match fs::rename(&live, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ImagevolError::io_at(&live)(e)),
        }

        if read_marker(&claimed)?.as_ref() != Some(attempt) {
            // Another caller replaced the marker between the check and the
            // rename. Put it back unless yet another attempt already began.
            match fs::hard_link(&claimed, &live) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::warn!(image = %image, "newer attempt started while restoring marker");
                }
                Err(e) => return Err(ImagevolError::io_at(&live)(e)),
            }
            remove_file_if_exists(&claimed)?;
            return Ok(false);
        }

        remove_file_if_exists(&claimed)?;
        remove_dir_if_exists(&self.copy_dir(image))?;
        if let Some(marker) = &attempt.marker {
            remove_dir_if_exists(&self.partial_extract_dir(&marker.digest, &marker.token))?;
        }
        Ok(true)
    }

    /// Records the digest materialized for an image.
    ///
    /// # Errors
    ///
    /// Returns an error if the pointer cannot be written.
    pub fn write_digest(&self, image: &ImageReference, digest: &Digest) -> Result<()> {
        let path = self.digest_path(image);
        fs::write(&path, digest.to_string()).map_err(ImagevolError::io_at(&path))
    }

    /// Reads the digest last materialized for an image, if recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the pointer exists but cannot be read or parsed.
    pub fn read_digest(&self, image: &ImageReference) -> Result<Option<Digest>> {
        let path = self.digest_path(image);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(Digest::parse(content.trim())?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ImagevolError::io_at(&path)(e)),
        }
    }

    /// Removes every marker and directory recorded for an image.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing path cannot be removed.
    pub fn purge(&self, image: &ImageReference) -> Result<()> {
        if let Some(attempt) = self.read_in_progress(image)? {
            if !self.reclaim(image, &attempt)? {
                tracing::debug!(image = %image, "in-progress marker changed during purge");
            }
        }
        if let Some(digest) = self.read_digest(image)? {
            remove_dir_if_exists(&self.extract_dir(&digest))?;
        }
        remove_dir_if_exists(&self.copy_dir(image))?;
        remove_file_if_exists(&self.digest_path(image))?;
        remove_file_if_exists(&self.request_path(image))
    }
}

/// Reads an in-progress marker at `path`, or `None` if it does not exist.
fn read_marker(path: &Path) -> Result<Option<InProgress>> {
    let Some(since) = modified(path)? else {
        return Ok(None);
    };
    let marker = match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).ok(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ImagevolError::io_at(path)(e)),
    };
    Ok(Some(InProgress { since, marker }))
}

/// Creates `path` if missing, otherwise sets its modification time to now.
fn touch(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(ImagevolError::io_at(path))?;
    file.set_modified(SystemTime::now())
        .map_err(ImagevolError::io_at(path))
}

/// Returns the modification time of `path`, or `None` if it does not exist.
fn modified(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => meta
            .modified()
            .map(Some)
            .map_err(ImagevolError::io_at(path)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ImagevolError::io_at(path)(e)),
    }
}

pub(crate) fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(ImagevolError::io_at(path)(e)),
        _ => Ok(()),
    }
}

pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(ImagevolError::io_at(path)(e)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::Duration;

    use super::*;

    fn set_modified(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .and_then(|f| f.set_modified(time))
            .expect("set mtime");
    }

    fn open_store(dir: &Path) -> Store {
        Store::open(&StoreConfig {
            store_dir: dir.to_path_buf(),
            max_attempt_duration: Duration::from_secs(60),
        })
        .expect("open store")
    }

    fn image() -> ImageReference {
        ImageReference::new("registry.local/repo/app:v1").expect("valid")
    }

    fn digest() -> Digest {
        Digest::sha256(&"ab".repeat(32)).expect("digest")
    }

    #[test]
    fn open_creates_subareas() {
        let dir = tempfile::tempdir().expect("tempdir");
        let _ = open_store(dir.path());
        for area in [IN_PROGRESS_DIR, REQUEST_DIR, COPY_DIR, EXTRACT_DIR, DIGEST_DIR] {
            assert!(dir.path().join(area).is_dir(), "{area} missing");
        }
    }

    #[test]
    fn open_missing_root_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Store::open(&StoreConfig {
            store_dir: dir.path().join("absent"),
            max_attempt_duration: Duration::from_secs(60),
        })
        .expect_err("missing root");
        assert!(matches!(err, ImagevolError::NotFound { .. }));
    }

    #[test]
    fn paths_use_sanitized_reference() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        assert!(store
            .in_progress_path(&image())
            .ends_with("inprogress/registry.local_repo_app:v1"));
        assert!(store.copy_dir(&image()).ends_with("copy/registry.local_repo_app:v1"));
        assert!(store.extract_dir(&digest()).ends_with(format!("extract/{}", "ab".repeat(32))));
    }

    #[test]
    fn record_request_touches_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        assert!(store.last_request(&image()).expect("read").is_none());

        store.record_request(&image()).expect("record");
        let old = SystemTime::now() - Duration::from_secs(3600);
        set_modified(&store.request_path(&image()), old);
        store.record_request(&image()).expect("record again");

        let last = store.last_request(&image()).expect("read").expect("present");
        assert!(last > old);
    }

    #[test]
    fn try_begin_is_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let first = AttemptMarker::new(digest());
        let second = AttemptMarker::new(digest());

        assert!(store.try_begin(&image(), &first).expect("begin"));
        assert!(!store.try_begin(&image(), &second).expect("begin again"));
        assert!(store.owns_attempt(&image(), &first.token).expect("owns"));
        assert!(!store.owns_attempt(&image(), &second.token).expect("owns"));

        let found = store.read_in_progress(&image()).expect("read").expect("present");
        assert_eq!(found.marker, Some(first));
    }

    #[test]
    fn empty_marker_reads_without_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        fs::write(store.in_progress_path(&image()), b"").expect("write");
        let found = store.read_in_progress(&image()).expect("read").expect("present");
        assert!(found.marker.is_none());
    }

    #[test]
    fn reclaim_removes_attempt_state_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let marker = AttemptMarker::new(digest());
        assert!(store.try_begin(&image(), &marker).expect("begin"));
        let partial = store.partial_extract_dir(&marker.digest, &marker.token);
        fs::create_dir_all(partial.join("etc")).expect("mkdir");
        fs::create_dir_all(store.copy_dir(&image())).expect("mkdir");

        let attempt = store.read_in_progress(&image()).expect("read").expect("present");
        assert!(store.reclaim(&image(), &attempt).expect("reclaim"));
        assert!(!store.reclaim(&image(), &attempt).expect("reclaim again"));

        assert!(store.read_in_progress(&image()).expect("read").is_none());
        assert!(!partial.exists());
        assert!(!store.copy_dir(&image()).exists());
        let leftovers = fs::read_dir(dir.path().join(IN_PROGRESS_DIR))
            .expect("list")
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn reclaim_with_outdated_snapshot_keeps_newer_attempt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let stale = AttemptMarker::new(digest());
        assert!(store.try_begin(&image(), &stale).expect("begin"));
        let snapshot = store.read_in_progress(&image()).expect("read").expect("present");

        assert!(store.reclaim(&image(), &snapshot).expect("first reclaim"));
        let newer = AttemptMarker::new(digest());
        assert!(store.try_begin(&image(), &newer).expect("begin newer"));
        fs::create_dir_all(store.copy_dir(&image()).join("blobs")).expect("mkdir");

        assert!(!store.reclaim(&image(), &snapshot).expect("second reclaim"));
        assert!(store.owns_attempt(&image(), &newer.token).expect("owns"));
        assert!(store.copy_dir(&image()).join("blobs").is_dir());
    }

    #[test]
    fn reclaim_of_empty_marker_compares_mtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let path = store.in_progress_path(&image());
        fs::write(&path, b"").expect("write");
        set_modified(&path, SystemTime::now() - Duration::from_secs(7200));
        let snapshot = store.read_in_progress(&image()).expect("read").expect("present");

        set_modified(&path, SystemTime::now());
        assert!(!store.reclaim(&image(), &snapshot).expect("reclaim"));
        assert!(path.exists());

        let current = store.read_in_progress(&image()).expect("read").expect("present");
        assert!(store.reclaim(&image(), &current).expect("reclaim current"));
        assert!(!path.exists());
    }

    #[test]
    fn digest_pointer_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        assert!(store.read_digest(&image()).expect("read").is_none());
        store.write_digest(&image(), &digest()).expect("write");
        assert_eq!(store.read_digest(&image()).expect("read"), Some(digest()));
    }

    #[test]
    fn purge_removes_everything_for_reference() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        store.record_request(&image()).expect("record");
        store.write_digest(&image(), &digest()).expect("write");
        fs::create_dir_all(store.extract_dir(&digest())).expect("mkdir");
        fs::create_dir_all(store.copy_dir(&image())).expect("mkdir");

        store.purge(&image()).expect("purge");

        assert!(!store.is_extracted(&digest()));
        assert!(!store.copy_dir(&image()).exists());
        assert!(store.read_digest(&image()).expect("read").is_none());
        assert!(store.last_request(&image()).expect("read").is_none());
    }
}
