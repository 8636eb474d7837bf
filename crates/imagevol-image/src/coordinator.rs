//! Materialization coordinator.
//!
//! Decides, for each publish request, whether an image is ready to mount,
//! still being materialized, stale, or not yet started. All state lives in
//! the [`Store`]; there is no in-memory lock, so the decisions hold across
//! process restarts. A crashed attempt is recovered once its in-progress
//! marker is older than the configured maximum attempt duration.
//!
//! Materialization itself runs as a detached blocking task: fetch into the
//! staging directory, read the manifest, verify and unpack each layer into
//! the attempt's working tree, promote the tree, then remove the marker.
//! Removing the marker is the only success signal. Any failure leaves the
//! marker in place until a later request reclaims it.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use imagevol_common::config::StoreConfig;
use imagevol_common::constants::MANIFEST_FILE;
use imagevol_common::error::{ImagevolError, Result};
use imagevol_common::types::{Digest, ImageReference};
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::fetch::ImageFetcher;
use crate::store::{AttemptMarker, Store, remove_dir_if_exists};

/// Result of a readiness decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The image is fully materialized.
    Ready {
        /// Manifest digest of the materialized image.
        digest: Digest,
        /// Directory to bind-mount.
        path: PathBuf,
    },
    /// An attempt is running; retry later.
    InProgress {
        /// Time since the attempt started.
        elapsed: Duration,
    },
    /// A new attempt was launched by this call; retry later.
    Started,
}

impl Readiness {
    /// Returns true for [`Readiness::Ready`].
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready { path, .. } => write!(f, "ready at {}", path.display()),
            Self::InProgress { elapsed } => {
                write!(f, "extraction in progress since {}s", elapsed.as_secs())
            }
            Self::Started => write!(f, "extraction started"),
        }
    }
}

/// Store-derived view of one image, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializationStatus {
    /// Image the status describes.
    pub image: ImageReference,
    /// Time of the last publish request.
    pub last_request: Option<SystemTime>,
    /// Start of the running attempt, if any.
    pub in_progress_since: Option<SystemTime>,
    /// Digest the running attempt is materializing.
    pub in_progress_digest: Option<Digest>,
    /// Digest last materialized successfully.
    pub digest: Option<Digest>,
    /// Materialized tree for `digest`, if it still exists.
    pub extracted: Option<PathBuf>,
}

/// How a background attempt ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    Completed,
    Superseded,
}

/// Coordinates materialization of images into the local store.
pub struct Coordinator {
    store: Arc<Store>,
    fetcher: Arc<dyn ImageFetcher>,
    max_attempt_duration: Duration,
    runtime: Handle,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("store", &self.store)
            .field("max_attempt_duration", &self.max_attempt_duration)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Opens the store and builds a coordinator spawning attempts on `runtime`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store root is
    /// missing or unwritable.
    pub fn new(config: &StoreConfig, fetcher: Arc<dyn ImageFetcher>, runtime: Handle) -> Result<Self> {
        let store = Store::open(config)?;
        tracing::info!(
            store = %store.root().display(),
            max_attempt_duration = ?config.max_attempt_duration,
            "materialization coordinator ready"
        );
        Ok(Self {
            store: Arc::new(store),
            fetcher,
            max_attempt_duration: config.max_attempt_duration,
            runtime,
        })
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Decides whether `image` is ready, launching materialization if needed.
    ///
    /// Never blocks on a running attempt: callers poll until
    /// [`Readiness::Ready`] is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be inspected, stale state cannot
    /// be discarded, or the image digest cannot be resolved and no cached
    /// tree exists for the reference.
    pub fn ensure_materialized(&self, image: &ImageReference) -> Result<Readiness> {
        if let Err(e) = self.store.record_request(image) {
            tracing::warn!(image = %image, error = %e, "failed to record image request");
        }

        if let Some(attempt) = self.store.read_in_progress(image)? {
            let elapsed = SystemTime::now()
                .duration_since(attempt.since)
                .unwrap_or_default();
            if elapsed <= self.max_attempt_duration {
                tracing::debug!(image = %image, elapsed = ?elapsed, "image is currently being extracted");
                return Ok(Readiness::InProgress { elapsed });
            }
            tracing::warn!(
                image = %image,
                elapsed = ?elapsed,
                max = ?self.max_attempt_duration,
                "reclaiming stale extraction attempt"
            );
            if !self.store.reclaim(image, &attempt)? {
                if let Some(current) = self.store.read_in_progress(image)? {
                    tracing::debug!(image = %image, "stale attempt already reclaimed by another caller");
                    return Ok(Readiness::InProgress {
                        elapsed: SystemTime::now()
                            .duration_since(current.since)
                            .unwrap_or_default(),
                    });
                }
            }
        }

        let digest = match self.fetcher.resolve_digest(image) {
            Ok(digest) => digest,
            Err(e) => return self.cached_or(image, e),
        };
        if self.store.is_extracted(&digest) {
            tracing::debug!(image = %image, digest = %digest, "image already extracted");
            return Ok(Readiness::Ready {
                path: self.store.extract_dir(&digest),
                digest,
            });
        }

        let marker = AttemptMarker::new(digest);
        if !self.store.try_begin(image, &marker)? {
            tracing::debug!(image = %image, "lost race to start extraction");
            return Ok(Readiness::InProgress {
                elapsed: Duration::ZERO,
            });
        }

        tracing::info!(image = %image, digest = %marker.digest, token = %marker.token, "starting extraction");
        let attempt = Attempt {
            store: Arc::clone(&self.store),
            fetcher: Arc::clone(&self.fetcher),
            image: image.clone(),
            digest: marker.digest,
            token: marker.token,
        };
        drop(self.runtime.spawn_blocking(move || attempt.run()));
        Ok(Readiness::Started)
    }

    /// Falls back to the last materialized digest when the registry cannot
    /// be reached, so cached images stay mountable during an outage.
    fn cached_or(&self, image: &ImageReference, err: ImagevolError) -> Result<Readiness> {
        match self.store.read_digest(image)? {
            Some(digest) if self.store.is_extracted(&digest) => {
                tracing::warn!(
                    image = %image,
                    digest = %digest,
                    error = %err,
                    "digest resolution failed, using cached image"
                );
                Ok(Readiness::Ready {
                    path: self.store.extract_dir(&digest),
                    digest,
                })
            }
            _ => Err(err),
        }
    }

    /// Reports the store state of `image` without changing it.
    ///
    /// # Errors
    ///
    /// Returns an error if a marker exists but cannot be read.
    pub fn status(&self, image: &ImageReference) -> Result<MaterializationStatus> {
        let in_progress = self.store.read_in_progress(image)?;
        let digest = self.store.read_digest(image)?;
        let extracted = digest
            .as_ref()
            .filter(|d| in_progress.is_none() && self.store.is_extracted(d))
            .map(|d| self.store.extract_dir(d));
        Ok(MaterializationStatus {
            image: image.clone(),
            last_request: self.store.last_request(image)?,
            in_progress_since: in_progress.as_ref().map(|p| p.since),
            in_progress_digest: in_progress.and_then(|p| p.marker).map(|m| m.digest),
            digest,
            extracted,
        })
    }

    /// Removes all cached state of `image`.
    ///
    /// A running attempt that has not yet gone stale is left alone unless
    /// `force` is set.
    ///
    /// # Errors
    ///
    /// Returns `ImagevolError::Busy` for a fresh attempt without `force`, or
    /// an I/O error if removal fails.
    pub fn purge(&self, image: &ImageReference, force: bool) -> Result<()> {
        if let Some(attempt) = self.store.read_in_progress(image)? {
            let elapsed = SystemTime::now()
                .duration_since(attempt.since)
                .unwrap_or_default();
            if !force && elapsed <= self.max_attempt_duration {
                return Err(ImagevolError::Busy {
                    id: image.to_string(),
                    message: format!("extraction in progress since {}s", elapsed.as_secs()),
                });
            }
        }
        tracing::info!(image = %image, force, "purging image");
        self.store.purge(image)
    }
}

/// One background materialization of an image.
struct Attempt {
    store: Arc<Store>,
    fetcher: Arc<dyn ImageFetcher>,
    image: ImageReference,
    digest: Digest,
    token: Uuid,
}

impl Attempt {
    fn run(self) {
        match self.materialize() {
            Ok(AttemptOutcome::Completed) => {
                tracing::info!(image = %self.image, digest = %self.digest, "image extracted");
            }
            Ok(AttemptOutcome::Superseded) => {
                tracing::warn!(image = %self.image, token = %self.token, "extraction attempt was reclaimed, abandoning");
                let partial = self.store.partial_extract_dir(&self.digest, &self.token);
                if let Err(e) = remove_dir_if_exists(&partial) {
                    tracing::warn!(path = %partial.display(), error = %e, "failed to remove abandoned tree");
                }
            }
            Err(e) => {
                tracing::error!(
                    image = %self.image,
                    digest = %self.digest,
                    error = %e,
                    "extraction failed, leaving in-progress marker for stale reclaim"
                );
            }
        }
    }

    fn materialize(&self) -> Result<AttemptOutcome> {
        let copy_dir = self.store.copy_dir(&self.image);
        remove_dir_if_exists(&copy_dir)?;
        std::fs::create_dir_all(&copy_dir).map_err(ImagevolError::io_at(&copy_dir))?;
        self.fetcher.fetch(&self.image, &copy_dir)?;

        let manifest_path = copy_dir.join(MANIFEST_FILE);
        let manifest =
            std::fs::read(&manifest_path).map_err(ImagevolError::io_at(&manifest_path))?;
        let layers = crate::manifest::read_layer_list(&manifest)?;

        let partial = self.store.partial_extract_dir(&self.digest, &self.token);
        std::fs::create_dir_all(&partial).map_err(ImagevolError::io_at(&partial))?;

        for (index, layer) in layers.iter().enumerate() {
            if !self.store.owns_attempt(&self.image, &self.token)? {
                return Ok(AttemptOutcome::Superseded);
            }
            tracing::info!(image = %self.image, layer = %layer, index, total = layers.len(), "extracting layer");
            let blob = copy_dir.join(layer.encoded());
            crate::hash::validate_digest(&blob, layer)?;
            let extracted = crate::layer::extract_layer(&blob, &partial)?;
            if extracted.skipped > 0 {
                tracing::debug!(
                    image = %self.image,
                    layer = %layer,
                    skipped = extracted.skipped,
                    "layer entries skipped"
                );
            }
        }

        if !self.store.owns_attempt(&self.image, &self.token)? {
            return Ok(AttemptOutcome::Superseded);
        }
        self.promote(&partial)?;
        self.store.write_digest(&self.image, &self.digest)?;
        if let Err(e) = remove_dir_if_exists(&copy_dir) {
            tracing::warn!(path = %copy_dir.display(), error = %e, "failed to remove staging directory");
        }
        self.store.finish(&self.image)?;
        Ok(AttemptOutcome::Completed)
    }

    /// Moves the working tree to its final digest-keyed location.
    ///
    /// If another reference with the same digest finished first, its tree is
    /// kept and ours is dropped.
    fn promote(&self, partial: &std::path::Path) -> Result<()> {
        let target = self.store.extract_dir(&self.digest);
        match std::fs::rename(partial, &target) {
            Ok(()) => Ok(()),
            Err(_) if target.is_dir() => {
                tracing::debug!(digest = %self.digest, "digest already extracted by another attempt");
                remove_dir_if_exists(partial)
            }
            Err(e) => Err(ImagevolError::io_at(&target)(e)),
        }
    }
}
