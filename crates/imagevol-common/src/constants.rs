//! System-wide constants and default paths.

use std::time::Duration;

/// Default root of the image store on a node.
pub const DEFAULT_STORE_DIR: &str = "/image-storage";

/// Default time an attempt may stay in progress before it is reclaimed.
pub const DEFAULT_MAX_ATTEMPT_DURATION: Duration = Duration::from_secs(3 * 60 * 60);

/// Default driver name reported to the node agent.
pub const DEFAULT_DRIVER_NAME: &str = "image.csi.imagevol.io";

/// Default location of the image copy tool.
pub const DEFAULT_SKOPEO_PATH: &str = "/bin/skopeo";

/// Environment variable naming a registry credentials file for the copy tool.
pub const REGISTRY_AUTH_FILE_ENV: &str = "REGISTRY_AUTH_FILE";

/// Store subarea holding one in-progress marker per image reference.
pub const IN_PROGRESS_DIR: &str = "inprogress";

/// Store subarea holding one request marker per image reference.
pub const REQUEST_DIR: &str = "request";

/// Store subarea holding the fetched manifest and blobs per image reference.
pub const COPY_DIR: &str = "copy";

/// Store subarea holding materialized trees keyed by manifest digest.
pub const EXTRACT_DIR: &str = "extract";

/// Store subarea recording the digest last materialized for a reference.
pub const DIGEST_DIR: &str = "digest";

/// File name of the manifest written by the copy tool.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Volume context key carrying the image reference.
pub const IMAGE_CONTEXT_KEY: &str = "image";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Maximum number of layers accepted from a manifest.
pub const MAX_IMAGE_LAYERS: usize = 128;

/// Application name used in CLI output.
pub const APP_NAME: &str = "imagevol";
