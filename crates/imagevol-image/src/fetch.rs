//! Image fetching through an external copy tool.
//!
//! Registry access is delegated to `skopeo`, invoked as a subprocess. The
//! tool resolves a reference to its manifest digest (`inspect`) and copies
//! the manifest and layer blobs into a plain directory (`copy ... dir:`).

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use imagevol_common::config::FetcherConfig;
use imagevol_common::error::{ImagevolError, Result};
use imagevol_common::types::{Digest, ImageReference};
use serde::Deserialize;

/// Source of image manifests and layer blobs.
///
/// Implementations must be usable from background tasks.
pub trait ImageFetcher: Send + Sync {
    /// Resolves `image` to the digest of its current manifest.
    ///
    /// # Errors
    ///
    /// Returns `ImagevolError::Fetch` if the registry cannot be queried.
    fn resolve_digest(&self, image: &ImageReference) -> Result<Digest>;

    /// Copies the manifest (`manifest.json`) and all blobs of `image` into
    /// `destination`, naming each blob by its encoded digest.
    ///
    /// # Errors
    ///
    /// Returns `ImagevolError::Fetch` if the copy fails.
    fn fetch(&self, image: &ImageReference, destination: &Path) -> Result<()>;
}

/// [`ImageFetcher`] running the `skopeo` binary.
#[derive(Debug, Clone)]
pub struct SkopeoFetcher {
    binary: PathBuf,
    auth_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct InspectOutput {
    #[serde(rename = "Digest")]
    digest: String,
}

impl SkopeoFetcher {
    /// Locates the configured binary and builds a fetcher.
    ///
    /// # Errors
    ///
    /// Returns `ImagevolError::NotFound` if the binary cannot be found.
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let binary = which::which(&config.binary).map_err(|_| ImagevolError::NotFound {
            kind: "image copy tool",
            id: config.binary.display().to_string(),
        })?;
        tracing::debug!(binary = %binary.display(), "using image copy tool");
        Ok(Self {
            binary,
            auth_file: config.auth_file.clone(),
        })
    }

    /// Builds the argument list for a subcommand, inserting `--authfile` when configured.
    fn args(&self, subcommand: &str, operands: &[String]) -> Vec<String> {
        let mut args = vec![subcommand.to_string()];
        if let Some(auth_file) = &self.auth_file {
            args.push("--authfile".into());
            args.push(auth_file.display().to_string());
        }
        args.extend(operands.iter().cloned());
        args
    }

    fn run(&self, image: &ImageReference, args: &[String]) -> Result<Output> {
        tracing::debug!(binary = %self.binary.display(), ?args, "running image copy tool");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(ImagevolError::io_at(&self.binary))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ImagevolError::Fetch {
                image: image.to_string(),
                message: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        Ok(output)
    }
}

impl ImageFetcher for SkopeoFetcher {
    fn resolve_digest(&self, image: &ImageReference) -> Result<Digest> {
        let args = self.args("inspect", &[image.transport_source()]);
        let output = self.run(image, &args)?;
        parse_inspect_digest(image, &output.stdout)
    }

    fn fetch(&self, image: &ImageReference, destination: &Path) -> Result<()> {
        tracing::info!(image = %image, destination = %destination.display(), "copying image");
        let args = self.args(
            "copy",
            &[
                image.transport_source(),
                format!("dir:{}", destination.display()),
            ],
        );
        let output = self.run(image, &args)?;
        tracing::debug!(
            image = %image,
            output = %String::from_utf8_lossy(&output.stdout).trim(),
            "image copied"
        );
        Ok(())
    }
}

/// Extracts the manifest digest from `skopeo inspect` JSON output.
fn parse_inspect_digest(image: &ImageReference, stdout: &[u8]) -> Result<Digest> {
    let inspect: InspectOutput = serde_json::from_slice(stdout)?;
    Digest::parse(&inspect.digest).map_err(|e| ImagevolError::Fetch {
        image: image.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(auth_file: Option<&str>) -> SkopeoFetcher {
        SkopeoFetcher {
            binary: PathBuf::from("/bin/skopeo"),
            auth_file: auth_file.map(PathBuf::from),
        }
    }

    fn image() -> ImageReference {
        ImageReference::new("repo/app:v1").expect("valid reference")
    }

    #[test]
    fn args_without_auth_file() {
        let args = fetcher(None).args("inspect", &[image().transport_source()]);
        assert_eq!(args, vec!["inspect", "docker://repo/app:v1"]);
    }

    #[test]
    fn args_pass_auth_file_before_operands() {
        let args = fetcher(Some("/run/secrets/auth.json")).args(
            "copy",
            &["docker://repo/app:v1".into(), "dir:/store/copy/repo/app:v1".into()],
        );
        assert_eq!(
            args,
            vec![
                "copy",
                "--authfile",
                "/run/secrets/auth.json",
                "docker://repo/app:v1",
                "dir:/store/copy/repo/app:v1"
            ]
        );
    }

    #[test]
    fn inspect_digest_is_parsed() {
        let hex = "790b52558236313f0939403be37e5e5e7c767602975ba3f740ad887a3e28f1ed";
        let stdout = format!(r#"{{"Name": "repo/app", "Digest": "sha256:{hex}", "Layers": []}}"#);
        let digest = parse_inspect_digest(&image(), stdout.as_bytes()).expect("parse");
        assert_eq!(digest.encoded(), hex);
    }

    #[test]
    fn malformed_inspect_digest_is_a_fetch_error() {
        let stdout = br#"{"Digest": "nocolon"}"#;
        let err = parse_inspect_digest(&image(), stdout).expect_err("must fail");
        assert!(matches!(err, ImagevolError::Fetch { .. }));
    }

    #[test]
    fn missing_binary_is_not_found() {
        let config = FetcherConfig {
            binary: PathBuf::from("imagevol-no-such-copy-tool"),
            auth_file: None,
        };
        let err = SkopeoFetcher::new(&config).expect_err("must fail");
        assert!(matches!(err, ImagevolError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_reports_fetch_error() {
        let fetcher = SkopeoFetcher {
            binary: which::which("false").expect("false binary on PATH"),
            auth_file: None,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let err = fetcher.fetch(&image(), dir.path()).expect_err("false must fail");
        assert!(matches!(err, ImagevolError::Fetch { .. }));
    }
}
