//! `imagevol status` — Show the store state of an image.

use std::time::SystemTime;

use clap::Args;
use imagevol_common::config::DriverConfig;
use imagevol_common::types::ImageReference;
use imagevol_image::coordinator::MaterializationStatus;
use imagevol_node::server::NodeServer;
use tokio::runtime::Handle;

use crate::output::{format_duration, format_time};

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Image reference to inspect.
    pub image: String,
}

/// Executes the `status` command.
///
/// # Errors
///
/// Returns an error if the reference is invalid or the store cannot be read.
pub fn execute(args: &StatusArgs, config: &DriverConfig, runtime: &Handle) -> anyhow::Result<()> {
    let image = ImageReference::new(&args.image)?;
    let server = NodeServer::from_config(config, runtime.clone())?;
    let coordinator = server.coordinator();
    let status = coordinator.status(&image)?;
    for line in render(&status, SystemTime::now()) {
        println!("{line}");
    }
    Ok(())
}

fn render(status: &MaterializationStatus, now: SystemTime) -> Vec<String> {
    let ago = |t: SystemTime| {
        format!(
            "{} ({} ago)",
            format_time(t),
            format_duration(now.duration_since(t).unwrap_or_default())
        )
    };
    let mut lines = vec![format!("IMAGE\t\t{}", status.image)];
    lines.push(format!(
        "LAST REQUEST\t{}",
        status.last_request.map_or_else(|| "never".into(), ago)
    ));
    match (status.in_progress_since, &status.in_progress_digest) {
        (Some(since), Some(digest)) => {
            lines.push(format!("EXTRACTING\t{digest} since {}", ago(since)));
        }
        (Some(since), None) => lines.push(format!("EXTRACTING\tsince {}", ago(since))),
        (None, _) => lines.push("EXTRACTING\tno".into()),
    }
    lines.push(format!(
        "DIGEST\t\t{}",
        status
            .digest
            .as_ref()
            .map_or_else(|| "none".into(), ToString::to_string)
    ));
    lines.push(format!(
        "EXTRACTED\t{}",
        status
            .extracted
            .as_ref()
            .map_or_else(|| "no".into(), |p| p.display().to_string())
    ));
    lines
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use imagevol_common::types::Digest;

    use super::*;

    #[test]
    fn render_ready_image() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let digest = Digest::sha256(&"a".repeat(64)).expect("digest");
        let status = MaterializationStatus {
            image: ImageReference::new("repo/app:v1").expect("image"),
            last_request: Some(now - Duration::from_secs(90)),
            in_progress_since: None,
            in_progress_digest: None,
            digest: Some(digest.clone()),
            extracted: Some(PathBuf::from("/image-storage/extract/aaaa")),
        };
        let lines = render(&status, now);
        assert_eq!(lines[0], "IMAGE\t\trepo/app:v1");
        assert!(lines[1].ends_with("(1m30s ago)"), "{}", lines[1]);
        assert_eq!(lines[2], "EXTRACTING\tno");
        assert_eq!(lines[3], format!("DIGEST\t\t{digest}"));
        assert_eq!(lines[4], "EXTRACTED\t/image-storage/extract/aaaa");
    }

    #[test]
    fn render_unknown_image() {
        let status = MaterializationStatus {
            image: ImageReference::new("repo/app:v1").expect("image"),
            last_request: None,
            in_progress_since: None,
            in_progress_digest: None,
            digest: None,
            extracted: None,
        };
        let lines = render(&status, SystemTime::now());
        assert_eq!(lines[1], "LAST REQUEST\tnever");
        assert_eq!(lines[3], "DIGEST\t\tnone");
        assert_eq!(lines[4], "EXTRACTED\tno");
    }
}
