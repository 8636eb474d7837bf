//! `imagevol publish` — Publish an image at a target path.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use imagevol_common::config::DriverConfig;
use imagevol_node::request::PublishVolumeRequest;
use imagevol_node::server::NodeServer;
use tokio::runtime::Handle;

/// Arguments for the `publish` command.
#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Image reference, e.g. `registry.local/repo/app:v1`.
    pub image: String,

    /// Directory where the image must appear.
    pub target: PathBuf,

    /// Volume identifier reported in logs.
    #[arg(long, default_value = "imagevol-cli")]
    pub volume_id: String,

    /// Mount the volume read-only.
    #[arg(long)]
    pub readonly: bool,

    /// Extra mount flag (`nosuid`, `nodev`, `noexec`, `ro`). Repeatable.
    #[arg(long = "mount-flag")]
    pub mount_flags: Vec<String>,

    /// Keep re-issuing the publish until the image is mounted.
    #[arg(short, long)]
    pub wait: bool,

    /// Delay between publish attempts with `--wait`.
    #[arg(long, default_value = "2s", value_parser = crate::output::parse_duration)]
    pub poll_interval: Duration,
}

impl PublishArgs {
    fn request(&self) -> PublishVolumeRequest {
        self.mount_flags.iter().fold(
            PublishVolumeRequest::new(&self.volume_id, &self.target)
                .image(&self.image)
                .readonly(self.readonly),
            |request, flag| request.mount_flag(flag),
        )
    }
}

/// Executes the `publish` command.
///
/// Without `--wait` a not-yet-ready image is reported as an error; the
/// extraction it started keeps running until this process exits.
///
/// # Errors
///
/// Returns an error if the request is invalid, the image is not ready and
/// `--wait` is not set, or mounting fails.
pub fn execute(args: PublishArgs, config: &DriverConfig, runtime: &Handle) -> anyhow::Result<()> {
    let server = NodeServer::from_config(config, runtime.clone())?;
    let request = args.request();
    let mut attempts = 0_u32;

    loop {
        attempts += 1;
        match server.publish_volume(&request) {
            Ok(response) => {
                let action = if response.mounted {
                    "published"
                } else {
                    "already published"
                };
                println!(
                    "{} {action} at {} ({})",
                    args.image,
                    args.target.display(),
                    response.digest
                );
                return Ok(());
            }
            Err(e) if e.is_retryable() && args.wait => {
                tracing::info!(image = %args.image, attempts, status = %e, "waiting for image");
                std::thread::sleep(args.poll_interval);
            }
            Err(e) => return Err(anyhow::anyhow!("publish failed ({}): {e}", e.code())),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::commands::{Cli, Command};

    #[test]
    fn request_carries_flags() {
        let cli = Cli::try_parse_from([
            "imagevol",
            "publish",
            "repo/app:v1",
            "/mnt/app",
            "--readonly",
            "--mount-flag",
            "nosuid",
            "--mount-flag",
            "nodev",
        ])
        .expect("parse");
        let Command::Publish(args) = cli.command else {
            unreachable!("parsed publish");
        };
        let request = args.request();
        assert!(request.readonly);
        assert_eq!(request.image_reference(), Some("repo/app:v1"));
        assert_eq!(
            request.capability.map(|c| c.mount_flags),
            Some(vec!["nosuid".to_string(), "nodev".to_string()])
        );
    }
}
