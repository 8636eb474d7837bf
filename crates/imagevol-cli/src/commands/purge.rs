//! `imagevol purge` — Remove all cached state of an image.

use clap::Args;
use imagevol_common::config::DriverConfig;
use imagevol_common::types::ImageReference;
use imagevol_node::server::NodeServer;
use tokio::runtime::Handle;

/// Arguments for the `purge` command.
#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Image reference to purge.
    pub image: String,

    /// Purge even while an extraction is running.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `purge` command.
///
/// Volumes still mounted from the image keep their mounts; only the store
/// entries are removed.
///
/// # Errors
///
/// Returns an error if an extraction is running and `--force` is not set,
/// or if removal fails.
pub fn execute(args: &PurgeArgs, config: &DriverConfig, runtime: &Handle) -> anyhow::Result<()> {
    let image = ImageReference::new(&args.image)?;
    let server = NodeServer::from_config(config, runtime.clone())?;
    let coordinator = server.coordinator();
    coordinator.purge(&image, args.force)?;
    println!("purged {image}");
    Ok(())
}
