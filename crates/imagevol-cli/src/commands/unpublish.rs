//! `imagevol unpublish` — Remove a published volume from a target path.

use std::path::PathBuf;

use clap::Args;
use imagevol_common::config::DriverConfig;
use imagevol_node::request::UnpublishVolumeRequest;
use imagevol_node::server::NodeServer;
use tokio::runtime::Handle;

/// Arguments for the `unpublish` command.
#[derive(Args, Debug)]
pub struct UnpublishArgs {
    /// Directory the volume was published at.
    pub target: PathBuf,

    /// Volume identifier reported in logs.
    #[arg(long, default_value = "imagevol-cli")]
    pub volume_id: String,
}

/// Executes the `unpublish` command. The cached image is kept.
///
/// # Errors
///
/// Returns an error if the target cannot be unmounted.
pub fn execute(args: &UnpublishArgs, config: &DriverConfig, runtime: &Handle) -> anyhow::Result<()> {
    let server = NodeServer::from_config(config, runtime.clone())?;
    server
        .unpublish_volume(&UnpublishVolumeRequest::new(&args.volume_id, &args.target))
        .map_err(|e| anyhow::anyhow!("unpublish failed ({}): {e}", e.code()))?;
    println!("unpublished {}", args.target.display());
    Ok(())
}
