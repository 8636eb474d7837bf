//! `imagevol extract` — Unpack a single gzip layer archive into a directory.

use std::path::PathBuf;

use clap::Args;
use imagevol_image::layer::extract_layer;

use crate::output::format_bytes;

/// Arguments for the `extract` command.
#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Gzip-compressed tar layer.
    pub archive: PathBuf,

    /// Directory to unpack into. Created if missing.
    pub target: PathBuf,
}

/// Executes the `extract` command.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or an entry cannot be
/// written.
pub fn execute(args: &ExtractArgs) -> anyhow::Result<()> {
    std::fs::create_dir_all(&args.target)?;
    let layer = extract_layer(&args.archive, &args.target)?;
    println!(
        "extracted {} entries ({}) into {}{}",
        layer.entries,
        format_bytes(layer.size_bytes),
        args.target.display(),
        if layer.skipped > 0 {
            format!(", skipped {}", layer.skipped)
        } else {
            String::new()
        }
    );
    Ok(())
}
