//! CLI command definitions and dispatch.

pub mod extract;
pub mod publish;
pub mod purge;
pub mod status;
pub mod unpublish;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use imagevol_common::config::{DriverConfig, FetcherConfig, StoreConfig};
use imagevol_common::constants::{
    APP_NAME, DEFAULT_DRIVER_NAME, DEFAULT_SKOPEO_PATH, DEFAULT_STORE_DIR,
};
use tokio::runtime::Handle;

/// imagevol: publish container images as node volumes.
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Root of the image store. Must already exist.
    #[arg(long, global = true, env = "IMAGEVOL_STORE_DIR", default_value = DEFAULT_STORE_DIR)]
    pub store_dir: PathBuf,

    /// Age after which an unfinished extraction is considered stale (e.g. 3h, 90m, 45s).
    #[arg(
        long,
        global = true,
        env = "IMAGEVOL_MAX_ATTEMPT_DURATION",
        default_value = "3h",
        value_parser = crate::output::parse_duration
    )]
    pub max_attempt_duration: Duration,

    /// Path or name of the skopeo binary.
    #[arg(long, global = true, env = "IMAGEVOL_SKOPEO", default_value = DEFAULT_SKOPEO_PATH)]
    pub skopeo: PathBuf,

    /// Identifier of this node.
    #[arg(long, global = true, env = "IMAGEVOL_NODE_ID", default_value = "localhost")]
    pub node_id: String,

    /// Name the driver registers under.
    #[arg(long, global = true, env = "IMAGEVOL_DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
    pub driver_name: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish an image at a target path.
    Publish(publish::PublishArgs),
    /// Remove a published volume from a target path.
    Unpublish(unpublish::UnpublishArgs),
    /// Show the store state of an image.
    Status(status::StatusArgs),
    /// Remove all cached state of an image.
    Purge(purge::PurgeArgs),
    /// Unpack a single gzip layer archive into a directory.
    Extract(extract::ExtractArgs),
}

impl Cli {
    /// Builds the driver configuration from the global flags.
    #[must_use]
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            driver_name: self.driver_name.clone(),
            node_id: self.node_id.clone(),
            vendor_version: env!("CARGO_PKG_VERSION").to_string(),
            store: StoreConfig {
                store_dir: self.store_dir.clone(),
                max_attempt_duration: self.max_attempt_duration,
            },
            fetcher: FetcherConfig::from_env(&self.skopeo),
        }
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli, runtime: &Handle) -> anyhow::Result<()> {
    let config = cli.driver_config();
    match cli.command {
        Command::Publish(args) => publish::execute(args, &config, runtime),
        Command::Unpublish(args) => unpublish::execute(&args, &config, runtime),
        Command::Status(args) => status::execute(&args, &config, runtime),
        Command::Purge(args) => purge::execute(&args, &config, runtime),
        Command::Extract(args) => extract::execute(&args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_build_driver_config() {
        let cli = Cli::try_parse_from([
            "imagevol",
            "--store-dir",
            "/tmp/store",
            "--max-attempt-duration",
            "90m",
            "--node-id",
            "node-a",
            "status",
            "repo/app:v1",
        ])
        .expect("parse");
        let config = cli.driver_config();
        assert_eq!(config.store.store_dir, PathBuf::from("/tmp/store"));
        assert_eq!(config.store.max_attempt_duration, Duration::from_secs(90 * 60));
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.driver_name, DEFAULT_DRIVER_NAME);
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let result = Cli::try_parse_from([
            "imagevol",
            "--max-attempt-duration",
            "soon",
            "status",
            "repo/app:v1",
        ]);
        assert!(result.is_err());
    }
}
