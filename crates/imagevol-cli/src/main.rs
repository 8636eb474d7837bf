//! # imagevol — image volume CLI
//!
//! Publishes container images as bind-mounted volumes on a node.
//! Each invocation is one-shot: state lives in the image store, so repeated
//! calls from separate processes cooperate through its markers.

mod commands;
mod output;

use clap::Parser;

use crate::commands::{Cli, LogFormat};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    // Extraction attempts run on the blocking pool. Dropping the runtime
    // waits for them, so a launched attempt finishes before the process exits.
    let runtime = tokio::runtime::Runtime::new()?;
    commands::execute(cli, runtime.handle())
}

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
