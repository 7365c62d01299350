//! `keypoint-worker`: the isolated inference process.
//!
//! Speaks the worker protocol on stdin/stdout. Logs go to stderr.

use clap::Parser;
use keypoint_pipeline::logging::{LogWriter, LoggingOptions, init_logging};
use keypoint_pipeline::panic_hook;
use keypoint_pipeline::worker::{LumaCentroidDetector, serve};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "keypoint-worker", version, about = "Keypoint detection worker")]
struct Args {
    /// Log filter directive.
    #[arg(long, env = "KEYPOINT_WORKER_LOG", default_value = "keypoint_pipeline=info")]
    log: String,

    /// Luma threshold for the reference detector.
    #[arg(long, default_value_t = 200)]
    threshold: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _logging = init_logging(LoggingOptions {
        filter: args.log,
        writer: LogWriter::Stderr,
        ..Default::default()
    })?;
    panic_hook::install();

    info!(pid = std::process::id(), "Worker starting");
    serve(
        LumaCentroidDetector::new(args.threshold),
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await?;
    Ok(())
}
