//! `keypointd`: runs detection sessions against synthetic frame sources.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use keypoint_pipeline::capture::TestPatternSource;
use keypoint_pipeline::logging::{DEFAULT_LOG_FILTER, LogWriter, LoggingOptions, init_logging};
use keypoint_pipeline::router::{Canvas, ChannelSink, SinkMessage};
use keypoint_pipeline::session::SessionBinding;
use keypoint_pipeline::worker::{
    InProcessLauncher, LumaCentroidDetector, ProcessLauncher, WorkerLauncher,
};
use keypoint_pipeline::{PipelineConfig, SessionId, SessionRegistry};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "keypointd", version, about = "Run keypoint detection sessions")]
struct Args {
    /// Path to a TOML config file.
    #[arg(short, long, env = "KEYPOINT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the target frame rate.
    #[arg(long)]
    fps: Option<f64>,

    /// Override the worker executable.
    #[arg(long, env = "KEYPOINT_WORKER")]
    worker: Option<String>,

    /// Run workers as in-process tasks instead of child processes.
    #[arg(long)]
    in_process: bool,

    /// Number of concurrent sessions.
    #[arg(long, default_value_t = 1)]
    sessions: usize,

    /// Stop after this many seconds (default: run until Ctrl-C).
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Also write logs to daily files in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "keypoint_pipeline=debug,worker_protocol=debug".to_string()
    } else {
        DEFAULT_LOG_FILTER.to_string()
    };
    let _logging = init_logging(LoggingOptions {
        filter,
        writer: LogWriter::Stdout,
        log_dir: args.log_dir.clone(),
        file_prefix: "keypointd.log".to_string(),
    })?;

    let mut config =
        PipelineConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(fps) = args.fps {
        config.target_fps = fps;
    }
    if let Some(worker) = args.worker {
        config.worker.program = worker;
    }

    let launcher: Arc<dyn WorkerLauncher> = if args.in_process {
        Arc::new(InProcessLauncher::new(LumaCentroidDetector::default))
    } else {
        Arc::new(ProcessLauncher::new(config.worker.clone()))
    };
    let registry = SessionRegistry::new(&config, launcher)?;

    let (sink, mut sink_rx) = ChannelSink::channel(64);
    let sink = Arc::new(sink);
    tokio::spawn(async move {
        while let Some(message) = sink_rx.recv().await {
            let SinkMessage::Keypoints { ref landmarks, timestamp, .. } = message;
            match serde_json::to_string(&message) {
                Ok(json) => info!(landmarks = landmarks.len(), timestamp, "{json}"),
                Err(e) => warn!(error = %e, "Failed to encode sink message"),
            }
        }
    });

    let mut canvases = Vec::new();
    for index in 0..args.sessions.max(1) {
        let id = SessionId::from(format!("session-{index}"));
        let canvas = Canvas::new(640, 360);
        let binding = SessionBinding::new(Arc::new(TestPatternSource::new(320, 240)))
            .with_sink(sink.clone())
            .with_target(Arc::new(canvas.clone()));
        registry.enable_with(&id, binding);
        canvases.push((id, canvas));
    }
    info!(
        sessions = canvases.len(),
        fps = config.target_fps,
        in_process = args.in_process,
        "Sessions enabled"
    );

    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    for (id, canvas) in &canvases {
        let stats = registry.stats(id).unwrap_or_default();
        info!(
            session_id = %id,
            state = %registry.state(id),
            dispatched = stats.frames_dispatched,
            results = stats.results_received,
            presented = canvas.presented_count(),
            "Session summary"
        );
    }

    let report = registry.shutdown().await;
    info!(
        total = report.total_sessions,
        graceful = report.graceful_stops,
        forced = report.forced_terminations,
        "Shut down"
    );
    Ok(())
}
