//! Sessions backed by the real protocol: an in-process worker over an
//! in-memory pipe and the `keypoint-worker` binary over stdio.

use std::sync::Arc;
use std::time::Duration;

use keypoint_pipeline::capture::TestPatternSource;
use keypoint_pipeline::config::WorkerCommandConfig;
use keypoint_pipeline::router::{Canvas, ChannelSink, SinkMessage};
use keypoint_pipeline::session::SessionBinding;
use keypoint_pipeline::worker::{
    InProcessLauncher, LumaCentroidDetector, ProcessLauncher, WorkerLauncher,
};
use keypoint_pipeline::{PipelineConfig, SessionId, SessionRegistry, SessionState};
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(10);

async fn run_session(launcher: Arc<dyn WorkerLauncher>) -> SessionRegistry {
    let config = PipelineConfig::default();
    let registry = SessionRegistry::new(&config, launcher).unwrap();
    let id = SessionId::from("camera");
    let canvas = Canvas::new(320, 180);
    let (sink, mut sink_rx) = ChannelSink::channel(8);

    registry.enable_with(
        &id,
        SessionBinding::new(Arc::new(TestPatternSource::new(160, 120)))
            .with_sink(Arc::new(sink))
            .with_target(Arc::new(canvas.clone())),
    );

    for _ in 0..3 {
        let message = timeout(DEADLINE, sink_rx.recv())
            .await
            .expect("no keypoints in time")
            .expect("sink closed");
        let SinkMessage::Keypoints {
            landmarks,
            width,
            height,
            ..
        } = message;
        assert_eq!((width, height), (160, 120));
        assert_eq!(landmarks.len(), 1);
        assert!((0.0..=1.0).contains(&landmarks[0].x));
        assert!((0.0..=1.0).contains(&landmarks[0].y));
    }

    assert_eq!(registry.state(&id), SessionState::Running);
    assert!(canvas.presented_count() >= 3);
    let snapshot = canvas.snapshot().unwrap();
    assert_eq!(snapshot.dimensions(), (320, 180));
    registry
}

#[tokio::test]
async fn test_in_process_worker_end_to_end() {
    let registry = run_session(Arc::new(InProcessLauncher::new(LumaCentroidDetector::default))).await;

    let report = timeout(DEADLINE, registry.shutdown()).await.unwrap();
    assert_eq!(report.total_sessions, 1);
    assert!(report.all_graceful(), "{report:?}");
}

#[tokio::test]
async fn test_in_process_worker_rejects_unsupported_task() {
    let mut config = PipelineConfig::default();
    config.task = worker_protocol::DetectionTask::Hands;
    let registry = SessionRegistry::new(
        &config,
        Arc::new(InProcessLauncher::new(LumaCentroidDetector::default)),
    )
    .unwrap();
    let id = SessionId::from("camera");
    registry.enable(&id, Arc::new(TestPatternSource::new(32, 32)), None);

    timeout(DEADLINE, async {
        while registry.state(&id) != SessionState::Error {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session never failed");
    assert_eq!(registry.stats(&id).unwrap().frames_dispatched, 0);
}

#[tokio::test]
async fn test_worker_process_end_to_end() {
    let launcher = ProcessLauncher::new(WorkerCommandConfig {
        program: env!("CARGO_BIN_EXE_keypoint-worker").to_string(),
        args: vec!["--log".into(), "off".into()],
    });
    let registry = run_session(Arc::new(launcher)).await;

    let report = timeout(DEADLINE, registry.shutdown()).await.unwrap();
    assert_eq!(report.total_sessions, 1);
    assert_eq!(report.graceful_stops, 1, "{report:?}");
}

#[tokio::test]
async fn test_missing_worker_binary_fails_session() {
    let launcher = ProcessLauncher::new(WorkerCommandConfig {
        program: "/nonexistent/keypoint-worker".into(),
        args: Vec::new(),
    });
    let registry = SessionRegistry::new(&PipelineConfig::default(), Arc::new(launcher)).unwrap();
    let id = SessionId::from("camera");
    registry.enable(&id, Arc::new(TestPatternSource::new(32, 32)), None);

    timeout(DEADLINE, async {
        while registry.state(&id) != SessionState::Error {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session never failed");

    registry.disable(&id).await;
    assert_eq!(registry.state(&id), SessionState::Idle);
}
