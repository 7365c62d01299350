//! Scripted workers and sources for driving the registry in tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keypoint_pipeline::capture::{AcquireError, FrameSource};
use keypoint_pipeline::worker::{WorkerControl, WorkerEvent, WorkerLauncher, WorkerLink};
use keypoint_pipeline::{PipelineConfig, SessionId, SessionRegistry, SessionState};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use worker_protocol::{DetectionResponse, Frame, Keypoint, WorkerRequest, WorkerResponse};

pub const FRAME_W: u32 = 64;
pub const FRAME_H: u32 = 48;

#[derive(Debug, Clone)]
pub enum ReadyBehavior {
    Immediate,
    After(Duration),
    Fail(String),
    Never,
}

#[derive(Debug, Clone)]
pub enum ReplyBehavior {
    Keypoints(Vec<Keypoint>),
    NoKeypoints,
    Fail(String),
    Never,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub ready: ReadyBehavior,
    pub reply: ReplyBehavior,
    pub reply_delay: Duration,
    pub composited: bool,
    pub exit_on_stop: bool,
    /// Exit on its own this long after becoming ready.
    pub crash_after: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            ready: ReadyBehavior::Immediate,
            reply: ReplyBehavior::Keypoints(vec![Keypoint::new(0.5, 0.5, 0.0, 1.0)]),
            reply_delay: Duration::ZERO,
            composited: true,
            exit_on_stop: true,
            crash_after: None,
        }
    }
}

/// What the scripted workers observed, as offsets from the probe's creation.
pub struct Probe {
    epoch: Instant,
    launches: AtomicUsize,
    detects: Mutex<Vec<Duration>>,
    detect_timestamps: Mutex<Vec<u64>>,
    stops: Mutex<Vec<Duration>>,
    terminations: Mutex<Vec<Duration>>,
    releases: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Probe {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            launches: AtomicUsize::new(0),
            detects: Mutex::new(Vec::new()),
            detect_timestamps: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            terminations: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn detects(&self) -> Vec<Duration> {
        self.detects.lock().clone()
    }

    pub fn detect_timestamps(&self) -> Vec<u64> {
        self.detect_timestamps.lock().clone()
    }

    pub fn stops(&self) -> Vec<Duration> {
        self.stops.lock().clone()
    }

    pub fn terminations(&self) -> Vec<Duration> {
        self.terminations.lock().clone()
    }

    /// Worker controls dropped by the pipeline, graceful or forced.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn begin_detect(&self, timestamp_ms: u64) {
        self.detects.lock().push(self.now());
        self.detect_timestamps.lock().push(timestamp_ms);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
    }

    fn end_detect(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ProbeControl {
    kill: CancellationToken,
    probe: Arc<Probe>,
}

impl WorkerControl for ProbeControl {
    fn terminate(&self) {
        self.probe.terminations.lock().push(self.probe.now());
        self.kill.cancel();
    }
}

impl Drop for ProbeControl {
    fn drop(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Launches in-memory workers that follow a [`Script`].
pub struct ScriptedLauncher {
    default: Script,
    per_session: HashMap<String, Script>,
    probe: Arc<Probe>,
}

impl ScriptedLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            default: script,
            per_session: HashMap::new(),
            probe: Arc::new(Probe::new()),
        }
    }

    pub fn with_session(mut self, id: &str, script: Script) -> Self {
        self.per_session.insert(id.to_string(), script);
        self
    }

    pub fn probe(&self) -> Arc<Probe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn launch(&self, session_id: &SessionId) -> keypoint_pipeline::Result<WorkerLink> {
        self.probe.launches.fetch_add(1, Ordering::SeqCst);
        let script = self
            .per_session
            .get(session_id.as_str())
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        let (req_tx, req_rx) = mpsc::channel(8);
        let (evt_tx, evt_rx) = mpsc::channel(16);
        let kill = CancellationToken::new();
        tokio::spawn(run_worker(
            script,
            Arc::clone(&self.probe),
            req_rx,
            evt_tx,
            kill.clone(),
        ));

        Ok(WorkerLink {
            requests: req_tx,
            events: evt_rx,
            control: Box::new(ProbeControl {
                kill,
                probe: Arc::clone(&self.probe),
            }),
        })
    }
}

fn reply_later(events: &mpsc::Sender<WorkerEvent>, delay: Duration, response: WorkerResponse) {
    let events = events.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = events.send(WorkerEvent::Response(response)).await;
    });
}

async fn run_worker(
    script: Script,
    probe: Arc<Probe>,
    mut requests: mpsc::Receiver<WorkerRequest>,
    events: mpsc::Sender<WorkerEvent>,
    kill: CancellationToken,
) {
    let mut crash_at: Option<Instant> = None;
    let mut input_open = true;

    loop {
        let crash = async move {
            match crash_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let request = tokio::select! {
            _ = kill.cancelled() => {
                let _ = events.send(WorkerEvent::Exited { status: "terminated".into() }).await;
                return;
            }
            _ = crash => {
                let _ = events.send(WorkerEvent::Exited { status: "exit code 139".into() }).await;
                return;
            }
            request = requests.recv(), if input_open => request,
        };

        let Some(request) = request else {
            input_open = false;
            if script.exit_on_stop {
                let _ = events.send(WorkerEvent::Exited { status: "exit code 0".into() }).await;
                return;
            }
            continue;
        };

        match request {
            WorkerRequest::Init(_) => match &script.ready {
                ReadyBehavior::Immediate => {
                    let _ = events.send(WorkerEvent::Response(WorkerResponse::Ready)).await;
                    crash_at = script.crash_after.map(|d| Instant::now() + d);
                }
                ReadyBehavior::After(delay) => {
                    reply_later(&events, *delay, WorkerResponse::Ready);
                    crash_at = script.crash_after.map(|d| Instant::now() + *delay + d);
                }
                ReadyBehavior::Fail(message) => {
                    let _ = events
                        .send(WorkerEvent::Response(WorkerResponse::Error {
                            message: message.clone(),
                        }))
                        .await;
                }
                ReadyBehavior::Never => {}
            },
            WorkerRequest::Detect {
                frame,
                timestamp_ms,
            } => {
                probe.begin_detect(timestamp_ms);
                let (width, height) = (frame.width(), frame.height());
                let composited = script.composited.then_some(frame);

                let keypoints = match &script.reply {
                    ReplyBehavior::Keypoints(keypoints) => Some(keypoints.clone()),
                    ReplyBehavior::NoKeypoints => None,
                    ReplyBehavior::Fail(message) => {
                        probe.end_detect();
                        reply_later(
                            &events,
                            script.reply_delay,
                            WorkerResponse::Error {
                                message: message.clone(),
                            },
                        );
                        continue;
                    }
                    ReplyBehavior::Never => continue,
                };

                let events = events.clone();
                let probe = Arc::clone(&probe);
                let delay = script.reply_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    probe.end_detect();
                    let response = WorkerResponse::Result(DetectionResponse {
                        keypoints,
                        composited,
                        width,
                        height,
                        timestamp_ms: timestamp_ms + delay.as_millis() as u64,
                    });
                    let _ = events.send(WorkerEvent::Response(response)).await;
                });
            }
            WorkerRequest::Stop => {
                probe.stops.lock().push(probe.now());
                if script.exit_on_stop {
                    let _ = events
                        .send(WorkerEvent::Exited {
                            status: "exit code 0".into(),
                        })
                        .await;
                    return;
                }
            }
        }
    }
}

/// Always-ready source of solid frames, optionally failing the first few
/// acquisitions.
pub struct StaticSource {
    ready: AtomicBool,
    failures_left: AtomicUsize,
    acquisitions: AtomicUsize,
}

impl StaticSource {
    pub fn new() -> Arc<Self> {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(true),
            failures_left: AtomicUsize::new(failures),
            acquisitions: AtomicUsize::new(0),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for StaticSource {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn acquire(&self) -> Result<Frame, AcquireError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AcquireError::Failed("decoder hiccup".into()));
        }
        Ok(Frame::solid(FRAME_W, FRAME_H, [200, 200, 200, 255], 0))
    }
}

pub fn config(tick_ms: u64, fps: f64) -> PipelineConfig {
    PipelineConfig {
        target_fps: fps,
        tick_interval_ms: tick_ms,
        ..Default::default()
    }
}

pub fn registry(config: &PipelineConfig, launcher: ScriptedLauncher) -> (SessionRegistry, Arc<Probe>) {
    let probe = launcher.probe();
    (SessionRegistry::new(config, Arc::new(launcher)).unwrap(), probe)
}

/// Sleep until `offset` after the probe epoch.
pub async fn sleep_until(probe: &Probe, offset: Duration) {
    tokio::time::sleep_until(probe.epoch + offset).await;
}

pub async fn wait_for_state(registry: &SessionRegistry, id: &SessionId, state: SessionState) {
    for _ in 0..1000 {
        if registry.state(id) == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("session {id} never reached {state}, still {}", registry.state(id));
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}
