//! Isolated inference workers and their supervision.

pub mod detector;
pub mod handle;
pub mod runtime;
pub mod supervisor;
pub mod transport;

pub use detector::{Detector, DetectorError, LumaCentroidDetector, draw_keypoints};
pub use handle::{ReleaseReason, WorkerHandle};
pub use runtime::serve;
pub use supervisor::{SpawnedWorker, SupervisorConfig, Teardown, WorkerFault, WorkerSupervisor};
pub use transport::{
    InProcessLauncher, ProcessLauncher, TokenControl, WorkerControl, WorkerEvent, WorkerLauncher,
    WorkerLink, spawn_link,
};
