//! Tunables for a [`crate::coordinator::Coordinator`] or
//! [`crate::worker::WorkerDriver`]. Every field has a default matching the
//! reference implementation's, so most callers only need to override the
//! one or two knobs they actually care about.

use std::time::Duration;

/// Coordinator-side tunables.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Whether new connections run the protocol-descriptor handshake.
    /// Disabling it skips version negotiation and buffer-size exchange —
    /// only safe when every worker shares this crate's protocol version
    /// and the deployment doesn't need spill-to-disk backpressure.
    pub handshake_enabled: bool,
    /// Whether jobs are block-compressed before sending.
    pub compress: bool,
    /// Lost workers tolerated before [`crate::error::Error::MaxWorkerLoss`]
    /// aborts the run.
    pub max_worker_loss: usize,
    /// Whether running out of workers entirely (all lost or never
    /// connected) is itself treated as fatal.
    pub kill_on_no_workers: bool,
    /// Poll interval used while waiting for a worker to become idle or a
    /// reply to arrive.
    pub await_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            handshake_enabled: true,
            compress: false,
            max_worker_loss: 2,
            kill_on_no_workers: true,
            await_interval: Duration::from_millis(250),
        }
    }
}

/// Worker-side tunables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Whether the connection to the coordinator runs the handshake.
    /// Must agree with the coordinator's `handshake_enabled`.
    pub handshake_enabled: bool,
    /// Whether results are block-compressed before sending.
    pub compress: bool,
    /// How long [`crate::worker::WorkerDriver::connect`] retries a
    /// refused or unreachable connection before giving up.
    pub connect_retry: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            handshake_enabled: true,
            compress: false,
            connect_retry: Duration::from_secs(60),
        }
    }
}
