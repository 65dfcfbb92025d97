//! Periodic re-evaluation of entities with alarm state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::AlarmEngine;

/// Handle for controlling the harvest task.
#[derive(Debug)]
pub struct HarvestHandle {
    running: Arc<AtomicBool>,
    runs: Arc<AtomicU64>,
    shutdown: watch::Sender<bool>,
}

impl HarvestHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (shutdown, rx) = watch::channel(false);
        let handle = Self {
            running: Arc::new(AtomicBool::new(false)),
            runs: Arc::new(AtomicU64::new(0)),
            shutdown,
        };
        (handle, rx)
    }

    /// Check if the harvest task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of completed harvest passes.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Stop the harvest task. A pass in progress completes first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
    }
}

impl Drop for HarvestHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the periodic harvest task on the current tokio runtime.
///
/// Runs [`AlarmEngine::harvest`] every `evaluation_interval_secs`, starting
/// immediately, until the returned handle is stopped or dropped.
pub fn start_harvest_task(engine: Arc<AlarmEngine>) -> HarvestHandle {
    let (handle, mut shutdown) = HarvestHandle::new();
    handle.running.store(true, Ordering::SeqCst);

    let running = Arc::clone(&handle.running);
    let runs = Arc::clone(&handle.runs);
    let period = engine.config().evaluation_interval();

    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(period);
        info!(interval_secs = period.as_secs(), "harvest task started");

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = interval_timer.tick() => {}
                _ = shutdown.changed() => break,
            }

            if !running.load(Ordering::SeqCst) {
                break;
            }

            let engine = Arc::clone(&engine);
            match tokio::task::spawn_blocking(move || engine.harvest(Utc::now())).await {
                Ok(Ok(summary)) => {
                    runs.fetch_add(1, Ordering::SeqCst);
                    debug!(
                        evaluated = summary.entities_evaluated,
                        failed = summary.entities_failed,
                        "harvest pass finished"
                    );
                }
                Ok(Err(e)) => warn!(error = %e, "harvest pass failed"),
                Err(e) => warn!(error = %e, "harvest pass panicked"),
            }
        }

        running.store(false, Ordering::SeqCst);
        info!("harvest task stopped");
    });

    handle
}
