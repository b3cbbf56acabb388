//! Hang detector: a watchdog OS thread that aborts the process if the
//! reactor thread goes [`ReactorConfig::hang_detector_timeout`](
//! crate::config::ReactorConfig) without completing a scheduler tick.
//!
//! A cooperative scheduler has no way to interrupt a fiber that never
//! yields, so detecting that case at all needs a second thread watching
//! a heartbeat from the outside, the same shape as the worker pool in
//! [`crate::defer`] but driven by a timer instead of a job queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub(crate) struct HangDetector {
    epoch: Instant,
    heartbeat_ms: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HangDetector {
    pub(crate) fn spawn(timeout: Duration) -> Self {
        let epoch = Instant::now();
        let heartbeat_ms = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let poll_interval = timeout.min(Duration::from_millis(50)).max(Duration::from_millis(1));

        let heartbeat_for_thread = Arc::clone(&heartbeat_ms);
        let stop_for_thread = Arc::clone(&stop);
        let timeout_ms = timeout.as_millis() as u64;
        let thread = std::thread::Builder::new()
            .name("reactor-hang-detector".into())
            .spawn(move || loop {
                std::thread::sleep(poll_interval);
                if stop_for_thread.load(Ordering::Acquire) {
                    return;
                }
                let last = heartbeat_for_thread.load(Ordering::Acquire);
                let elapsed_ms = (epoch.elapsed().as_millis() as u64).saturating_sub(last);
                if elapsed_ms >= timeout_ms {
                    tracing::error!(elapsed_ms, "reactor thread appears hung, aborting process");
                    std::process::abort();
                }
            })
            .expect("failed to spawn hang detector thread");

        let detector = Self { epoch, heartbeat_ms, stop, thread: Some(thread) };
        detector.beat();
        detector
    }

    /// Called once per scheduler tick from the reactor thread.
    pub(crate) fn beat(&self) {
        self.heartbeat_ms.store(self.epoch.elapsed().as_millis() as u64, Ordering::Release);
    }
}

impl Drop for HangDetector {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
