//! Callback thread for simulated devices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::{BackendError, Result};

/// Handle to a thread calling a cycle function at a fixed period.
#[derive(Debug)]
pub(crate) struct DriverThread {
    handle: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl DriverThread {
    /// Runs `cycle` until it returns false or the thread is stopped. A `None`
    /// period runs cycles back to back.
    pub(crate) fn spawn<F>(name: String, period: Option<Duration>, mut cycle: F) -> Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let mut deadline = Instant::now();
                while !stop_flag.load(Ordering::Relaxed) {
                    if !cycle() {
                        break;
                    }
                    match period {
                        Some(period) => {
                            deadline += period;
                            let now = Instant::now();
                            if deadline > now {
                                thread::sleep(deadline - now);
                            } else if now - deadline > period {
                                // Fell more than a cycle behind; do not burst to catch up.
                                deadline = now;
                            }
                        }
                        None => thread::yield_now(),
                    }
                }
            })
            .map_err(BackendError::Spawn)?;
        Ok(Self {
            handle: Some(handle),
            stop,
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, thread::JoinHandle::is_finished)
    }

    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.join() {
                tracing::error!(?err, "failed to join device thread");
            }
        }
    }
}

impl Drop for DriverThread {
    fn drop(&mut self) {
        self.stop();
    }
}
