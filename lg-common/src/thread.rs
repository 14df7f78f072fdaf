// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Managed background threads that run a unit of work on a fixed interval.

use crate::lock;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{Builder, JoinHandle},
    time::{Duration, Instant},
};

/// How often a sleeping periodic thread checks whether it has been dropped.
pub const DEFAULT_RESOLUTION: Duration = Duration::from_millis(100);

/// A thread that runs `work` once immediately and then once per interval
/// until the handle is dropped or stopped.
///
/// The handle is intentionally NOT Clone. Wrap it in an Arc to share it so
/// the stop-and-join in Drop runs exactly once.
#[derive(Debug)]
pub struct PeriodicThread {
    name: String,
    handle: Mutex<Option<JoinHandle<()>>>,
    dropped: Arc<AtomicBool>,
}

impl PeriodicThread {
    pub fn spawn<F>(
        name: &str,
        interval: Duration,
        resolution: Duration,
        mut work: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();
        let handle = Builder::new().name(name.to_string()).spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                work();
                if !sleep_unless_dropped(&flag, interval, resolution) {
                    return;
                }
            }
        })?;
        Ok(Self {
            name: name.to_string(),
            handle: Mutex::new(Some(handle)),
            dropped,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True until the thread has been stopped and joined, or has exited.
    pub fn is_running(&self) -> bool {
        match lock!(self.handle).as_ref() {
            Some(h) => !h.is_finished(),
            None => false,
        }
    }

    /// Signal the thread to exit and wait for the current unit of work to
    /// finish. Calling this more than once is harmless.
    pub fn stop(&self) {
        self.dropped.store(true, Ordering::Relaxed);
        let handle = lock!(self.handle).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep for `total` in steps of `resolution`. Returns false as soon as
/// `dropped` is observed set, true if the full duration elapsed.
pub fn sleep_unless_dropped(
    dropped: &AtomicBool,
    total: Duration,
    resolution: Duration,
) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if dropped.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(resolution.min(deadline - now));
    }
}
