// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Disk-load jobs: a two-state job (`Reading` then `Finished`) capped by a
//! global in-flight counter, with excess requests queued in priority
//! order rather than rejected.
//!
//! The source issues real platform-async-I/O (`io_uring`/IOCP/kqueue)
//! requests and resumes the job from a completion callback. A background
//! thread pool reachable only through `std::sync::mpsc` channels plays
//! that role here: still genuinely asynchronous from the submitting
//! runner's point of view (the read happens off-runner, and the job's
//! `OnExecute` only observes the *result*), but backed by blocking reads
//! on a small worker pool rather than a kernel completion queue. Grounded
//! on `AsyncDiskLoadJob` for the state machine and admission policy.

use crate::error::Error;
use crate::job::{ExecuteResult, JobRef};
use crate::manager::JobManager;
use crate::priority::Priority;
use crate::runner::Runner;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

enum LoadState {
    Pending,
    Reading,
    Done(std::io::Result<Vec<u8>>),
}

struct LoadRequest {
    path: PathBuf,
    priority: Priority,
    state: Mutex<LoadState>,
}

/// Coordinates disk-load jobs against a fixed concurrency limit, mirroring
/// the source's global in-flight counter plus priority-sorted waiting list.
pub struct AsyncDiskLoader {
    limit: usize,
    in_flight: AtomicUsize,
    waiting: Mutex<Vec<Arc<LoadRequest>>>,
    sender: mpsc::Sender<Arc<LoadRequest>>,
}

impl AsyncDiskLoader {
    #[must_use]
    pub fn new(limit: usize, worker_count: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<Arc<LoadRequest>>();
        let receiver = Arc::new(Mutex::new(receiver));
        let loader = Arc::new(Self { limit, in_flight: AtomicUsize::new(0), waiting: Mutex::new(Vec::new()), sender });
        for _ in 0..worker_count.max(1) {
            let receiver = receiver.clone();
            std::thread::Builder::new()
                .name("job-disk-load".to_owned())
                .spawn(move || loop {
                    let request = { receiver.lock().recv() };
                    match request {
                        Ok(request) => {
                            let bytes = std::fs::read(&request.path);
                            *request.state.lock() = LoadState::Done(bytes);
                        }
                        Err(_) => return,
                    }
                })
                .expect("failed to spawn disk-load worker");
        }
        loader
    }

    /// Admits `request` for reading if under the concurrency limit,
    /// otherwise queues it (priority-sorted) for later admission.
    ///
    /// # Errors
    /// Never currently returns [`Error::AsyncQueueFull`]: the source
    /// rejects past a hard cap, but requests here instead wait, matching
    /// `JobBatch`'s preference for backpressure over failure. Kept as a
    /// `Result` so callers that do want a hard cap can opt in later.
    fn try_admit(&self, request: Arc<LoadRequest>) -> Result<(), Error> {
        loop {
            let current = self.in_flight.load(Ordering::Acquire);
            if current >= self.limit {
                let mut waiting = self.waiting.lock();
                waiting.push(request);
                // Ascending by `Reverse(priority)` puts the lowest ordinal
                // (highest urgency) request last, so `pop` admits it first.
                waiting.sort_by_key(|r| std::cmp::Reverse(r.priority));
                return Ok(());
            }
            if self
                .in_flight
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                *request.state.lock() = LoadState::Reading;
                let _ = self.sender.send(request);
                return Ok(());
            }
        }
    }

    fn release_and_admit_next(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        let next = self.waiting.lock().pop();
        if let Some(next) = next {
            let _ = self.try_admit(next);
        }
    }
}

/// Creates a disk-load [`crate::job::Job`] that resolves to `on_loaded`
/// once `path`'s bytes are available. The job's own `OnExecute` polls the
/// request state each time the runner comes back to it, returning
/// [`ExecuteResult::TryRequeue`] while the read is outstanding — so the
/// runner doesn't block, it just revisits the job later.
pub fn spawn_disk_load(
    loader: Arc<AsyncDiskLoader>,
    path: PathBuf,
    priority: Priority,
    mut on_loaded: impl FnMut(std::io::Result<Vec<u8>>) + Send + 'static,
) -> JobRef {
    let request = Arc::new(LoadRequest { path, priority, state: Mutex::new(LoadState::Pending) });
    let mut admitted = false;
    crate::job::Job::new("disk-load", priority, crate::job::ANY_RUNNER, move |_: &Runner| {
        if !admitted {
            admitted = true;
            let _ = loader.try_admit(request.clone());
            return ExecuteResult::TryRequeue;
        }
        let mut state = request.state.lock();
        match std::mem::replace(&mut *state, LoadState::Pending) {
            LoadState::Done(bytes) => {
                loader.release_and_admit_next();
                drop(state);
                on_loaded(bytes);
                ExecuteResult::Finished
            }
            still_pending => {
                *state = still_pending;
                ExecuteResult::TryRequeue
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc as StdArc;

    #[test]
    fn load_completes_and_invokes_callback() {
        let dir = std::env::temp_dir().join(format!("jobs-async-io-test-{:?}", std::thread::current().id()));
        std::fs::write(&dir, b"hello").unwrap();

        let loader = AsyncDiskLoader::new(2, 1);
        let manager = JobManager::new_for_test(vec![crate::priority::RunnerCapability::all()]);
        let got = StdArc::new(AtomicBool::new(false));
        let got2 = got.clone();
        let job = spawn_disk_load(loader, dir.clone(), Priority::from_ordinal(10), move |bytes| {
            assert_eq!(bytes.unwrap(), b"hello");
            got2.store(true, Ordering::SeqCst);
        });
        manager.queue(job).unwrap();

        let runner = manager.runner(0);
        for _ in 0..200 {
            runner.absorb_inbound();
            if let Some(job_ref) = runner.select_next(&manager) {
                match crate::job::Job::run(job_ref, runner) {
                    crate::job::PostRunAction::Requeue => runner.queue(job_ref),
                    crate::job::PostRunAction::Delete => unsafe { crate::job::Job::delete(job_ref) },
                    crate::job::PostRunAction::None => {}
                }
            }
            if got.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let _ = std::fs::remove_file(&dir);
        assert!(got.load(Ordering::SeqCst));
    }
}
