// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Timer-driven job scheduling: a dedicated thread parks until the next
//! deadline and queues the associated job when it elapses.
//!
//! Grounded on `TimersJob`/native per-platform timer wrappers in the
//! source; the platform split is narrower here since the source's
//! per-platform waitable-timer objects all reduce, on a general-purpose
//! OS thread, to "sleep for a precise duration" — `cfg(unix)` uses
//! `libc::nanosleep` directly (absorbing EINTR by retrying with the
//! remaining duration) where the source uses kernel timer objects;
//! everywhere else, `std::thread::sleep` already does the equivalent.

use crate::error::Error;
use crate::job::{ExecuteResult, JobRef, ANY_RUNNER};
use crate::manager::JobManager;
use crate::priority::Priority;
use crate::runner::Runner;
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

#[cfg_attr(unix, allow(dead_code))]
fn sleep_portable(duration: Duration) {
    std::thread::sleep(duration);
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn sleep_precise(duration: Duration) {
            let mut remaining = libc::timespec {
                tv_sec: duration.as_secs().try_into().unwrap_or(i64::MAX),
                tv_nsec: i64::from(duration.subsec_nanos()),
            };
            loop {
                let mut rem = libc::timespec { tv_sec: 0, tv_nsec: 0 };
                // Safety: both pointers reference valid, appropriately
                // sized `timespec` locals for the duration of the call.
                let rc = unsafe { libc::nanosleep(&remaining, &mut rem) };
                if rc == 0 {
                    break;
                }
                // Interrupted by a signal: sleep the remainder.
                remaining = rem;
            }
        }
    } else {
        fn sleep_precise(duration: Duration) {
            sleep_portable(duration);
        }
    }
}

struct Entry {
    deadline: Instant,
    id: u64,
    job: JobRef,
}

// Safety: a `JobRef` queued with a timer is handed off exactly once, to
// the timer thread, which queues it on the manager and never touches it
// again.
unsafe impl Send for Entry {}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    condvar: Condvar,
    next_id: Mutex<u64>,
    shutdown: Mutex<bool>,
}

/// Runs a background thread that queues timer jobs as their deadlines
/// elapse. One instance typically backs a whole [`JobManager`].
pub struct TimerWheel {
    shared: &'static Shared,
}

impl TimerWheel {
    #[must_use]
    pub fn new() -> Self {
        let shared = Box::leak(Box::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            next_id: Mutex::new(1),
            shutdown: Mutex::new(false),
        }));
        Self { shared }
    }

    /// Spawns the timer thread, which queues `job` on `manager` once per
    /// fired deadline until the timer is canceled or the wheel shuts down.
    pub fn run(&self, manager: &'static JobManager) {
        let shared = self.shared;
        std::thread::Builder::new()
            .name("job-timer".to_owned())
            .spawn(move || Self::thread_loop(shared, manager))
            .expect("failed to spawn timer thread");
    }

    fn thread_loop(shared: &'static Shared, manager: &'static JobManager) {
        loop {
            let next_deadline = {
                let heap = shared.heap.lock();
                heap.peek().map(|Reverse(entry)| entry.deadline)
            };
            match next_deadline {
                None => {
                    if *shared.shutdown.lock() {
                        return;
                    }
                    let mut heap = shared.heap.lock();
                    if heap.is_empty() && !*shared.shutdown.lock() {
                        shared.condvar.wait(&mut heap);
                    }
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        sleep_precise(deadline - now);
                        continue;
                    }
                    let fired = shared.heap.lock().pop();
                    if let Some(Reverse(entry)) = fired {
                        if let Err(err) = manager.queue(entry.job) {
                            tracing::error!(?err, "timer job had no eligible runner");
                        }
                    }
                }
            }
            if *shared.shutdown.lock() && shared.heap.lock().is_empty() {
                return;
            }
        }
    }

    /// Schedules `job` to be queued once, after `delay` elapses. Returns a
    /// handle that can cancel it before it fires.
    pub fn schedule_once(&self, delay: Duration, job: JobRef) -> TimerHandle {
        let id = {
            let mut next_id = self.shared.next_id.lock();
            let id = *next_id;
            *next_id += 1;
            id
        };
        let entry = Entry { deadline: Instant::now() + delay, id, job };
        self.shared.heap.lock().push(Reverse(entry));
        self.shared.condvar.notify_one();
        TimerHandle { shared: self.shared, id }
    }

    pub fn shutdown(&self) {
        *self.shared.shutdown.lock() = true;
        self.shared.condvar.notify_all();
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies a scheduled timer for cancellation.
pub struct TimerHandle {
    shared: &'static Shared,
    id: u64,
}

impl TimerHandle {
    /// Cancels this timer if it hasn't fired yet.
    ///
    /// # Errors
    /// Returns [`Error::UnknownTimer`] if it already fired or was already
    /// canceled.
    pub fn cancel(&self) -> Result<(), Error> {
        let mut heap = self.shared.heap.lock();
        let before = heap.len();
        heap.retain(|Reverse(entry)| entry.id != self.id);
        if heap.len() == before {
            return Err(Error::UnknownTimer(self.id));
        }
        Ok(())
    }
}

/// Re-schedules its job every `period`, reusing one [`Job`](crate::job::Job)
/// object across ticks. Grounded on the source's `RecurringTimer`: `§4.J`
/// has the job re-schedule itself with the same delay from inside
/// [`ExecuteResult::AwaitExternalFinish`] rather than busy-requeuing, so the
/// job sits idle between ticks instead of cycling back through the
/// runner's queue immediately.
pub struct RecurringTimer {
    wheel: &'static TimerWheel,
    period: Duration,
    job: JobRef,
    handle: Mutex<Option<TimerHandle>>,
}

// Safety: `job` is handed to the timer wheel between ticks and to exactly
// one runner while executing; `rearm` is only ever called from that job's
// own `execute`, i.e. while this timer is reachable only through `slot`.
unsafe impl Sync for RecurringTimer {}

impl RecurringTimer {
    /// Builds a job that runs `tick` every `period`. Each firing runs
    /// `tick`, re-arms the next firing, and returns
    /// [`ExecuteResult::AwaitExternalFinish`] — the timer, not the runner,
    /// is what brings the job back.
    #[must_use]
    pub fn start(
        wheel: &'static TimerWheel,
        name: &'static str,
        priority: Priority,
        period: Duration,
        mut tick: impl FnMut() + Send + 'static,
    ) -> &'static RecurringTimer {
        let slot: &'static OnceLock<&'static RecurringTimer> = Box::leak(Box::new(OnceLock::new()));
        let job = crate::job::Job::new(name, priority, ANY_RUNNER, move |_: &Runner| {
            tick();
            if let Some(timer) = slot.get() {
                timer.rearm();
            }
            ExecuteResult::AwaitExternalFinish
        });
        let handle = wheel.schedule_once(period, job);
        let timer = Box::leak(Box::new(Self { wheel, period, job, handle: Mutex::new(Some(handle)) }));
        let _ = slot.set(timer);
        timer
    }

    fn rearm(&self) {
        let handle = self.wheel.schedule_once(self.period, self.job);
        *self.handle.lock() = Some(handle);
    }

    /// Cancels the next scheduled firing; already-executing ticks still
    /// finish, but `tick` won't be called again.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ExecuteResult, ANY_RUNNER};
    use crate::priority::Priority;
    use crate::runner::Runner;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn canceled_timer_never_fires() {
        let wheel = Box::leak(Box::new(TimerWheel::new()));
        let manager = Box::leak(Box::new(JobManager::new_for_test(vec![crate::priority::RunnerCapability::all()])));
        wheel.run(manager);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let job = crate::job::Job::new("t", Priority::from_ordinal(1), ANY_RUNNER, move |_: &Runner| {
            fired2.fetch_add(1, Ordering::SeqCst);
            ExecuteResult::Finished
        });
        let handle = wheel.schedule_once(Duration::from_secs(60), job);
        handle.cancel().unwrap();
        assert!(handle.cancel().is_err(), "canceling twice reports unknown timer");
        wheel.shutdown();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        unsafe { crate::job::Job::delete(job) };
    }
}
