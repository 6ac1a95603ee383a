// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! An OS thread driving the job tick loop: absorb incoming jobs, pick the
//! highest-priority runnable one, optionally share surplus work with an
//! idle sibling, execute it, and dispatch the result.
//!
//! Grounded on `JobRunnerThread.cpp`'s `RunNext`: unlike `kasync`'s
//! executor, which is pull-based (idle workers steal from busy ones' local
//! queues), the original engine is push-based — a runner proactively
//! offloads surplus queued work onto an idle sibling's inbound queue
//! before running its own next job. The CAS-based idle-mask bookkeeping
//! that makes "is any sibling idle" a cheap check lives in
//! [`crate::manager::JobManager`].

use crate::job::{Job, JobRef, PostRunAction};
use crate::manager::JobManager;
use crate::priority::RunnerCapability;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::collections::BinaryHeap;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};

thread_local! {
    static CURRENT_RUNNER: Cell<*const Runner> = const { Cell::new(std::ptr::null()) };
}

/// Queues `job` onto whichever runner the calling thread belongs to, or
/// onto runner 0 if called from a thread that isn't one of the manager's
/// runners (mirrors the source's "queue on current thread, falling back to
/// the main queue" default).
pub(crate) fn queue_from_current_runner(job: JobRef) {
    CURRENT_RUNNER.with(|cell| {
        let ptr = cell.get();
        // Safety: a non-null `CURRENT_RUNNER` is only ever set to the
        // address of the `Runner` whose `tick_loop` is live on this
        // thread, for the duration of that call.
        if let Some(runner) = unsafe { ptr.as_ref() } {
            runner.queue(job);
        } else {
            tracing::trace!("queuing dependency-resolved job from a non-runner thread onto runner 0");
            JobManager::global().queue_on_runner(0, job);
        }
    });
}

/// Wraps a [`JobRef`] so [`BinaryHeap`] orders by job priority (lower
/// ordinal = higher priority = greater in heap order).
struct QueuedJob(JobRef);

// Safety: a `JobRef` is only ever placed in a runner's own queue, which is
// only touched by that runner's thread or under the inbound-queue mutex.
unsafe impl Send for QueuedJob {}

impl QueuedJob {
    fn job(&self) -> &Job {
        // Safety: jobs are only removed from every queue (and deleted)
        // from the runner that owns their final disposition; while queued
        // here, the job outlives this reference.
        unsafe { self.0.as_ref() }
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.job().priority() == other.job().priority()
    }
}
impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: `BinaryHeap` is a max-heap, but lower ordinal is higher
        // priority, so invert the comparison to pop the lowest ordinal first.
        other.job().priority().cmp(&self.job().priority())
    }
}

struct Inbound {
    queue: Mutex<Vec<JobRef>>,
    condvar: Condvar,
}

impl Inbound {
    fn new() -> Self {
        Self { queue: Mutex::new(Vec::new()), condvar: Condvar::new() }
    }

    fn push(&self, job: JobRef) {
        self.queue.lock().push(job);
        self.condvar.notify_one();
    }

    fn drain_into(&self, local: &mut BinaryHeap<QueuedJob>) {
        let mut queue = self.queue.lock();
        for job in queue.drain(..) {
            local.push(QueuedJob(job));
        }
    }
}

/// One OS thread's scheduling state: a local priority queue it alone pops
/// from, and an inbound queue other runners (or external code) push onto.
pub struct Runner {
    index: usize,
    capability: RunnerCapability,
    local: Mutex<BinaryHeap<QueuedJob>>,
    inbound: Inbound,
    shutdown: AtomicBool,
}

impl Runner {
    pub(crate) fn new(index: usize, capability: RunnerCapability) -> Self {
        Self {
            index,
            capability,
            local: Mutex::new(BinaryHeap::new()),
            inbound: Inbound::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capability(&self) -> RunnerCapability {
        self.capability
    }

    /// Affinity (which runner indices a job names) and capability (which
    /// priority bands this runner serves) are independent axes — both must
    /// allow this runner for the job to run here (§4.I).
    pub fn can_run(&self, job: &Job) -> bool {
        let index_bit = 1u64 << self.index;
        job.affinity_mask() & index_bit != 0 && self.capability.contains(RunnerCapability::for_priority(job.priority()))
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.local.lock().len()
    }

    /// Pushes `job` onto this runner's inbound queue and wakes it if it's
    /// parked waiting for work.
    pub fn queue(&self, job: JobRef) {
        // Safety: caller retains ownership; we only read immutable state.
        let job_ref = unsafe { job.as_ref() };
        job_ref.try_mark_queued();
        self.inbound.push(job);
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.inbound.condvar.notify_all();
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Runs this runner's tick loop until [`Runner::request_shutdown`] is
    /// called and no work remains. Intended to be the body of a dedicated
    /// OS thread; sets the thread-local `CURRENT_RUNNER` pointer for the
    /// duration so jobs resolved from within `execute` bodies on this
    /// thread default to queuing back here.
    pub fn tick_loop(&self, manager: &JobManager) {
        CURRENT_RUNNER.with(|cell| cell.set(std::ptr::from_ref(self)));
        loop {
            self.absorb_inbound();
            let Some(job_ref) = self.select_next(manager) else {
                if self.is_shutting_down() {
                    break;
                }
                manager.mark_idle(self.index);
                self.park_for_work();
                continue;
            };

            match Job::run(job_ref, self) {
                PostRunAction::None => {}
                PostRunAction::Requeue => self.queue(job_ref),
                // Safety: `Job::run` only returns `Delete` for
                // `FinishedAndDelete`, which per the state machine is a
                // terminal transition no other reference observes again.
                PostRunAction::Delete => unsafe { Job::delete(job_ref) },
            }
        }
        CURRENT_RUNNER.with(|cell| cell.set(std::ptr::null()));
    }

    pub(crate) fn absorb_inbound(&self) {
        self.inbound.drain_into(&mut self.local.lock());
    }

    /// Picks the highest-priority runnable job for this runner. Before
    /// returning its own next job, shares any *other* eligible surplus
    /// work onto an idle sibling (push-model, §4.H step 4) so idle runners
    /// get fed without needing to steal.
    pub(crate) fn select_next(&self, manager: &JobManager) -> Option<JobRef> {
        let mut local = self.local.lock();
        self.share_surplus(manager, &mut local);

        while let Some(QueuedJob(job_ref)) = local.pop() {
            // Safety: still queued, owned by this runner's local heap.
            let job = unsafe { job_ref.as_ref() };
            if !job.try_begin_execute() {
                // A requeue raced with us; try again on the next pass.
                continue;
            }
            return Some(job_ref);
        }
        None
    }

    /// Distributes surplus local work across every idle sibling at once
    /// (§4.H step 4): each idle runner gets up to `⌊N/(idle+1)⌋` eligible
    /// jobs, and this runner keeps the rest (that floor's share plus the
    /// remainder), rather than handing at most one job to at most one
    /// sibling.
    fn share_surplus(&self, manager: &JobManager, local: &mut BinaryHeap<QueuedJob>) {
        let total = local.len();
        if total <= 1 {
            return;
        }
        let not_self = !(1u64 << self.index);
        let mut idle_siblings = Vec::new();
        while let Some(index) = manager.steal_idle_runner(not_self) {
            idle_siblings.push(index);
        }
        if idle_siblings.is_empty() {
            return;
        }

        let share_count = total / (idle_siblings.len() + 1);
        if share_count == 0 {
            for index in idle_siblings {
                manager.mark_idle(index);
            }
            return;
        }

        let mut given = vec![0usize; idle_siblings.len()];
        let mut keep = Vec::with_capacity(total);
        'drain: while let Some(entry) = local.pop() {
            for (slot, &idle_index) in idle_siblings.iter().enumerate() {
                if given[slot] < share_count && manager.runner(idle_index).can_run(entry.job()) {
                    given[slot] += 1;
                    manager.queue_on_runner(idle_index, entry.0);
                    continue 'drain;
                }
            }
            keep.push(entry);
        }
        for entry in keep {
            local.push(entry);
        }
        for (slot, &idle_index) in idle_siblings.iter().enumerate() {
            if given[slot] == 0 {
                manager.mark_idle(idle_index);
            }
        }
    }

    fn park_for_work(&self) {
        let mut queue = self.inbound.queue.lock();
        if !queue.is_empty() || self.is_shutting_down() {
            return;
        }
        self.inbound.condvar.wait(&mut queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ExecuteResult, ANY_RUNNER};
    use crate::priority::Priority;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn select_next_pops_highest_priority_first() {
        let runner = Runner::new(0, RunnerCapability::all());
        let order = Arc::new(Mutex::new(Vec::new()));

        let make = |priority: u8, tag: u8, order: Arc<Mutex<Vec<u8>>>| {
            Job::new("t", Priority::from_ordinal(priority), ANY_RUNNER, move |_: &Runner| {
                order.lock().push(tag);
                ExecuteResult::Finished
            })
        };

        let low = make(50, 2, order.clone());
        let high = make(1, 1, order.clone());
        runner.queue(low);
        runner.queue(high);
        runner.absorb_inbound();

        let manager = JobManager::new_for_test(vec![RunnerCapability::all()]);
        let first = runner.select_next(&manager).unwrap();
        assert!(std::ptr::eq(first.as_ptr(), high.as_ptr()));
        Job::run(first, &runner);

        let second = runner.select_next(&manager).unwrap();
        assert!(std::ptr::eq(second.as_ptr(), low.as_ptr()));
        Job::run(second, &runner);

        assert_eq!(*order.lock(), vec![1, 2]);
        unsafe {
            Job::delete(high);
            Job::delete(low);
        }
    }

    #[test]
    fn executing_job_is_skipped_not_rerun() {
        let runner = Runner::new(0, RunnerCapability::all());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let job = Job::new("t", Priority::from_ordinal(1), ANY_RUNNER, move |_: &Runner| {
            calls2.fetch_add(1, Ordering::SeqCst);
            ExecuteResult::Finished
        });
        // Safety: test-local job, not yet shared across threads.
        let job_ref = unsafe { job.as_ref() };
        job_ref.try_mark_queued();
        assert!(job_ref.try_begin_execute());
        runner.queue(job);
        runner.absorb_inbound();

        let manager = JobManager::new_for_test(vec![RunnerCapability::all()]);
        assert!(runner.select_next(&manager).is_none(), "already-executing job must be skipped");
        job_ref.clear_executing();
        unsafe { Job::delete(job) };
    }

    #[test]
    fn surplus_is_shared_across_all_idle_siblings() {
        let manager = JobManager::new_for_test(vec![RunnerCapability::all(); 3]);
        manager.mark_idle(1);
        manager.mark_idle(2);

        let runner0 = manager.runner(0);
        let mut jobs = Vec::new();
        for i in 0..6u8 {
            let job = Job::new("t", Priority::from_ordinal(i), ANY_RUNNER, |_: &Runner| ExecuteResult::Finished);
            runner0.queue(job);
            jobs.push(job);
        }
        runner0.absorb_inbound();

        // 6 jobs, 2 idle siblings: each gets floor(6/3) = 2, runner0 keeps
        // the floor share plus the remainder (also 2).
        let picked = runner0.select_next(&manager);
        assert!(picked.is_some(), "runner0 should still keep its own share");

        manager.runner(1).absorb_inbound();
        manager.runner(2).absorb_inbound();
        assert_eq!(
            manager.runner(1).queued_len() + manager.runner(2).queued_len(),
            4,
            "4 of 6 jobs shared across the two idle siblings"
        );
        assert_eq!(runner0.queued_len() + 1, 2, "runner0 keeps its own floor share plus the remainder");

        for job in jobs {
            unsafe { Job::delete(job) };
        }
    }
}
