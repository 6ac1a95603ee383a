// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A queueable unit of work: a [`Stage`] plus priority, runner-affinity,
//! and a state machine exclusively driven by compare-exchange.

use crate::priority::Priority;
use crate::runner::Runner;
use crate::stage::{Node, Stage};
use reflect::{DynamicFunction, Guid};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};

bitflags::bitflags! {
    /// `Queued` and `Executing` are independent bits: a job can be
    /// re-queued (e.g. via `TryRequeue`) while a previous execution is
    /// still clearing `Executing` on another runner. A runner that pops a
    /// job already carrying `Executing` skips and requeues it rather than
    /// running it twice (§4.H step 5).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StateFlags: u8 {
        const QUEUED = 1 << 0;
        const EXECUTING = 1 << 1;
        const DESTROYING = 1 << 2;
    }
}

/// What a job's `execute` body reports back to the runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecuteResult {
    Finished,
    AwaitExternalFinish,
    FinishedAndDelete,
    FinishedAndRunDestructor,
    TryRequeue,
}

/// A job's actual work. `&mut self` is sound because the state-flag
/// protocol guarantees at most one runner executes a given job at a time.
pub trait JobBody: Send {
    fn execute(&mut self, runner: &Runner) -> ExecuteResult;
}

impl<F: FnMut(&Runner) -> ExecuteResult + Send> JobBody for F {
    fn execute(&mut self, runner: &Runner) -> ExecuteResult {
        self(runner)
    }
}

/// `all bits set` is the default affinity: eligible for any runner the
/// job's priority band permits. Exactly one bit set means the job is
/// pinned exclusively to that runner.
pub const ANY_RUNNER: u64 = u64::MAX;

/// A queueable, priority-ordered, runner-affine unit of work.
///
/// `body` sits behind a `parking_lot::Mutex` even though the state-flag
/// protocol already serializes access: the mutex is what lets
/// `FinishedAndRunDestructor`/`FinishedAndDelete` run the destructor from
/// whichever runner observes the terminal state, without `unsafe`
/// aliasing of the boxed body.
pub struct Job {
    pub(crate) stage: Stage,
    priority: Priority,
    affinity_mask: u64,
    state: AtomicU8,
    body: parking_lot::Mutex<Option<Box<dyn JobBody>>>,
    name: &'static str,
    /// Stable per-job identity for external tooling (tracing spans, replay
    /// logs) to correlate a run across processes; unrelated to scheduling.
    guid: Guid,
}

/// Owning handle to a heap-allocated [`Job`]. Jobs are single-owner:
/// submitting code holds a `JobRef` until `FinishedAndDelete` is returned,
/// at which point the runner deallocates it and the `JobRef` must not be
/// dereferenced again.
pub type JobRef = NonNull<Job>;

impl Job {
    pub fn new(name: &'static str, priority: Priority, affinity_mask: u64, body: impl JobBody + 'static) -> JobRef {
        let job = Box::new(Job {
            stage: Stage::new(),
            priority,
            affinity_mask,
            state: AtomicU8::new(0),
            body: parking_lot::Mutex::new(Some(Box::new(body))),
            name,
            guid: Guid::new_v4(),
        });
        NonNull::from(Box::leak(job))
    }

    /// Builds a job whose body is a zero-argument, no-return reflected
    /// function call — e.g. a job graph assembled from functions registered
    /// at runtime through `reflect::Registry` rather than compiled in.
    ///
    /// # Safety
    ///
    /// `function` must genuinely accept zero arguments and produce no
    /// meaningful return value, matching the contract of
    /// [`reflect::invoke`]; this can't be checked at the call site since
    /// `DynamicFunction` is type-erased.
    pub unsafe fn from_dynamic_function(name: &'static str, priority: Priority, affinity_mask: u64, function: DynamicFunction) -> JobRef {
        Self::new(name, priority, affinity_mask, move |_: &Runner| {
            // Safety: delegated to this function's own safety contract.
            unsafe { reflect::invoke::<(), ()>(function.raw(), (), false) };
            ExecuteResult::Finished
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn affinity_mask(&self) -> u64 {
        self.affinity_mask
    }

    pub fn is_exclusive(&self) -> bool {
        self.affinity_mask.count_ones() == 1
    }

    fn flags(&self) -> StateFlags {
        StateFlags::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    pub fn is_queued(&self) -> bool {
        self.flags().contains(StateFlags::QUEUED)
    }

    pub fn is_executing(&self) -> bool {
        self.flags().contains(StateFlags::EXECUTING)
    }

    pub fn is_queued_or_executing(&self) -> bool {
        let flags = self.flags();
        flags.intersects(StateFlags::QUEUED | StateFlags::EXECUTING)
    }

    /// Marks the job queued. Returns `false` if it was already queued or
    /// is being destroyed.
    pub fn try_mark_queued(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let flags = StateFlags::from_bits_truncate(current);
            debug_assert!(!flags.contains(StateFlags::DESTROYING), "queuing a job that is being destroyed");
            if flags.contains(StateFlags::QUEUED) {
                return false;
            }
            let next = (flags | StateFlags::QUEUED).bits();
            if self.state.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                return true;
            }
        }
    }

    /// Transitions `Queued -> Executing`. Returns `false` (and leaves
    /// state untouched) if `Executing` was already set — the caller must
    /// skip this job and requeue it (§4.H step 5).
    pub fn try_begin_execute(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let flags = StateFlags::from_bits_truncate(current);
            if flags.contains(StateFlags::EXECUTING) {
                return false;
            }
            let next = ((flags & !StateFlags::QUEUED) | StateFlags::EXECUTING).bits();
            if self.state.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                return true;
            }
        }
    }

    pub(crate) fn clear_executing(&self) {
        self.state.fetch_and(!StateFlags::EXECUTING.bits(), Ordering::AcqRel);
    }

    fn mark_destroying(&self) {
        self.state.fetch_or(StateFlags::DESTROYING.bits(), Ordering::AcqRel);
    }

    /// Runs the job's body and applies the resulting state transition and
    /// completion cascade. Returns what the runner should do with the
    /// `JobRef` afterward.
    pub(crate) fn run(job_ref: JobRef, runner: &Runner) -> PostRunAction {
        // Safety: `job_ref` is a live job owned by the caller's queue, and
        // the state-flag protocol guarantees only one runner has
        // transitioned it to `Executing` at a time.
        let job = unsafe { job_ref.as_ref() };
        let result = {
            let mut guard = job.body.lock();
            let body = guard.as_mut().expect("job body missing while job claims to be executing");
            body.execute(runner)
        };
        tracing::trace!(name = job.name, guid = %job.guid, ?result, "job finished OnExecute");
        match result {
            ExecuteResult::Finished => {
                job.clear_executing();
                job.stage.signal_execution_finished(Self::node(job_ref));
                PostRunAction::None
            }
            ExecuteResult::TryRequeue => {
                job.clear_executing();
                PostRunAction::Requeue
            }
            ExecuteResult::AwaitExternalFinish => {
                job.clear_executing();
                PostRunAction::None
            }
            ExecuteResult::FinishedAndDelete => {
                job.mark_destroying();
                job.stage.signal_execution_finished(Self::node(job_ref));
                *job.body.lock() = None;
                PostRunAction::Delete
            }
            ExecuteResult::FinishedAndRunDestructor => {
                job.mark_destroying();
                job.stage.signal_execution_finished(Self::node(job_ref));
                *job.body.lock() = None;
                PostRunAction::None
            }
        }
    }

    fn node(job_ref: JobRef) -> &'static dyn Node {
        // Safety: `job_ref` outlives this call, being owned by the active
        // queue entry the caller holds.
        unsafe { job_ref.as_ref() }
    }

    /// Deallocates a job whose `run` returned [`PostRunAction::Delete`].
    ///
    /// # Safety
    ///
    /// `job_ref` must not be used again after this call, and must not have
    /// been produced by anything other than [`Job::new`].
    pub(crate) unsafe fn delete(job_ref: JobRef) {
        // Safety: delegated to caller.
        drop(unsafe { Box::from_raw(job_ref.as_ptr()) });
    }
}

impl Node for Job {
    fn stage(&self) -> &Stage {
        &self.stage
    }

    fn on_dependencies_resolved(&'static self) {
        crate::runner::queue_from_current_runner(NonNull::from(self));
    }
}

/// What the runner does with a `JobRef` after [`Job::run`] returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PostRunAction {
    None,
    Requeue,
    Delete,
}

// Safety: all mutable access to `body` goes through `parking_lot::Mutex`;
// the state-flag CAS protocol above is what keeps concurrent execution of
// the *same* job from happening in the first place.
unsafe impl Sync for Job {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_follow_the_protocol() {
        let job_ref = Job::new("test", Priority::from_ordinal(10), ANY_RUNNER, |_: &Runner| ExecuteResult::Finished);
        let job = unsafe { job_ref.as_ref() };
        assert!(job.try_mark_queued());
        assert!(!job.try_mark_queued(), "already queued");
        assert!(job.try_begin_execute());
        assert!(!job.is_queued());
        assert!(job.is_executing());
        job.clear_executing();
        assert!(!job.is_executing());
        unsafe { Job::delete(job_ref) };
    }

    #[test]
    fn requeue_race_is_detected() {
        let job_ref = Job::new("test", Priority::from_ordinal(10), ANY_RUNNER, |_: &Runner| ExecuteResult::Finished);
        let job = unsafe { job_ref.as_ref() };
        job.try_mark_queued();
        assert!(job.try_begin_execute());
        // Simulate a requeue signal arriving while still executing.
        job.try_mark_queued();
        assert!(!job.try_begin_execute(), "still executing; a second runner must not also begin execution");
        job.clear_executing();
        unsafe { Job::delete(job_ref) };
    }

    #[test]
    fn distinct_jobs_get_distinct_guids() {
        let a = Job::new("a", Priority::from_ordinal(10), ANY_RUNNER, |_: &Runner| ExecuteResult::Finished);
        let b = Job::new("b", Priority::from_ordinal(10), ANY_RUNNER, |_: &Runner| ExecuteResult::Finished);
        let (a_ref, b_ref) = unsafe { (a.as_ref(), b.as_ref()) };
        assert_ne!(a_ref.guid(), b_ref.guid());
        unsafe {
            Job::delete(a);
            Job::delete(b);
        }
    }

    #[test]
    fn dynamic_function_job_invokes_the_reflected_call() {
        use std::sync::atomic::AtomicBool;

        static CALLED: AtomicBool = AtomicBool::new(false);
        unsafe fn mark_called(_frame: reflect::Frame) -> reflect::ReturnValue {
            CALLED.store(true, Ordering::SeqCst);
            reflect::ReturnValue::VOID
        }

        let function = DynamicFunction::new(mark_called, "mark_called");
        let job_ref = unsafe { Job::from_dynamic_function("dynamic", Priority::from_ordinal(10), ANY_RUNNER, function) };
        let job = unsafe { job_ref.as_ref() };
        job.try_mark_queued();
        job.try_begin_execute();
        let runner = Runner::new(0, crate::priority::RunnerCapability::all());
        Job::run(job_ref, &runner);
        assert!(CALLED.load(Ordering::SeqCst));
        unsafe { Job::delete(job_ref) };
    }
}
