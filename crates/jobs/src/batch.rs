// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `JobBatch`: queue a group of jobs and block the calling thread until
//! all of them have finished, without the caller hand-wiring a join stage.
//!
//! Grounded on the source's `JobBatch` convenience wrapper around
//! `Job::Batch` dependency wiring; here a leaked join [`Stage`] plays the
//! role of the sentinel node every batched job's stage feeds into.

use crate::error::Error;
use crate::job::JobRef;
use crate::manager::JobManager;
use crate::stage::{Node, Stage};
use parking_lot::{Condvar, Mutex};

struct JoinPoint {
    stage: Stage,
    done: Mutex<bool>,
    condvar: Condvar,
}

impl Node for JoinPoint {
    fn stage(&self) -> &Stage {
        &self.stage
    }

    fn on_dependencies_resolved(&'static self) {
        *self.done.lock() = true;
        self.condvar.notify_all();
    }
}

/// A group of jobs submitted together, joined on [`JobBatch::wait`].
pub struct JobBatch {
    join: &'static JoinPoint,
    jobs: Vec<JobRef>,
}

impl JobBatch {
    #[must_use]
    pub fn new() -> Self {
        let join = Box::leak(Box::new(JoinPoint { stage: Stage::new(), done: Mutex::new(false), condvar: Condvar::new() }));
        Self { join, jobs: Vec::new() }
    }

    /// Adds `job` to the batch; must be called before [`JobBatch::submit`].
    pub fn add(&mut self, job: JobRef) {
        // Safety: `job` was just constructed by the caller and not yet
        // queued, so nothing else observes its stage concurrently.
        let job_ref = unsafe { job.as_ref() };
        job_ref.stage.add_next(self.join);
        self.jobs.push(job);
    }

    /// Queues every job in the batch on `manager`.
    ///
    /// # Errors
    /// Returns the first [`Error::NoEligibleRunner`] hit while queuing the
    /// batch's jobs; jobs already queued before the failing one stay
    /// queued.
    pub fn submit(&self, manager: &JobManager) -> Result<(), Error> {
        for &job in &self.jobs {
            manager.queue(job)?;
        }
        if self.jobs.is_empty() {
            self.join.on_dependencies_resolved();
        }
        Ok(())
    }

    /// Blocks the calling thread until every job in the batch has finished.
    pub fn wait(&self) {
        let mut done = self.join.done.lock();
        while !*done {
            self.join.condvar.wait(&mut done);
        }
    }
}

impl Default for JobBatch {
    fn default() -> Self {
        Self::new()
    }
}
