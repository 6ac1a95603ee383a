// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Owns the fixed array of [`Runner`]s, the idle-mask bookkeeping that lets
//! a busy runner find an idle sibling to push surplus work onto without
//! scanning every runner, and §4.I's ideal-runner election.
//!
//! Grounded on `JobManager.cpp`'s `StealIdleThreads`: a `u64` bitmask (one
//! bit per runner, capped at 64 — §4.I's explicit runner-count ceiling) is
//! claimed with a compare-exchange loop rather than a single
//! `fetch_and`/`fetch_or`, because the caller needs to know *which*
//! specific bit it won, not just that the mask changed. The per-band
//! allowed-mask cache mirrors `JobManager.h`'s `GetPreferredRunnerMask`.

use crate::config::JobManagerConfig;
use crate::error::Error;
use crate::job::JobRef;
use crate::priority::{Priority, RunnerCapability};
use crate::runner::Runner;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::thread::JoinHandle;

pub const MAX_RUNNERS: usize = 64;

/// Picks a uniformly random set bit out of `candidates` rather than always
/// the lowest index, so repeated sharing doesn't pile work onto the same
/// low-numbered idle runner every time.
fn pick_candidate(candidates: u64) -> usize {
    debug_assert_ne!(candidates, 0);
    let count = candidates.count_ones();
    let mut skip = fastrand::u32(0..count);
    let mut remaining = candidates;
    loop {
        let index = remaining.trailing_zeros();
        if skip == 0 {
            return index as usize;
        }
        skip -= 1;
        remaining &= !(1u64 << index);
    }
}

pub struct JobManager {
    runners: Vec<Runner>,
    idle_mask: AtomicU64,
    threads: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    /// `(band, mask)` per capability band: `mask` has bit `i` set iff
    /// `runners[i]`'s capability serves `band`. Built once at construction
    /// since runner capability never changes afterward.
    preferred_runner_masks: [(RunnerCapability, u64); 3],
}

impl JobManager {
    /// Builds a manager with one [`Runner`] per entry in
    /// `config.runner_capability_bits`. Does not spawn any threads; call
    /// [`JobManager::start`] once the manager is `'static`.
    ///
    /// # Panics
    ///
    /// Panics if `config` asks for more than [`MAX_RUNNERS`] runners.
    #[must_use]
    pub fn new(config: JobManagerConfig) -> Self {
        assert!(
            config.runner_capability_bits.len() <= MAX_RUNNERS,
            "runner count exceeds the {MAX_RUNNERS}-runner ceiling"
        );
        let runners: Vec<Runner> = config
            .capabilities()
            .into_iter()
            .enumerate()
            .map(|(index, capability)| Runner::new(index, capability))
            .collect();
        let preferred_runner_masks = [RunnerCapability::HIGH_PERF, RunnerCapability::LOW_PERF, RunnerCapability::EFFICIENCY].map(|band| {
            let mask = runners.iter().fold(0u64, |mask, r| if r.capability().contains(band) { mask | (1u64 << r.index()) } else { mask });
            (band, mask)
        });
        Self { runners, idle_mask: AtomicU64::new(0), threads: parking_lot::Mutex::new(Vec::new()), preferred_runner_masks }
    }

    /// Builds a manager for unit tests without spawning any OS threads.
    pub(crate) fn new_for_test(capabilities: Vec<RunnerCapability>) -> Self {
        Self::new(JobManagerConfig { runner_capability_bits: capabilities.into_iter().map(RunnerCapability::bits).collect() })
    }

    /// The process-wide instance, lazily built from [`JobManagerConfig::default`].
    /// Applications that need a non-default configuration should build
    /// their own [`JobManager`] via [`JobManager::new`] instead of using
    /// this shared instance.
    pub fn global() -> &'static JobManager {
        static INSTANCE: OnceLock<JobManager> = OnceLock::new();
        INSTANCE.get_or_init(|| JobManager::new(JobManagerConfig::default()))
    }

    /// Spawns one OS thread per runner, each driving [`Runner::tick_loop`].
    /// Call once; intended to be invoked on the `'static` instance returned
    /// by [`JobManager::global`].
    pub fn start(&'static self) {
        let mut threads = self.threads.lock();
        for runner in &self.runners {
            let handle = std::thread::Builder::new()
                .name(format!("job-runner-{}", runner.index()))
                .spawn(move || runner.tick_loop(self))
                .expect("failed to spawn job runner thread");
            threads.push(handle);
        }
    }

    pub fn shutdown_and_join(&self) {
        for runner in &self.runners {
            runner.request_shutdown();
        }
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }

    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }

    pub(crate) fn runner(&self, index: usize) -> &Runner {
        &self.runners[index]
    }

    pub(crate) fn queue_on_runner(&self, index: usize, job: JobRef) {
        self.mark_busy(index);
        self.runners[index].queue(job);
    }

    /// Which runner indices serve `priority`'s band — §4.I's
    /// `GetPreferredRunnerMask`.
    fn preferred_runner_mask(&self, priority: Priority) -> u64 {
        let band = RunnerCapability::for_priority(priority);
        self.preferred_runner_masks.iter().find(|(b, _)| *b == band).map_or(0, |(_, mask)| *mask)
    }

    /// Queues `job` onto its ideal runner (§4.I): intersect its affinity
    /// mask (which runner indices it may run on) with the runners whose
    /// capability serves its priority band, then prefer an idle runner
    /// among those, falling back to the one with the fewest locally queued
    /// jobs.
    ///
    /// # Errors
    /// Returns [`Error::NoEligibleRunner`] if no runner both lies within
    /// `job`'s affinity mask and serves its priority band.
    pub fn queue(&self, job: JobRef) -> Result<(), Error> {
        let (affinity, priority) = {
            // Safety: caller retains ownership of `job` across this call.
            let job_ref = unsafe { job.as_ref() };
            (job_ref.affinity_mask(), job_ref.priority())
        };
        let allowed = affinity & self.preferred_runner_mask(priority);
        let index = self.elect_runner(allowed).ok_or(Error::NoEligibleRunner(affinity))?;
        self.queue_on_runner(index, job);
        Ok(())
    }

    fn elect_runner(&self, allowed: u64) -> Option<usize> {
        if allowed == 0 {
            return None;
        }
        if let Some(idle) = self.steal_idle_runner(allowed) {
            return Some(idle);
        }
        (0..self.runners.len()).filter(|&i| allowed & (1u64 << i) != 0).min_by_key(|&i| self.runners[i].queued_len())
    }

    pub fn mark_idle(&self, index: usize) {
        self.idle_mask.fetch_or(1u64 << index, Ordering::AcqRel);
    }

    fn mark_busy(&self, index: usize) {
        self.idle_mask.fetch_and(!(1u64 << index), Ordering::AcqRel);
    }

    /// Claims one idle runner within `candidates_mask` via a
    /// compare-exchange loop so the caller learns exactly which bit it
    /// won, clearing it atomically so no other runner can hand work to the
    /// same sibling in the same instant.
    pub(crate) fn steal_idle_runner(&self, candidates_mask: u64) -> Option<usize> {
        loop {
            let current = self.idle_mask.load(Ordering::Acquire);
            let candidates = current & candidates_mask;
            if candidates == 0 {
                return None;
            }
            let index = pick_candidate(candidates);
            let next = current & !(1u64 << index);
            if self.idle_mask.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                return Some(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steal_idle_runner_claims_within_the_candidate_mask() {
        let manager = JobManager::new_for_test(vec![RunnerCapability::all(); 3]);
        manager.mark_idle(0);
        manager.mark_idle(1);
        manager.mark_idle(2);

        let all_but_one = !(1u64 << 1);
        let stolen = manager.steal_idle_runner(all_but_one).unwrap();
        assert_ne!(stolen, 1);
        assert!(manager.steal_idle_runner(all_but_one).is_some(), "the other idle runner is still claimable");
        assert!(manager.steal_idle_runner(all_but_one).is_none(), "only two non-excluded runners were idle");
    }

    #[test]
    fn no_idle_runners_returns_none() {
        let manager = JobManager::new_for_test(vec![RunnerCapability::all(); 2]);
        assert!(manager.steal_idle_runner(u64::MAX).is_none());
    }

    #[test]
    fn preferred_runner_mask_follows_capability_not_index() {
        let manager = JobManager::new_for_test(vec![RunnerCapability::HIGH_PERF, RunnerCapability::EFFICIENCY]);
        assert_eq!(manager.preferred_runner_mask(Priority::from_ordinal(5)), 0b01);
        assert_eq!(manager.preferred_runner_mask(Priority::from_ordinal(90)), 0b10);
    }

    #[test]
    fn queue_reports_no_eligible_runner_when_affinity_and_capability_never_intersect() {
        let manager = JobManager::new_for_test(vec![RunnerCapability::EFFICIENCY]);
        let job = crate::job::Job::new("t", Priority::from_ordinal(1), 1, |_: &crate::runner::Runner| crate::job::ExecuteResult::Finished);
        let result = manager.queue(job);
        assert!(matches!(result, Err(Error::NoEligibleRunner(_))));
        unsafe { crate::job::Job::delete(job) };
    }
}
