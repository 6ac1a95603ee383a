// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A DAG node tracking dependency completion. [`crate::job::Job`] adds
//! priority/affinity/execution on top of a `Stage`; a bare `Stage` merely
//! tracks completion and propagates it to its successors.
//!
//! Edges are `&'static dyn Node` rather than `Arc`: per design note 9 the
//! stage graph forms a DAG only by convention, and ownership belongs to
//! whatever built the graph (typically a frame scheduler with an arena or
//! leaked allocations outliving the frame), not to the edges themselves.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU16, Ordering};

/// Something that can sit in the dependency graph: a bare [`Stage`] or a
/// [`crate::job::Job`].
pub trait Node: Send + Sync {
    fn stage(&self) -> &Stage;

    /// Called once every dependency of this node has executed. The default
    /// `Stage` behavior (a terminal node with no work of its own) is to
    /// immediately signal its own completion, propagating the cascade.
    fn on_dependencies_resolved(&'static self) {
        self.stage().signal_execution_finished(self);
    }
}

/// Tracks how many dependencies a node has and how many have completed.
#[derive(Default)]
pub struct Stage {
    dependency_count: AtomicU16,
    completed_count: AtomicU16,
    next_stages: RwLock<Vec<&'static dyn Node>>,
}

impl Stage {
    pub const fn new() -> Self {
        Self { dependency_count: AtomicU16::new(0), completed_count: AtomicU16::new(0), next_stages: RwLock::new(Vec::new()) }
    }

    pub fn dependency_count(&self) -> u16 {
        self.dependency_count.load(Ordering::Acquire)
    }

    pub fn completed_count(&self) -> u16 {
        self.completed_count.load(Ordering::Acquire)
    }

    pub fn is_runnable(&self) -> bool {
        self.completed_count() >= self.dependency_count()
    }

    /// Adds `next` as a direct successor of `self`: `next`'s dependency
    /// count is incremented first, then `next` is appended under this
    /// stage's write lock.
    ///
    /// # Panics
    ///
    /// Panics (debug assertion) if `next` is already a direct successor —
    /// cycles further up the graph are not detected; that's the caller's
    /// obligation, per the source contract.
    pub fn add_next(&self, next: &'static dyn Node) {
        next.stage().dependency_count.fetch_add(1, Ordering::AcqRel);
        let mut stages = self.next_stages.write();
        debug_assert!(
            !stages.iter().any(|existing| std::ptr::eq(*existing, next)),
            "stage already has this direct successor"
        );
        stages.push(next);
    }

    /// Removes `next` from this stage's successors. If `was_completed` is
    /// set, `next`'s completed-count is decremented to match, so the
    /// invariant `completed <= dependency_count` is preserved.
    pub fn remove_next(&self, next: &'static dyn Node, was_completed: bool) {
        next.stage().dependency_count.fetch_sub(1, Ordering::AcqRel);
        if was_completed {
            next.stage().completed_count.fetch_sub(1, Ordering::AcqRel);
        }
        self.next_stages.write().retain(|existing| !std::ptr::eq(*existing, next));
    }

    /// Called by a node when it finishes executing: walks `self`'s
    /// successors under a shared lock and bumps each one's completed
    /// count, firing `on_dependencies_resolved` for any that are now fully
    /// resolved and resetting their completed count to 0 so they can fire
    /// again on a future cycle.
    pub fn signal_execution_finished(&self, _source: &'static dyn Node) {
        let stages = self.next_stages.read();
        for &next in stages.iter() {
            next.stage().on_dependency_executed(next);
        }
    }

    fn on_dependency_executed(&self, owner: &'static dyn Node) {
        let dependency_count = self.dependency_count.load(Ordering::Acquire);
        let completed = self.completed_count.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(completed <= dependency_count, "completed-count exceeded dependency-count");
        if completed == dependency_count {
            self.completed_count.store(0, Ordering::Release);
            owner.on_dependencies_resolved();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingNode {
        stage: Stage,
        fired: AtomicUsize,
    }

    impl Node for CountingNode {
        fn stage(&self) -> &Stage {
            &self.stage
        }
        fn on_dependencies_resolved(&'static self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
            self.stage().signal_execution_finished(self);
        }
    }

    fn leak_node() -> &'static CountingNode {
        Box::leak(Box::new(CountingNode { stage: Stage::new(), fired: AtomicUsize::new(0) }))
    }

    #[test]
    fn diamond_resolves_exactly_once() {
        let a = leak_node();
        let b = leak_node();
        let c = leak_node();
        let d = leak_node();

        a.stage().add_next(b);
        a.stage().add_next(c);
        b.stage().add_next(d);
        c.stage().add_next(d);

        a.stage().signal_execution_finished(a);
        assert_eq!(b.fired.load(Ordering::SeqCst), 1);
        assert_eq!(c.fired.load(Ordering::SeqCst), 1);
        assert_eq!(d.fired.load(Ordering::SeqCst), 0);

        b.stage().signal_execution_finished(b);
        assert_eq!(d.fired.load(Ordering::SeqCst), 0);
        c.stage().signal_execution_finished(c);
        assert_eq!(d.fired.load(Ordering::SeqCst), 1);
        assert_eq!(d.stage().completed_count(), 0, "completed-count resets so the stage can fire again");
    }

    #[test]
    fn linear_chain_fires_in_order() {
        let a = leak_node();
        let b = leak_node();
        let c = leak_node();
        a.stage().add_next(b);
        b.stage().add_next(c);

        a.stage().signal_execution_finished(a);
        assert_eq!(b.fired.load(Ordering::SeqCst), 1);
        assert_eq!(c.fired.load(Ordering::SeqCst), 1);
    }
}
