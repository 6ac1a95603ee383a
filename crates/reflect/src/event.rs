// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::delegate::{DelegateId, DynamicDelegate};
use crate::register::{Register, REGISTER_COUNT};

/// A multicast event: an ordered collection of delegates, deduplicated by
/// identity unless the caller explicitly opts into duplicates.
#[derive(Clone, Debug, Default)]
pub struct DynamicEvent {
    delegates: Vec<DynamicDelegate>,
}

impl DynamicEvent {
    pub const fn new() -> Self {
        Self { delegates: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }

    pub fn contains(&self, identity: DelegateId) -> bool {
        self.delegates.iter().any(|d| d.identity() == identity)
    }

    /// Adds `delegate`.
    ///
    /// # Panics
    ///
    /// Panics (debug assertion) if a delegate with the same identity is
    /// already registered; use [`DynamicEvent::emplace_with_duplicates`] to
    /// bypass this.
    pub fn emplace(&mut self, delegate: DynamicDelegate) {
        debug_assert!(
            !self.contains(delegate.identity()),
            "delegate identity {:?} already registered",
            delegate.identity()
        );
        self.delegates.push(delegate);
    }

    pub fn emplace_with_duplicates(&mut self, delegate: DynamicDelegate) {
        self.delegates.push(delegate);
    }

    /// Removes the first delegate matching `identity`. Returns whether one
    /// was found.
    pub fn remove(&mut self, identity: DelegateId) -> bool {
        if let Some(pos) = self.delegates.iter().position(|d| d.identity() == identity) {
            self.delegates.remove(pos);
            true
        } else {
            false
        }
    }

    /// Removes every delegate matching `identity`. Returns how many were
    /// removed.
    pub fn remove_all(&mut self, identity: DelegateId) -> usize {
        let before = self.delegates.len();
        self.delegates.retain(|d| d.identity() != identity);
        before - self.delegates.len()
    }

    /// Calls every delegate in registration order with `args` placed in
    /// `R1..R5` (the delegate's own user data occupies `R0`).
    ///
    /// The delegate list is snapshotted before iterating: a handler that
    /// adds or removes delegates from this event observes neither of those
    /// mutations during its own broadcast, and the broadcast itself never
    /// aliases the live vector. This resolves the source engine's
    /// undefined "mutate during broadcast" behavior as copy-on-dispatch
    /// (design note 9, open question a).
    pub fn broadcast(&self, args: [Register; REGISTER_COUNT - 1]) {
        let snapshot = self.delegates.clone();
        for delegate in &snapshot {
            Self::call_one(delegate, args);
        }
    }

    /// Invokes only the first delegate matching `identity`. Returns whether
    /// one was found.
    pub fn broadcast_to(&self, identity: DelegateId, args: [Register; REGISTER_COUNT - 1]) -> bool {
        let snapshot = self.delegates.clone();
        if let Some(delegate) = snapshot.iter().find(|d| d.identity() == identity) {
            Self::call_one(delegate, args);
            true
        } else {
            false
        }
    }

    fn call_one(delegate: &DynamicDelegate, args: [Register; REGISTER_COUNT - 1]) {
        let mut frame = [Register::ZERO; REGISTER_COUNT];
        frame[0] = delegate.user_data();
        frame[1..].copy_from_slice(&args);
        // Safety: the delegate's callback was registered against this
        // exact register signature by whoever built the `DynamicDelegate`.
        let _ = unsafe { (delegate.callback().raw())(frame) };
    }
}
