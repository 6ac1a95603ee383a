// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::function::DynamicFunction;
use crate::register::Register;

/// What an [`DelegateId`]'s key actually names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    /// Key is the address of the bound object.
    ObjectAddress,
    /// Key is a caller-chosen primitive (e.g. a slot/connection number).
    Primitive,
}

/// A delegate's deduplication/removal key.
///
/// The source engine reinterprets the trailing pointer-sized bytes of the
/// delegate's user-data register as its identity. That's a C++-specific
/// trick this rewrite does not carry over (design note 9.c): identity is
/// instead a dedicated typed field set explicitly at construction, so it
/// can't be confused with captured state that merely happens to look like
/// a pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DelegateId {
    pub key: u64,
    pub kind: IdentityKind,
}

impl DelegateId {
    pub const fn object(address: u64) -> Self {
        Self { key: address, kind: IdentityKind::ObjectAddress }
    }

    pub const fn primitive(key: u64) -> Self {
        Self { key, kind: IdentityKind::Primitive }
    }
}

/// A type-erased callable bound to captured user data, with an explicit
/// identity used for deduplication and removal from a [`crate::DynamicEvent`].
#[derive(Clone, Copy, Debug)]
pub struct DynamicDelegate {
    identity: DelegateId,
    user_data: Register,
    callback: DynamicFunction,
}

impl DynamicDelegate {
    pub const fn new(identity: DelegateId, user_data: Register, callback: DynamicFunction) -> Self {
        Self { identity, user_data, callback }
    }

    pub const fn identity(&self) -> DelegateId {
        self.identity
    }

    pub const fn user_data(&self) -> Register {
        self.user_data
    }

    pub const fn callback(&self) -> DynamicFunction {
        self.callback
    }
}

impl PartialEq for DynamicDelegate {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}
impl Eq for DynamicDelegate {}
