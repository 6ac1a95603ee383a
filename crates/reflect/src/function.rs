// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::guid::Guid;
use crate::invoke::RawFn;

/// A type-erased callable: a function pointer under the register ABI.
///
/// Equality is pointer equality, matching the source engine's contract that
/// two `DynamicFunction`s compare equal iff they were built from the same
/// function (including the same monomorphized native-function template
/// instantiation).
#[derive(Clone, Copy)]
pub struct DynamicFunction {
    raw: RawFn,
    name: &'static str,
}

impl DynamicFunction {
    pub const fn new(raw: RawFn, name: &'static str) -> Self {
        Self { raw, name }
    }

    pub const fn raw(&self) -> RawFn {
        self.raw
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for DynamicFunction {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::fn_addr_eq(self.raw, other.raw)
    }
}
impl Eq for DynamicFunction {}

impl std::fmt::Debug for DynamicFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicFunction").field("name", &self.name).finish()
    }
}

bitflags::bitflags! {
    /// Flags recorded alongside a registered function.
    ///
    /// Grounded on `Common/Reflection/FunctionFlags.h`: the distilled spec
    /// only mentions `FunctionData`'s flags opaquely, this supplements with
    /// the original bit meanings.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FunctionFlags: u16 {
        /// Not bound to an instance; callable with no receiver in `R0`.
        const STATIC = 1 << 0;
        /// Exposed as a property getter/setter rather than a plain method.
        const PROPERTY = 1 << 1;
        /// Hidden from editor/tooling enumeration, but still callable.
        const HIDDEN = 1 << 2;
        /// Safe to invoke from script/reflection-driven callers.
        const SCRIPTABLE = 1 << 3;
    }
}

/// Whether a registered function is process-global or owned by a type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionScope {
    Global,
    OwnedBy(Guid),
}

/// Everything the registry stores per registered function.
#[derive(Clone, Debug)]
pub struct FunctionData {
    pub function: DynamicFunction,
    pub flags: FunctionFlags,
    pub scope: FunctionScope,
}

impl FunctionData {
    pub const fn new(function: DynamicFunction, flags: FunctionFlags, scope: FunctionScope) -> Self {
        Self { function, flags, scope }
    }
}
