// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::guid::Guid;
use crate::typedef::TypeDefinition;
use std::sync::Arc;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TypeFlags: u16 {
        const HIDDEN = 1 << 0;
        const SCRIPTABLE = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Grounded on `Common/Reflection/EventFlags.h`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EventFlags: u16 {
        const HIDDEN = 1 << 0;
        const SCRIPTABLE = 1 << 1;
    }
}

/// A reflected type: its identity, its [`TypeDefinition`], and its place in
/// the (optional) inheritance chain.
pub struct TypeInterface {
    pub guid: Guid,
    pub name: String,
    pub description: String,
    pub flags: TypeFlags,
    pub definition: Arc<dyn TypeDefinition>,
    pub parent: Option<Guid>,
}

impl TypeInterface {
    pub fn new(
        guid: Guid,
        name: impl Into<String>,
        definition: Arc<dyn TypeDefinition>,
    ) -> Self {
        Self {
            guid,
            name: name.into(),
            description: String::new(),
            flags: TypeFlags::empty(),
            definition,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: Guid) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A registered global event's metadata.
pub struct EventInfo {
    pub guid: Guid,
    pub name: String,
    pub flags: EventFlags,
}

/// A stable handle to a dynamically-registered function, distinct from
/// that function's [`Guid`].
///
/// Backed by a salted generation counter (see
/// [`crate::registry::Registry`]): reusing a slot bumps the generation, so
/// a `FunctionIdentifier` captured before a deregistration/re-registration
/// cycle reliably fails to resolve afterward instead of aliasing the new
/// occupant. This is the same generation-tagged-slot idea the `sharded-slab`
/// crate uses for its `Key`, adapted here as a dense array rather than a
/// sharded one since the registry is a single process-wide instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FunctionIdentifier {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl FunctionIdentifier {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}
