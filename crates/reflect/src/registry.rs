// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Process-wide map from [`Guid`] to reflected types, functions, and
//! events, plus a salted allocator handing out [`FunctionIdentifier`]s.
//!
//! Grounded on `Common/Reflection/Registry.h`: three independently-locked
//! maps (here, three `RwLock`s) rather than one coarse lock, because
//! registration (writes) is rare and lookup (reads) is hot.

use crate::error::Error;
use crate::function::{FunctionData, FunctionScope};
use crate::guid::Guid;
use crate::typeinterface::{EventInfo, FunctionIdentifier, TypeInterface};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, OnceLock, RwLock};

#[derive(Clone, Copy)]
struct Slot {
    generation: u32,
    occupied: bool,
}

/// Salted identifier allocator: a dense array of generation-tagged slots
/// plus the dense reverse-lookup array from identifier index back to guid,
/// mirroring `TSaltedIdentifierStorage`/`TIdentifierArray` in the source.
#[derive(Default)]
struct SaltedIdentifiers {
    slots: Vec<Slot>,
    guids: Vec<Guid>,
    free: Vec<u32>,
    by_guid: HashMap<Guid, FunctionIdentifier>,
}

impl SaltedIdentifiers {
    fn allocate(&mut self, guid: Guid) -> FunctionIdentifier {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.occupied = true;
            slot.generation = slot.generation.wrapping_add(1);
            self.guids[index as usize] = guid;
            let id = FunctionIdentifier::new(index, slot.generation);
            self.by_guid.insert(guid, id);
            id
        } else {
            let index = u32::try_from(self.slots.len()).expect("function identifier space exhausted");
            self.slots.push(Slot { generation: 0, occupied: true });
            self.guids.push(guid);
            let id = FunctionIdentifier::new(index, 0);
            self.by_guid.insert(guid, id);
            id
        }
    }

    fn deallocate(&mut self, id: FunctionIdentifier) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.occupied && slot.generation == id.generation {
                slot.occupied = false;
                let guid = self.guids[id.index as usize];
                self.by_guid.remove(&guid);
                self.guids[id.index as usize] = Guid::nil();
                self.free.push(id.index);
            }
        }
    }

    fn guid_of(&self, id: FunctionIdentifier) -> Option<Guid> {
        let slot = self.slots.get(id.index as usize)?;
        (slot.occupied && slot.generation == id.generation).then(|| self.guids[id.index as usize])
    }

    fn identifier_of(&self, guid: Guid) -> Option<FunctionIdentifier> {
        self.by_guid.get(&guid).copied()
    }
}

/// The process-wide reflection registry. Obtain the single instance via
/// [`Registry::global`].
pub struct Registry {
    types: RwLock<HashMap<Guid, Arc<TypeInterface>>>,
    functions: RwLock<HashMap<Guid, FunctionData>>,
    events: RwLock<HashMap<Guid, EventInfo>>,
    identifiers: RwLock<SaltedIdentifiers>,
}

impl Registry {
    /// Builds a standalone registry. Most callers want the process-wide
    /// [`Registry::global`] instance instead; this constructor exists for
    /// tests and for embedders that want an isolated registry scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
            functions: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            identifiers: RwLock::new(SaltedIdentifiers::default()),
        }
    }

    /// The process-wide instance.
    ///
    /// A lazily-initialized `&'static` rather than a `static` constructor,
    /// so static-init-time registration from any translation unit resolves
    /// regardless of initialization order (design note 9).
    pub fn global() -> &'static Registry {
        static INSTANCE: OnceLock<Registry> = OnceLock::new();
        INSTANCE.get_or_init(Registry::new)
    }

    /// Registers a type at process-init time.
    ///
    /// # Errors
    /// Returns [`Error::TypeAlreadyRegistered`] if `guid` is already
    /// present.
    pub fn register_type(&self, type_interface: TypeInterface) -> Result<(), Error> {
        let guid = type_interface.guid;
        let mut types = self.types.write().unwrap();
        if types.contains_key(&guid) {
            return Err(Error::TypeAlreadyRegistered(guid));
        }
        tracing::debug!(%guid, name = %type_interface.name, "registering type");
        types.insert(guid, Arc::new(type_interface));
        Ok(())
    }

    pub fn deregister_type(&self, guid: Guid) -> Option<Arc<TypeInterface>> {
        let removed = self.types.write().unwrap().remove(&guid);
        if removed.is_some() {
            tracing::debug!(%guid, "deregistered type");
        }
        removed
    }

    pub fn find_type(&self, guid: Guid) -> Option<Arc<TypeInterface>> {
        self.types.read().unwrap().get(&guid).cloned()
    }

    pub fn iterate_types(&self, mut callback: impl FnMut(&TypeInterface) -> ControlFlow<()>) {
        let types = self.types.read().unwrap();
        for type_interface in types.values() {
            if callback(type_interface).is_break() {
                break;
            }
        }
    }

    /// Registers a function at process-init time under a fixed guid.
    ///
    /// # Errors
    /// Returns [`Error::FunctionAlreadyRegistered`] if `guid` is already
    /// present.
    pub fn register_function(&self, guid: Guid, data: FunctionData) -> Result<(), Error> {
        let mut functions = self.functions.write().unwrap();
        if functions.contains_key(&guid) {
            return Err(Error::FunctionAlreadyRegistered(guid));
        }
        functions.insert(guid, data);
        Ok(())
    }

    /// Registers a function at runtime, returning a [`FunctionIdentifier`]
    /// that stays valid until the matching
    /// [`Registry::deregister_dynamic_function`] call.
    ///
    /// # Errors
    /// Returns [`Error::FunctionAlreadyRegistered`] if `guid` is already
    /// present.
    pub fn register_dynamic_function(
        &self,
        guid: Guid,
        data: FunctionData,
    ) -> Result<FunctionIdentifier, Error> {
        {
            let mut functions = self.functions.write().unwrap();
            if functions.contains_key(&guid) {
                return Err(Error::FunctionAlreadyRegistered(guid));
            }
            functions.insert(guid, data);
        }
        let id = self.identifiers.write().unwrap().allocate(guid);
        tracing::trace!(%guid, ?id, "registered dynamic function");
        Ok(id)
    }

    pub fn deregister_dynamic_function(&self, id: FunctionIdentifier) -> Option<FunctionData> {
        let guid = self.identifiers.write().unwrap().guid_of(id)?;
        self.identifiers.write().unwrap().deallocate(id);
        self.functions.write().unwrap().remove(&guid)
    }

    pub fn find_function(&self, guid: Guid) -> Option<FunctionData> {
        self.functions.read().unwrap().get(&guid).cloned()
    }

    /// Finds a function, filtered to a particular [`FunctionScope`] —
    /// folds the source engine's `FindGlobalFunctionDefinition` /
    /// `FindTypeFunctionDefinition` split into one call.
    pub fn find_function_in_scope(&self, guid: Guid, scope: FunctionScope) -> Option<FunctionData> {
        let data = self.find_function(guid)?;
        (data.scope == scope).then_some(data)
    }

    pub fn find_function_guid(&self, id: FunctionIdentifier) -> Option<Guid> {
        self.identifiers.read().unwrap().guid_of(id)
    }

    pub fn find_function_identifier(&self, guid: Guid) -> Option<FunctionIdentifier> {
        self.identifiers.read().unwrap().identifier_of(guid)
    }

    pub fn iterate_functions(&self, mut callback: impl FnMut(Guid, &FunctionData) -> ControlFlow<()>) {
        let functions = self.functions.read().unwrap();
        for (guid, data) in functions.iter() {
            if callback(*guid, data).is_break() {
                break;
            }
        }
    }

    /// # Errors
    /// Returns [`Error::EventAlreadyRegistered`] if `guid` is already
    /// present.
    pub fn register_event(&self, guid: Guid, info: EventInfo) -> Result<(), Error> {
        let mut events = self.events.write().unwrap();
        if events.contains_key(&guid) {
            return Err(Error::EventAlreadyRegistered(guid));
        }
        events.insert(guid, info);
        Ok(())
    }

    pub fn deregister_event(&self, guid: Guid) -> Option<EventInfo> {
        self.events.write().unwrap().remove(&guid)
    }

    pub fn find_event(&self, guid: Guid) -> Option<Guid> {
        self.events.read().unwrap().get(&guid).map(|info| info.guid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{DynamicFunction, FunctionFlags};
    use crate::invoke::ReturnValue;

    unsafe fn noop(_frame: crate::register::Frame) -> ReturnValue {
        ReturnValue::VOID
    }

    #[test]
    fn identifier_roundtrips_through_registry() {
        let registry = Registry::new();
        let guid = Guid::new_v4();
        let data = FunctionData::new(
            DynamicFunction::new(noop, "noop"),
            FunctionFlags::STATIC,
            FunctionScope::Global,
        );
        let id = registry.register_dynamic_function(guid, data).unwrap();
        assert_eq!(registry.find_function_guid(id), Some(guid));
        assert_eq!(registry.find_function_identifier(guid), Some(id));
    }

    #[test]
    fn stale_identifier_after_deregistration_does_not_resolve() {
        let registry = Registry::new();
        let guid = Guid::new_v4();
        let data = FunctionData::new(
            DynamicFunction::new(noop, "noop"),
            FunctionFlags::STATIC,
            FunctionScope::Global,
        );
        let id = registry.register_dynamic_function(guid, data).unwrap();
        registry.deregister_dynamic_function(id);
        assert_eq!(registry.find_function_guid(id), None);
        assert!(registry.find_function(guid).is_none());

        // Re-registering reuses the slot but bumps the generation, so the
        // stale identifier must not alias the new registration.
        let data2 = FunctionData::new(
            DynamicFunction::new(noop, "noop"),
            FunctionFlags::STATIC,
            FunctionScope::Global,
        );
        let guid2 = Guid::new_v4();
        let id2 = registry.register_dynamic_function(guid2, data2).unwrap();
        assert_eq!(id2.index, id.index);
        assert_ne!(id2.generation, id.generation);
        assert_eq!(registry.find_function_guid(id), None);
    }
}
