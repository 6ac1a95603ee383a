// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Type-erased register calling convention, dynamic functions/delegates/events,
//! runtime type definitions, and the process-wide reflection registry.

#![forbid(unsafe_op_in_unsafe_fn)]

mod bitio;
mod delegate;
mod dynamic_type;
mod error;
mod event;
mod function;
mod guid;
mod invoke;
mod register;
mod registry;
mod typedef;
mod typeinterface;

pub use bitio::{bits_for_active_index, BitReader, BitWriter};
pub use delegate::{DelegateId, DynamicDelegate, IdentityKind};
pub use dynamic_type::{DynamicTypeDefinition, FieldLayout, TypeShape};
pub use error::Error;
pub use event::DynamicEvent;
pub use function::{DynamicFunction, FunctionData, FunctionFlags, FunctionScope};
pub use guid::Guid;
pub use invoke::{invoke, invoke_getter, invoke_method, ArgPack, RawFn, ReturnValue};
pub use register::{Frame, Register, RegisterSlot, REGISTER_COUNT};
pub use registry::Registry;
pub use typedef::{BitWidth, Native, ReflectedValue, TypeDefinition};
pub use typeinterface::{EventFlags, EventInfo, FunctionIdentifier, TypeFlags, TypeInterface};
