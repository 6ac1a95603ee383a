// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::guid::Guid;

/// Errors surfaced at the few fallible boundaries the reflection layer has.
///
/// Invalid dynamic calls (wrong arity, wrong types) are a contract violation
/// by the caller, not a recoverable error, and are caught by
/// `debug_assert!` instead of appearing here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("type {0} is already registered")]
    TypeAlreadyRegistered(Guid),
    #[error("function {0} is already registered")]
    FunctionAlreadyRegistered(Guid),
    #[error("event {0} is already registered")]
    EventAlreadyRegistered(Guid),
    #[error("no type registered for guid {0}")]
    UnknownType(Guid),
    #[error("no function registered for guid {0}")]
    UnknownFunction(Guid),
    #[error("no event registered for guid {0}")]
    UnknownEvent(Guid),
    #[error("function identifier {0:?} does not resolve to a live registration")]
    StaleFunctionIdentifier(crate::typeinterface::FunctionIdentifier),
    #[error("stored value requires {required} bytes but only {available} were reserved")]
    InsufficientCapacity { required: usize, available: usize },
}
