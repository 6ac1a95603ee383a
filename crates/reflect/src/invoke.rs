// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Typed invocation helpers layered over the raw [`crate::register::Frame`]
//! ABI. Pure marshalling: a misuse (wrong arity or type at either end) is a
//! contract violation by the caller, not a recoverable error, so these
//! helpers assert rather than return `Result`.

use crate::register::{Frame, Register, REGISTER_COUNT};
use std::ptr::NonNull;

/// The four-register result of a dynamic call.
#[derive(Clone, Copy, Debug)]
pub struct ReturnValue(pub [Register; 4]);

impl ReturnValue {
    pub const VOID: ReturnValue = ReturnValue([Register::ZERO; 4]);

    pub fn from_value<T>(value: T) -> Self {
        let mut regs = [Register::ZERO; 4];
        regs[0] = Register::pack(value);
        ReturnValue(regs)
    }

    /// # Safety
    ///
    /// `boxed` must match how the value was produced (see
    /// [`Register::pack`]/[`Register::unpack`]).
    pub unsafe fn into_value<T>(self, boxed: bool) -> T {
        // Safety: delegated to caller.
        unsafe { self.0[0].unpack(boxed) }
    }
}

impl std::ops::Index<usize> for ReturnValue {
    type Output = Register;
    fn index(&self, index: usize) -> &Register {
        &self.0[index]
    }
}

/// A dynamically invocable function pointer: six registers in, four out.
pub type RawFn = unsafe fn(Frame) -> ReturnValue;

/// Packs a tuple of arguments into a call frame starting at `R0`.
///
/// Implemented for tuples up to five elements (`R0` is then free for a
/// receiver when invoking through a member function).
pub trait ArgPack {
    fn pack_into(self, frame: &mut Frame, start: usize);
}

macro_rules! impl_arg_pack {
    ($($idx:tt : $ty:ident),*) => {
        impl<$($ty),*> ArgPack for ($($ty,)*) {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn pack_into(self, frame: &mut Frame, start: usize) {
                let ($($ty,)*) = self;
                let mut slot = start;
                $(
                    assert!(slot < REGISTER_COUNT, "argument list overflows the register frame");
                    frame[slot] = Register::pack($ty);
                    slot += 1;
                )*
            }
        }
    };
}

impl_arg_pack!();
impl_arg_pack!(0: A);
impl_arg_pack!(0: A, 1: B);
impl_arg_pack!(0: A, 1: B, 2: C);
impl_arg_pack!(0: A, 1: B, 2: C, 3: D);
impl_arg_pack!(0: A, 1: B, 2: C, 3: D, 4: E);

/// Invokes a raw register-ABI function with typed arguments, starting at
/// `R0`.
///
/// # Safety
///
/// `raw` must genuinely accept the registers produced for `Args` at the
/// offsets `pack_into` writes them, and must produce a `Ret` in the
/// convention [`ReturnValue::into_value`] expects.
pub unsafe fn invoke<Args: ArgPack, Ret>(raw: RawFn, args: Args, ret_boxed: bool) -> Ret {
    let mut frame = [Register::ZERO; REGISTER_COUNT];
    args.pack_into(&mut frame, 0);
    // Safety: delegated to caller.
    let ret = unsafe { raw(frame) };
    // Safety: delegated to caller.
    unsafe { ret.into_value(ret_boxed) }
}

/// Invokes a member function, placing `receiver` in `R0` and packing `args`
/// starting at `R1`.
///
/// # Safety
///
/// Same contract as [`invoke`], plus `receiver` must be a live pointer of
/// the type the callee expects in `R0`.
pub unsafe fn invoke_method<Args: ArgPack, Ret>(
    raw: RawFn,
    receiver: NonNull<()>,
    args: Args,
    ret_boxed: bool,
) -> Ret {
    let mut frame = [Register::ZERO; REGISTER_COUNT];
    frame[0] = Register::from_ptr(receiver);
    args.pack_into(&mut frame, 1);
    // Safety: delegated to caller.
    let ret = unsafe { raw(frame) };
    // Safety: delegated to caller.
    unsafe { ret.into_value(ret_boxed) }
}

/// Dereferences a member field through a receiver pointer passed in `R0`.
///
/// This is the dedicated path for property getters: rather than going
/// through a user-written function body, the offset into the receiver is
/// known statically from the owning [`crate::DynamicTypeDefinition`]'s
/// property list.
///
/// # Safety
///
/// `receiver` must point to a live value of the type that owns a `Field` at
/// byte offset `offset`.
pub unsafe fn invoke_getter<Field: Copy>(receiver: NonNull<()>, offset: usize) -> Field {
    let field_ptr = receiver.as_ptr().cast::<u8>().wrapping_add(offset).cast::<Field>();
    // Safety: delegated to caller.
    unsafe { *field_ptr }
}
