// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Type-erased lifecycle, comparison, serialization, and compression
//! operations over a value of statically-unknown type.
//!
//! The source engine dispatches all of this through one manager-function
//! pointer per type, switched over an `Operation` enum. Per design note 9
//! this is reimplemented as a trait object: `Arc<dyn TypeDefinition>`,
//! so the switch collapses into a direct vtable call. [`Native<T>`]
//! supplies the blanket impl for ordinary Rust types;
//! [`crate::DynamicTypeDefinition`] implements the trait directly for
//! runtime-declared structure/variant layouts.

use crate::bitio::{BitReader, BitWriter};
use std::any::Any;
use std::fmt::Debug;
use std::ptr::NonNull;

/// Whether a type's compressed representation has a fixed bit width or one
/// that depends on the value (e.g. a variant's held field).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitWidth {
    Fixed(u32),
    Dynamic,
}

/// Bound satisfied by any concrete type usable through [`Native`].
pub trait ReflectedValue:
    Any + Clone + PartialEq + Debug + Default + Send + Sync + 'static
{
    /// Writes `self` as length-prefixed bytes (stand-in for the engine's
    /// external serialization reader/writer abstraction, §6).
    fn serialize_bytes(&self) -> Vec<u8>;
    /// Reconstructs a value from bytes written by `serialize_bytes`.
    fn deserialize_bytes(bytes: &[u8]) -> Option<Self>
    where
        Self: Sized;
    /// Fixed compressed bit width, or `None` if the encoding is
    /// value-dependent (dynamic size).
    fn compressed_bit_width() -> BitWidth
    where
        Self: Sized;
    fn compress(&self, writer: &mut BitWriter);
    fn decompress(reader: &mut BitReader) -> Option<Self>
    where
        Self: Sized;
}

/// Type-erased lifecycle/comparison/serialization/compression operations.
///
/// All pointer-taking methods operate on raw storage: the caller is
/// responsible for the pointed-to memory being suitably sized and aligned
/// for this definition's [`TypeDefinition::size`]/[`TypeDefinition::align`].
pub trait TypeDefinition: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> usize;
    fn align(&self) -> usize;
    fn is_trivially_copyable(&self) -> bool;
    fn compressed_bit_width(&self) -> BitWidth;

    /// # Safety
    /// `dst` must be valid for writes of [`TypeDefinition::size`] bytes,
    /// aligned to [`TypeDefinition::align`], and not currently hold a live
    /// value of this type.
    unsafe fn placement_new_default(&self, dst: NonNull<u8>);

    /// # Safety
    /// Same contract as [`TypeDefinition::placement_new_default`] for
    /// `dst`; `src` must point to a live value of this type.
    unsafe fn placement_new_copy(&self, dst: NonNull<u8>, src: NonNull<u8>);

    /// # Safety
    /// Same contract as [`TypeDefinition::placement_new_copy`]; `src`'s
    /// value is logically moved out and must not be used or dropped again
    /// by the caller.
    unsafe fn placement_new_move(&self, dst: NonNull<u8>, src: NonNull<u8>);

    /// # Safety
    /// `ptr` must point to a live value of this type; the value is invalid
    /// to use after this call.
    unsafe fn destroy(&self, ptr: NonNull<u8>);

    /// # Safety
    /// `a` and `b` must each point to a live value of this type.
    unsafe fn compare_equal(&self, a: NonNull<u8>, b: NonNull<u8>) -> bool;

    /// # Safety
    /// `ptr` must point to a live value of this type, valid for the
    /// returned lifetime.
    unsafe fn serialize(&self, ptr: NonNull<u8>) -> Vec<u8>;

    /// Reconstructs a value from `bytes` into `dst`. Returns whether
    /// deserialization succeeded; on failure `dst` is left uninitialized.
    ///
    /// # Safety
    /// `dst` must be valid for writes of this type's size/alignment and
    /// not already hold a live value.
    unsafe fn deserialize(&self, dst: NonNull<u8>, bytes: &[u8]) -> bool;

    /// # Safety
    /// `ptr` must point to a live value of this type.
    unsafe fn compress(&self, ptr: NonNull<u8>, writer: &mut BitWriter);

    /// Reconstructs a value from bit-packed data into `dst`. Returns
    /// whether decompression succeeded.
    ///
    /// # Safety
    /// Same contract as [`TypeDefinition::deserialize`] for `dst`.
    unsafe fn decompress(&self, dst: NonNull<u8>, reader: &mut BitReader) -> bool;
}

/// Blanket [`TypeDefinition`] for any [`ReflectedValue`], generated rather
/// than hand-written per type — the Rust analogue of the source engine's
/// per-template manager-function instantiation.
pub struct Native<T> {
    name: &'static str,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Native<T> {
    pub const fn new(name: &'static str) -> Self {
        Self { name, _marker: std::marker::PhantomData }
    }
}

impl<T: ReflectedValue> TypeDefinition for Native<T> {
    fn name(&self) -> &str {
        self.name
    }

    fn size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn align(&self) -> usize {
        std::mem::align_of::<T>()
    }

    fn is_trivially_copyable(&self) -> bool {
        !std::mem::needs_drop::<T>()
    }

    fn compressed_bit_width(&self) -> BitWidth {
        T::compressed_bit_width()
    }

    unsafe fn placement_new_default(&self, dst: NonNull<u8>) {
        // Safety: delegated to caller.
        unsafe { dst.cast::<T>().as_ptr().write(T::default()) };
    }

    unsafe fn placement_new_copy(&self, dst: NonNull<u8>, src: NonNull<u8>) {
        // Safety: delegated to caller.
        let value = unsafe { src.cast::<T>().as_ref().clone() };
        // Safety: delegated to caller.
        unsafe { dst.cast::<T>().as_ptr().write(value) };
    }

    unsafe fn placement_new_move(&self, dst: NonNull<u8>, src: NonNull<u8>) {
        // Safety: delegated to caller.
        let value = unsafe { src.cast::<T>().as_ptr().read() };
        // Safety: delegated to caller.
        unsafe { dst.cast::<T>().as_ptr().write(value) };
    }

    unsafe fn destroy(&self, ptr: NonNull<u8>) {
        // Safety: delegated to caller.
        unsafe { ptr.cast::<T>().as_ptr().drop_in_place() };
    }

    unsafe fn compare_equal(&self, a: NonNull<u8>, b: NonNull<u8>) -> bool {
        // Safety: delegated to caller.
        unsafe { a.cast::<T>().as_ref() == b.cast::<T>().as_ref() }
    }

    unsafe fn serialize(&self, ptr: NonNull<u8>) -> Vec<u8> {
        // Safety: delegated to caller.
        unsafe { ptr.cast::<T>().as_ref().serialize_bytes() }
    }

    unsafe fn deserialize(&self, dst: NonNull<u8>, bytes: &[u8]) -> bool {
        match T::deserialize_bytes(bytes) {
            Some(value) => {
                // Safety: delegated to caller.
                unsafe { dst.cast::<T>().as_ptr().write(value) };
                true
            }
            None => false,
        }
    }

    unsafe fn compress(&self, ptr: NonNull<u8>, writer: &mut BitWriter) {
        // Safety: delegated to caller.
        unsafe { ptr.cast::<T>().as_ref().compress(writer) };
    }

    unsafe fn decompress(&self, dst: NonNull<u8>, reader: &mut BitReader) -> bool {
        match T::decompress(reader) {
            Some(value) => {
                // Safety: delegated to caller.
                unsafe { dst.cast::<T>().as_ptr().write(value) };
                true
            }
            None => false,
        }
    }
}

macro_rules! impl_reflected_unsigned {
    ($ty:ty, $bits:expr) => {
        impl ReflectedValue for $ty {
            fn serialize_bytes(&self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }
            fn deserialize_bytes(bytes: &[u8]) -> Option<Self> {
                bytes.try_into().ok().map(<$ty>::from_le_bytes)
            }
            fn compressed_bit_width() -> BitWidth {
                BitWidth::Fixed($bits)
            }
            fn compress(&self, writer: &mut BitWriter) {
                writer.pack(u64::from(*self), $bits);
            }
            fn decompress(reader: &mut BitReader) -> Option<Self> {
                #[allow(clippy::cast_possible_truncation)]
                reader.unpack($bits).map(|v| v as $ty)
            }
        }
    };
}

impl_reflected_unsigned!(u32, 32);
impl_reflected_unsigned!(u64, 64);

impl ReflectedValue for i32 {
    fn serialize_bytes(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }
    fn deserialize_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(i32::from_le_bytes)
    }
    fn compressed_bit_width() -> BitWidth {
        BitWidth::Fixed(32)
    }
    fn compress(&self, writer: &mut BitWriter) {
        writer.pack(u64::from(self.cast_unsigned()), 32);
    }
    fn decompress(reader: &mut BitReader) -> Option<Self> {
        #[allow(clippy::cast_possible_truncation)]
        reader.unpack(32).map(|v| (v as u32).cast_signed())
    }
}

impl ReflectedValue for bool {
    fn serialize_bytes(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }
    fn deserialize_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.first().map(|&b| b != 0)
    }
    fn compressed_bit_width() -> BitWidth {
        BitWidth::Fixed(1)
    }
    fn compress(&self, writer: &mut BitWriter) {
        writer.pack(u64::from(*self), 1);
    }
    fn decompress(reader: &mut BitReader) -> Option<Self> {
        reader.unpack(1).map(|v| v != 0)
    }
}

impl ReflectedValue for String {
    fn serialize_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
    fn deserialize_bytes(bytes: &[u8]) -> Option<Self> {
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }
    fn compressed_bit_width() -> BitWidth {
        BitWidth::Dynamic
    }
    fn compress(&self, writer: &mut BitWriter) {
        let bytes = self.as_bytes();
        writer.pack(bytes.len() as u64, 32);
        for byte in bytes {
            writer.pack(u64::from(*byte), 8);
        }
    }
    fn decompress(reader: &mut BitReader) -> Option<Self> {
        let len = reader.unpack(32)?;
        let mut bytes = Vec::with_capacity(len as usize);
        for _ in 0..len {
            #[allow(clippy::cast_possible_truncation)]
            bytes.push(reader.unpack(8)? as u8);
        }
        String::from_utf8(bytes).ok()
    }
}

impl ReflectedValue for crate::guid::Guid {
    fn serialize_bytes(&self) -> Vec<u8> {
        format!("{self}").into_bytes()
    }
    fn deserialize_bytes(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        uuid::Uuid::parse_str(text).ok().map(|u| crate::guid::Guid::from_u128(u.as_u128()))
    }
    fn compressed_bit_width() -> BitWidth {
        BitWidth::Fixed(128)
    }
    fn compress(&self, writer: &mut BitWriter) {
        let as_u128 = self.as_u128();
        #[allow(clippy::cast_possible_truncation)]
        writer.pack(as_u128 as u64, 64);
        #[allow(clippy::cast_possible_truncation)]
        writer.pack((as_u128 >> 64) as u64, 64);
    }
    fn decompress(reader: &mut BitReader) -> Option<Self> {
        let lo = u128::from(reader.unpack(64)?);
        let hi = u128::from(reader.unpack(64)?);
        Some(crate::guid::Guid::from_u128(lo | (hi << 64)))
    }
}
