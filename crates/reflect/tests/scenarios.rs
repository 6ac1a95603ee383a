// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use reflect::{
    DynamicFunction, DynamicTypeDefinition, FieldLayout, FunctionData, FunctionFlags, FunctionScope, Guid, Native,
    Registry, ReturnValue, TypeDefinition,
};
use std::ptr::NonNull;
use std::sync::Arc;

/// End-to-end scenario 5: a dynamic variant of {bool, u32, string}
/// survives a compress/decompress round trip in every active case.
#[test]
fn compression_round_trip_across_variant_cases() {
    let fields = vec![
        FieldLayout { name: "as_bool", type_def: Arc::new(Native::<bool>::new("bool")), offset: 0 },
        FieldLayout { name: "as_u32", type_def: Arc::new(Native::<u32>::new("u32")), offset: 0 },
        FieldLayout { name: "as_string", type_def: Arc::new(Native::<String>::new("string")), offset: 0 },
    ];
    let variant = DynamicTypeDefinition::variant("BoolOrU32OrString", fields);

    for case in 1..=3usize {
        let mut original = vec![0u8; variant.size()];
        let mut round_tripped = vec![0u8; variant.size()];
        let original_ptr = NonNull::new(original.as_mut_ptr()).unwrap();
        let round_tripped_ptr = NonNull::new(round_tripped.as_mut_ptr()).unwrap();
        unsafe {
            variant.placement_new_default(original_ptr);
            variant.placement_new_default(round_tripped_ptr);
            variant.set_active(original_ptr, case);

            let mut buffer = reflect::BitWriter::new();
            variant.compress(original_ptr, &mut buffer);
            let bytes = buffer.into_bytes();
            let mut reader = reflect::BitReader::new(&bytes);
            assert!(variant.decompress(round_tripped_ptr, &mut reader), "case {case} failed to decompress");

            assert!(variant.compare_equal(original_ptr, round_tripped_ptr), "case {case} did not round-trip");

            variant.destroy(original_ptr);
            variant.destroy(round_tripped_ptr);
        }
    }
}

unsafe fn noop(_frame: reflect::Frame) -> ReturnValue {
    ReturnValue::VOID
}

/// End-to-end scenario 6: register many functions, look each up by guid
/// and by identifier, deregister every other one, and confirm exactly the
/// surviving half still resolves.
#[test]
fn reflection_registration_at_scale() {
    const COUNT: usize = 2000;
    let registry = Registry::new();
    let mut guids = Vec::with_capacity(COUNT);
    let mut ids = Vec::with_capacity(COUNT);

    for _ in 0..COUNT {
        let guid = Guid::new_v4();
        let data = FunctionData::new(DynamicFunction::new(noop, "noop"), FunctionFlags::STATIC, FunctionScope::Global);
        let id = registry.register_dynamic_function(guid, data).unwrap();
        guids.push(guid);
        ids.push(id);
    }

    for (index, &guid) in guids.iter().enumerate() {
        assert_eq!(registry.find_function_identifier(guid), Some(ids[index]));
        assert_eq!(registry.find_function_guid(ids[index]), Some(guid));
    }

    for (index, &id) in ids.iter().enumerate() {
        if index % 2 == 0 {
            registry.deregister_dynamic_function(id);
        }
    }

    for (index, &guid) in guids.iter().enumerate() {
        if index % 2 == 0 {
            assert!(registry.find_function(guid).is_none());
            assert_eq!(registry.find_function_guid(ids[index]), None);
        } else {
            assert!(registry.find_function(guid).is_some());
            assert_eq!(registry.find_function_guid(ids[index]), Some(guid));
        }
    }
}
