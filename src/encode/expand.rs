//! Recursive expansion of aggregates into leaf scalars.
//!
//! The leaf order here must match [`crate::call::mapping::expansion_size`]
//! and [`crate::call::mapping::expanded_types`] exactly: the caller loads
//! leaves in this order and the callee stores them back in the same order.

use crate::call::mapping::largest_union_field;
use crate::ir::{Builder, Value};
use crate::ty::Type;
use crate::type_info::TypeInfo;

/// Load the leaves of the value at `ptr`, appending one IR argument per leaf.
pub(crate) fn expand_to_args<B: Builder>(
    type_info: &dyn TypeInfo,
    builder: &mut B,
    ty: &Type,
    ptr: Value,
    out: &mut Vec<Value>,
) {
    assert!(!ty.is_void(), "cannot expand void");

    if ty.is_array() {
        let stride = type_info.alloc_size(ty.array_element());
        for i in 0..ty.array_count() {
            let element_ptr = builder.gep(ptr, stride * i);
            expand_to_args(type_info, builder, ty.array_element(), element_ptr, out);
        }
    } else if ty.is_struct() {
        assert!(
            !ty.has_flexible_array_member(),
            "cannot expand structure with flexible array member"
        );
        let layout = type_info.record_layout(ty);
        for (field, flayout) in ty.record_fields().iter().zip(&layout.fields) {
            if field.is_zero_width_bitfield() {
                continue;
            }
            assert!(!field.is_bitfield(), "cannot expand structure with bitfield members");
            let field_ptr = builder.gep(ptr, flayout.byte_offset());
            expand_to_args(type_info, builder, &field.ty, field_ptr, out);
        }
    } else if ty.is_union() {
        if let Some(field) = largest_union_field(type_info, ty) {
            expand_to_args(type_info, builder, &field, ptr, out);
        }
    } else if ty.is_complex() {
        let element = ty.complex_element();
        let element_ir = type_info.ir_type(element);
        let align = type_info.abi_align(element);
        out.push(builder.load(&element_ir, ptr, align));
        let imag_ptr = builder.gep(ptr, type_info.alloc_size(element));
        out.push(builder.load(&element_ir, imag_ptr, align));
    } else {
        let ir_type = type_info.ir_type(ty);
        out.push(builder.load(&ir_type, ptr, type_info.abi_align(ty)));
    }
}

/// Store expanded IR arguments back into the value at `ptr`, consuming
/// `args[*next..]` leaf by leaf.
pub(crate) fn expand_from_args<B: Builder>(
    type_info: &dyn TypeInfo,
    builder: &mut B,
    ty: &Type,
    ptr: Value,
    args: &[Value],
    next: &mut usize,
) {
    assert!(!ty.is_void(), "cannot expand void");

    if ty.is_array() {
        let stride = type_info.alloc_size(ty.array_element());
        for i in 0..ty.array_count() {
            let element_ptr = builder.gep(ptr, stride * i);
            expand_from_args(type_info, builder, ty.array_element(), element_ptr, args, next);
        }
    } else if ty.is_struct() {
        assert!(
            !ty.has_flexible_array_member(),
            "cannot expand structure with flexible array member"
        );
        let layout = type_info.record_layout(ty);
        for (field, flayout) in ty.record_fields().iter().zip(&layout.fields) {
            if field.is_zero_width_bitfield() {
                continue;
            }
            assert!(!field.is_bitfield(), "cannot expand structure with bitfield members");
            let field_ptr = builder.gep(ptr, flayout.byte_offset());
            expand_from_args(type_info, builder, &field.ty, field_ptr, args, next);
        }
    } else if ty.is_union() {
        if let Some(field) = largest_union_field(type_info, ty) {
            expand_from_args(type_info, builder, &field, ptr, args, next);
        }
    } else if ty.is_complex() {
        let element = ty.complex_element();
        let align = type_info.abi_align(element);
        let real = take(args, next);
        builder.store(real, ptr, align);
        let imag_ptr = builder.gep(ptr, type_info.alloc_size(element));
        let imag = take(args, next);
        builder.store(imag, imag_ptr, align);
    } else {
        let value = take(args, next);
        builder.store(value, ptr, type_info.abi_align(ty));
    }
}

fn take(args: &[Value], next: &mut usize) -> Value {
    let value = args[*next];
    *next += 1;
    value
}
