//! Coerced loads and stores.
//!
//! Crossing between a source type and its coerce-to type is done through
//! memory whenever a plain reinterpretation would change sizes: spill to a
//! temporary alloca of the larger type, then load as the target type. These
//! helpers implement that single idiom plus the int/pointer fast paths.

use crate::ir::{Builder, IrType, Value};
use crate::layout::{Align, Size};
use crate::ty::Type;
use crate::type_info::TypeInfo;

/// A temporary alloca for a source-typed value, at its preferred alignment.
pub(crate) fn mem_temp<B: Builder>(
    type_info: &dyn TypeInfo,
    builder: &mut B,
    ty: &Type,
) -> Value {
    let ir_type = type_info.ir_type(ty);
    builder.entry_alloca(&ir_type, type_info.preferred_align(ty))
}

/// A temporary alloca at the type's ABI alignment.
pub(crate) fn temp_alloca<B: Builder>(
    type_info: &dyn TypeInfo,
    builder: &mut B,
    ty: &Type,
) -> Value {
    let ir_type = type_info.ir_type(ty);
    builder.entry_alloca(&ir_type, type_info.abi_align(ty))
}

/// Given a struct pointer we are accessing some number of bytes out of, dive
/// into the leading members as deep as possible without entering an element
/// smaller than `dest_size`. The first member always sits at offset zero, so
/// only the tracked type changes.
fn enter_struct_for_coerced_access(
    type_info: &dyn TypeInfo,
    ptr: Value,
    struct_ty: &Type,
    dest_size: Size,
) -> (Value, Type) {
    let fields = struct_ty.record_fields();
    let first = match fields.first() {
        // We can't dive into a zero-element struct.
        None => return (ptr, struct_ty.clone()),
        Some(field) if field.is_bitfield() => return (ptr, struct_ty.clone()),
        Some(field) => field,
    };

    // The comparison must be made on the store size: the alloc size would
    // overstate what a load of the first element covers.
    let first_size = type_info.store_size(&first.ty);
    if first_size < dest_size && first_size < type_info.store_size(struct_ty) {
        return (ptr, struct_ty.clone());
    }

    if first.ty.is_struct() {
        enter_struct_for_coerced_access(type_info, ptr, &first.ty, dest_size)
    } else {
        (ptr, first.ty.clone())
    }
}

fn pointer_sized_int(type_info: &dyn TypeInfo) -> IrType {
    IrType::Int(type_info.data_layout().pointer_size.bits() as u16)
}

/// Convert between integer and pointer values of possibly different widths,
/// as if the value were coerced through memory. x86 is little-endian, so the
/// low bits are preserved.
pub(crate) fn coerce_int_or_ptr<B: Builder>(
    type_info: &dyn TypeInfo,
    builder: &mut B,
    value: Value,
    source_ty: &Type,
    dest_ty: &Type,
) -> Value {
    let source_ir = type_info.ir_type(source_ty);
    let dest_ir = type_info.ir_type(dest_ty);
    if source_ir == dest_ir {
        return value;
    }

    let mut value = value;
    let mut current_ir = source_ir;

    if source_ty.is_pointer() {
        // Pointer to pointer needs no integer round trip.
        if dest_ty.is_pointer() {
            return builder.bit_cast(value, &dest_ir);
        }
        current_ir = pointer_sized_int(type_info);
        value = builder.ptr_to_int(value, &current_ir);
    }

    let dest_int_ir =
        if dest_ty.is_pointer() { pointer_sized_int(type_info) } else { dest_ir.clone() };

    if current_ir != dest_int_ir {
        value = builder.int_cast(value, &dest_int_ir, false);
    }

    if dest_ty.is_pointer() {
        value = builder.int_to_ptr(value, &dest_ir);
    }

    value
}

/// Load from `src_ptr`, interpreted as a pointer to a `dest_ty` value. When
/// the source is smaller than the destination, the bits beyond it are
/// undefined.
pub(crate) fn coerced_load<B: Builder>(
    type_info: &dyn TypeInfo,
    builder: &mut B,
    src_ptr: Value,
    src_ty: &Type,
    dest_ty: &Type,
) -> Value {
    if type_info.ir_type(src_ty) == type_info.ir_type(dest_ty) {
        return builder.load(&type_info.ir_type(dest_ty), src_ptr, type_info.abi_align(src_ty));
    }

    let dest_size = type_info.alloc_size(dest_ty);

    let (src_ptr, src_ty) = if src_ty.is_struct() {
        enter_struct_for_coerced_access(type_info, src_ptr, src_ty, dest_size)
    } else {
        (src_ptr, src_ty.clone())
    };

    let src_size = type_info.alloc_size(&src_ty);

    // Integer/pointer sources just extend or truncate to the desired type.
    if (dest_ty.is_integer() || dest_ty.is_pointer())
        && (src_ty.is_integer() || src_ty.is_pointer())
    {
        let loaded =
            builder.load(&type_info.ir_type(&src_ty), src_ptr, type_info.abi_align(&src_ty));
        return coerce_int_or_ptr(type_info, builder, loaded, &src_ty, dest_ty);
    }

    if src_size >= dest_size {
        // The load is covered by the source bytes. A larger source can only
        // happen when it carries extra padding; no data bits are lost.
        return builder.load(&type_info.ir_type(dest_ty), src_ptr, Align::ONE);
    }

    // Otherwise coerce through memory.
    let tmp = temp_alloca(type_info, builder, dest_ty);
    builder.memcpy(tmp, Align::ONE, src_ptr, Align::ONE, src_size);
    builder.load(&type_info.ir_type(dest_ty), tmp, type_info.abi_align(dest_ty))
}

/// Store a first-class aggregate by its scalar elements, which is friendlier
/// to the backend than one wide store.
pub(crate) fn agg_store<B: Builder>(
    type_info: &dyn TypeInfo,
    builder: &mut B,
    source: Value,
    source_ir: &IrType,
    dest_ptr: Value,
    low_alignment: bool,
) {
    if let IrType::Struct { fields, .. } = source_ir {
        for i in 0..fields.len() {
            let offset = source_ir.struct_field_offset(i, type_info.data_layout());
            let element_ptr = builder.gep(dest_ptr, offset);
            let element = builder.extract_value(source, source_ir, i);
            let align = if low_alignment {
                Align::ONE
            } else {
                fields[i].align(type_info.data_layout())
            };
            builder.store(element, element_ptr, align);
        }
    } else {
        let align = if low_alignment {
            Align::ONE
        } else {
            source_ir.align(type_info.data_layout())
        };
        builder.store(source, dest_ptr, align);
    }
}

/// Store `source` (a `src_ty` value) through `dest_ptr` (a `dest_ty`
/// location). When the source is larger than the destination, its upper bits
/// are lost.
pub(crate) fn coerced_store<B: Builder>(
    type_info: &dyn TypeInfo,
    builder: &mut B,
    source: Value,
    src_ty: &Type,
    dest_ptr: Value,
    dest_ty: &Type,
) {
    if type_info.ir_type(src_ty) == type_info.ir_type(dest_ty) {
        builder.store(source, dest_ptr, type_info.abi_align(dest_ty));
        return;
    }

    let src_size = type_info.alloc_size(src_ty);

    let (dest_ptr, dest_ty) = if dest_ty.is_struct() {
        enter_struct_for_coerced_access(type_info, dest_ptr, dest_ty, src_size)
    } else {
        (dest_ptr, dest_ty.clone())
    };

    if (src_ty.is_integer() || src_ty.is_pointer())
        && (dest_ty.is_integer() || dest_ty.is_pointer())
    {
        let coerced = coerce_int_or_ptr(type_info, builder, source, src_ty, &dest_ty);
        builder.store(coerced, dest_ptr, type_info.abi_align(&dest_ty));
        return;
    }

    let dest_size = type_info.alloc_size(&dest_ty);

    if src_size <= dest_size {
        agg_store(type_info, builder, source, &type_info.ir_type(src_ty), dest_ptr, true);
    } else {
        // Coerce through memory, dropping the trailing source bytes.
        let tmp = temp_alloca(type_info, builder, src_ty);
        builder.store(source, tmp, type_info.abi_align(src_ty));
        builder.memcpy(dest_ptr, Align::ONE, tmp, Align::ONE, dest_size);
    }
}
