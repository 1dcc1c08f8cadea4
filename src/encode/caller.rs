//! Call-site encoding: source values in, IR arguments out, and back again
//! for the return value.

use crate::call::mapping::FunctionIRMapping;
use crate::call::ArgInfo;
use crate::ir::{Builder, Value};
use crate::layout::Align;
use crate::ty::{FunctionType, Type};
use crate::type_info::TypeInfo;

use super::coerce::{agg_store, coerced_load, coerced_store, mem_temp, temp_alloca};
use super::expand::expand_to_args;

pub(crate) struct Caller<'a> {
    type_info: &'a dyn TypeInfo,
    function_type: &'a FunctionType,
    mapping: &'a FunctionIRMapping,
}

impl<'a> Caller<'a> {
    pub(crate) fn new(
        type_info: &'a dyn TypeInfo,
        function_type: &'a FunctionType,
        mapping: &'a FunctionIRMapping,
    ) -> Caller<'a> {
        Caller { type_info, function_type, mapping }
    }

    /// Encode source-typed argument values into the IR argument list. The
    /// result has exactly `total_ir_args` values, slot for slot matching the
    /// IR function type.
    pub(crate) fn encode_arguments<B: Builder>(
        &self,
        builder: &mut B,
        arguments: &[(Value, Type)],
    ) -> Vec<Value> {
        assert!(arguments.len() >= self.function_type.argument_types().len());
        assert_eq!(arguments.len(), self.mapping.arguments().len());

        let mut ir_args: Vec<Option<Value>> = vec![None; self.mapping.total_ir_args()];

        // A struct-return callee writes through a hidden pointer; make the
        // temporary that receives the result.
        let return_info = self.mapping.return_info();
        if return_info.is_indirect() {
            let sret_ptr = mem_temp(self.type_info, builder, self.function_type.return_type());
            let index = self
                .mapping
                .struct_ret_arg_index()
                .expect("indirect return without an sret slot");
            ir_args[index] = Some(sret_ptr);
        }
        if matches!(return_info, ArgInfo::InAlloca { .. }) {
            panic!("inalloca return lowering is not implemented");
        }

        for (argument_number, (value, ty)) in arguments.iter().enumerate() {
            let arg_info = &self.mapping.arguments()[argument_number].arg_info;

            if let Some(padding_index) = self.mapping.padding_arg_index(argument_number) {
                let padding = arg_info.padding().expect("padding slot without padding type");
                let padding_ir = self.type_info.ir_type(&padding.ty);
                ir_args[padding_index] = Some(builder.undef(&padding_ir));
            }

            let (first_ir_arg, num_ir_args) = self.mapping.ir_arg_range(argument_number);

            match arg_info {
                ArgInfo::InAlloca { .. } => {
                    panic!("inalloca argument passing is not implemented");
                }

                ArgInfo::Indirect { align, .. } => {
                    assert_eq!(num_ir_args, 1);
                    // Pass a pointer to a temporary holding the value.
                    let alloca_align = self
                        .type_info
                        .preferred_align(ty)
                        .max(align.unwrap_or(Align::ONE));
                    let ir_type = self.type_info.ir_type(ty);
                    let alloca = builder.entry_alloca(&ir_type, alloca_align);
                    builder.store(*value, alloca, alloca_align);
                    ir_args[first_ir_arg] = Some(alloca);
                }

                ArgInfo::Ignore => {
                    assert_eq!(num_ir_args, 0);
                }

                ArgInfo::Direct { coerce_to, .. } | ArgInfo::Extend { coerce_to, .. } => {
                    let can_be_flattened =
                        matches!(arg_info, ArgInfo::Direct { can_be_flattened: true, .. });
                    // The trivial case: the coerce type is the source type.
                    if !coerce_to.is_struct() && coerce_to == ty {
                        assert_eq!(num_ir_args, 1);
                        ir_args[first_ir_arg] = Some(*value);
                        continue;
                    }

                    let mut src_ptr = mem_temp(self.type_info, builder, ty);
                    builder.store(*value, src_ptr, self.type_info.preferred_align(ty));

                    if coerce_to.is_struct() && can_be_flattened {
                        let src_size = self.type_info.alloc_size(ty);
                        let dst_size = self.type_info.alloc_size(coerce_to);

                        // When the source is smaller than the coerce type,
                        // copy it into a full-size temporary so every member
                        // load is in bounds; the excess bits are undefined.
                        if src_size < dst_size {
                            let tmp = temp_alloca(self.type_info, builder, coerce_to);
                            builder.memcpy(tmp, Align::ONE, src_ptr, Align::ONE, src_size);
                            src_ptr = tmp;
                        }

                        let layout = self.type_info.record_layout(coerce_to);
                        let fields = coerce_to.record_fields();
                        assert_eq!(num_ir_args, fields.len());
                        for (i, (field, flayout)) in
                            fields.iter().zip(&layout.fields).enumerate()
                        {
                            let element_ptr = builder.gep(src_ptr, flayout.byte_offset());
                            let element_ir = self.type_info.ir_type(&field.ty);
                            // The source bytes may not be aligned for the
                            // member type.
                            let element = builder.load(&element_ir, element_ptr, Align::ONE);
                            ir_args[first_ir_arg + i] = Some(element);
                        }
                    } else {
                        assert_eq!(num_ir_args, 1);
                        ir_args[first_ir_arg] = Some(coerced_load(
                            self.type_info,
                            builder,
                            src_ptr,
                            ty,
                            coerce_to,
                        ));
                    }
                }

                ArgInfo::Expand { .. } => {
                    let alloca = mem_temp(self.type_info, builder, ty);
                    builder.store(*value, alloca, self.type_info.abi_align(ty));

                    let mut leaves = Vec::with_capacity(num_ir_args);
                    expand_to_args(self.type_info, builder, ty, alloca, &mut leaves);
                    assert_eq!(leaves.len(), num_ir_args);
                    for (i, leaf) in leaves.into_iter().enumerate() {
                        ir_args[first_ir_arg + i] = Some(leaf);
                    }
                }
            }
        }

        ir_args
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.unwrap_or_else(|| panic!("IR argument slot {i} left unfilled")))
            .collect()
    }

    /// Decode the call's IR return value back into a source-typed value.
    pub(crate) fn decode_return_value<B: Builder>(
        &self,
        builder: &mut B,
        encoded_arguments: &[Value],
        encoded_return_value: Value,
    ) -> Value {
        let return_type = self.function_type.return_type();
        match self.mapping.return_info() {
            ArgInfo::InAlloca { .. } => {
                panic!("inalloca return lowering is not implemented");
            }

            ArgInfo::Indirect { align, .. } => {
                let sret_index =
                    self.mapping.struct_ret_arg_index().expect("indirect return without sret");
                let sret_ptr = encoded_arguments[sret_index];
                let load_align = self
                    .type_info
                    .abi_align(return_type)
                    .max(align.unwrap_or(Align::ONE));
                builder.load(&self.type_info.ir_type(return_type), sret_ptr, load_align)
            }

            ArgInfo::Ignore => encoded_return_value,

            ArgInfo::Direct { coerce_to, .. } | ArgInfo::Extend { coerce_to, .. } => {
                let return_ir = self.type_info.ir_type(return_type);
                let coerce_ir = self.type_info.ir_type(coerce_to);

                if coerce_ir == return_ir {
                    if return_type.is_array() || return_type.is_struct() {
                        // Aggregate-typed IR return values are stored out by
                        // element and reloaded as the source aggregate.
                        let dest = mem_temp(self.type_info, builder, return_type);
                        agg_store(self.type_info, builder, encoded_return_value, &coerce_ir, dest, false);
                        return builder.load(
                            &return_ir,
                            dest,
                            self.type_info.abi_align(return_type),
                        );
                    }
                    return encoded_return_value;
                }

                let dest = mem_temp(self.type_info, builder, return_type);
                coerced_store(
                    self.type_info,
                    builder,
                    encoded_return_value,
                    coerce_to,
                    dest,
                    return_type,
                );
                builder.load(&return_ir, dest, self.type_info.abi_align(return_type))
            }

            ArgInfo::Expand { .. } => unreachable!("invalid ABI kind for return value"),
        }
    }
}
