//! Function-entry decoding: IR parameters in, source values out, and the
//! return value encoded on the way back.

use crate::call::mapping::FunctionIRMapping;
use crate::call::ArgInfo;
use crate::ir::{Builder, Value};
use crate::layout::Align;
use crate::ty::{FunctionType, Type};
use crate::type_info::TypeInfo;

use super::coerce::{coerced_load, coerced_store, mem_temp, temp_alloca};
use super::expand::expand_from_args;

pub(crate) struct Callee<'a> {
    type_info: &'a dyn TypeInfo,
    function_type: &'a FunctionType,
    mapping: &'a FunctionIRMapping,
}

impl<'a> Callee<'a> {
    pub(crate) fn new(
        type_info: &'a dyn TypeInfo,
        function_type: &'a FunctionType,
        mapping: &'a FunctionIRMapping,
    ) -> Callee<'a> {
        Callee { type_info, function_type, mapping }
    }

    /// Reconstruct the source-typed argument values from the IR parameters of
    /// the enclosing function.
    pub(crate) fn decode_arguments<B: Builder>(
        &self,
        builder: &mut B,
        encoded_arguments: &[Value],
    ) -> Vec<Value> {
        assert_eq!(self.mapping.total_ir_args(), encoded_arguments.len());

        let mut arguments = Vec::with_capacity(self.function_type.argument_types().len());

        for (arg_index, argument_type) in
            self.function_type.argument_types().iter().enumerate()
        {
            let arg_info = &self.mapping.arguments()[arg_index].arg_info;
            let (first_ir_arg, num_ir_args) = self.mapping.ir_arg_range(arg_index);

            match arg_info {
                ArgInfo::InAlloca { .. } => {
                    panic!("inalloca argument lowering is not implemented");
                }

                ArgInfo::Indirect { align, realign, .. } => {
                    assert_eq!(num_ir_args, 1);
                    let mut ptr = encoded_arguments[first_ir_arg];
                    let indirect_align = align.unwrap_or(Align::ONE);

                    if argument_type.is_array() || argument_type.is_struct() {
                        // Aggregates arrive by reference; realign through a
                        // copy when the ABI slot is under-aligned for the
                        // type.
                        if *realign {
                            let aligned = mem_temp(self.type_info, builder, argument_type);
                            builder.memcpy(
                                aligned,
                                self.type_info.abi_align(argument_type),
                                ptr,
                                indirect_align,
                                self.type_info.alloc_size(argument_type),
                            );
                            ptr = aligned;
                        }
                        let load_align =
                            self.type_info.abi_align(argument_type).max(indirect_align);
                        arguments.push(builder.load(
                            &self.type_info.ir_type(argument_type),
                            ptr,
                            load_align,
                        ));
                    } else {
                        let load_align = if align.is_some() {
                            indirect_align
                        } else {
                            self.type_info.abi_align(argument_type)
                        };
                        arguments.push(builder.load(
                            &self.type_info.ir_type(argument_type),
                            ptr,
                            load_align,
                        ));
                    }
                }

                ArgInfo::Direct { coerce_to, .. } | ArgInfo::Extend { coerce_to, .. } => {
                    let can_be_flattened =
                        matches!(arg_info, ArgInfo::Direct { can_be_flattened: true, .. });

                    // The trivial case needs no muss and no fuss.
                    if !coerce_to.is_struct() && coerce_to == argument_type {
                        assert_eq!(num_ir_args, 1);
                        arguments.push(encoded_arguments[first_ir_arg]);
                        continue;
                    }

                    // The alignment has to satisfy both the declared type and
                    // the access pattern below.
                    let align_to_use = self
                        .type_info
                        .abi_align(coerce_to)
                        .max(self.type_info.abi_align(argument_type));
                    let argument_ir = self.type_info.ir_type(argument_type);
                    let alloca = builder.entry_alloca(&argument_ir, align_to_use);

                    if coerce_to.is_struct() && can_be_flattened {
                        let fields = coerce_to.record_fields();
                        assert_eq!(num_ir_args, fields.len());
                        let layout = self.type_info.record_layout(coerce_to);
                        let src_size = self.type_info.alloc_size(coerce_to);
                        let dst_size = self.type_info.alloc_size(argument_type);

                        if src_size <= dst_size {
                            for (i, flayout) in layout.fields.iter().enumerate() {
                                let element = encoded_arguments[first_ir_arg + i];
                                let element_ptr = builder.gep(alloca, flayout.byte_offset());
                                builder.store(element, element_ptr, Align::ONE);
                            }
                        } else {
                            // The coerce type overhangs the argument: build
                            // it whole, then copy the prefix.
                            let tmp = temp_alloca(self.type_info, builder, coerce_to);
                            for (i, flayout) in layout.fields.iter().enumerate() {
                                let element = encoded_arguments[first_ir_arg + i];
                                let element_ptr = builder.gep(tmp, flayout.byte_offset());
                                builder.store(element, element_ptr, Align::ONE);
                            }
                            builder.memcpy(alloca, align_to_use, tmp, align_to_use, dst_size);
                        }
                    } else {
                        assert_eq!(num_ir_args, 1);
                        coerced_store(
                            self.type_info,
                            builder,
                            encoded_arguments[first_ir_arg],
                            coerce_to,
                            alloca,
                            argument_type,
                        );
                    }

                    arguments.push(builder.load(&argument_ir, alloca, align_to_use));
                }

                ArgInfo::Expand { .. } => {
                    // The value was split across several IR arguments;
                    // reassemble it through a temporary.
                    let alloca = mem_temp(self.type_info, builder, argument_type);
                    let mut next = first_ir_arg;
                    expand_from_args(
                        self.type_info,
                        builder,
                        argument_type,
                        alloca,
                        encoded_arguments,
                        &mut next,
                    );
                    assert_eq!(next, first_ir_arg + num_ir_args);
                    arguments.push(builder.load(
                        &self.type_info.ir_type(argument_type),
                        alloca,
                        self.type_info.abi_align(argument_type),
                    ));
                }

                ArgInfo::Ignore => {
                    assert_eq!(num_ir_args, 0);
                    let ir_type = self.type_info.ir_type(argument_type);
                    arguments.push(builder.undef(&ir_type));
                }
            }
        }

        arguments
    }

    /// Encode the function's return value. `None` means the IR function
    /// returns void.
    pub(crate) fn encode_return_value<B: Builder>(
        &self,
        builder: &mut B,
        return_value: Value,
        encoded_arguments: &[Value],
    ) -> Option<Value> {
        assert_eq!(self.mapping.total_ir_args(), encoded_arguments.len());

        let return_type = self.function_type.return_type();
        match self.mapping.return_info() {
            ArgInfo::InAlloca { .. } => {
                panic!("inalloca return lowering is not implemented");
            }

            ArgInfo::Indirect { .. } => {
                // The value is returned by storing through the sret pointer.
                let sret_index =
                    self.mapping.struct_ret_arg_index().expect("indirect return without sret");
                let sret_ptr = encoded_arguments[sret_index];
                builder.store(return_value, sret_ptr, self.type_info.abi_align(return_type));
                None
            }

            ArgInfo::Direct { coerce_to, .. } | ArgInfo::Extend { coerce_to, .. } => {
                let return_ir = self.type_info.ir_type(return_type);
                let coerce_ir = self.type_info.ir_type(coerce_to);

                if coerce_ir == return_ir {
                    return Some(return_value);
                }

                // Store the value into a temporary and perform a coerced load
                // from it.
                let src = mem_temp(self.type_info, builder, return_type);
                builder.store(return_value, src, self.type_info.abi_align(return_type));
                Some(coerced_load(self.type_info, builder, src, return_type, coerce_to))
            }

            ArgInfo::Ignore => {
                if return_type.is_void() {
                    None
                } else {
                    Some(builder.undef(&self.type_info.ir_type(return_type)))
                }
            }

            ArgInfo::Expand { .. } => unreachable!("invalid ABI kind for return value"),
        }
    }
}
