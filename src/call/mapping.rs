//! From per-argument classifications to a concrete IR parameter layout.
//!
//! [`FunctionIRMapping`] records, for every source argument, the contiguous
//! range of IR arguments it occupies, plus the positions of the hidden
//! struct-return and inalloca parameters. The IR function signature and the
//! attribute list are both assembled from the mapping and must always agree.

use tracing::debug;

use crate::ir::{IrFunctionType, IrType};
use crate::ty::{FunctionType, Type};
use crate::type_info::TypeInfo;

use super::{ArgAttribute, ArgAttributes, ArgExtension, ArgInfo, AttributeList};

/// IR argument range for one source argument.
#[derive(Clone, Debug)]
pub struct ArgumentIRMapping {
    pub arg_info: ArgInfo,
    pub first_arg_index: usize,
    pub number_of_ir_args: usize,
    pub padding_arg_index: Option<usize>,
}

/// Mapping from a source function signature to its IR signature.
#[derive(Clone, Debug)]
pub struct FunctionIRMapping {
    return_info: ArgInfo,
    arguments: Vec<ArgumentIRMapping>,
    total_ir_args: usize,
    struct_ret_arg_index: Option<usize>,
    inalloca_arg_index: Option<usize>,
}

impl FunctionIRMapping {
    pub fn return_info(&self) -> &ArgInfo {
        &self.return_info
    }

    pub fn arguments(&self) -> &[ArgumentIRMapping] {
        &self.arguments
    }

    pub fn total_ir_args(&self) -> usize {
        self.total_ir_args
    }

    pub fn struct_ret_arg_index(&self) -> Option<usize> {
        self.struct_ret_arg_index
    }

    pub fn inalloca_arg_index(&self) -> Option<usize> {
        self.inalloca_arg_index
    }

    pub fn padding_arg_index(&self, arg_index: usize) -> Option<usize> {
        self.arguments[arg_index].padding_arg_index
    }

    /// Index of the first IR argument and the number of IR arguments for a
    /// source argument.
    pub fn ir_arg_range(&self, arg_index: usize) -> (usize, usize) {
        let arg = &self.arguments[arg_index];
        (arg.first_arg_index, arg.number_of_ir_args)
    }
}

/// Number of IR leaves an expanded type flattens into.
pub fn expansion_size(type_info: &dyn TypeInfo, ty: &Type) -> usize {
    assert!(!ty.is_void(), "cannot expand void");

    if ty.is_array() {
        return ty.array_count() as usize * expansion_size(type_info, ty.array_element());
    }

    if ty.is_struct() {
        assert!(
            !ty.has_flexible_array_member(),
            "cannot expand structure with flexible array member"
        );
        let mut result = 0;
        for field in ty.record_fields() {
            if field.is_zero_width_bitfield() {
                continue;
            }
            assert!(!field.is_bitfield(), "cannot expand structure with bitfield members");
            result += expansion_size(type_info, &field.ty);
        }
        return result;
    }

    if ty.is_union() {
        // Unions reach expansion only in degenerate cases where every field
        // flattens identically, so the largest field stands for all of them.
        return match largest_union_field(type_info, ty) {
            Some(field) => expansion_size(type_info, &field),
            None => 0,
        };
    }

    if ty.is_complex() {
        return 2;
    }

    1
}

/// The largest non-bitfield member of a union, by allocation size.
pub fn largest_union_field(type_info: &dyn TypeInfo, ty: &Type) -> Option<Type> {
    let mut largest: Option<Type> = None;
    let mut largest_size = crate::layout::Size::ZERO;
    for field in ty.record_fields() {
        if field.is_zero_width_bitfield() {
            continue;
        }
        assert!(!field.is_bitfield(), "cannot expand union with bitfield members");
        let field_size = type_info.alloc_size(&field.ty);
        if field_size > largest_size {
            largest_size = field_size;
            largest = Some(field.ty.clone());
        }
    }
    largest
}

/// The IR types an expanded value flattens into, in expansion order.
pub fn expanded_types(type_info: &dyn TypeInfo, ty: &Type, out: &mut Vec<IrType>) {
    if ty.is_array() {
        for _ in 0..ty.array_count() {
            expanded_types(type_info, ty.array_element(), out);
        }
    } else if ty.is_struct() {
        assert!(
            !ty.has_flexible_array_member(),
            "cannot expand structure with flexible array member"
        );
        for field in ty.record_fields() {
            if field.is_zero_width_bitfield() {
                continue;
            }
            assert!(!field.is_bitfield(), "cannot expand structure with bitfield members");
            expanded_types(type_info, &field.ty, out);
        }
    } else if ty.is_union() {
        if let Some(field) = largest_union_field(type_info, ty) {
            expanded_types(type_info, &field, out);
        }
    } else if ty.is_complex() {
        let element = type_info.ir_type(ty.complex_element());
        out.push(element.clone());
        out.push(element);
    } else {
        out.push(type_info.ir_type(ty));
    }
}

/// Build the IR mapping for `[return, arg0, arg1, ...]` classifications.
pub fn function_ir_mapping(
    type_info: &dyn TypeInfo,
    arg_infos: &[ArgInfo],
) -> FunctionIRMapping {
    assert!(!arg_infos.is_empty(), "classification must include the return value");

    let return_info = arg_infos[0].clone();
    let mut ir_argument_number = 0;
    let mut struct_ret_arg_index = None;

    let swap_this_with_sret = return_info.is_sret_after_this();
    if return_info.is_indirect() {
        struct_ret_arg_index = Some(if swap_this_with_sret {
            1
        } else {
            let index = ir_argument_number;
            ir_argument_number += 1;
            index
        });
    }

    let mut arguments = Vec::with_capacity(arg_infos.len() - 1);
    for arg_info in &arg_infos[1..] {
        let mut padding_arg_index = None;
        if arg_info.padding().is_some() {
            padding_arg_index = Some(ir_argument_number);
            ir_argument_number += 1;
        }

        let number_of_ir_args = match arg_info {
            ArgInfo::Direct { coerce_to, can_be_flattened, .. } => {
                if *can_be_flattened && coerce_to.is_struct() {
                    coerce_to.record_fields().len()
                } else {
                    1
                }
            }
            ArgInfo::Extend { .. } | ArgInfo::Indirect { .. } => 1,
            ArgInfo::Ignore | ArgInfo::InAlloca { .. } => 0,
            ArgInfo::Expand { ty, .. } => expansion_size(type_info, ty),
        };

        let first_arg_index = ir_argument_number;
        ir_argument_number += number_of_ir_args;

        // Skip over the sret parameter when it comes second; it was already
        // assigned index 1 above.
        if ir_argument_number == 1 && swap_this_with_sret {
            ir_argument_number += 1;
        }

        arguments.push(ArgumentIRMapping {
            arg_info: arg_info.clone(),
            first_arg_index,
            number_of_ir_args,
            padding_arg_index,
        });
    }

    debug!(total_ir_args = ir_argument_number, "computed function IR mapping");

    FunctionIRMapping {
        return_info,
        arguments,
        total_ir_args: ir_argument_number,
        struct_ret_arg_index,
        inalloca_arg_index: None,
    }
}

/// Assemble the IR function signature from the mapping.
pub fn ir_function_type(
    type_info: &dyn TypeInfo,
    function_type: &FunctionType,
    mapping: &FunctionIRMapping,
) -> IrFunctionType {
    let return_type = match mapping.return_info() {
        ArgInfo::Expand { .. } => unreachable!("invalid ABI kind for return value"),
        ArgInfo::Direct { coerce_to, .. } | ArgInfo::Extend { coerce_to, .. } => {
            type_info.ir_type(coerce_to)
        }
        ArgInfo::InAlloca { sret, .. } => {
            if *sret {
                // sret returns on win32 aren't void; they return the sret
                // pointer.
                IrType::pointer()
            } else {
                IrType::Void
            }
        }
        ArgInfo::Indirect { align, .. } => {
            assert!(align.is_none(), "alignment unused on indirect return");
            IrType::Void
        }
        ArgInfo::Ignore => type_info.ir_type(function_type.return_type()),
    };

    let mut param_types = vec![IrType::Void; mapping.total_ir_args()];

    if let Some(index) = mapping.struct_ret_arg_index() {
        param_types[index] = IrType::pointer();
    }

    if mapping.inalloca_arg_index().is_some() {
        panic!("inalloca argument lowering is not implemented");
    }

    assert_eq!(
        mapping.arguments().len(),
        function_type.argument_types().len(),
        "mapping does not match the declared signature"
    );

    for (arg_index, argument) in mapping.arguments().iter().enumerate() {
        let arg_info = &argument.arg_info;

        if let Some(padding_index) = argument.padding_arg_index {
            let padding = arg_info.padding().expect("padding index without padding type");
            param_types[padding_index] = type_info.ir_type(&padding.ty);
        }

        let (first_ir_arg, num_ir_args) = mapping.ir_arg_range(arg_index);

        match arg_info {
            ArgInfo::Ignore | ArgInfo::InAlloca { .. } => {
                assert_eq!(num_ir_args, 0);
            }
            ArgInfo::Indirect { .. } => {
                assert_eq!(num_ir_args, 1);
                // Indirect arguments are always on the stack, address space 0.
                param_types[first_ir_arg] = IrType::pointer();
            }
            ArgInfo::Direct { coerce_to, can_be_flattened, .. } => {
                // Scalar values are friendlier to the optimizer than
                // first-class aggregates, so flattenable coerce structs become
                // one IR argument per member.
                if coerce_to.is_struct() && *can_be_flattened {
                    let fields = coerce_to.record_fields();
                    assert_eq!(num_ir_args, fields.len());
                    for (i, field) in fields.iter().enumerate() {
                        param_types[first_ir_arg + i] = type_info.ir_type(&field.ty);
                    }
                } else {
                    assert_eq!(num_ir_args, 1);
                    param_types[first_ir_arg] = type_info.ir_type(coerce_to);
                }
            }
            ArgInfo::Extend { coerce_to, .. } => {
                assert_eq!(num_ir_args, 1);
                param_types[first_ir_arg] = type_info.ir_type(coerce_to);
            }
            ArgInfo::Expand { ty, .. } => {
                let mut expanded = Vec::with_capacity(num_ir_args);
                expanded_types(type_info, ty, &mut expanded);
                assert_eq!(expanded.len(), num_ir_args);
                param_types[first_ir_arg..first_ir_arg + num_ir_args]
                    .clone_from_slice(&expanded);
            }
        }
    }

    IrFunctionType { return_type, param_types, variadic: function_type.is_variadic() }
}

fn extension_for(coerce_to: &Type) -> ArgExtension {
    if coerce_to.has_signed_integer_representation() {
        ArgExtension::Sext
    } else if coerce_to.has_unsigned_integer_representation() {
        ArgExtension::Zext
    } else {
        ArgExtension::None
    }
}

/// Assemble the attribute list from the mapping, merging into any attributes
/// the driver already placed on the function.
pub fn function_attributes(
    mapping: &FunctionIRMapping,
    existing: &AttributeList,
) -> AttributeList {
    let mut function = existing.function;
    let mut ret = existing.ret;
    let mut params = vec![ArgAttributes::new(); mapping.total_ir_args()];
    for (i, param) in existing.params.iter().enumerate().take(params.len()) {
        params[i] = *param;
    }

    let return_info = mapping.return_info();
    match return_info {
        ArgInfo::Extend { coerce_to, in_reg } => {
            ret.ext(extension_for(coerce_to));
            if *in_reg {
                ret.set(ArgAttribute::InReg);
            }
        }
        ArgInfo::Direct { in_reg, .. } => {
            if *in_reg {
                ret.set(ArgAttribute::InReg);
            }
        }
        ArgInfo::Ignore => {}
        ArgInfo::InAlloca { .. } | ArgInfo::Indirect { .. } => {
            // inalloca and sret disable readnone and readonly.
            function.unset(ArgAttribute::ReadOnly).unset(ArgAttribute::ReadNone);
        }
        ArgInfo::Expand { .. } => unreachable!("invalid ABI kind for return value"),
    }

    if let Some(sret_index) = mapping.struct_ret_arg_index() {
        let attrs = &mut params[sret_index];
        attrs.set(ArgAttribute::StructRet).set(ArgAttribute::NoAlias);
        if return_info.in_reg() {
            attrs.set(ArgAttribute::InReg);
        }
    }

    if let Some(inalloca_index) = mapping.inalloca_arg_index() {
        params[inalloca_index].set(ArgAttribute::InAlloca);
    }

    for (arg_index, argument) in mapping.arguments().iter().enumerate() {
        let arg_info = &argument.arg_info;
        let mut attrs = ArgAttributes::new();

        if let (Some(padding_index), Some(padding)) =
            (argument.padding_arg_index, arg_info.padding())
        {
            if padding.in_reg {
                params[padding_index].set(ArgAttribute::InReg);
            }
        }

        match arg_info {
            ArgInfo::Extend { coerce_to, in_reg } => {
                attrs.ext(extension_for(coerce_to));
                if *in_reg {
                    attrs.set(ArgAttribute::InReg);
                }
            }
            ArgInfo::Direct { in_reg, .. } => {
                if *in_reg {
                    attrs.set(ArgAttribute::InReg);
                }
            }
            ArgInfo::Indirect { align, by_val, in_reg, .. } => {
                if *in_reg {
                    attrs.set(ArgAttribute::InReg);
                }
                if *by_val {
                    attrs.set(ArgAttribute::ByVal);
                }
                attrs.alignment = *align;
                // byval disables readnone and readonly.
                function.unset(ArgAttribute::ReadOnly).unset(ArgAttribute::ReadNone);
            }
            ArgInfo::Ignore | ArgInfo::Expand { .. } => continue,
            ArgInfo::InAlloca { .. } => {
                // inalloca disables readnone and readonly.
                function.unset(ArgAttribute::ReadOnly).unset(ArgAttribute::ReadNone);
                continue;
            }
        }

        if !attrs.is_empty() {
            let (first_ir_arg, num_ir_args) = mapping.ir_arg_range(arg_index);
            for i in 0..num_ir_args {
                let param = &mut params[first_ir_arg + i];
                param.regular |= attrs.regular;
                if attrs.arg_ext != ArgExtension::None {
                    param.ext(attrs.arg_ext);
                }
                if attrs.alignment.is_some() {
                    param.alignment = attrs.alignment;
                }
            }
        }
    }

    AttributeList { function, ret, params }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::{CallingConvention, StructField};
    use crate::type_info::TargetTypeInfo;

    fn infos_for(ret: ArgInfo, args: Vec<ArgInfo>) -> Vec<ArgInfo> {
        let mut v = vec![ret];
        v.extend(args);
        v
    }

    /// Every IR index must be covered exactly once by sret, padding and
    /// argument ranges.
    fn check_slot_coverage(mapping: &FunctionIRMapping) {
        let mut seen = vec![false; mapping.total_ir_args()];
        let mut mark = |index: usize| {
            assert!(!seen[index], "IR index {index} assigned twice");
            seen[index] = true;
        };
        if let Some(i) = mapping.struct_ret_arg_index() {
            mark(i);
        }
        if let Some(i) = mapping.inalloca_arg_index() {
            mark(i);
        }
        for (arg_index, arg) in mapping.arguments().iter().enumerate() {
            if let Some(i) = arg.padding_arg_index {
                mark(i);
            }
            let (first, count) = mapping.ir_arg_range(arg_index);
            for i in first..first + count {
                mark(i);
            }
        }
        assert!(seen.iter().all(|&s| s), "IR indices not contiguous: {seen:?}");
    }

    #[test]
    fn slot_coverage_simple() {
        let ti = TargetTypeInfo::x86_64();
        let infos = infos_for(
            ArgInfo::direct(Type::i32()),
            vec![ArgInfo::direct(Type::i32()), ArgInfo::extend(Type::i8())],
        );
        let mapping = function_ir_mapping(&ti, &infos);
        assert_eq!(mapping.total_ir_args(), 2);
        check_slot_coverage(&mapping);
    }

    #[test]
    fn slot_coverage_with_sret_and_flatten() {
        let ti = TargetTypeInfo::x86_64();
        let pair = Type::struct_(vec![
            StructField::new(Type::i64()),
            StructField::new(Type::i64()),
        ]);
        let infos = infos_for(
            ArgInfo::indirect(None, false),
            vec![ArgInfo::direct(pair), ArgInfo::ignore(), ArgInfo::indirect(None, true)],
        );
        let mapping = function_ir_mapping(&ti, &infos);
        // sret + two flattened members + indirect pointer.
        assert_eq!(mapping.total_ir_args(), 4);
        assert_eq!(mapping.struct_ret_arg_index(), Some(0));
        assert_eq!(mapping.ir_arg_range(0), (1, 2));
        assert_eq!(mapping.ir_arg_range(1), (3, 0));
        assert_eq!(mapping.ir_arg_range(2), (3, 1));
        check_slot_coverage(&mapping);
    }

    #[test]
    fn sret_after_this_swap() {
        let ti = TargetTypeInfo::x86_64();
        let ret = ArgInfo::Indirect {
            align: None,
            by_val: false,
            realign: false,
            in_reg: false,
            sret_after_this: true,
        };
        let infos = infos_for(
            ret,
            vec![ArgInfo::direct(Type::pointer()), ArgInfo::direct(Type::i32())],
        );
        let mapping = function_ir_mapping(&ti, &infos);
        assert_eq!(mapping.struct_ret_arg_index(), Some(1));
        assert_eq!(mapping.ir_arg_range(0), (0, 1));
        assert_eq!(mapping.ir_arg_range(1), (2, 1));
        assert_eq!(mapping.total_ir_args(), 3);
        check_slot_coverage(&mapping);
    }

    #[test]
    fn expansion_counting() {
        let ti = TargetTypeInfo::x86_64();
        let inner = Type::struct_(vec![
            StructField::new(Type::float()),
            StructField::new(Type::float()),
        ]);
        let ty = Type::struct_(vec![
            StructField::new(Type::array(inner, 2)),
            StructField::new(Type::complex(Type::float())),
        ]);
        assert_eq!(expansion_size(&ti, &ty), 6);

        let mut types = Vec::new();
        expanded_types(&ti, &ty, &mut types);
        assert_eq!(types.len(), 6);
        assert!(types.iter().all(|t| *t == IrType::Float));
    }

    #[test]
    fn signature_matches_attribute_length() {
        let ti = TargetTypeInfo::x86_64();
        let s = Type::struct_(vec![
            StructField::new(Type::double()),
            StructField::new(Type::double()),
            StructField::new(Type::double()),
        ]);
        let ft = FunctionType::new(
            CallingConvention::CDefault,
            s,
            vec![Type::i32()],
            false,
        );
        let infos = infos_for(
            ArgInfo::indirect(None, false),
            vec![ArgInfo::direct(Type::i32())],
        );
        let mapping = function_ir_mapping(&ti, &infos);
        let sig = ir_function_type(&ti, &ft, &mapping);
        let attrs = function_attributes(&mapping, &AttributeList::new());
        assert_eq!(sig.param_types.len(), mapping.total_ir_args());
        assert_eq!(attrs.params.len(), mapping.total_ir_args());
        assert_eq!(sig.return_type, IrType::Void);
        assert!(attrs.params[0].contains(ArgAttribute::StructRet));
        assert!(attrs.params[0].contains(ArgAttribute::NoAlias));
    }

    #[test]
    fn readonly_stripped_for_byval() {
        let ti = TargetTypeInfo::x86_64();
        let mut existing = AttributeList::new();
        existing.function.set(ArgAttribute::ReadOnly);
        let infos = infos_for(
            ArgInfo::direct(Type::i32()),
            vec![ArgInfo::indirect(Some(crate::layout::Align::from_bytes(8).unwrap()), true)],
        );
        let mapping = function_ir_mapping(&ti, &infos);
        let attrs = function_attributes(&mapping, &existing);
        assert!(!attrs.function.contains(ArgAttribute::ReadOnly));
        assert!(attrs.params[0].contains(ArgAttribute::ByVal));
        assert_eq!(attrs.params[0].alignment.unwrap().bytes(), 8);
    }
}
