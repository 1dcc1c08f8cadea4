//! i386 argument classification.
//!
//! Unlike the x86-64 rules, the 32-bit conventions are mostly
//! stack-oriented; the interesting policy lives in when values ride in
//! `eax`/`edx`/`ecx` (`regparm`, fastcall, vectorcall), when small structs
//! are returned in registers, and the Darwin/Windows carve-outs.

use tracing::debug;

use crate::layout::{Align, Size};
use crate::triple::Triple;
use crate::ty::{CallingConvention, FunctionType, Type, TypeKind};
use crate::type_info::TypeInfo;

use super::{homogeneous_aggregate, struct_single_element, ArgInfo};

/// Minimum stack slot alignment the 32-bit ABI guarantees.
const MIN_ABI_STACK_ALIGN_BYTES: u64 = 4;

/// Register accounting threaded through one signature's classification.
struct CCState {
    calling_convention: CallingConvention,
    free_regs: u32,
    free_sse_regs: u32,
}

#[derive(PartialEq, Eq)]
enum MiniClass {
    Integer,
    Float,
}

pub(crate) struct X86_32Classifier<'a> {
    type_info: &'a dyn TypeInfo,
    triple: Triple,
}

fn is_register_size(size: Size) -> bool {
    matches!(size.bits(), 8 | 16 | 32 | 64)
}

impl<'a> X86_32Classifier<'a> {
    pub(crate) fn new(type_info: &'a dyn TypeInfo, triple: Triple) -> X86_32Classifier<'a> {
        X86_32Classifier { type_info, triple }
    }

    fn is_darwin_vector_abi(&self) -> bool {
        self.triple.is_os_darwin()
    }

    fn is_small_struct_in_reg_abi(&self) -> bool {
        use crate::triple::Os;
        if self.triple.is_os_darwin() {
            return true;
        }
        matches!(
            self.triple.os,
            Os::DragonFly | Os::FreeBsd | Os::OpenBsd | Os::Windows
        )
    }

    fn is_win32_struct_abi(&self) -> bool {
        self.triple.is_win32_msvc()
    }

    /// Determine if the given type should be returned in a register.
    fn should_return_type_in_register(&self, ty: &Type) -> bool {
        let size = self.type_info.alloc_size(ty);

        if !is_register_size(size) {
            return false;
        }

        if ty.is_vector() {
            // 64- and 128-bit vectors inside structures are not returned in
            // registers.
            return !matches!(size.bits(), 64 | 128);
        }

        // Builtins, pointers and complex values are fine.
        if ty.is_integer() || ty.is_floating_point() || ty.is_pointer() || ty.is_complex() {
            return true;
        }

        // Arrays are treated like records.
        if ty.is_array() {
            return self.should_return_type_in_register(ty.array_element());
        }

        if !ty.is_record() {
            return false;
        }

        // Structures are returned in a register when every field would be.
        for field in ty.record_fields() {
            if field.is_empty_field(true) {
                continue;
            }
            if !self.should_return_type_in_register(&field.ty) {
                return false;
            }
        }

        true
    }

    fn indirect_return_result(&self, state: &mut CCState) -> ArgInfo {
        // An indirect return consumes one integer register for the hidden
        // pointer.
        if state.free_regs > 0 {
            state.free_regs -= 1;
            return ArgInfo::indirect_in_reg(None, false);
        }
        ArgInfo::indirect(None, false)
    }

    fn classify_return_type(&self, return_type: &Type, state: &mut CCState) -> ArgInfo {
        if return_type.is_void() {
            return ArgInfo::ignore();
        }

        if state.calling_convention == CallingConvention::VectorCall
            && homogeneous_aggregate(self.type_info, return_type).is_some()
        {
            // The IR struct type for such an aggregate lowers properly.
            return ArgInfo::direct(return_type.clone());
        }

        if return_type.is_vector() {
            // On Darwin, some vectors are returned in registers.
            if self.is_darwin_vector_abi() {
                let size = self.type_info.alloc_size(return_type);

                // 128-bit vectors are returned in registers; pick a type the
                // backend will like.
                if size.bits() == 128 {
                    return ArgInfo::direct(Type::vector(Type::i64(), 2));
                }

                if matches!(size.bits(), 8 | 16 | 32)
                    || (size.bits() == 64 && return_type.vector_count() == 1)
                {
                    return ArgInfo::direct(Type::int(size.bits() as u16, false));
                }

                return self.indirect_return_result(state);
            }

            return ArgInfo::direct(return_type.clone());
        }

        if return_type.is_aggregate() {
            if return_type.has_flexible_array_member() {
                // Structures with flexible arrays are always indirect.
                return self.indirect_return_result(state);
            }

            // Unless the target opts in, structs and unions are always
            // indirect.
            if !self.is_small_struct_in_reg_abi() && !return_type.is_complex() {
                return self.indirect_return_result(state);
            }

            if self.should_return_type_in_register(return_type) {
                let size = self.type_info.alloc_size(return_type);

                // A "single-element" struct holding a float or double is
                // returned in a floating-point register (MSVC does not apply
                // this); pointers get the same treatment for IR quality.
                if let Some(element) = struct_single_element(self.type_info, return_type) {
                    if (!self.is_win32_struct_abi() && element.is_floating_point())
                        || element.is_pointer()
                    {
                        return ArgInfo::direct(element);
                    }
                }

                return ArgInfo::direct(Type::int(size.bits() as u16, false));
            }

            return self.indirect_return_result(state);
        }

        if return_type.is_promotable_integer() {
            ArgInfo::extend(return_type.clone())
        } else {
            ArgInfo::direct(return_type.clone())
        }
    }

    fn is_sse_vector_type(&self, ty: &Type) -> bool {
        ty.is_vector() && self.type_info.alloc_size(ty).bits() == 128
    }

    fn is_record_with_sse_vector_type(&self, ty: &Type) -> bool {
        if !ty.is_struct() {
            return false;
        }
        ty.record_fields().iter().any(|field| {
            self.is_sse_vector_type(&field.ty) || self.is_record_with_sse_vector_type(&field.ty)
        })
    }

    fn type_stack_align(&self, ty: &Type, align: Align) -> Option<Align> {
        // At or below the minimum ABI alignment the backend handles it.
        if align.bytes() <= MIN_ABI_STACK_ALIGN_BYTES {
            return None;
        }

        // On non-Darwin, the stack type alignment is always 4.
        if !self.is_darwin_vector_abi() {
            return Some(Align::from_bytes(4).unwrap());
        }

        // If the type contains an SSE vector type, the alignment is 16.
        if align.bytes() >= 16
            && (self.is_sse_vector_type(ty) || self.is_record_with_sse_vector_type(ty))
        {
            return Some(Align::from_bytes(16).unwrap());
        }

        Some(Align::from_bytes(4).unwrap())
    }

    fn indirect_result(&self, ty: &Type, by_val: bool, state: &mut CCState) -> ArgInfo {
        if !by_val {
            // Non-byval indirects just use one pointer.
            if state.free_regs > 0 {
                state.free_regs -= 1;
                return ArgInfo::indirect_in_reg(None, false);
            }
            return ArgInfo::indirect(None, false);
        }

        let type_align = self.type_info.abi_align(ty);
        match self.type_stack_align(ty, type_align) {
            None => ArgInfo::indirect(Some(Align::from_bytes(4).unwrap()), true),
            Some(stack_align) => {
                // If the stack alignment is less than the type alignment,
                // realign the argument.
                if type_align > stack_align {
                    ArgInfo::indirect_realign(Some(stack_align), true)
                } else {
                    ArgInfo::indirect(Some(stack_align), true)
                }
            }
        }
    }

    fn mini_classify(&self, ty: &Type) -> MiniClass {
        let element = struct_single_element(self.type_info, ty).unwrap_or_else(|| ty.clone());
        match element.kind() {
            TypeKind::Float | TypeKind::Double => MiniClass::Float,
            _ => MiniClass::Integer,
        }
    }

    fn should_use_in_reg(&self, ty: &Type, state: &mut CCState) -> (bool, bool) {
        let mut needs_padding = false;
        if self.mini_classify(ty) == MiniClass::Float {
            return (false, needs_padding);
        }

        let size = self.type_info.alloc_size(ty);
        let size_in_regs = (size.bits() + 31) / 32;

        if size_in_regs == 0 {
            return (false, needs_padding);
        }

        if size_in_regs > u64::from(state.free_regs) {
            state.free_regs = 0;
            return (false, needs_padding);
        }

        state.free_regs -= size_in_regs as u32;

        if matches!(
            state.calling_convention,
            CallingConvention::FastCall | CallingConvention::VectorCall
        ) {
            if size.bits() > 32 {
                return (false, needs_padding);
            }

            if ty.is_integer() || ty.is_pointer() {
                return (true, needs_padding);
            }

            if state.free_regs > 0 {
                needs_padding = true;
            }

            return (false, needs_padding);
        }

        (true, needs_padding)
    }

    /// MMX types (`<2 x i32>`, `<4 x i16>`, `<8 x i8>`) pass as `i64`.
    fn is_mmx_type(&self, ty: &Type) -> bool {
        ty.is_vector()
            && self.type_info.alloc_size(ty).bits() == 64
            && ty.vector_element().is_integer()
            && self.type_info.alloc_size(ty.vector_element()).bits() != 64
    }

    fn is_32_or_64_bit_basic_type(&self, ty: &Type) -> bool {
        // Treat complex types as the element type.
        let ty = if ty.is_complex() { ty.complex_element() } else { ty };

        // Specifically 32- and 64-bit integers and integer-equivalents,
        // float, and double: types with a simple scalar passing convention
        // and no padding.
        if !(ty.is_integer() || ty.is_floating_point() || ty.is_pointer()) {
            return false;
        }

        matches!(self.type_info.alloc_size(ty).bits(), 32 | 64)
    }

    fn can_expand_indirect_argument(&self, ty: &Type) -> bool {
        // Only structure types can be expanded.
        if !ty.is_struct() || ty.has_flexible_array_member() {
            return false;
        }

        let mut size = Size::ZERO;
        for field in ty.record_fields() {
            if !self.is_32_or_64_bit_basic_type(&field.ty) {
                return false;
            }

            // Bitfields are rejected wholesale; expanding them is not
            // supported.
            if field.is_bitfield() {
                return false;
            }

            size += self.type_info.alloc_size(&field.ty);
        }

        // There must not be any holes in the struct.
        size == self.type_info.alloc_size(ty)
    }

    fn classify_argument_type(&self, ty: &Type, state: &mut CCState) -> ArgInfo {
        // vectorcall adds homogeneous vector aggregates, similar to other
        // targets.
        if state.calling_convention == CallingConvention::VectorCall {
            if let Some((_, count)) = homogeneous_aggregate(self.type_info, ty) {
                if u64::from(state.free_sse_regs) >= count {
                    state.free_sse_regs -= count as u32;
                    if ty.is_integer() || ty.is_floating_point() || ty.is_vector() {
                        return ArgInfo::direct(ty.clone());
                    }
                    return ArgInfo::expand(ty.clone());
                }
                return self.indirect_result(ty, false, state);
            }
        }

        if ty.is_aggregate() {
            if ty.is_struct() {
                // Structs are always byval on win32, regardless of content.
                if self.is_win32_struct_abi() {
                    return self.indirect_result(ty, true, state);
                }

                // Structures with flexible arrays are always indirect.
                if ty.has_flexible_array_member() {
                    return self.indirect_result(ty, true, state);
                }
            }

            // Ignore empty structs/unions.
            if ty.is_empty_record(true) {
                return ArgInfo::ignore();
            }

            let (in_reg, needs_padding) = self.should_use_in_reg(ty, state);
            if in_reg {
                let size = self.type_info.alloc_size(ty);
                let size_in_regs = (size.bits() + 31) / 32;
                let fields = (0..size_in_regs)
                    .map(|_| crate::ty::StructField::new(Type::i32()))
                    .collect();
                return ArgInfo::direct_in_reg(Type::struct_(fields));
            }

            let padding_ty = needs_padding.then(Type::i32);

            // Expand small (<= 128-bit) record types when the stack layout
            // matches the struct exactly; byval inhibits too many
            // optimizations to use when expansion works.
            if self.type_info.alloc_size(ty).bits() <= 4 * 32
                && self.can_expand_indirect_argument(ty)
            {
                let padding_in_reg = matches!(
                    state.calling_convention,
                    CallingConvention::FastCall | CallingConvention::VectorCall
                );
                return ArgInfo::expand_with_padding(ty.clone(), padding_in_reg, padding_ty);
            }

            return self.indirect_result(ty, true, state);
        }

        if ty.is_vector() {
            // On Darwin, some vectors are passed in memory as a plain
            // integer.
            if self.is_darwin_vector_abi() {
                let size = self.type_info.alloc_size(ty);
                if matches!(size.bits(), 8 | 16 | 32)
                    || (size.bits() == 64 && ty.vector_count() == 1)
                {
                    return ArgInfo::direct(Type::int(size.bits() as u16, false));
                }
            }

            if self.is_mmx_type(ty) {
                return ArgInfo::direct(Type::i64());
            }

            return ArgInfo::direct(ty.clone());
        }

        let (in_reg, _) = self.should_use_in_reg(ty, state);
        if ty.is_promotable_integer() {
            if in_reg {
                return ArgInfo::extend_in_reg(ty.clone());
            }
            return ArgInfo::extend(ty.clone());
        }
        if in_reg {
            return ArgInfo::direct_in_reg(ty.clone());
        }
        ArgInfo::direct(ty.clone())
    }

    pub(crate) fn classify_function_type(
        &self,
        function_type: &FunctionType,
        argument_types: &[Type],
    ) -> Vec<ArgInfo> {
        debug!(args = argument_types.len(), "classifying i386 function type");

        let cc = function_type.calling_convention();
        let free_regs = match cc {
            CallingConvention::FastCall | CallingConvention::VectorCall => {
                assert!(
                    function_type.regparm().is_none(),
                    "regparm cannot be combined with {cc:?}"
                );
                2
            }
            CallingConvention::ThisCall => {
                assert!(
                    function_type.regparm().is_none(),
                    "regparm cannot be combined with {cc:?}"
                );
                0
            }
            _ => u32::from(function_type.regparm().unwrap_or(0)),
        };
        let free_sse_regs = if cc == CallingConvention::VectorCall { 6 } else { 0 };

        let mut state = CCState { calling_convention: cc, free_regs, free_sse_regs };

        let mut arg_infos = Vec::with_capacity(argument_types.len() + 1);
        arg_infos.push(self.classify_return_type(function_type.return_type(), &mut state));

        for ty in argument_types {
            arg_infos.push(self.classify_argument_type(ty, &mut state));
        }

        arg_infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::StructField;
    use crate::type_info::TargetTypeInfo;
    use crate::triple::{Arch, Environment, Os, Vendor};

    fn linux() -> Triple {
        Triple::new(Arch::X86, Vendor::Unknown, Os::Linux, Environment::Gnu)
    }

    fn darwin() -> Triple {
        Triple::new(Arch::X86, Vendor::Apple, Os::Darwin, Environment::Unknown)
    }

    fn win_msvc() -> Triple {
        Triple::new(Arch::X86, Vendor::Pc, Os::Windows, Environment::Msvc)
    }

    fn classify(
        triple: Triple,
        cc: CallingConvention,
        ret: Type,
        args: Vec<Type>,
    ) -> Vec<ArgInfo> {
        let ti = TargetTypeInfo::x86_32(&triple);
        let classifier = X86_32Classifier::new(&ti, triple);
        let ft = FunctionType::new(cc, ret, args, false);
        classifier.classify_function_type(&ft, &ft.argument_types().to_vec())
    }

    #[test]
    fn int_char_struct_is_byval_on_linux() {
        let s = Type::struct_(vec![
            StructField::new(Type::i32()),
            StructField::new(Type::i8()),
        ]);
        let infos = classify(
            linux(),
            CallingConvention::CDecl,
            Type::void(),
            vec![Type::pointer(), s],
        );
        assert_eq!(infos[1], ArgInfo::direct(Type::pointer()));
        let info = &infos[2];
        assert!(matches!(info, ArgInfo::Indirect { by_val: true, .. }));
        assert_eq!(info.indirect_align().unwrap().bytes(), 4);
    }

    #[test]
    fn hole_free_small_struct_expands() {
        let s = Type::struct_(vec![
            StructField::new(Type::i32()),
            StructField::new(Type::i32()),
        ]);
        let infos = classify(linux(), CallingConvention::CDecl, Type::void(), vec![s.clone()]);
        assert_eq!(infos[1], ArgInfo::expand(s));
    }

    #[test]
    fn struct_return_is_sret_on_linux() {
        let s = Type::struct_(vec![StructField::new(Type::i32())]);
        let infos = classify(linux(), CallingConvention::CDecl, s, vec![]);
        assert!(matches!(infos[0], ArgInfo::Indirect { by_val: false, .. }));
    }

    #[test]
    fn small_structs_return_in_registers_on_darwin() {
        let s = Type::struct_(vec![
            StructField::new(Type::i16()),
            StructField::new(Type::i16()),
        ]);
        let infos = classify(darwin(), CallingConvention::CDefault, s, vec![]);
        assert_eq!(infos[0], ArgInfo::direct(Type::int(32, false)));

        // Single-element float structs come back in an FP register.
        let f = Type::struct_(vec![StructField::new(Type::float())]);
        let infos = classify(darwin(), CallingConvention::CDefault, f, vec![]);
        assert_eq!(infos[0], ArgInfo::direct(Type::float()));
    }

    #[test]
    fn msvc_single_element_float_struct_returns_as_int() {
        let f = Type::struct_(vec![StructField::new(Type::float())]);
        let infos = classify(win_msvc(), CallingConvention::CDefault, f, vec![]);
        assert_eq!(infos[0], ArgInfo::direct(Type::int(32, false)));
    }

    #[test]
    fn win32_structs_are_always_byval() {
        let s = Type::struct_(vec![
            StructField::new(Type::i32()),
            StructField::new(Type::i32()),
        ]);
        let infos =
            classify(win_msvc(), CallingConvention::CDecl, Type::void(), vec![s]);
        assert!(matches!(infos[1], ArgInfo::Indirect { by_val: true, .. }));
    }

    #[test]
    fn fastcall_uses_integer_registers() {
        let infos = classify(
            linux(),
            CallingConvention::FastCall,
            Type::void(),
            vec![Type::i32(), Type::i32(), Type::i32()],
        );
        assert_eq!(infos[1], ArgInfo::direct_in_reg(Type::i32()));
        assert_eq!(infos[2], ArgInfo::direct_in_reg(Type::i32()));
        // Only two registers: the third argument rides the stack.
        assert_eq!(infos[3], ArgInfo::direct(Type::i32()));
    }

    #[test]
    fn fastcall_padding_before_expanded_struct() {
        // One register is consumed by the int; the 8-byte struct does not
        // fit in the remaining register, so its expansion is preceded by a
        // padding slot.
        let s = Type::struct_(vec![
            StructField::new(Type::i32()),
            StructField::new(Type::i32()),
        ]);
        let infos = classify(
            linux(),
            CallingConvention::FastCall,
            Type::void(),
            vec![Type::i32(), s.clone()],
        );
        assert_eq!(infos[1], ArgInfo::direct_in_reg(Type::i32()));
        match &infos[2] {
            ArgInfo::Expand { ty, padding } => {
                assert_eq!(*ty, s);
                assert!(padding.is_none(), "both registers are exhausted by the struct");
            }
            other => panic!("expected expand, got {other:?}"),
        }
    }

    #[test]
    fn fastcall_pads_register_sized_struct() {
        // A 4-byte struct fits the register budget but is not an integer, so
        // fastcall leaves it on the stack behind an in-reg padding slot.
        let s = Type::struct_(vec![StructField::new(Type::i32())]);
        let infos = classify(
            linux(),
            CallingConvention::FastCall,
            Type::void(),
            vec![s.clone()],
        );
        match &infos[1] {
            ArgInfo::Expand { ty, padding } => {
                assert_eq!(*ty, s);
                let padding = padding.as_ref().expect("padding slot");
                assert_eq!(padding.ty, Type::i32());
                assert!(padding.in_reg);
            }
            other => panic!("expected expand, got {other:?}"),
        }
    }

    #[test]
    fn regparm_enables_register_passing() {
        let ti = TargetTypeInfo::x86_32(&linux());
        let classifier = X86_32Classifier::new(&ti, linux());
        let ft = FunctionType::new(
            CallingConvention::CDecl,
            Type::void(),
            vec![Type::i32(), Type::i64(), Type::i32()],
            false,
        )
        .with_regparm(3);
        let infos = classifier.classify_function_type(&ft, &ft.argument_types().to_vec());
        assert_eq!(infos[1], ArgInfo::direct_in_reg(Type::i32()));
        // The i64 takes the remaining two registers.
        assert_eq!(infos[2], ArgInfo::direct_in_reg(Type::i64()));
        assert_eq!(infos[3], ArgInfo::direct(Type::i32()));
    }

    #[test]
    #[should_panic(expected = "regparm cannot be combined")]
    fn regparm_with_fastcall_is_fatal() {
        let ti = TargetTypeInfo::x86_32(&linux());
        let classifier = X86_32Classifier::new(&ti, linux());
        let ft = FunctionType::new(
            CallingConvention::FastCall,
            Type::void(),
            vec![Type::i32()],
            false,
        )
        .with_regparm(2);
        classifier.classify_function_type(&ft, &ft.argument_types().to_vec());
    }

    #[test]
    fn vectorcall_homogeneous_vector_aggregate() {
        let hva = Type::struct_(vec![
            StructField::new(Type::vector(Type::float(), 4)),
            StructField::new(Type::vector(Type::float(), 4)),
        ]);
        let infos = classify(
            win_msvc(),
            CallingConvention::VectorCall,
            Type::void(),
            vec![hva.clone()],
        );
        assert_eq!(infos[1], ArgInfo::expand(hva));
    }

    #[test]
    fn complex_float_returns_as_i64() {
        let infos = classify(
            darwin(),
            CallingConvention::CDefault,
            Type::complex(Type::float()),
            vec![],
        );
        assert_eq!(infos[0], ArgInfo::direct(Type::int(64, false)));
    }

    #[test]
    fn mmx_vectors_pass_as_i64() {
        let mmx = Type::vector(Type::i16(), 4);
        let infos = classify(linux(), CallingConvention::CDecl, Type::void(), vec![mmx]);
        assert_eq!(infos[1], ArgInfo::direct(Type::i64()));
    }

    #[test]
    fn empty_struct_arguments_are_ignored() {
        let empty = Type::struct_(vec![]);
        let infos = classify(linux(), CallingConvention::CDecl, Type::void(), vec![empty]);
        assert_eq!(infos[1], ArgInfo::ignore());
    }

    #[test]
    fn promotable_return_extends() {
        let infos = classify(linux(), CallingConvention::CDecl, Type::i16(), vec![]);
        assert_eq!(infos[0], ArgInfo::extend(Type::i16()));
    }
}
