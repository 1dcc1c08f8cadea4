//! Win64 argument classification.
//!
//! The Microsoft x64 convention is much simpler than System V: anything that
//! is not a power-of-two scalar up to eight bytes travels by pointer, and the
//! backend assigns the four parameter registers positionally.

use tracing::debug;

use crate::ty::{FunctionType, Type, TypeKind};
use crate::type_info::TypeInfo;

use super::ArgInfo;

pub(crate) struct Win64Classifier<'a> {
    type_info: &'a dyn TypeInfo,
}

impl<'a> Win64Classifier<'a> {
    pub(crate) fn new(type_info: &'a dyn TypeInfo) -> Win64Classifier<'a> {
        Win64Classifier { type_info }
    }

    fn classify_type(&self, ty: &Type) -> ArgInfo {
        let size = self.type_info.alloc_size(ty);

        if ty.is_aggregate() {
            if ty.is_record() && ty.is_empty_record(true) {
                return ArgInfo::ignore();
            }
            // Aggregates of register size pass as the matching integer;
            // everything else goes behind a pointer to a caller-owned copy.
            return if matches!(size.bytes(), 1 | 2 | 4 | 8) {
                ArgInfo::direct(Type::int((size.bytes() * 8) as u16, false))
            } else {
                ArgInfo::indirect(None, false)
            };
        }

        if ty.is_vector() {
            return if size.bytes() <= 8 {
                ArgInfo::direct(ty.clone())
            } else {
                ArgInfo::indirect(None, false)
            };
        }

        match ty.kind() {
            // MSVC has no x87 long double; an explicit 80-bit value and
            // __int128 both exceed a register and travel by pointer.
            TypeKind::X86Fp80 | TypeKind::Int { bits: 128, .. } => ArgInfo::indirect(None, false),
            _ if ty.is_promotable_integer() => ArgInfo::extend(ty.clone()),
            _ => ArgInfo::direct(ty.clone()),
        }
    }

    pub(crate) fn classify_function_type(
        &self,
        function_type: &FunctionType,
        argument_types: &[Type],
    ) -> Vec<ArgInfo> {
        debug!(args = argument_types.len(), "classifying Win64 function type");

        let mut arg_infos = Vec::with_capacity(argument_types.len() + 1);

        let return_type = function_type.return_type();
        if return_type.is_void() {
            arg_infos.push(ArgInfo::ignore());
        } else {
            arg_infos.push(self.classify_type(return_type));
        }

        for ty in argument_types {
            arg_infos.push(self.classify_type(ty));
        }

        arg_infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::{CallingConvention, StructField};
    use crate::type_info::TargetTypeInfo;

    fn classify(ret: Type, args: Vec<Type>) -> Vec<ArgInfo> {
        let ti = TargetTypeInfo::x86_64();
        let classifier = Win64Classifier::new(&ti);
        let ft = FunctionType::new(CallingConvention::CDefault, ret, args, false);
        classifier.classify_function_type(&ft, &ft.argument_types().to_vec())
    }

    #[test]
    fn register_sized_structs_pass_as_integers() {
        let s8 = Type::struct_(vec![
            StructField::new(Type::i32()),
            StructField::new(Type::i32()),
        ]);
        let s3 = Type::struct_(vec![
            StructField::new(Type::i8()),
            StructField::new(Type::i8()),
            StructField::new(Type::i8()),
        ]);
        let infos = classify(Type::void(), vec![s8, s3]);
        assert_eq!(infos[1], ArgInfo::direct(Type::int(64, false)));
        // Three bytes is not a register size.
        assert!(matches!(infos[2], ArgInfo::Indirect { by_val: false, .. }));
    }

    #[test]
    fn large_returns_use_sret() {
        let s = Type::struct_(vec![
            StructField::new(Type::double()),
            StructField::new(Type::double()),
        ]);
        let infos = classify(s, vec![]);
        assert!(matches!(infos[0], ArgInfo::Indirect { by_val: false, .. }));
    }

    #[test]
    fn int128_is_indirect() {
        let infos = classify(Type::void(), vec![Type::i128()]);
        assert!(matches!(infos[1], ArgInfo::Indirect { .. }));
    }

    #[test]
    fn scalars_pass_directly() {
        let infos = classify(Type::double(), vec![Type::i32(), Type::i8()]);
        assert_eq!(infos[0], ArgInfo::direct(Type::double()));
        assert_eq!(infos[1], ArgInfo::direct(Type::i32()));
        assert_eq!(infos[2], ArgInfo::extend(Type::i8()));
    }
}
