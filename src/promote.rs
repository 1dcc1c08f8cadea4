//! C default argument promotions for variadic tails.
//!
//! Values flowing into the `...` of a variadic call are promoted the way a C
//! compiler promotes them: integers narrower than `int` widen to `int`,
//! `float` becomes `double`. Fixed positional arguments pass through
//! untouched, and promoting an already-promoted tail is a no-op.

use crate::ir::{Builder, TypedValue, Value};
use crate::ty::{FunctionType, Type, TypeKind};
use crate::type_info::TypeInfo;

pub struct TypePromoter<'a> {
    type_info: &'a dyn TypeInfo,
}

impl<'a> TypePromoter<'a> {
    pub fn new(type_info: &'a dyn TypeInfo) -> TypePromoter<'a> {
        TypePromoter { type_info }
    }

    fn promoted_type(&self, ty: &Type) -> Type {
        match ty.kind() {
            TypeKind::Bool | TypeKind::Int { bits: 8 | 16, .. } => Type::i32(),
            TypeKind::Half | TypeKind::Float => Type::double(),
            _ => ty.clone(),
        }
    }

    /// Promote the types of a call's arguments; positions below the named
    /// argument count (or all of them, for non-variadic functions) are left
    /// alone.
    pub fn promote_argument_types(
        &self,
        function_type: &FunctionType,
        raw_argument_types: &[Type],
    ) -> Vec<Type> {
        assert!(raw_argument_types.len() >= function_type.argument_types().len());

        if !function_type.is_variadic() {
            return raw_argument_types.to_vec();
        }

        let named_count = function_type.argument_types().len();
        raw_argument_types
            .iter()
            .enumerate()
            .map(|(index, ty)| {
                if index < named_count { ty.clone() } else { self.promoted_type(ty) }
            })
            .collect()
    }

    fn promote_value<B: Builder>(&self, builder: &mut B, value: TypedValue<'_>) -> (Value, Type) {
        let promoted = self.promoted_type(value.ty);
        if promoted == *value.ty {
            return (value.value, promoted);
        }

        let ir_type = self.type_info.ir_type(&promoted);
        let new_value = match value.ty.kind() {
            TypeKind::Bool => builder.int_cast(value.value, &ir_type, false),
            TypeKind::Int { signed, .. } => builder.int_cast(value.value, &ir_type, *signed),
            TypeKind::Half | TypeKind::Float => builder.fp_ext(value.value, &ir_type),
            _ => unreachable!("promotion of unexpected type {}", value.ty),
        };
        (new_value, promoted)
    }

    /// Promote the variadic tail of a call's argument values, emitting the
    /// necessary conversions.
    pub fn promote_arguments<B: Builder>(
        &self,
        builder: &mut B,
        function_type: &FunctionType,
        raw_arguments: &[TypedValue<'_>],
    ) -> Vec<(Value, Type)> {
        assert!(raw_arguments.len() >= function_type.argument_types().len());

        if !function_type.is_variadic() {
            return raw_arguments.iter().map(|a| (a.value, a.ty.clone())).collect();
        }

        let named_count = function_type.argument_types().len();
        raw_arguments
            .iter()
            .enumerate()
            .map(|(index, argument)| {
                if index < named_count {
                    (argument.value, argument.ty.clone())
                } else {
                    self.promote_value(builder, *argument)
                }
            })
            .collect()
    }
}
