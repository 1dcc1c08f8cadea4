//! Per-argument classification records and the attribute model.
//!
//! The heart of this module is [`ArgInfo`]: how one argument (or the return
//! value) crosses the ABI boundary. It is a tagged sum so that per-kind
//! payloads (coerce-to type, indirect alignment, expansion type) cannot be
//! combined illegally.

use crate::layout::Align;
use crate::ty::{Type, TypeKind};
use crate::type_info::TypeInfo;

pub mod mapping;
pub mod x86;
pub mod x86_64;
pub mod x86_win64;

/// How a single argument or return value is passed.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ArgInfo {
    /// The value is not materialized at all (`void`, empty records).
    Ignore,
    /// Pass directly, cast through `coerce_to`.
    Direct { coerce_to: Type, in_reg: bool, can_be_flattened: bool },
    /// Pass directly, sign- or zero-extending to a full register. The coerce
    /// type keeps the source signedness so attribute emission can pick
    /// between `sext` and `zext`.
    Extend { coerce_to: Type, in_reg: bool },
    /// Pass via a hidden pointer.
    Indirect {
        align: Option<Align>,
        by_val: bool,
        realign: bool,
        in_reg: bool,
        sret_after_this: bool,
    },
    /// Pass an aggregate as its flattened sequence of leaf scalars.
    Expand { ty: Type, padding: Option<Padding> },
    /// Windows i386: the value lives at an offset inside the caller-allocated
    /// argument struct. Representable, reserved, and fatal to lower (the
    /// rewrite pass that would produce it is not wired up).
    InAlloca { field_index: u32, sret: bool },
}

/// A padding slot inserted before an expanded argument.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Padding {
    pub ty: Type,
    pub in_reg: bool,
}

impl ArgInfo {
    pub fn direct(coerce_to: Type) -> ArgInfo {
        ArgInfo::Direct { coerce_to, in_reg: false, can_be_flattened: true }
    }

    pub fn direct_in_reg(coerce_to: Type) -> ArgInfo {
        ArgInfo::Direct { coerce_to, in_reg: true, can_be_flattened: true }
    }

    pub fn extend(coerce_to: Type) -> ArgInfo {
        debug_assert!(coerce_to.is_integer(), "extend of non-integer type {coerce_to}");
        ArgInfo::Extend { coerce_to, in_reg: false }
    }

    pub fn extend_in_reg(coerce_to: Type) -> ArgInfo {
        debug_assert!(coerce_to.is_integer(), "extend of non-integer type {coerce_to}");
        ArgInfo::Extend { coerce_to, in_reg: true }
    }

    pub fn indirect(align: Option<Align>, by_val: bool) -> ArgInfo {
        ArgInfo::Indirect { align, by_val, realign: false, in_reg: false, sret_after_this: false }
    }

    pub fn indirect_realign(align: Option<Align>, by_val: bool) -> ArgInfo {
        ArgInfo::Indirect { align, by_val, realign: true, in_reg: false, sret_after_this: false }
    }

    pub fn indirect_in_reg(align: Option<Align>, by_val: bool) -> ArgInfo {
        ArgInfo::Indirect { align, by_val, realign: false, in_reg: true, sret_after_this: false }
    }

    pub fn ignore() -> ArgInfo {
        ArgInfo::Ignore
    }

    pub fn expand(ty: Type) -> ArgInfo {
        ArgInfo::Expand { ty, padding: None }
    }

    pub fn expand_with_padding(ty: Type, padding_in_reg: bool, padding_ty: Option<Type>) -> ArgInfo {
        let padding = padding_ty.map(|ty| Padding { ty, in_reg: padding_in_reg });
        ArgInfo::Expand { ty, padding }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, ArgInfo::Direct { .. })
    }

    pub fn is_extend(&self) -> bool {
        matches!(self, ArgInfo::Extend { .. })
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self, ArgInfo::Indirect { .. })
    }

    pub fn is_ignore(&self) -> bool {
        matches!(self, ArgInfo::Ignore)
    }

    /// The coerce-to type of a Direct or Extend classification.
    pub fn coerce_to(&self) -> &Type {
        match self {
            ArgInfo::Direct { coerce_to, .. } | ArgInfo::Extend { coerce_to, .. } => coerce_to,
            _ => panic!("coerce_to on {self:?}"),
        }
    }

    pub fn in_reg(&self) -> bool {
        match self {
            ArgInfo::Direct { in_reg, .. }
            | ArgInfo::Extend { in_reg, .. }
            | ArgInfo::Indirect { in_reg, .. } => *in_reg,
            _ => false,
        }
    }

    pub fn indirect_align(&self) -> Option<Align> {
        match self {
            ArgInfo::Indirect { align, .. } => *align,
            _ => None,
        }
    }

    pub fn is_sret_after_this(&self) -> bool {
        matches!(self, ArgInfo::Indirect { sret_after_this: true, .. })
    }

    pub fn padding(&self) -> Option<&Padding> {
        match self {
            ArgInfo::Expand { padding, .. } => padding.as_ref(),
            _ => None,
        }
    }
}

// The subset of IR attributes this layer computes, packed into a bitfield.
bitflags::bitflags! {
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
    pub struct ArgAttribute: u16 {
        const NoAlias   = 1 << 0;
        const NonNull   = 1 << 1;
        const ReadOnly  = 1 << 2;
        const ReadNone  = 1 << 3;
        const InReg     = 1 << 4;
        const StructRet = 1 << 5;
        const ByVal     = 1 << 6;
        const InAlloca  = 1 << 7;
    }
}

/// Whether an undersized integer argument is sign- or zero-extended.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum ArgExtension {
    #[default]
    None,
    Zext,
    Sext,
}

/// Attributes attached to one attribute position (function, return, or a
/// single IR parameter).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct ArgAttributes {
    pub regular: ArgAttribute,
    pub arg_ext: ArgExtension,
    pub alignment: Option<Align>,
}

impl ArgAttributes {
    pub fn new() -> ArgAttributes {
        ArgAttributes::default()
    }

    pub fn ext(&mut self, ext: ArgExtension) -> &mut Self {
        assert!(
            self.arg_ext == ArgExtension::None || self.arg_ext == ext,
            "cannot set {ext:?} when {:?} is already set",
            self.arg_ext
        );
        self.arg_ext = ext;
        self
    }

    pub fn set(&mut self, attr: ArgAttribute) -> &mut Self {
        self.regular |= attr;
        self
    }

    pub fn unset(&mut self, attr: ArgAttribute) -> &mut Self {
        self.regular -= attr;
        self
    }

    pub fn contains(&self, attr: ArgAttribute) -> bool {
        self.regular.contains(attr)
    }

    pub fn is_empty(&self) -> bool {
        self.regular.is_empty() && self.arg_ext == ArgExtension::None && self.alignment.is_none()
    }
}

/// The full attribute list for a lowered function: one entry per IR
/// parameter, plus the return and function positions. Index 0 is the return;
/// parameters are `1..=total_ir_args`.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct AttributeList {
    pub function: ArgAttributes,
    pub ret: ArgAttributes,
    pub params: Vec<ArgAttributes>,
}

impl AttributeList {
    pub fn new() -> AttributeList {
        AttributeList::default()
    }

    /// Attributes at an LLVM-style index: 0 is the return position,
    /// `1..=params.len()` the parameters.
    pub fn at(&self, index: usize) -> &ArgAttributes {
        if index == 0 { &self.ret } else { &self.params[index - 1] }
    }
}

/// Result of the homogeneous-aggregate test: either every leaf of the
/// aggregate has the same machine unit, or the aggregate carries no data at
/// all.
#[derive(Clone, Debug)]
pub enum HomogeneousAggregate {
    Homogeneous { unit: Type, count: u64 },
    NoData,
}

/// Marker for aggregates whose leaves are passed in different ways.
#[derive(Copy, Clone, Debug)]
pub struct Heterogeneous;

impl HomogeneousAggregate {
    /// Try to combine results from two fields of the same record. Only
    /// succeeds if one of them has no data, or both units are identical.
    fn merge(self, other: HomogeneousAggregate) -> Result<HomogeneousAggregate, Heterogeneous> {
        match (self, other) {
            (x, HomogeneousAggregate::NoData) | (HomogeneousAggregate::NoData, x) => Ok(x),
            (
                HomogeneousAggregate::Homogeneous { unit: a, count: ca },
                HomogeneousAggregate::Homogeneous { unit: b, count: cb },
            ) => {
                if a != b {
                    return Err(Heterogeneous);
                }
                Ok(HomogeneousAggregate::Homogeneous { unit: a, count: ca + cb })
            }
        }
    }
}

/// Largest member count a homogeneous aggregate may have and still be
/// register-eligible under `vectorcall`.
const MAX_HOMOGENEOUS_AGGREGATE_MEMBERS: u64 = 4;

/// Determine whether `ty` is a homogeneous aggregate of vectorcall-eligible
/// base units (floats, doubles, vectors), and return the unit and leaf count
/// if so.
pub fn homogeneous_aggregate(
    type_info: &dyn TypeInfo,
    ty: &Type,
) -> Option<(Type, u64)> {
    fn classify(type_info: &dyn TypeInfo, ty: &Type) -> Result<HomogeneousAggregate, Heterogeneous> {
        match ty.kind() {
            TypeKind::Float | TypeKind::Double => {
                Ok(HomogeneousAggregate::Homogeneous { unit: ty.clone(), count: 1 })
            }
            TypeKind::Vector { .. } => {
                Ok(HomogeneousAggregate::Homogeneous { unit: ty.clone(), count: 1 })
            }
            TypeKind::Array { element, count } => {
                if *count == 0 {
                    return Ok(HomogeneousAggregate::NoData);
                }
                match classify(type_info, element)? {
                    HomogeneousAggregate::NoData => Ok(HomogeneousAggregate::NoData),
                    HomogeneousAggregate::Homogeneous { unit, count: inner } => {
                        Ok(HomogeneousAggregate::Homogeneous { unit, count: inner * count })
                    }
                }
            }
            TypeKind::Struct { fields, .. } | TypeKind::Union { fields } => {
                if ty.has_flexible_array_member() {
                    return Err(Heterogeneous);
                }
                let mut result = HomogeneousAggregate::NoData;
                for field in fields {
                    if field.is_zero_width_bitfield() {
                        continue;
                    }
                    if field.is_bitfield() {
                        return Err(Heterogeneous);
                    }
                    result = result.merge(classify(type_info, &field.ty)?)?;
                }
                Ok(result)
            }
            _ => Err(Heterogeneous),
        }
    }

    match classify(type_info, ty) {
        Ok(HomogeneousAggregate::Homogeneous { unit, count })
            if count <= MAX_HOMOGENEOUS_AGGREGATE_MEMBERS =>
        {
            // There must be no padding: the units have to tile the type.
            let unit_size = type_info.alloc_size(&unit);
            if unit_size * count == type_info.alloc_size(ty) {
                Some((unit, count))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// If `ty` is a struct wrapping exactly one non-empty field (possibly
/// nested), return that field's type, provided it covers the whole struct.
pub fn struct_single_element(type_info: &dyn TypeInfo, ty: &Type) -> Option<Type> {
    if !ty.is_struct() || ty.has_flexible_array_member() {
        return None;
    }

    let mut found: Option<Type> = None;
    for field in ty.record_fields() {
        if field.is_empty_field(true) {
            continue;
        }
        if found.is_some() {
            return None;
        }
        let mut field_ty = field.ty.clone();
        // Single-element arrays collapse to their element.
        while field_ty.is_array() && field_ty.array_count() == 1 {
            field_ty = field_ty.array_element().clone();
        }
        if field_ty.is_struct() {
            match struct_single_element(type_info, &field_ty) {
                Some(inner) => found = Some(inner),
                None => return None,
            }
        } else {
            found = Some(field_ty);
        }
    }

    let found = found?;
    if type_info.alloc_size(&found) == type_info.alloc_size(ty) {
        Some(found)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::StructField;
    use crate::type_info::TargetTypeInfo;

    #[test]
    fn homogeneous_aggregates() {
        let ti = TargetTypeInfo::x86_64();

        let hfa = Type::struct_(vec![
            StructField::new(Type::double()),
            StructField::new(Type::double()),
        ]);
        let (unit, count) = homogeneous_aggregate(&ti, &hfa).unwrap();
        assert_eq!(unit, Type::double());
        assert_eq!(count, 2);

        let mixed = Type::struct_(vec![
            StructField::new(Type::double()),
            StructField::new(Type::i64()),
        ]);
        assert!(homogeneous_aggregate(&ti, &mixed).is_none());

        let too_many = Type::struct_(vec![StructField::new(Type::array(Type::float(), 5))]);
        assert!(homogeneous_aggregate(&ti, &too_many).is_none());

        let vectors = Type::struct_(vec![
            StructField::new(Type::vector(Type::float(), 4)),
            StructField::new(Type::vector(Type::float(), 4)),
        ]);
        assert!(homogeneous_aggregate(&ti, &vectors).is_some());
    }

    #[test]
    fn single_element_struct() {
        let ti = TargetTypeInfo::x86_64();

        let wrapped = Type::struct_(vec![StructField::new(Type::double())]);
        assert_eq!(struct_single_element(&ti, &wrapped), Some(Type::double()));

        let nested = Type::struct_(vec![StructField::new(wrapped)]);
        assert_eq!(struct_single_element(&ti, &nested), Some(Type::double()));

        let with_empty = Type::struct_(vec![
            StructField::new(Type::struct_(vec![])),
            StructField::new(Type::float()),
        ]);
        assert_eq!(struct_single_element(&ti, &with_empty), Some(Type::float()));

        let two = Type::struct_(vec![
            StructField::new(Type::float()),
            StructField::new(Type::float()),
        ]);
        assert_eq!(struct_single_element(&ti, &two), None);
    }

    #[test]
    fn extension_conflict_is_fatal() {
        let mut attrs = ArgAttributes::new();
        attrs.ext(ArgExtension::Zext);
        attrs.ext(ArgExtension::Zext);
        let result = std::panic::catch_unwind(move || {
            let mut attrs = attrs;
            attrs.ext(ArgExtension::Sext);
        });
        assert!(result.is_err());
    }
}
