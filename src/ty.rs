//! The source-level type model.
//!
//! `Type` is a value-semantic handle over the C-with-extensions type system
//! the lowering understands: primitives, pointers, arrays, structs, unions,
//! complex numbers and vectors. Layout questions (size, alignment, field
//! offsets) are answered by the [`TypeInfo`](crate::type_info::TypeInfo)
//! oracle, never by `Type` itself.

use std::fmt;
use std::sync::Arc;

use crate::layout::AddressSpace;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Type {
    kind: Arc<TypeKind>,
}

#[derive(PartialEq, Eq, Hash, Debug)]
pub enum TypeKind {
    Void,
    Bool,
    Int { bits: u16, signed: bool },
    Half,
    Float,
    Double,
    X86Fp80,
    Fp128,
    Pointer { address_space: AddressSpace },
    Array { element: Type, count: u64 },
    Struct { fields: Vec<StructField>, packed: bool, flexible_array_member: bool },
    Union { fields: Vec<StructField> },
    Complex { element: Type },
    Vector { element: Type, count: u64 },
}

/// A member of a struct or union. A member with a `bit_width` is a bitfield;
/// a width of zero is layout-only padding control.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct StructField {
    pub ty: Type,
    pub bit_width: Option<u64>,
}

impl StructField {
    pub fn new(ty: Type) -> StructField {
        StructField { ty, bit_width: None }
    }

    pub fn bitfield(ty: Type, width: u64) -> StructField {
        StructField { ty, bit_width: Some(width) }
    }

    pub fn is_bitfield(&self) -> bool {
        self.bit_width.is_some()
    }

    pub fn is_zero_width_bitfield(&self) -> bool {
        self.bit_width == Some(0)
    }
}

macro_rules! int_ctor {
    ($name:ident, $bits:expr, $signed:expr) => {
        pub fn $name() -> Type {
            Type::int($bits, $signed)
        }
    };
}

impl Type {
    fn new(kind: TypeKind) -> Type {
        Type { kind: Arc::new(kind) }
    }

    pub fn void() -> Type {
        Type::new(TypeKind::Void)
    }

    pub fn bool_() -> Type {
        Type::new(TypeKind::Bool)
    }

    /// An integer type. The canonical C widths are 8/16/32/64/128, but any
    /// whole-byte width is allowed so coerce-to types can cover exactly the
    /// used bytes of an eightbyte.
    pub fn int(bits: u16, signed: bool) -> Type {
        assert!(
            bits >= 8 && bits <= 128 && bits % 8 == 0,
            "unsupported integer width: {bits}"
        );
        Type::new(TypeKind::Int { bits, signed })
    }

    int_ctor!(i8, 8, true);
    int_ctor!(u8, 8, false);
    int_ctor!(i16, 16, true);
    int_ctor!(u16, 16, false);
    int_ctor!(i32, 32, true);
    int_ctor!(u32, 32, false);
    int_ctor!(i64, 64, true);
    int_ctor!(u64, 64, false);
    int_ctor!(i128, 128, true);
    int_ctor!(u128, 128, false);

    pub fn half() -> Type {
        Type::new(TypeKind::Half)
    }

    pub fn float() -> Type {
        Type::new(TypeKind::Float)
    }

    pub fn double() -> Type {
        Type::new(TypeKind::Double)
    }

    pub fn x86_fp80() -> Type {
        Type::new(TypeKind::X86Fp80)
    }

    pub fn fp128() -> Type {
        Type::new(TypeKind::Fp128)
    }

    pub fn pointer() -> Type {
        Type::pointer_in(AddressSpace::DATA)
    }

    pub fn pointer_in(address_space: AddressSpace) -> Type {
        Type::new(TypeKind::Pointer { address_space })
    }

    pub fn array(element: Type, count: u64) -> Type {
        Type::new(TypeKind::Array { element, count })
    }

    pub fn struct_(fields: Vec<StructField>) -> Type {
        Type::new(TypeKind::Struct { fields, packed: false, flexible_array_member: false })
    }

    pub fn packed_struct(fields: Vec<StructField>) -> Type {
        Type::new(TypeKind::Struct { fields, packed: true, flexible_array_member: false })
    }

    pub fn struct_with_flexible_array(fields: Vec<StructField>) -> Type {
        Type::new(TypeKind::Struct { fields, packed: false, flexible_array_member: true })
    }

    pub fn union_(fields: Vec<StructField>) -> Type {
        Type::new(TypeKind::Union { fields })
    }

    pub fn complex(element: Type) -> Type {
        assert!(element.is_floating_point(), "complex element must be floating-point");
        Type::new(TypeKind::Complex { element })
    }

    pub fn vector(element: Type, count: u64) -> Type {
        Type::new(TypeKind::Vector { element, count })
    }

    #[inline]
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn is_void(&self) -> bool {
        matches!(*self.kind, TypeKind::Void)
    }

    pub fn is_bool(&self) -> bool {
        matches!(*self.kind, TypeKind::Bool)
    }

    /// Integer in the C sense: `bool` included.
    pub fn is_integer(&self) -> bool {
        matches!(*self.kind, TypeKind::Bool | TypeKind::Int { .. })
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(
            *self.kind,
            TypeKind::Half | TypeKind::Float | TypeKind::Double | TypeKind::X86Fp80 | TypeKind::Fp128
        )
    }

    pub fn is_pointer(&self) -> bool {
        matches!(*self.kind, TypeKind::Pointer { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(*self.kind, TypeKind::Array { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(*self.kind, TypeKind::Struct { .. })
    }

    pub fn is_union(&self) -> bool {
        matches!(*self.kind, TypeKind::Union { .. })
    }

    pub fn is_record(&self) -> bool {
        self.is_struct() || self.is_union()
    }

    pub fn is_complex(&self) -> bool {
        matches!(*self.kind, TypeKind::Complex { .. })
    }

    pub fn is_vector(&self) -> bool {
        matches!(*self.kind, TypeKind::Vector { .. })
    }

    /// Aggregates in the ABI sense: values that are not single scalars.
    pub fn is_aggregate(&self) -> bool {
        self.is_array() || self.is_record() || self.is_complex()
    }

    pub fn array_element(&self) -> &Type {
        match *self.kind {
            TypeKind::Array { ref element, .. } => element,
            _ => panic!("array_element on non-array type {self}"),
        }
    }

    pub fn array_count(&self) -> u64 {
        match *self.kind {
            TypeKind::Array { count, .. } => count,
            _ => panic!("array_count on non-array type {self}"),
        }
    }

    /// Members of a struct or union.
    pub fn record_fields(&self) -> &[StructField] {
        match *self.kind {
            TypeKind::Struct { ref fields, .. } | TypeKind::Union { ref fields } => fields,
            _ => panic!("record_fields on non-record type {self}"),
        }
    }

    pub fn is_packed(&self) -> bool {
        matches!(*self.kind, TypeKind::Struct { packed: true, .. })
    }

    pub fn has_flexible_array_member(&self) -> bool {
        matches!(*self.kind, TypeKind::Struct { flexible_array_member: true, .. })
    }

    pub fn complex_element(&self) -> &Type {
        match *self.kind {
            TypeKind::Complex { ref element } => element,
            _ => panic!("complex_element on non-complex type {self}"),
        }
    }

    pub fn vector_element(&self) -> &Type {
        match *self.kind {
            TypeKind::Vector { ref element, .. } => element,
            _ => panic!("vector_element on non-vector type {self}"),
        }
    }

    pub fn vector_count(&self) -> u64 {
        match *self.kind {
            TypeKind::Vector { count, .. } => count,
            _ => panic!("vector_count on non-vector type {self}"),
        }
    }

    /// Whether C default argument promotion widens this type to `int`.
    pub fn is_promotable_integer(&self) -> bool {
        match *self.kind {
            TypeKind::Bool => true,
            TypeKind::Int { bits, .. } => bits < 32,
            _ => false,
        }
    }

    pub fn has_signed_integer_representation(&self) -> bool {
        matches!(*self.kind, TypeKind::Int { signed: true, .. })
    }

    pub fn has_unsigned_integer_representation(&self) -> bool {
        matches!(*self.kind, TypeKind::Bool | TypeKind::Int { signed: false, .. })
    }

    /// A record with no data: every member is itself empty. Zero-width
    /// bitfields are empty; arrays are empty when the element is (or when the
    /// count is zero) if `allow_arrays`.
    pub fn is_empty_record(&self, allow_arrays: bool) -> bool {
        if !self.is_record() {
            return false;
        }
        self.record_fields().iter().all(|f| f.is_empty_field(allow_arrays))
    }
}

impl StructField {
    pub fn is_empty_field(&self, allow_arrays: bool) -> bool {
        if self.is_zero_width_bitfield() {
            return true;
        }
        if self.is_bitfield() {
            return false;
        }
        let mut ty = &self.ty;
        if allow_arrays {
            while ty.is_array() {
                if ty.array_count() == 0 {
                    return true;
                }
                ty = ty.array_element();
            }
        }
        ty.is_empty_record(allow_arrays)
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self.kind {
            TypeKind::Void => write!(f, "void"),
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::Int { bits, signed } => {
                write!(f, "{}{}", if signed { "i" } else { "u" }, bits)
            }
            TypeKind::Half => write!(f, "half"),
            TypeKind::Float => write!(f, "float"),
            TypeKind::Double => write!(f, "double"),
            TypeKind::X86Fp80 => write!(f, "x86_fp80"),
            TypeKind::Fp128 => write!(f, "fp128"),
            TypeKind::Pointer { address_space } => {
                if address_space == AddressSpace::DATA {
                    write!(f, "ptr")
                } else {
                    write!(f, "ptr addrspace({})", address_space.0)
                }
            }
            TypeKind::Array { ref element, count } => write!(f, "[{count} x {element}]"),
            TypeKind::Struct { ref fields, packed, .. } => {
                write!(f, "{}{{", if packed { "<packed>" } else { "" })?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field.ty)?;
                    if let Some(width) = field.bit_width {
                        write!(f, ":{width}")?;
                    }
                }
                write!(f, "}}")
            }
            TypeKind::Union { ref fields } => {
                write!(f, "union{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field.ty)?;
                }
                write!(f, "}}")
            }
            TypeKind::Complex { ref element } => write!(f, "complex {element}"),
            TypeKind::Vector { ref element, count } => write!(f, "<{count} x {element}>"),
        }
    }
}

/// The abstract calling convention of a source function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum CallingConvention {
    /// Default C calling convention.
    CDefault,
    /// Explicit `cdecl`.
    CDecl,
    /// Default C++ calling convention.
    CppDefault,
    StdCall,
    FastCall,
    ThisCall,
    Pascal,
    VectorCall,
}

/// A source-level function signature to be lowered.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FunctionType {
    calling_convention: CallingConvention,
    return_type: Type,
    argument_types: Vec<Type>,
    variadic: bool,
    /// `__attribute__((regparm(N)))`: number of integer registers available
    /// for argument passing on i386.
    regparm: Option<u8>,
}

impl FunctionType {
    pub fn new(
        calling_convention: CallingConvention,
        return_type: Type,
        argument_types: Vec<Type>,
        variadic: bool,
    ) -> FunctionType {
        FunctionType { calling_convention, return_type, argument_types, variadic, regparm: None }
    }

    pub fn with_regparm(mut self, regparm: u8) -> FunctionType {
        self.regparm = Some(regparm);
        self
    }

    pub fn calling_convention(&self) -> CallingConvention {
        self.calling_convention
    }

    pub fn return_type(&self) -> &Type {
        &self.return_type
    }

    pub fn argument_types(&self) -> &[Type] {
        &self.argument_types
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn regparm(&self) -> Option<u8> {
        self.regparm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_record_detection() {
        let empty = Type::struct_(vec![]);
        assert!(empty.is_empty_record(true));

        let nested = Type::struct_(vec![StructField::new(empty.clone())]);
        assert!(nested.is_empty_record(true));

        let zero_bf = Type::struct_(vec![StructField::bitfield(Type::i32(), 0)]);
        assert!(zero_bf.is_empty_record(true));

        let arr = Type::struct_(vec![StructField::new(Type::array(empty, 4))]);
        assert!(arr.is_empty_record(true));
        assert!(!arr.is_empty_record(false));

        let data = Type::struct_(vec![StructField::new(Type::i32())]);
        assert!(!data.is_empty_record(true));
    }

    #[test]
    fn promotability() {
        assert!(Type::bool_().is_promotable_integer());
        assert!(Type::i8().is_promotable_integer());
        assert!(Type::u16().is_promotable_integer());
        assert!(!Type::i32().is_promotable_integer());
        assert!(!Type::float().is_promotable_integer());
    }

    #[test]
    #[should_panic(expected = "unsupported integer width")]
    fn rejects_odd_integer_width() {
        let _ = Type::int(12, true);
    }
}
