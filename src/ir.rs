//! The machine-IR surface the lowering emits into.
//!
//! The library never owns an IR module; it computes [`IrType`] signatures and
//! drives an externally-supplied [`Builder`] which mints opaque [`Value`]
//! handles. This mirrors how a code generator hands a builder positioned
//! inside the enclosing function to the ABI layer for the duration of one
//! call-site or function-entry lowering.

use std::fmt;

use crate::layout::{AddressSpace, Align, HasDataLayout, Size, TargetDataLayout};

/// A machine-level IR type.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum IrType {
    Void,
    /// An `iN` integer type.
    Int(u16),
    Half,
    Float,
    Double,
    X86Fp80,
    Fp128,
    /// An opaque pointer.
    Pointer(AddressSpace),
    Vector { element: Box<IrType>, count: u64 },
    Array { element: Box<IrType>, count: u64 },
    Struct { fields: Vec<IrType>, packed: bool },
}

impl IrType {
    pub fn vector(element: IrType, count: u64) -> IrType {
        IrType::Vector { element: Box::new(element), count }
    }

    pub fn array(element: IrType, count: u64) -> IrType {
        IrType::Array { element: Box::new(element), count }
    }

    pub fn struct_(fields: Vec<IrType>) -> IrType {
        IrType::Struct { fields, packed: false }
    }

    pub fn packed_struct(fields: Vec<IrType>) -> IrType {
        IrType::Struct { fields, packed: true }
    }

    pub fn pointer() -> IrType {
        IrType::Pointer(AddressSpace::DATA)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, IrType::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, IrType::Int(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, IrType::Pointer(_))
    }

    /// Allocation size: what an alloca of this type occupies.
    pub fn size<C: HasDataLayout>(&self, cx: &C) -> Size {
        let dl = cx.data_layout();
        match self {
            IrType::Void => Size::ZERO,
            IrType::Int(bits) => Size::from_bits(u64::from(*bits)),
            IrType::Half => Size::from_bytes(2),
            IrType::Float => Size::from_bytes(4),
            IrType::Double => Size::from_bytes(8),
            IrType::X86Fp80 => dl.f80_size,
            IrType::Fp128 => Size::from_bytes(16),
            IrType::Pointer(_) => dl.pointer_size,
            IrType::Vector { element, count } => {
                let raw = element.size(cx) * *count;
                raw.align_to(self.align(cx))
            }
            IrType::Array { element, count } => element.size(cx) * *count,
            IrType::Struct { .. } => {
                let (size, _) = self.struct_layout(dl);
                size
            }
        }
    }

    pub fn align<C: HasDataLayout>(&self, cx: &C) -> Align {
        let dl = cx.data_layout();
        match self {
            IrType::Void => Align::ONE,
            IrType::Int(bits) => match *bits {
                1..=8 => dl.i8_align.abi,
                9..=16 => dl.i16_align.abi,
                17..=32 => dl.i32_align.abi,
                33..=64 => dl.i64_align.abi,
                65..=128 => dl.i128_align.abi,
                bits => panic!("unsupported integer width: i{bits}"),
            },
            IrType::Half => dl.f16_align.abi,
            IrType::Float => dl.f32_align.abi,
            IrType::Double => dl.f64_align.abi,
            IrType::X86Fp80 => dl.f80_align.abi,
            IrType::Fp128 => dl.f128_align.abi,
            IrType::Pointer(_) => dl.pointer_align.abi,
            IrType::Vector { element, count } => {
                dl.vector_align(element.size(dl) * *count).abi
            }
            IrType::Array { element, .. } => element.align(cx),
            IrType::Struct { fields, packed } => {
                if *packed {
                    Align::ONE
                } else {
                    fields.iter().fold(Align::ONE, |a, f| a.max(f.align(cx)))
                }
            }
        }
    }

    /// Byte offset of struct field `index` under natural layout.
    pub fn struct_field_offset<C: HasDataLayout>(&self, index: usize, cx: &C) -> Size {
        let IrType::Struct { fields, packed } = self else {
            panic!("struct_field_offset on non-struct IR type {self}");
        };
        let mut offset = Size::ZERO;
        for (i, field) in fields.iter().enumerate() {
            if !packed {
                offset = offset.align_to(field.align(cx));
            }
            if i == index {
                return offset;
            }
            offset += field.size(cx);
        }
        panic!("struct field index {index} out of bounds for {self}");
    }

    pub fn struct_fields(&self) -> &[IrType] {
        match self {
            IrType::Struct { fields, .. } => fields,
            _ => panic!("struct_fields on non-struct IR type {self}"),
        }
    }

    fn struct_layout(&self, dl: &TargetDataLayout) -> (Size, Align) {
        let IrType::Struct { fields, packed } = self else { unreachable!() };
        let mut offset = Size::ZERO;
        let mut align = Align::ONE;
        for field in fields {
            let field_align = if *packed { Align::ONE } else { field.align(dl) };
            align = align.max(field_align);
            offset = offset.align_to(field_align);
            offset += field.size(dl);
        }
        (offset.align_to(align), align)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Int(bits) => write!(f, "i{bits}"),
            IrType::Half => write!(f, "half"),
            IrType::Float => write!(f, "float"),
            IrType::Double => write!(f, "double"),
            IrType::X86Fp80 => write!(f, "x86_fp80"),
            IrType::Fp128 => write!(f, "fp128"),
            IrType::Pointer(address_space) => {
                if *address_space == AddressSpace::DATA {
                    write!(f, "ptr")
                } else {
                    write!(f, "ptr addrspace({})", address_space.0)
                }
            }
            IrType::Vector { element, count } => write!(f, "<{count} x {element}>"),
            IrType::Array { element, count } => write!(f, "[{count} x {element}]"),
            IrType::Struct { fields, packed } => {
                if *packed {
                    write!(f, "<")?;
                }
                if fields.is_empty() {
                    write!(f, "{{}}")?;
                } else {
                    write!(f, "{{ ")?;
                    for (i, field) in fields.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{field}")?;
                    }
                    write!(f, " }}")?;
                }
                if *packed {
                    write!(f, ">")?;
                }
                Ok(())
            }
        }
    }
}

/// An ABI-compliant IR function signature.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IrFunctionType {
    pub return_type: IrType,
    pub param_types: Vec<IrType>,
    pub variadic: bool,
}

impl fmt::Display for IrFunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.return_type)?;
        for (i, param) in self.param_types.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        if self.variadic {
            if !self.param_types.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}

/// The target-IR calling convention identifier.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Conv {
    C,
    X86Stdcall,
    X86Fastcall,
    X86ThisCall,
    X86VectorCall,
}

/// An opaque handle to an IR value, minted by the [`Builder`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Value(u32);

impl Value {
    pub fn from_raw(raw: u32) -> Value {
        Value(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A source-typed IR value crossing the ABI boundary.
#[derive(Copy, Clone, Debug)]
pub struct TypedValue<'a> {
    pub value: Value,
    pub ty: &'a crate::ty::Type,
}

impl<'a> TypedValue<'a> {
    pub fn new(value: Value, ty: &'a crate::ty::Type) -> TypedValue<'a> {
        TypedValue { value, ty }
    }
}

/// The IR instruction builder the lowering drives.
///
/// Implementations are expected to be positioned inside the enclosing IR
/// function; `entry_alloca` must insert at its entry block so temporaries
/// dominate every use. The library holds the builder only for the duration of
/// one `create_call` / `function_encoder` invocation.
pub trait Builder {
    fn entry_alloca(&mut self, ty: &IrType, align: Align) -> Value;
    fn load(&mut self, ty: &IrType, ptr: Value, align: Align) -> Value;
    fn store(&mut self, value: Value, ptr: Value, align: Align);
    /// Reinterpret `value` as `ty` (same bit width).
    fn bit_cast(&mut self, value: Value, ty: &IrType) -> Value;
    /// Integer truncation or extension to `ty`; extension is signed when
    /// `signed` is set.
    fn int_cast(&mut self, value: Value, ty: &IrType, signed: bool) -> Value;
    fn ptr_to_int(&mut self, value: Value, ty: &IrType) -> Value;
    fn int_to_ptr(&mut self, value: Value, ty: &IrType) -> Value;
    fn fp_ext(&mut self, value: Value, ty: &IrType) -> Value;
    /// Byte-offset address computation.
    fn gep(&mut self, ptr: Value, offset: Size) -> Value;
    fn memcpy(&mut self, dest: Value, dest_align: Align, src: Value, src_align: Align, size: Size);
    fn extract_value(&mut self, aggregate: Value, ty: &IrType, index: usize) -> Value;
    fn undef(&mut self, ty: &IrType) -> Value;
    fn ret(&mut self, value: Value);
    fn ret_void(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layout_natural() {
        let dl = TargetDataLayout::x86_64();
        let pair = IrType::struct_(vec![IrType::Int(64), IrType::Int(64)]);
        assert_eq!(pair.size(&dl).bytes(), 16);
        assert_eq!(pair.struct_field_offset(1, &dl).bytes(), 8);

        let mixed = IrType::struct_(vec![IrType::Int(8), IrType::Int(32)]);
        assert_eq!(mixed.struct_field_offset(1, &dl).bytes(), 4);
        assert_eq!(mixed.size(&dl).bytes(), 8);
    }

    #[test]
    fn signature_display() {
        let sig = IrFunctionType {
            return_type: IrType::Int(32),
            param_types: vec![IrType::Int(32), IrType::pointer()],
            variadic: false,
        };
        assert_eq!(sig.to_string(), "i32 (i32, ptr)");
    }

    #[test]
    fn vector_alloc_size_rounds_to_alignment() {
        let dl = TargetDataLayout::x86_64();
        let v3f = IrType::vector(IrType::Float, 3);
        assert_eq!(v3f.size(&dl).bytes(), 16);
    }
}
