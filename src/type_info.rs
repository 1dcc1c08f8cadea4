//! The target layout oracle.
//!
//! [`TypeInfo`] is the sole source of layout truth: sizes, alignments, field
//! placement (including bitfields) and the mapping from source types to
//! machine IR types. Every other component is a pure function of a
//! `FunctionType`, a `TypeInfo` and the target triple.

use crate::ir::IrType;
use crate::layout::{Align, HasDataLayout, Size, TargetDataLayout};
use crate::triple::Triple;
use crate::ty::{Type, TypeKind};

/// Computed layout of a struct or union. `fields` parallels
/// [`Type::record_fields`].
#[derive(Clone, Debug)]
pub struct RecordLayout {
    pub size: Size,
    pub align: Align,
    pub fields: Vec<FieldLayout>,
}

#[derive(Copy, Clone, Debug)]
pub struct FieldLayout {
    pub bit_offset: u64,
    /// Set for bitfield members; zero-width bitfields occupy no storage.
    pub bit_width: Option<u64>,
}

impl FieldLayout {
    /// Byte offset; only meaningful for non-bitfield members, which are
    /// always byte-aligned.
    pub fn byte_offset(&self) -> Size {
        debug_assert_eq!(self.bit_offset % 8, 0);
        Size::from_bytes(self.bit_offset / 8)
    }
}

pub trait TypeInfo: HasDataLayout {
    /// Unpadded data size (10 bytes for `x86_fp80`).
    fn store_size(&self, ty: &Type) -> Size;
    /// Size occupied in memory, including tail padding.
    fn alloc_size(&self, ty: &Type) -> Size;
    fn abi_align(&self, ty: &Type) -> Align;
    fn preferred_align(&self, ty: &Type) -> Align;
    fn record_layout(&self, ty: &Type) -> RecordLayout;
    fn ir_type(&self, ty: &Type) -> IrType;
}

/// The stock x86 implementation, parameterized by a per-target data layout.
pub struct TargetTypeInfo {
    dl: TargetDataLayout,
}

impl TargetTypeInfo {
    pub fn new(dl: TargetDataLayout) -> TargetTypeInfo {
        TargetTypeInfo { dl }
    }

    pub fn x86_64() -> TargetTypeInfo {
        TargetTypeInfo::new(TargetDataLayout::x86_64())
    }

    pub fn x86_32(triple: &Triple) -> TargetTypeInfo {
        TargetTypeInfo::new(TargetDataLayout::x86_32(triple.is_os_darwin()))
    }
}

impl HasDataLayout for TargetTypeInfo {
    fn data_layout(&self) -> &TargetDataLayout {
        &self.dl
    }
}

impl TypeInfo for TargetTypeInfo {
    fn store_size(&self, ty: &Type) -> Size {
        match ty.kind() {
            TypeKind::X86Fp80 => Size::from_bytes(10),
            TypeKind::Vector { element, count } => self.alloc_size(element) * *count,
            _ => self.alloc_size(ty),
        }
    }

    fn alloc_size(&self, ty: &Type) -> Size {
        let dl = &self.dl;
        match ty.kind() {
            TypeKind::Void => Size::ZERO,
            TypeKind::Bool => Size::from_bytes(1),
            TypeKind::Int { bits, .. } => Size::from_bits(u64::from(*bits)),
            TypeKind::Half => Size::from_bytes(2),
            TypeKind::Float => Size::from_bytes(4),
            TypeKind::Double => Size::from_bytes(8),
            TypeKind::X86Fp80 => dl.f80_size,
            TypeKind::Fp128 => Size::from_bytes(16),
            TypeKind::Pointer { .. } => dl.pointer_size,
            TypeKind::Array { element, count } => self.alloc_size(element) * *count,
            TypeKind::Vector { element, count } => {
                let raw = self.alloc_size(element) * *count;
                raw.align_to(dl.vector_align(raw).abi)
            }
            TypeKind::Complex { element } => self.alloc_size(element) * 2,
            TypeKind::Struct { .. } | TypeKind::Union { .. } => self.record_layout(ty).size,
        }
    }

    fn abi_align(&self, ty: &Type) -> Align {
        let dl = &self.dl;
        match ty.kind() {
            TypeKind::Void => Align::ONE,
            TypeKind::Bool => dl.i8_align.abi,
            TypeKind::Int { bits, .. } => match *bits {
                8 => dl.i8_align.abi,
                16 => dl.i16_align.abi,
                32 => dl.i32_align.abi,
                64 => dl.i64_align.abi,
                _ => dl.i128_align.abi,
            },
            TypeKind::Half => dl.f16_align.abi,
            TypeKind::Float => dl.f32_align.abi,
            TypeKind::Double => dl.f64_align.abi,
            TypeKind::X86Fp80 => dl.f80_align.abi,
            TypeKind::Fp128 => dl.f128_align.abi,
            TypeKind::Pointer { .. } => dl.pointer_align.abi,
            TypeKind::Array { element, .. } => self.abi_align(element),
            TypeKind::Vector { element, count } => {
                dl.vector_align(self.alloc_size(element) * *count).abi
            }
            TypeKind::Complex { element } => self.abi_align(element),
            TypeKind::Struct { .. } | TypeKind::Union { .. } => self.record_layout(ty).align,
        }
    }

    fn preferred_align(&self, ty: &Type) -> Align {
        let dl = &self.dl;
        match ty.kind() {
            TypeKind::Int { bits: 64, .. } => dl.i64_align.pref,
            TypeKind::Int { bits: 128, .. } => dl.i128_align.pref,
            TypeKind::Double => dl.f64_align.pref,
            _ => self.abi_align(ty),
        }
    }

    fn record_layout(&self, ty: &Type) -> RecordLayout {
        match ty.kind() {
            TypeKind::Struct { fields, packed, .. } => {
                self.layout_struct(fields, *packed)
            }
            TypeKind::Union { fields } => self.layout_union(fields),
            _ => panic!("record_layout on non-record type {ty}"),
        }
    }

    fn ir_type(&self, ty: &Type) -> IrType {
        match ty.kind() {
            TypeKind::Void => IrType::Void,
            TypeKind::Bool => IrType::Int(8),
            TypeKind::Int { bits, .. } => IrType::Int(*bits),
            TypeKind::Half => IrType::Half,
            TypeKind::Float => IrType::Float,
            TypeKind::Double => IrType::Double,
            TypeKind::X86Fp80 => IrType::X86Fp80,
            TypeKind::Fp128 => IrType::Fp128,
            TypeKind::Pointer { address_space } => IrType::Pointer(*address_space),
            TypeKind::Array { element, count } => IrType::array(self.ir_type(element), *count),
            TypeKind::Vector { element, count } => IrType::vector(self.ir_type(element), *count),
            TypeKind::Complex { element } => {
                let element = self.ir_type(element);
                IrType::struct_(vec![element.clone(), element])
            }
            TypeKind::Struct { .. } => self.ir_struct_type(ty),
            TypeKind::Union { .. } => self.ir_union_type(ty),
        }
    }
}

impl TargetTypeInfo {
    fn layout_struct(&self, fields: &[crate::ty::StructField], packed: bool) -> RecordLayout {
        let mut bit_offset: u64 = 0;
        let mut align = Align::ONE;
        let mut layouts = Vec::with_capacity(fields.len());

        for field in fields {
            let field_align =
                if packed { Align::ONE } else { self.abi_align(&field.ty) };

            match field.bit_width {
                Some(0) => {
                    // A zero-width bitfield aligns the current position to
                    // the declared type's boundary and occupies no storage.
                    let boundary = self.abi_align(&field.ty).bits();
                    bit_offset = bit_offset.next_multiple_of(boundary);
                    layouts.push(FieldLayout { bit_offset, bit_width: Some(0) });
                }
                Some(width) => {
                    let unit_bits = self.alloc_size(&field.ty).bits();
                    assert!(width <= unit_bits, "bitfield wider than its declared type");
                    if !packed && (bit_offset % unit_bits) + width > unit_bits {
                        bit_offset = bit_offset.next_multiple_of(field_align.bits());
                    }
                    layouts.push(FieldLayout { bit_offset, bit_width: Some(width) });
                    align = align.max(field_align);
                    bit_offset += width;
                }
                None => {
                    bit_offset = bit_offset.next_multiple_of(8);
                    bit_offset = bit_offset.next_multiple_of(field_align.bits());
                    layouts.push(FieldLayout { bit_offset, bit_width: None });
                    align = align.max(field_align);
                    bit_offset += self.alloc_size(&field.ty).bits();
                }
            }
        }

        let size = Size::from_bits(bit_offset).align_to(align);
        RecordLayout { size, align, fields: layouts }
    }

    fn layout_union(&self, fields: &[crate::ty::StructField]) -> RecordLayout {
        let mut size = Size::ZERO;
        let mut align = Align::ONE;
        let mut layouts = Vec::with_capacity(fields.len());

        for field in fields {
            let field_size = match field.bit_width {
                Some(width) => Size::from_bits(width),
                None => self.alloc_size(&field.ty),
            };
            if field.bit_width != Some(0) {
                align = align.max(self.abi_align(&field.ty));
            }
            size = size.max(field_size);
            layouts.push(FieldLayout { bit_offset: 0, bit_width: field.bit_width });
        }

        RecordLayout { size: size.align_to(align), align, fields: layouts }
    }

    /// Lower a struct type to IR. The natural member list is used when its
    /// layout reproduces the C offsets; otherwise a packed struct with
    /// explicit padding members (and byte-array storage for bitfield runs) is
    /// synthesized so the IR size and offsets match the C layout exactly.
    fn ir_struct_type(&self, ty: &Type) -> IrType {
        let fields = ty.record_fields();
        let layout = self.record_layout(ty);

        if !fields.iter().any(|f| f.is_bitfield()) {
            let members: Vec<IrType> =
                fields.iter().map(|f| self.ir_type(&f.ty)).collect();
            let natural = IrType::struct_(members);
            if self.natural_layout_matches(&natural, &layout) {
                return natural;
            }
        }

        // Synthesize a byte-exact packed representation.
        let mut members = Vec::new();
        let mut cur = Size::ZERO;
        let mut pending_bits: Option<(u64, u64)> = None; // byte range [start, end)

        let flush_bits = |members: &mut Vec<IrType>, cur: &mut Size,
                          pending: &mut Option<(u64, u64)>| {
            if let Some((start, end)) = pending.take() {
                debug_assert!(*cur <= Size::from_bytes(start));
                if Size::from_bytes(start) > *cur {
                    members.push(IrType::array(IrType::Int(8), start - cur.bytes()));
                }
                members.push(IrType::array(IrType::Int(8), end - start));
                *cur = Size::from_bytes(end);
            }
        };

        for (field, flayout) in fields.iter().zip(&layout.fields) {
            match field.bit_width {
                Some(0) => {}
                Some(width) => {
                    let start = flayout.bit_offset / 8;
                    let end = (flayout.bit_offset + width).div_ceil(8);
                    pending_bits = match pending_bits {
                        Some((s, e)) => Some((s.min(start), e.max(end))),
                        None => Some((start, end)),
                    };
                }
                None => {
                    flush_bits(&mut members, &mut cur, &mut pending_bits);
                    let offset = flayout.byte_offset();
                    if offset > cur {
                        members.push(IrType::array(IrType::Int(8), (offset - cur).bytes()));
                    }
                    members.push(self.ir_type(&field.ty));
                    cur = offset + self.alloc_size(&field.ty);
                }
            }
        }
        flush_bits(&mut members, &mut cur, &mut pending_bits);

        if layout.size > cur {
            members.push(IrType::array(IrType::Int(8), (layout.size - cur).bytes()));
        }

        IrType::packed_struct(members)
    }

    fn natural_layout_matches(&self, natural: &IrType, layout: &RecordLayout) -> bool {
        if natural.size(self) != layout.size {
            return false;
        }
        layout
            .fields
            .iter()
            .enumerate()
            .all(|(i, flayout)| natural.struct_field_offset(i, self) == flayout.byte_offset())
    }

    /// Unions lower to their largest member plus tail padding.
    fn ir_union_type(&self, ty: &Type) -> IrType {
        let fields = ty.record_fields();
        let total = self.alloc_size(ty);

        let largest = fields
            .iter()
            .filter(|f| !f.is_bitfield())
            .max_by_key(|f| self.alloc_size(&f.ty).bytes());

        let mut members = Vec::new();
        let mut covered = Size::ZERO;
        if let Some(field) = largest {
            members.push(self.ir_type(&field.ty));
            covered = self.alloc_size(&field.ty);
        }
        if total > covered {
            members.push(IrType::array(IrType::Int(8), (total - covered).bytes()));
        }
        IrType::packed_struct(members)
    }
}
