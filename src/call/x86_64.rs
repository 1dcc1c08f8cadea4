//! System V AMD64 argument classification.
//!
//! Every value up to 32 bytes is described by a pair of eightbyte classes;
//! the pair decides whether the value travels in integer registers, SSE
//! registers, the x87 stack or memory, and which machine type it is coerced
//! through. The rules here follow the psABI's recursive classification and
//! post-merge cleanup.

use tracing::{debug, trace};

use crate::layout::{Align, Size};
use crate::triple::Triple;
use crate::ty::{FunctionType, Type, TypeKind};
use crate::type_info::TypeInfo;

use super::ArgInfo;

/// Highest vector register width the selected CPU supports.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum AvxLevel {
    None,
    Avx,
    Avx512,
}

impl AvxLevel {
    pub fn from_cpu(cpu: &str) -> AvxLevel {
        match cpu {
            "knl" | "knm" | "skylake-avx512" | "cascadelake" | "cooperlake" | "cannonlake"
            | "icelake-client" | "icelake-server" | "tigerlake" | "rocketlake"
            | "sapphirerapids" | "znver4" | "znver5" => AvxLevel::Avx512,
            "sandybridge" | "ivybridge" | "haswell" | "broadwell" | "skylake" | "alderlake"
            | "raptorlake" | "bdver1" | "bdver2" | "bdver3" | "bdver4" | "znver1" | "znver2"
            | "znver3" => AvxLevel::Avx,
            _ => AvxLevel::None,
        }
    }

    fn max_vector_size(self) -> Size {
        match self {
            AvxLevel::None => Size::from_bytes(16),
            AvxLevel::Avx => Size::from_bytes(32),
            AvxLevel::Avx512 => Size::from_bytes(64),
        }
    }
}

/// One eightbyte's class.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Class {
    NoClass,
    Integer,
    Sse,
    SseUp,
    X87,
    X87Up,
    ComplexX87,
    Memory,
}

/// The psABI two-argument merge operator. Total and order-insensitive.
pub fn merge(a: Class, b: Class) -> Class {
    use Class::*;
    match (a, b) {
        (x, NoClass) | (NoClass, x) => x,
        (Memory, _) | (_, Memory) => Memory,
        (Integer, _) | (_, Integer) => Integer,
        (X87 | X87Up | ComplexX87, _) | (_, X87 | X87Up | ComplexX87) => Memory,
        _ => Sse,
    }
}

/// Classes of the low and high eightbytes of a value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub low: Class,
    pub high: Class,
}

impl Classification {
    fn new() -> Classification {
        Classification { low: Class::NoClass, high: Class::NoClass }
    }

    pub fn in_memory(&self) -> bool {
        self.low == Class::Memory
    }

    fn add_field(&mut self, offset: Size, class: Class) {
        if offset.bytes() < 8 {
            self.low = merge(self.low, class);
        } else if offset.bytes() < 16 {
            self.high = merge(self.high, class);
        } else if class != Class::SseUp {
            // Data beyond the second eightbyte that is not part of a vector
            // register chain cannot be represented by the pair.
            self.low = Class::Memory;
            self.high = Class::Memory;
        }
    }

    fn set_memory(&mut self) {
        self.low = Class::Memory;
        self.high = Class::Memory;
    }
}

pub(crate) struct Classifier<'a> {
    type_info: &'a dyn TypeInfo,
    avx_level: AvxLevel,
    is_darwin: bool,
}

const MAX_AGGREGATE_SIZE: u64 = 32;

impl<'a> Classifier<'a> {
    pub(crate) fn new(
        type_info: &'a dyn TypeInfo,
        triple: &Triple,
        avx_level: AvxLevel,
    ) -> Classifier<'a> {
        Classifier { type_info, avx_level, is_darwin: triple.is_os_darwin() }
    }

    /// The psABI applies revision 0.98's stricter X87Up rule everywhere but
    /// Darwin.
    fn honors_revision_0_98(&self) -> bool {
        !self.is_darwin
    }

    pub(crate) fn classify_type(&self, ty: &Type, is_named_arg: bool) -> Classification {
        let mut cls = Classification::new();
        self.classify(ty, Size::ZERO, &mut cls, is_named_arg);
        // Post-merge cleanup applies to aggregates; scalar classifications
        // are already exact (complex long double keeps its ComplexX87 class).
        if ty.is_array() || ty.is_record() {
            cls = self.post_merge(self.type_info.alloc_size(ty), cls);
        }
        cls
    }

    fn post_merge(&self, size: Size, mut cls: Classification) -> Classification {
        use Class::*;
        if cls.high == Memory {
            cls.low = Memory;
        }
        if cls.high == X87Up && cls.low != X87 && self.honors_revision_0_98() {
            cls.low = Memory;
        }
        if size.bytes() > 16 && (cls.low != Sse || cls.high != SseUp) {
            cls.low = Memory;
        }
        if cls.high == SseUp && cls.low != Sse {
            cls.high = Sse;
        }
        if cls.low == Memory {
            cls.high = Memory;
        }
        cls
    }

    fn classify(&self, ty: &Type, offset: Size, cls: &mut Classification, is_named_arg: bool) {
        match ty.kind() {
            TypeKind::Void => {}

            TypeKind::Bool | TypeKind::Int { bits: 8..=64, .. } | TypeKind::Pointer { .. } => {
                cls.add_field(offset, Class::Integer);
            }
            TypeKind::Int { .. } => {
                // __int128 occupies two integer eightbytes.
                cls.add_field(offset, Class::Integer);
                cls.add_field(offset + Size::from_bytes(8), Class::Integer);
            }

            TypeKind::Half | TypeKind::Float | TypeKind::Double => {
                cls.add_field(offset, Class::Sse);
            }
            TypeKind::X86Fp80 => {
                cls.add_field(offset, Class::X87);
                cls.add_field(offset + Size::from_bytes(8), Class::X87Up);
            }
            TypeKind::Fp128 => {
                cls.add_field(offset, Class::Sse);
                cls.add_field(offset + Size::from_bytes(8), Class::SseUp);
            }

            TypeKind::Complex { element } => match element.kind() {
                TypeKind::Half | TypeKind::Float => {
                    cls.add_field(offset, Class::Sse);
                    cls.add_field(offset + self.type_info.alloc_size(element), Class::Sse);
                }
                TypeKind::Double => {
                    cls.add_field(offset, Class::Sse);
                    cls.add_field(offset + Size::from_bytes(8), Class::Sse);
                }
                TypeKind::X86Fp80 => {
                    cls.add_field(offset, Class::ComplexX87);
                }
                _ => cls.set_memory(),
            },

            TypeKind::Vector { .. } => {
                let size = self.type_info.alloc_size(ty);
                if size.bytes() <= 8 {
                    cls.add_field(offset, Class::Sse);
                } else if size <= self.avx_level.max_vector_size()
                    && (size.bytes() <= 16 || is_named_arg)
                {
                    cls.add_field(offset, Class::Sse);
                    cls.add_field(offset + Size::from_bytes(8), Class::SseUp);
                } else {
                    cls.set_memory();
                }
            }

            TypeKind::Array { element, count } => {
                let size = self.type_info.alloc_size(ty);
                if size.bytes() > MAX_AGGREGATE_SIZE {
                    cls.set_memory();
                    return;
                }
                if !offset.is_aligned(self.type_info.abi_align(ty)) {
                    cls.set_memory();
                    return;
                }
                let stride = self.type_info.alloc_size(element);
                for i in 0..*count {
                    self.classify(element, offset + stride * i, cls, is_named_arg);
                }
            }

            TypeKind::Struct { .. } | TypeKind::Union { .. } => {
                let size = self.type_info.alloc_size(ty);
                if size.bytes() > MAX_AGGREGATE_SIZE {
                    cls.set_memory();
                    return;
                }
                if ty.has_flexible_array_member() {
                    cls.set_memory();
                    return;
                }
                let layout = self.type_info.record_layout(ty);
                for (field, flayout) in ty.record_fields().iter().zip(&layout.fields) {
                    match field.bit_width {
                        Some(0) => {}
                        Some(width) => {
                            // A bitfield taints every eightbyte its bits
                            // touch with Integer.
                            let start = offset.bits() + flayout.bit_offset;
                            let end = start + width;
                            let mut eightbyte = start / 64;
                            while eightbyte * 64 < end {
                                cls.add_field(Size::from_bytes(eightbyte * 8), Class::Integer);
                                eightbyte += 1;
                            }
                        }
                        None => {
                            let field_offset = offset + flayout.byte_offset();
                            if !field_offset.is_aligned(self.type_info.abi_align(&field.ty)) {
                                cls.set_memory();
                                return;
                            }
                            self.classify(&field.ty, field_offset, cls, is_named_arg);
                        }
                    }
                }
            }
        }
    }

    /// True if `[start_bit, end_bit)` of `ty` holds no data, only padding.
    fn bits_contain_no_user_data(&self, ty: &Type, start_bit: u64, end_bit: u64) -> bool {
        if self.type_info.alloc_size(ty).bits() <= start_bit {
            return true;
        }

        match ty.kind() {
            TypeKind::Array { element, count } => {
                let stride = self.type_info.alloc_size(element).bits();
                for i in 0..*count {
                    let elt_offset = i * stride;
                    if elt_offset >= end_bit {
                        break;
                    }
                    let elt_start = start_bit.saturating_sub(elt_offset);
                    if !self.bits_contain_no_user_data(element, elt_start, end_bit - elt_offset) {
                        return false;
                    }
                }
                true
            }
            TypeKind::Struct { .. } | TypeKind::Union { .. } => {
                let layout = self.type_info.record_layout(ty);
                for (field, flayout) in ty.record_fields().iter().zip(&layout.fields) {
                    if flayout.bit_offset >= end_bit {
                        continue;
                    }
                    match field.bit_width {
                        Some(0) => {}
                        Some(width) => {
                            let f_start = flayout.bit_offset;
                            if f_start < end_bit && f_start + width > start_bit {
                                return false;
                            }
                        }
                        None => {
                            let f_start = start_bit.saturating_sub(flayout.bit_offset);
                            if !self.bits_contain_no_user_data(
                                &field.ty,
                                f_start,
                                end_bit.saturating_sub(flayout.bit_offset),
                            ) {
                                return false;
                            }
                        }
                    }
                }
                true
            }
            TypeKind::Complex { element } => {
                let elt = self.type_info.alloc_size(element).bits();
                self.bits_contain_no_user_data(element, start_bit, end_bit)
                    && self.bits_contain_no_user_data(
                        element,
                        start_bit.saturating_sub(elt),
                        end_bit.saturating_sub(elt),
                    )
            }
            _ => start_bit >= self.type_info.store_size(ty).bits(),
        }
    }

    /// Is there a float (or half) leaf starting exactly at `offset`?
    fn contains_float_at_offset(&self, ty: &Type, offset: Size) -> bool {
        match ty.kind() {
            TypeKind::Float => offset == Size::ZERO,
            TypeKind::Complex { element } if element.is_floating_point() => {
                matches!(element.kind(), TypeKind::Float)
                    && (offset == Size::ZERO || offset == self.type_info.alloc_size(element))
            }
            TypeKind::Array { element, .. } => {
                let stride = self.type_info.alloc_size(element);
                if stride == Size::ZERO {
                    return false;
                }
                self.contains_float_at_offset(
                    element,
                    Size::from_bytes(offset.bytes() % stride.bytes()),
                )
            }
            TypeKind::Struct { .. } | TypeKind::Union { .. } => {
                let layout = self.type_info.record_layout(ty);
                ty.record_fields().iter().zip(&layout.fields).any(|(field, flayout)| {
                    !field.is_bitfield()
                        && flayout.byte_offset() <= offset
                        && self.contains_float_at_offset(
                            &field.ty,
                            offset - flayout.byte_offset(),
                        )
                })
            }
            _ => false,
        }
    }

    /// Recover the integer type the eightbyte at `offset` is passed through.
    /// Prefers the scalar found at the offset when it covers all the data;
    /// falls back to the smallest `iN` covering the remaining bytes.
    fn integer_type_at(&self, ty: &Type, offset: Size, source: &Type, source_offset: Size) -> Type {
        match ty.kind() {
            TypeKind::Bool | TypeKind::Int { bits: 8..=64, .. } | TypeKind::Pointer { .. }
                if offset == Size::ZERO =>
            {
                let size = self.type_info.alloc_size(ty);
                if size.bytes() == 8 {
                    return ty.clone();
                }
                // A smaller scalar works when the rest of its eightbyte is
                // padding.
                if self.bits_contain_no_user_data(
                    source,
                    source_offset.bits() + size.bits(),
                    source_offset.bits() + 64,
                ) {
                    return ty.clone();
                }
            }
            TypeKind::Struct { .. } => {
                let layout = self.type_info.record_layout(ty);
                for (field, flayout) in ty.record_fields().iter().zip(&layout.fields) {
                    if field.is_bitfield() {
                        continue;
                    }
                    let field_offset = flayout.byte_offset();
                    let field_size = self.type_info.alloc_size(&field.ty);
                    if field_offset <= offset && offset < field_offset + field_size {
                        return self.integer_type_at(
                            &field.ty,
                            offset - field_offset,
                            source,
                            source_offset,
                        );
                    }
                }
            }
            TypeKind::Array { element, .. } => {
                let stride = self.type_info.alloc_size(element);
                if stride > Size::ZERO {
                    let rel = Size::from_bytes(offset.bytes() % stride.bytes());
                    return self.integer_type_at(element, rel, source, source_offset);
                }
            }
            _ => {}
        }

        let bytes_left = self.type_info.alloc_size(source).bytes() - source_offset.bytes();
        Type::int((bytes_left.min(8) * 8) as u16, false)
    }

    /// Recover the SSE type for the eightbyte at `source_offset`: `float`,
    /// `<2 x float>`, or `double`.
    fn sse_type_at(&self, source: &Type, source_offset: Size) -> Type {
        if self.bits_contain_no_user_data(
            source,
            source_offset.bits() + 32,
            source_offset.bits() + 64,
        ) {
            return Type::float();
        }
        if self.contains_float_at_offset(source, source_offset)
            && self.contains_float_at_offset(source, source_offset + Size::from_bytes(4))
        {
            return Type::vector(Type::float(), 2);
        }
        Type::double()
    }

    /// The vector type a full SSE/SSEUp register chain is passed through.
    fn byte_vector_type(&self, ty: &Type) -> Type {
        if ty.is_vector() || matches!(ty.kind(), TypeKind::Fp128) {
            return ty.clone();
        }
        if let Some(element) = super::struct_single_element(self.type_info, ty) {
            if element.is_vector() || matches!(element.kind(), TypeKind::Fp128) {
                return element;
            }
        }
        let size = self.type_info.alloc_size(ty);
        Type::vector(Type::double(), size.bytes() / 8)
    }

    /// Glue low and high eightbyte pieces into a coerce struct whose second
    /// member sits at offset 8.
    fn pair_coerce_type(&self, low: Type, high: Type) -> Type {
        let low_size = self.type_info.alloc_size(&low);
        let low = if low_size.align_to(self.type_info.abi_align(&high)) != Size::from_bytes(8) {
            match low.kind() {
                TypeKind::Half | TypeKind::Float => Type::double(),
                TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Pointer { .. } => {
                    Type::int(64, false)
                }
                _ => panic!("cannot pad low eightbyte piece {low}"),
            }
        } else {
            low
        };
        debug_assert_eq!(
            self.type_info.alloc_size(&low).bytes(),
            8,
            "low piece must fill its eightbyte"
        );
        Type::struct_(vec![
            crate::ty::StructField::new(low),
            crate::ty::StructField::new(high),
        ])
    }

    fn is_illegal_vector(&self, ty: &Type, is_named_arg: bool) -> bool {
        if !ty.is_vector() {
            return false;
        }
        let size = self.type_info.alloc_size(ty);
        size.bytes() > 16
            && (size > self.avx_level.max_vector_size() || !is_named_arg)
    }

    /// Memory-classed arguments. Scalars are still passed directly (the
    /// backend spills them to the stack); aggregates go byval.
    fn indirect_result(&self, ty: &Type, is_named_arg: bool, free_int_regs: u32) -> ArgInfo {
        if !ty.is_aggregate() && !self.is_illegal_vector(ty, is_named_arg) {
            return if ty.is_promotable_integer() {
                ArgInfo::extend(ty.clone())
            } else {
                ArgInfo::direct(ty.clone())
            };
        }

        if self.is_illegal_vector(ty, is_named_arg) {
            let align = self.type_info.abi_align(ty);
            return ArgInfo::indirect(Some(align), false);
        }

        let align = self.type_info.abi_align(ty).max(Align::from_bytes(8).unwrap());

        // Once the integer registers are exhausted, an eightbyte-sized
        // aggregate can live directly in its stack slot instead of byval.
        if free_int_regs == 0 {
            let size = self.type_info.alloc_size(ty);
            if align.bytes() == 8 && size.bytes() > 0 && size.bytes() <= 8 {
                return ArgInfo::direct(Type::int((size.bytes() * 8) as u16, false));
            }
        }

        ArgInfo::indirect(Some(align), true)
    }

    /// Classify one argument, reporting the registers it would consume.
    pub(crate) fn classify_argument(
        &self,
        ty: &Type,
        free_int_regs: u32,
        is_named_arg: bool,
    ) -> (ArgInfo, u32, u32) {
        let cls = self.classify_type(ty, is_named_arg);
        trace!(%ty, ?cls, "classified argument");

        let mut needed_int = 0;
        let mut needed_sse = 0;

        let low_piece = match cls.low {
            Class::NoClass => {
                if cls.high == Class::NoClass {
                    return (ArgInfo::ignore(), 0, 0);
                }
                panic!("argument {ty} has data in its high eightbyte only");
            }
            Class::Memory => {
                return (self.indirect_result(ty, is_named_arg, free_int_regs), 0, 0);
            }
            Class::X87 | Class::ComplexX87 => {
                // x87 values are passed in memory.
                return (self.indirect_result(ty, is_named_arg, free_int_regs), 0, 0);
            }
            Class::Integer => {
                needed_int += 1;
                let piece = self.integer_type_at(ty, Size::ZERO, ty, Size::ZERO);
                if cls.high == Class::NoClass && ty.is_promotable_integer() {
                    return (ArgInfo::extend(ty.clone()), needed_int, needed_sse);
                }
                piece
            }
            Class::Sse => {
                needed_sse += 1;
                if cls.high == Class::SseUp {
                    return (
                        ArgInfo::direct(self.byte_vector_type(ty)),
                        needed_int,
                        needed_sse,
                    );
                }
                self.sse_type_at(ty, Size::ZERO)
            }
            Class::SseUp | Class::X87Up => {
                unreachable!("invalid low eightbyte class {:?}", cls.low)
            }
        };

        let info = match cls.high {
            Class::NoClass => ArgInfo::direct(low_piece),
            Class::Integer => {
                needed_int += 1;
                let high = self.integer_type_at(ty, Size::from_bytes(8), ty, Size::from_bytes(8));
                ArgInfo::direct(self.pair_coerce_type(low_piece, high))
            }
            Class::Sse => {
                needed_sse += 1;
                let high = self.sse_type_at(ty, Size::from_bytes(8));
                ArgInfo::direct(self.pair_coerce_type(low_piece, high))
            }
            class => unreachable!("invalid high eightbyte class {class:?} after post-merge"),
        };
        (info, needed_int, needed_sse)
    }

    pub(crate) fn classify_return(&self, ty: &Type) -> ArgInfo {
        if ty.is_void() {
            return ArgInfo::ignore();
        }

        let cls = self.classify_type(ty, true);
        trace!(%ty, ?cls, "classified return");

        let low_piece = match cls.low {
            Class::NoClass => {
                if cls.high == Class::NoClass {
                    return ArgInfo::ignore();
                }
                panic!("return value {ty} has data in its high eightbyte only");
            }
            Class::Memory => {
                if !ty.is_aggregate() && !self.is_illegal_vector(ty, true) {
                    return if ty.is_promotable_integer() {
                        ArgInfo::extend(ty.clone())
                    } else {
                        ArgInfo::direct(ty.clone())
                    };
                }
                return ArgInfo::indirect(None, false);
            }
            Class::Integer => {
                let piece = self.integer_type_at(ty, Size::ZERO, ty, Size::ZERO);
                if cls.high == Class::NoClass && ty.is_promotable_integer() {
                    return ArgInfo::extend(ty.clone());
                }
                piece
            }
            Class::Sse => {
                if cls.high == Class::SseUp {
                    return ArgInfo::direct(self.byte_vector_type(ty));
                }
                self.sse_type_at(ty, Size::ZERO)
            }
            // Long double returns on the x87 stack.
            Class::X87 => Type::x86_fp80(),
            // Complex long double returns in st0 and st1.
            Class::ComplexX87 => {
                return ArgInfo::direct(Type::struct_(vec![
                    crate::ty::StructField::new(Type::x86_fp80()),
                    crate::ty::StructField::new(Type::x86_fp80()),
                ]));
            }
            Class::SseUp | Class::X87Up => {
                unreachable!("invalid low eightbyte class {:?}", cls.low)
            }
        };

        match cls.high {
            Class::NoClass => ArgInfo::direct(low_piece),
            Class::X87Up => {
                // Matched (X87, X87Up): the x86_fp80 piece already covers it.
                assert_eq!(cls.low, Class::X87, "X87Up without preceding X87");
                ArgInfo::direct(low_piece)
            }
            Class::Integer => {
                let high = self.integer_type_at(ty, Size::from_bytes(8), ty, Size::from_bytes(8));
                ArgInfo::direct(self.pair_coerce_type(low_piece, high))
            }
            Class::Sse => {
                let high = self.sse_type_at(ty, Size::from_bytes(8));
                ArgInfo::direct(self.pair_coerce_type(low_piece, high))
            }
            class => unreachable!("invalid high eightbyte class {class:?} after post-merge"),
        }
    }

    /// Classify a whole signature: `[return, arg0, arg1, ...]`.
    pub(crate) fn classify_function_type(
        &self,
        function_type: &FunctionType,
        argument_types: &[Type],
    ) -> Vec<ArgInfo> {
        debug!(args = argument_types.len(), "classifying x86-64 function type");

        let mut free_int_regs: u32 = 6; // RDI, RSI, RDX, RCX, R8, R9
        let mut free_sse_regs: u32 = 8; // XMM0-XMM7

        let return_info = self.classify_return(function_type.return_type());
        if return_info.is_indirect() {
            // The hidden sret pointer consumes an integer register.
            free_int_regs -= 1;
        }

        let named_count = function_type.argument_types().len();
        let mut arg_infos = Vec::with_capacity(argument_types.len() + 1);
        arg_infos.push(return_info);

        for (index, ty) in argument_types.iter().enumerate() {
            let is_named_arg = !function_type.is_variadic() || index < named_count;
            let (info, needed_int, needed_sse) =
                self.classify_argument(ty, free_int_regs, is_named_arg);
            if needed_int <= free_int_regs && needed_sse <= free_sse_regs {
                free_int_regs -= needed_int;
                free_sse_regs -= needed_sse;
                arg_infos.push(info);
            } else {
                arg_infos.push(self.indirect_result(ty, is_named_arg, free_int_regs));
            }
        }

        arg_infos
    }
}
