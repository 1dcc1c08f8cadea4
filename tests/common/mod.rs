//! A Builder implementation that evaluates the emitted instructions over
//! byte buffers, so encode/decode round-trips can be checked bit for bit.

#![allow(dead_code)]

use cabi_x86::layout::{Align, HasDataLayout};
use cabi_x86::type_info::TypeInfo;
use cabi_x86::{
    Abi, Builder, FunctionType, IrType, Size, TargetDataLayout, Type, TypedValue, Value,
};

struct ValueData {
    ty: IrType,
    bytes: Vec<u8>,
}

/// Pointers are table indices encoded into the value's low four bytes.
pub struct EvalBuilder {
    dl: TargetDataLayout,
    values: Vec<ValueData>,
    buffers: Vec<Vec<u8>>,
    pointers: Vec<(usize, u64)>,
    last_return: Option<Value>,
    returned_void: bool,
}

impl EvalBuilder {
    pub fn new(dl: TargetDataLayout) -> EvalBuilder {
        EvalBuilder {
            dl,
            values: Vec::new(),
            buffers: Vec::new(),
            pointers: Vec::new(),
            last_return: None,
            returned_void: false,
        }
    }

    fn push_value(&mut self, ty: IrType, bytes: Vec<u8>) -> Value {
        assert_eq!(
            bytes.len() as u64,
            ty.size(&self.dl).bytes(),
            "value bytes must match the size of {ty}"
        );
        let value = Value::from_raw(self.values.len() as u32);
        self.values.push(ValueData { ty, bytes });
        value
    }

    /// Mint a constant of the given IR type from raw bytes.
    pub fn constant(&mut self, ty: &IrType, bytes: Vec<u8>) -> Value {
        self.push_value(ty.clone(), bytes)
    }

    pub fn value_bytes(&self, value: Value) -> &[u8] {
        &self.values[value.raw() as usize].bytes
    }

    pub fn value_type(&self, value: Value) -> &IrType {
        &self.values[value.raw() as usize].ty
    }

    /// The value handed to the most recent `ret`, if any.
    pub fn take_return(&mut self) -> Option<Value> {
        self.last_return.take()
    }

    pub fn returned_void(&self) -> bool {
        self.returned_void
    }

    fn make_pointer(&mut self, buffer: usize, offset: u64) -> Value {
        let index = self.pointers.len() as u32;
        self.pointers.push((buffer, offset));
        let mut bytes = index.to_le_bytes().to_vec();
        bytes.resize(self.dl.pointer_size.bytes() as usize, 0);
        self.push_value(IrType::pointer(), bytes)
    }

    fn deref(&self, ptr: Value) -> (usize, u64) {
        let data = &self.values[ptr.raw() as usize];
        assert!(data.ty.is_pointer(), "dereference of non-pointer {}", data.ty);
        let index = u32::from_le_bytes(data.bytes[0..4].try_into().unwrap());
        self.pointers[index as usize]
    }
}

impl Builder for EvalBuilder {
    fn entry_alloca(&mut self, ty: &IrType, _align: Align) -> Value {
        let size = ty.size(&self.dl).bytes() as usize;
        let buffer = self.buffers.len();
        self.buffers.push(vec![0; size]);
        self.make_pointer(buffer, 0)
    }

    fn load(&mut self, ty: &IrType, ptr: Value, _align: Align) -> Value {
        let (buffer, offset) = self.deref(ptr);
        let size = ty.size(&self.dl).bytes() as usize;
        let start = offset as usize;
        let memory = &self.buffers[buffer];
        assert!(start + size <= memory.len(), "out-of-bounds load of {ty}");
        let bytes = memory[start..start + size].to_vec();
        self.push_value(ty.clone(), bytes)
    }

    fn store(&mut self, value: Value, ptr: Value, _align: Align) {
        let (buffer, offset) = self.deref(ptr);
        let bytes = self.values[value.raw() as usize].bytes.clone();
        let start = offset as usize;
        let memory = &mut self.buffers[buffer];
        assert!(start + bytes.len() <= memory.len(), "out-of-bounds store");
        memory[start..start + bytes.len()].copy_from_slice(&bytes);
    }

    fn bit_cast(&mut self, value: Value, ty: &IrType) -> Value {
        let bytes = self.values[value.raw() as usize].bytes.clone();
        self.push_value(ty.clone(), bytes)
    }

    fn int_cast(&mut self, value: Value, ty: &IrType, signed: bool) -> Value {
        let source = &self.values[value.raw() as usize];
        let target_size = ty.size(&self.dl).bytes() as usize;
        let mut bytes = source.bytes.clone();
        let fill = if signed && bytes.last().is_some_and(|b| b & 0x80 != 0) {
            0xff
        } else {
            0
        };
        bytes.resize(target_size, fill);
        self.push_value(ty.clone(), bytes)
    }

    fn ptr_to_int(&mut self, value: Value, ty: &IrType) -> Value {
        let source = &self.values[value.raw() as usize];
        let mut bytes = source.bytes.clone();
        bytes.resize(ty.size(&self.dl).bytes() as usize, 0);
        self.push_value(ty.clone(), bytes)
    }

    fn int_to_ptr(&mut self, value: Value, ty: &IrType) -> Value {
        let source = &self.values[value.raw() as usize];
        let mut bytes = source.bytes.clone();
        bytes.resize(ty.size(&self.dl).bytes() as usize, 0);
        self.push_value(ty.clone(), bytes)
    }

    fn fp_ext(&mut self, value: Value, ty: &IrType) -> Value {
        let source_ty = self.values[value.raw() as usize].ty.clone();
        let source_bytes = self.values[value.raw() as usize].bytes.clone();
        match (&source_ty, ty) {
            (IrType::Float, IrType::Double) => {
                let f = f32::from_le_bytes(source_bytes[0..4].try_into().unwrap());
                let bytes = (f as f64).to_le_bytes().to_vec();
                self.push_value(ty.clone(), bytes)
            }
            (from, to) => panic!("fp_ext from {from} to {to} not supported by the test builder"),
        }
    }

    fn gep(&mut self, ptr: Value, offset: Size) -> Value {
        let (buffer, base) = self.deref(ptr);
        self.make_pointer(buffer, base + offset.bytes())
    }

    fn memcpy(&mut self, dest: Value, _dest_align: Align, src: Value, _src_align: Align, size: Size) {
        let (src_buffer, src_offset) = self.deref(src);
        let (dest_buffer, dest_offset) = self.deref(dest);
        let count = size.bytes() as usize;
        let bytes: Vec<u8> = {
            let memory = &self.buffers[src_buffer];
            let start = src_offset as usize;
            let end = (start + count).min(memory.len());
            let mut bytes = memory[start..end].to_vec();
            bytes.resize(count, 0);
            bytes
        };
        let memory = &mut self.buffers[dest_buffer];
        let start = dest_offset as usize;
        assert!(start + count <= memory.len(), "out-of-bounds memcpy");
        memory[start..start + count].copy_from_slice(&bytes);
    }

    fn extract_value(&mut self, aggregate: Value, ty: &IrType, index: usize) -> Value {
        let offset = ty.struct_field_offset(index, &self.dl).bytes() as usize;
        let field_ty = ty.struct_fields()[index].clone();
        let size = field_ty.size(&self.dl).bytes() as usize;
        let bytes = self.values[aggregate.raw() as usize].bytes[offset..offset + size].to_vec();
        self.push_value(field_ty, bytes)
    }

    fn undef(&mut self, ty: &IrType) -> Value {
        let size = ty.size(&self.dl).bytes() as usize;
        self.push_value(ty.clone(), vec![0; size])
    }

    fn ret(&mut self, value: Value) {
        self.last_return = Some(value);
    }

    fn ret_void(&mut self) {
        self.returned_void = true;
    }
}

/// Fill only the data bytes of a `ty`-typed blob, leaving padding zeroed, so
/// round-trips can compare whole byte images.
pub fn fill_value_bytes(
    type_info: &dyn TypeInfo,
    ty: &Type,
    bytes: &mut [u8],
    offset: usize,
    next: &mut impl FnMut() -> u8,
) {
    use cabi_x86::ty::TypeKind;
    match ty.kind() {
        TypeKind::Void => {}
        TypeKind::Bool => bytes[offset] = next() & 1,
        TypeKind::Int { .. }
        | TypeKind::Half
        | TypeKind::Float
        | TypeKind::Double
        | TypeKind::Fp128
        | TypeKind::Pointer { .. }
        | TypeKind::Vector { .. } => {
            let size = type_info.store_size(ty).bytes() as usize;
            for b in &mut bytes[offset..offset + size] {
                *b = next();
            }
        }
        TypeKind::X86Fp80 => {
            for b in &mut bytes[offset..offset + 10] {
                *b = next();
            }
        }
        TypeKind::Array { element, count } => {
            let stride = type_info.alloc_size(element).bytes() as usize;
            for i in 0..*count as usize {
                fill_value_bytes(type_info, element, bytes, offset + i * stride, next);
            }
        }
        TypeKind::Complex { element } => {
            let stride = type_info.alloc_size(element).bytes() as usize;
            fill_value_bytes(type_info, element, bytes, offset, next);
            fill_value_bytes(type_info, element, bytes, offset + stride, next);
        }
        TypeKind::Struct { .. } => {
            let layout = type_info.record_layout(ty);
            for (field, flayout) in ty.record_fields().iter().zip(&layout.fields) {
                match field.bit_width {
                    Some(0) => {}
                    Some(width) => {
                        // Random bits across the bitfield's bytes, masked to
                        // its extent.
                        let mut bit = flayout.bit_offset;
                        let end = flayout.bit_offset + width;
                        while bit < end {
                            let byte = (bit / 8) as usize;
                            let bit_in_byte = (bit % 8) as u32;
                            if next() & 1 == 1 {
                                bytes[offset + byte] |= 1 << bit_in_byte;
                            }
                            bit += 1;
                        }
                    }
                    None => {
                        let field_offset = (flayout.bit_offset / 8) as usize;
                        fill_value_bytes(type_info, &field.ty, bytes, offset + field_offset, next);
                    }
                }
            }
        }
        TypeKind::Union { fields } => {
            // Only the largest member carries data the expansion paths
            // preserve; ties resolve to the first field, matching the
            // expansion rule.
            let mut largest: Option<&cabi_x86::StructField> = None;
            let mut largest_size = 0;
            for field in fields.iter().filter(|f| !f.is_bitfield()) {
                let size = type_info.alloc_size(&field.ty).bytes();
                if size > largest_size {
                    largest_size = size;
                    largest = Some(field);
                }
            }
            if let Some(field) = largest {
                fill_value_bytes(type_info, &field.ty, bytes, offset, next);
            }
        }
    }
}

/// Drive a full call through the ABI: encode the arguments, "enter" the
/// callee via a function encoder, check the decoded arguments bit for bit,
/// return a value through the encoder, and check the decoded result.
pub fn check_round_trip(abi: &Abi, ft: &FunctionType, arg_bytes: &[Vec<u8>], ret_bytes: &[u8]) {
    let type_info = abi.type_info();
    let mut builder = EvalBuilder::new(type_info.data_layout().clone());

    let argument_values: Vec<Value> = ft
        .argument_types()
        .iter()
        .zip(arg_bytes)
        .map(|(ty, bytes)| builder.constant(&type_info.ir_type(ty), bytes.clone()))
        .collect();
    let arguments: Vec<TypedValue<'_>> = ft
        .argument_types()
        .iter()
        .zip(&argument_values)
        .map(|(ty, value)| TypedValue::new(*value, ty))
        .collect();

    let return_ir = type_info.ir_type(ft.return_type());

    let decoded_return = abi.create_call(
        &mut builder,
        ft,
        |builder, ir_args| {
            // The callee side: decode the parameters, compare, and return.
            let encoder = abi.function_encoder(builder, ft, ir_args);
            for (i, (decoded, expected)) in
                encoder.arguments().iter().zip(arg_bytes).enumerate()
            {
                assert_eq!(
                    builder.value_bytes(*decoded),
                    expected.as_slice(),
                    "argument {i} of `{ft:?}` did not round-trip"
                );
            }

            let return_value = if ft.return_type().is_void() {
                builder.undef(&IrType::Void)
            } else {
                builder.constant(&return_ir, ret_bytes.to_vec())
            };
            encoder.return_value(builder, return_value);

            match builder.take_return() {
                Some(value) => value,
                None => {
                    assert!(builder.returned_void());
                    builder.undef(&IrType::Void)
                }
            }
        },
        &arguments,
    );

    if !ft.return_type().is_void() {
        assert_eq!(
            builder.value_bytes(decoded_return),
            ret_bytes,
            "return value of `{ft:?}` did not round-trip"
        );
    }
}
