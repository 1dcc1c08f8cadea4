//! The public ABI facade.
//!
//! [`create_abi`] picks the pipeline for a target triple; the resulting
//! [`Abi`] exposes signature computation, attribute computation, call-site
//! encoding and function-entry decoding.

use tracing::debug;

use crate::call::mapping::{
    function_attributes, function_ir_mapping, ir_function_type, FunctionIRMapping,
};
use crate::call::x86::X86_32Classifier;
use crate::call::x86_64::{AvxLevel, Classifier};
use crate::call::x86_win64::Win64Classifier;
use crate::call::{ArgInfo, AttributeList};
use crate::ir::{Builder, Conv, IrFunctionType, TypedValue, Value};
use crate::promote::TypePromoter;
use crate::triple::{Arch, Triple};
use crate::ty::{CallingConvention, FunctionType, Type};
use crate::type_info::{TargetTypeInfo, TypeInfo};

use crate::encode::callee::Callee;
use crate::encode::caller::Caller;

pub struct X86_64Abi {
    triple: Triple,
    type_info: TargetTypeInfo,
    avx_level: AvxLevel,
}

pub struct X86_32Abi {
    triple: Triple,
    type_info: TargetTypeInfo,
}

pub struct Win64Abi {
    type_info: TargetTypeInfo,
}

/// An ABI lowering pipeline for one x86 target.
pub enum Abi {
    X86(X86_32Abi),
    X86_64(X86_64Abi),
    Win64(Win64Abi),
}

/// Create the ABI for the given target triple. `cpu` selects vector register
/// width on x86-64 (it may be empty).
pub fn create_abi(triple: &Triple, cpu: &str) -> Abi {
    match triple.arch {
        Arch::X86 => Abi::X86(X86_32Abi {
            triple: *triple,
            type_info: TargetTypeInfo::x86_32(triple),
        }),
        Arch::X86_64 if triple.is_os_windows() => {
            Abi::Win64(Win64Abi { type_info: TargetTypeInfo::x86_64() })
        }
        Arch::X86_64 => Abi::X86_64(X86_64Abi {
            triple: *triple,
            type_info: TargetTypeInfo::x86_64(),
            avx_level: AvxLevel::from_cpu(cpu),
        }),
    }
}

impl Abi {
    pub fn name(&self) -> &'static str {
        match self {
            Abi::X86(_) => "x86",
            Abi::X86_64(_) => "x86_64",
            Abi::Win64(_) => "Win64",
        }
    }

    pub fn type_info(&self) -> &dyn TypeInfo {
        match self {
            Abi::X86(abi) => &abi.type_info,
            Abi::X86_64(abi) => &abi.type_info,
            Abi::Win64(abi) => &abi.type_info,
        }
    }

    /// Map the abstract calling convention to the target IR convention.
    /// Conventions foreign to the selected pipeline are fatal.
    pub fn calling_convention(&self, calling_convention: CallingConvention) -> Conv {
        use CallingConvention::*;
        match self {
            Abi::X86_64(_) | Abi::Win64(_) => match calling_convention {
                CDefault | CppDefault => Conv::C,
                cc => panic!("invalid calling convention {cc:?} for {}", self.name()),
            },
            Abi::X86(_) => match calling_convention {
                CDefault | CDecl | CppDefault => Conv::C,
                StdCall | Pascal => Conv::X86Stdcall,
                FastCall => Conv::X86Fastcall,
                ThisCall => Conv::X86ThisCall,
                VectorCall => Conv::X86VectorCall,
            },
        }
    }

    fn classify(&self, function_type: &FunctionType, argument_types: &[Type]) -> Vec<ArgInfo> {
        match self {
            Abi::X86(abi) => X86_32Classifier::new(&abi.type_info, abi.triple)
                .classify_function_type(function_type, argument_types),
            Abi::X86_64(abi) => Classifier::new(&abi.type_info, &abi.triple, abi.avx_level)
                .classify_function_type(function_type, argument_types),
            Abi::Win64(abi) => Win64Classifier::new(&abi.type_info)
                .classify_function_type(function_type, argument_types),
        }
    }

    fn compute_mapping(
        &self,
        function_type: &FunctionType,
        argument_types: &[Type],
    ) -> FunctionIRMapping {
        let arg_infos = self.classify(function_type, argument_types);
        assert!(!arg_infos.is_empty());
        function_ir_mapping(self.type_info(), &arg_infos)
    }

    /// The ABI-compliant IR signature for a source function type.
    pub fn function_type(&self, function_type: &FunctionType) -> IrFunctionType {
        let mapping = self.compute_mapping(function_type, function_type.argument_types());
        ir_function_type(self.type_info(), function_type, &mapping)
    }

    /// The attribute list for a function (or call site) of the given type.
    /// `raw_argument_types` are the pre-promotion per-site argument types;
    /// attributes already present in `existing` are merged (and stripped
    /// where the ABI demands it).
    pub fn attributes(
        &self,
        function_type: &FunctionType,
        raw_argument_types: &[Type],
        existing: &AttributeList,
    ) -> AttributeList {
        assert!(raw_argument_types.len() >= function_type.argument_types().len());

        let promoter = TypePromoter::new(self.type_info());
        let argument_types = promoter.promote_argument_types(function_type, raw_argument_types);

        let mapping = self.compute_mapping(function_type, &argument_types);
        function_attributes(&mapping, existing)
    }

    /// Lower one call site. `call_builder` receives the encoded IR arguments
    /// and must emit the call, returning its IR result; the decoded
    /// source-typed return value is handed back.
    pub fn create_call<B: Builder>(
        &self,
        builder: &mut B,
        function_type: &FunctionType,
        call_builder: impl FnOnce(&mut B, &[Value]) -> Value,
        raw_arguments: &[TypedValue<'_>],
    ) -> Value {
        for (i, argument) in raw_arguments.iter().enumerate() {
            assert!(
                i >= function_type.argument_types().len()
                    || *argument.ty == function_type.argument_types()[i],
                "argument {i} has type {} but the function declares {}",
                argument.ty,
                function_type.argument_types()[i]
            );
        }

        debug!(args = raw_arguments.len(), abi = self.name(), "lowering call site");

        let promoter = TypePromoter::new(self.type_info());

        // Promote any varargs arguments that haven't been already; this
        // changes char to int, float to double, and so on.
        let arguments = promoter.promote_arguments(builder, function_type, raw_arguments);
        let argument_types: Vec<Type> = arguments.iter().map(|(_, ty)| ty.clone()).collect();

        let mapping = self.compute_mapping(function_type, &argument_types);
        let caller = Caller::new(self.type_info(), function_type, &mapping);

        let encoded_arguments = caller.encode_arguments(builder, &arguments);
        let return_value = call_builder(builder, &encoded_arguments);
        caller.decode_return_value(builder, &encoded_arguments, return_value)
    }

    /// Build a function encoder for the entry of an IR function with the
    /// given source type and IR parameters.
    pub fn function_encoder<'f, B: Builder>(
        &'f self,
        builder: &mut B,
        function_type: &'f FunctionType,
        ir_arguments: &[Value],
    ) -> FunctionEncoder<'f> {
        debug!(abi = self.name(), "building function encoder");

        let mapping = self.compute_mapping(function_type, function_type.argument_types());
        let arguments = {
            let callee = Callee::new(self.type_info(), function_type, &mapping);
            callee.decode_arguments(builder, ir_arguments)
        };

        FunctionEncoder {
            type_info: self.type_info(),
            function_type,
            mapping,
            encoded_arguments: ir_arguments.to_vec(),
            arguments,
        }
    }
}

/// Decodes a function's incoming arguments and encodes its return value.
pub struct FunctionEncoder<'a> {
    type_info: &'a dyn TypeInfo,
    function_type: &'a FunctionType,
    mapping: FunctionIRMapping,
    encoded_arguments: Vec<Value>,
    arguments: Vec<Value>,
}

impl FunctionEncoder<'_> {
    /// The source-typed argument values of the enclosing function.
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Emit the function's return: encodes `value` and emits `ret`.
    pub fn return_value<B: Builder>(&self, builder: &mut B, value: Value) {
        let callee = Callee::new(self.type_info, self.function_type, &self.mapping);
        match callee.encode_return_value(builder, value, &self.encoded_arguments) {
            Some(encoded) => builder.ret(encoded),
            None => builder.ret_void(),
        }
    }
}
