//! C-compatible ABI lowering for x86 and x86-64 over a typed IR.
//!
//! Given a source-level function type (primitives, arrays, structs, unions,
//! complex numbers, vectors), this crate computes the IR-level signature a
//! code generator must emit, the attributes attached to every parameter and
//! the return, and the encode/decode machinery that moves values across the
//! boundary at call sites and function entries.
//!
//! The deterministic core is the classifier: the System V AMD64 eightbyte
//! rules and the i386 conventions (cdecl, stdcall, fastcall, thiscall,
//! pascal, vectorcall, `regparm`), with a Win64 pipeline alongside. The IR
//! itself stays abstract: callers supply a [`Builder`] and receive opaque
//! [`Value`] handles back.
//!
//! ```
//! use cabi_x86::{create_abi, CallingConvention, FunctionType, Triple, Type};
//! use cabi_x86::triple::{Arch, Environment, Os, Vendor};
//!
//! let triple = Triple::new(Arch::X86_64, Vendor::Unknown, Os::Linux, Environment::Gnu);
//! let abi = create_abi(&triple, "");
//! let ft = FunctionType::new(
//!     CallingConvention::CDefault,
//!     Type::i32(),
//!     vec![Type::i32(), Type::i32()],
//!     false,
//! );
//! assert_eq!(abi.function_type(&ft).to_string(), "i32 (i32, i32)");
//! ```
//!
//! All inputs this library rejects are programmer errors (unsupported
//! constructs, internal invariant violations); they panic rather than
//! returning recoverable errors.

pub mod abi;
pub mod call;
mod encode;
pub mod ir;
pub mod layout;
pub mod promote;
pub mod triple;
pub mod ty;
pub mod type_info;

pub use abi::{create_abi, Abi, FunctionEncoder};
pub use call::mapping::{ArgumentIRMapping, FunctionIRMapping};
pub use call::{ArgAttribute, ArgAttributes, ArgExtension, ArgInfo, AttributeList};
pub use ir::{Builder, Conv, IrFunctionType, IrType, TypedValue, Value};
pub use layout::{AddressSpace, Align, Size, TargetDataLayout};
pub use promote::TypePromoter;
pub use triple::Triple;
pub use ty::{CallingConvention, FunctionType, StructField, Type};
pub use type_info::{TargetTypeInfo, TypeInfo};
