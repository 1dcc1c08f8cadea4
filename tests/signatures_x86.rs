//! IR signatures and attribute lists on i386.

use cabi_x86::triple::{Arch, Environment, Os, Vendor};
use cabi_x86::{
    create_abi, Abi, ArgAttribute, AttributeList, CallingConvention, Conv, FunctionType,
    StructField, Triple, Type,
};

fn linux_abi() -> Abi {
    let triple = Triple::new(Arch::X86, Vendor::Unknown, Os::Linux, Environment::Gnu);
    create_abi(&triple, "")
}

fn darwin_abi() -> Abi {
    let triple = Triple::new(Arch::X86, Vendor::Apple, Os::Darwin, Environment::Unknown);
    create_abi(&triple, "")
}

fn cdecl(ret: Type, args: Vec<Type>) -> FunctionType {
    FunctionType::new(CallingConvention::CDecl, ret, args, false)
}

#[test]
fn struct_by_pointer_and_by_value() {
    // void f(struct { int; char; } *, struct { int; char; })
    let s = Type::struct_(vec![
        StructField::new(Type::i32()),
        StructField::new(Type::i8()),
    ]);
    let ft = cdecl(Type::void(), vec![Type::pointer(), s]);
    let abi = linux_abi();
    assert_eq!(abi.function_type(&ft).to_string(), "void (ptr, ptr)");

    let attrs = abi.attributes(&ft, ft.argument_types(), &AttributeList::new());
    assert!(attrs.params[0].is_empty());
    assert!(attrs.params[1].contains(ArgAttribute::ByVal));
    assert_eq!(attrs.params[1].alignment.unwrap().bytes(), 4);
}

#[test]
fn hole_free_struct_expands_to_scalars() {
    let s = Type::struct_(vec![
        StructField::new(Type::i32()),
        StructField::new(Type::float()),
    ]);
    let ft = cdecl(Type::void(), vec![s]);
    assert_eq!(linux_abi().function_type(&ft).to_string(), "void (i32, float)");
}

#[test]
fn sret_return_on_linux() {
    let s = Type::struct_(vec![StructField::new(Type::i32())]);
    let ft = cdecl(s, vec![Type::i32()]);
    let abi = linux_abi();
    assert_eq!(abi.function_type(&ft).to_string(), "void (ptr, i32)");

    let attrs = abi.attributes(&ft, ft.argument_types(), &AttributeList::new());
    assert!(attrs.params[0].contains(ArgAttribute::StructRet));
    assert!(attrs.params[0].contains(ArgAttribute::NoAlias));
}

#[test]
fn small_struct_returned_in_register_on_darwin() {
    let s = Type::struct_(vec![
        StructField::new(Type::i16()),
        StructField::new(Type::i16()),
    ]);
    let ft = cdecl(s, vec![]);
    assert_eq!(darwin_abi().function_type(&ft).to_string(), "i32 ()");
}

#[test]
fn fastcall_marks_register_arguments_inreg() {
    let ft = FunctionType::new(
        CallingConvention::FastCall,
        Type::void(),
        vec![Type::i32(), Type::pointer(), Type::i32()],
        false,
    );
    let abi = linux_abi();
    assert_eq!(abi.function_type(&ft).to_string(), "void (i32, ptr, i32)");

    let attrs = abi.attributes(&ft, ft.argument_types(), &AttributeList::new());
    assert!(attrs.params[0].contains(ArgAttribute::InReg));
    assert!(attrs.params[1].contains(ArgAttribute::InReg));
    assert!(!attrs.params[2].contains(ArgAttribute::InReg));
}

#[test]
fn fastcall_padding_slot_is_inreg() {
    let s = Type::struct_(vec![StructField::new(Type::i32())]);
    let ft = FunctionType::new(CallingConvention::FastCall, Type::void(), vec![s], false);
    let abi = linux_abi();
    // Padding i32 slot, then the expanded member.
    assert_eq!(abi.function_type(&ft).to_string(), "void (i32, i32)");

    let attrs = abi.attributes(&ft, ft.argument_types(), &AttributeList::new());
    assert!(attrs.params[0].contains(ArgAttribute::InReg));
    assert!(!attrs.params[1].contains(ArgAttribute::InReg));
}

#[test]
fn regparm_structs_flatten_into_registers() {
    let s = Type::struct_(vec![
        StructField::new(Type::i32()),
        StructField::new(Type::i32()),
    ]);
    let ft = cdecl(Type::void(), vec![s]).with_regparm(3);
    let abi = linux_abi();
    assert_eq!(abi.function_type(&ft).to_string(), "void (i32, i32)");

    let attrs = abi.attributes(&ft, ft.argument_types(), &AttributeList::new());
    assert!(attrs.params[0].contains(ArgAttribute::InReg));
    assert!(attrs.params[1].contains(ArgAttribute::InReg));
}

#[test]
fn long_double_passes_on_the_stack_directly() {
    let ft = cdecl(Type::x86_fp80(), vec![Type::x86_fp80()]);
    assert_eq!(linux_abi().function_type(&ft).to_string(), "x86_fp80 (x86_fp80)");
}

#[test]
fn calling_convention_mapping() {
    let abi = linux_abi();
    assert_eq!(abi.calling_convention(CallingConvention::CDecl), Conv::C);
    assert_eq!(abi.calling_convention(CallingConvention::StdCall), Conv::X86Stdcall);
    assert_eq!(abi.calling_convention(CallingConvention::Pascal), Conv::X86Stdcall);
    assert_eq!(abi.calling_convention(CallingConvention::FastCall), Conv::X86Fastcall);
    assert_eq!(abi.calling_convention(CallingConvention::ThisCall), Conv::X86ThisCall);
    assert_eq!(abi.calling_convention(CallingConvention::VectorCall), Conv::X86VectorCall);
}

#[test]
fn vectorcall_hva_expands_into_vector_registers() {
    let hva = Type::struct_(vec![
        StructField::new(Type::vector(Type::float(), 4)),
        StructField::new(Type::vector(Type::float(), 4)),
    ]);
    let triple = Triple::new(Arch::X86, Vendor::Pc, Os::Windows, Environment::Msvc);
    let abi = create_abi(&triple, "");
    let ft = FunctionType::new(CallingConvention::VectorCall, Type::void(), vec![hva], false);
    assert_eq!(
        abi.function_type(&ft).to_string(),
        "void (<4 x float>, <4 x float>)"
    );
}

#[test]
fn win32_msvc_never_returns_single_float_structs_in_fp_registers() {
    let s = Type::struct_(vec![StructField::new(Type::double())]);
    let triple = Triple::new(Arch::X86, Vendor::Pc, Os::Windows, Environment::Msvc);
    let abi = create_abi(&triple, "");
    let ft = cdecl(s, vec![]);
    assert_eq!(abi.function_type(&ft).to_string(), "i64 ()");
}
