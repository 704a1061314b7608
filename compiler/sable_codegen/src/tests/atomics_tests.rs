//! Atomic field operations: native instructions for scalars,
//! reference-aware helpers for object fields.

use pretty_assertions::assert_eq;

use sable_ir::{IntrinsicOp, IrType};

use crate::target::{CalleeRef, Instr, TargetModule, ValueKind};
use crate::testutil::IrBuilder;

use super::{compile_default, run_int};

fn instructions_of<'a>(
    module: &'a TargetModule,
    name: &str,
) -> impl Iterator<Item = &'a Instr> + 'a {
    let (_, function) = module
        .function_by_name(name)
        .unwrap_or_else(|| panic!("no function `{name}`"));
    function.values.iter().filter_map(|v| match &v.kind {
        ValueKind::Instr { instr, .. } => Some(instr),
        _ => None,
    })
}

fn calls_runtime(module: &TargetModule, function: &str, routine: &str) -> bool {
    instructions_of(module, function).any(|i| match i {
        Instr::Call { callee, .. } | Instr::Invoke { callee, .. } => {
            matches!(callee, CalleeRef::Direct(f) if module.function(*f).name == routine)
        }
        _ => false,
    })
}

/// `fn f(receiver, expected, new) = cas(receiver.value, expected, new)`
fn cas_fixture(field_ty: IrType) -> crate::GeneratedModule {
    let mut b = IrBuilder::new();
    let holder = b.class_with_fields("Holder", Some(b.root()), &[("value", field_ty)]);
    let field = b.field_ref(holder, 0);

    let recv = b.get_var(0, IrType::Class(holder));
    let expected = b.get_var(1, field_ty);
    let new = b.get_var(2, field_ty);
    let cas = b.intrinsic_on_field(
        IntrinsicOp::CompareAndSetField,
        field,
        &[recv, expected, new],
        IrType::Bool,
    );
    b.function(
        "f",
        &[IrType::Class(holder), field_ty, field_ty],
        IrType::Bool,
        cas,
    );

    compile_default(b)
}

#[test]
fn scalar_cas_emits_a_native_compare_exchange() {
    let m = cas_fixture(IrType::I64);
    let has_cmpxchg =
        instructions_of(&m.module, "_sbl_f").any(|i| matches!(i, Instr::CmpXchg { .. }));
    assert!(has_cmpxchg, "expected a native cmpxchg instruction");
    assert!(
        !calls_runtime(&m.module, "_sbl_f", "sable_cas_heap_ref"),
        "scalar fields must not use the reference helper"
    );
}

#[test]
fn reference_cas_routes_through_the_reference_helper() {
    let m = cas_fixture(IrType::Class(sable_ir::ClassId(0)));
    assert!(
        calls_runtime(&m.module, "_sbl_f", "sable_cas_heap_ref"),
        "reference fields must use the reference-aware helper"
    );
    let has_cmpxchg =
        instructions_of(&m.module, "_sbl_f").any(|i| matches!(i, Instr::CmpXchg { .. }));
    assert!(!has_cmpxchg, "reference fields must not use raw atomics");
}

#[test]
fn scalar_cas_behaves_like_compare_exchange() {
    // Allocate, then CAS 0 -> 5 (succeeds), then CAS 0 -> 7 (fails).
    let mut b = IrBuilder::new();
    let holder = b.class_with_fields("Holder", Some(b.root()), &[("value", IrType::I64)]);
    let field = b.field_ref(holder, 0);
    let ctor = b.trivial_ctor(holder);

    let obj = b.new_instance(holder, ctor, &[]);
    let decl = b.var_decl(10, IrType::Class(holder), false, obj);
    let recv1 = b.get_var(10, IrType::Class(holder));
    let zero1 = b.const_i64(0);
    let five = b.const_i64(5);
    let first = b.intrinsic_on_field(
        IntrinsicOp::CompareAndSetField,
        field,
        &[recv1, zero1, five],
        IrType::Bool,
    );
    let first_decl = b.var_decl(11, IrType::Bool, false, first);
    let recv2 = b.get_var(10, IrType::Class(holder));
    let zero2 = b.const_i64(0);
    let seven = b.const_i64(7);
    let second = b.intrinsic_on_field(
        IntrinsicOp::CompareAndSetField,
        field,
        &[recv2, zero2, seven],
        IrType::Bool,
    );
    let second_decl = b.var_decl(12, IrType::Bool, false, second);

    // first && !second
    let first_read = b.get_var(11, IrType::Bool);
    let second_read = b.get_var(12, IrType::Bool);
    let not_second = b.intrinsic(IntrinsicOp::Not, &[second_read], IrType::Bool);
    let both = b.intrinsic(IntrinsicOp::And, &[first_read, not_second], IrType::Bool);
    let body = b.block(&[decl, first_decl, second_decl, both], IrType::Bool);
    b.function("f", &[], IrType::Bool, body);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 1);
}

#[test]
fn get_and_add_accumulates() {
    let mut b = IrBuilder::new();
    let counter = b.class_with_fields("Counter", Some(b.root()), &[("n", IrType::I64)]);
    let field = b.field_ref(counter, 0);
    let ctor = b.trivial_ctor(counter);

    let obj = b.new_instance(counter, ctor, &[]);
    let decl = b.var_decl(10, IrType::Class(counter), false, obj);
    let recv1 = b.get_var(10, IrType::Class(counter));
    let three = b.const_i64(3);
    let first = b.intrinsic_on_field(
        IntrinsicOp::GetAndAddField,
        field,
        &[recv1, three],
        IrType::I64,
    );
    let first_decl = b.var_decl(11, IrType::I64, false, first);
    let recv2 = b.get_var(10, IrType::Class(counter));
    let four = b.const_i64(4);
    let second = b.intrinsic_on_field(
        IntrinsicOp::GetAndAddField,
        field,
        &[recv2, four],
        IrType::I64,
    );
    // The second fetch observes the first addition.
    let body = b.block(&[decl, first_decl, second], IrType::I64);
    b.function("f", &[], IrType::I64, body);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 3);
}

#[test]
fn get_and_set_swaps_the_old_value_out() {
    let mut b = IrBuilder::new();
    let cell = b.class_with_fields("Cell", Some(b.root()), &[("v", IrType::I64)]);
    let field = b.field_ref(cell, 0);
    let ctor = b.trivial_ctor(cell);

    let obj = b.new_instance(cell, ctor, &[]);
    let decl = b.var_decl(10, IrType::Class(cell), false, obj);
    let recv1 = b.get_var(10, IrType::Class(cell));
    let nine = b.const_i64(9);
    let old = b.intrinsic_on_field(
        IntrinsicOp::GetAndSetField,
        field,
        &[recv1, nine],
        IrType::I64,
    );
    let old_decl = b.var_decl(11, IrType::I64, false, old);
    let recv2 = b.get_var(10, IrType::Class(cell));
    let now = b.get_field(recv2, field, IrType::I64);
    let old_read = b.get_var(11, IrType::I64);
    let sum = b.intrinsic(IntrinsicOp::Plus, &[old_read, now], IrType::I64);
    let body = b.block(&[decl, old_decl, sum], IrType::I64);
    b.function("f", &[], IrType::I64, body);

    let m = compile_default(b);
    // Old value 0 plus new stored value 9.
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 9);
}
