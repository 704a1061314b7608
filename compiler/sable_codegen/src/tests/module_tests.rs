//! Module-level behavior: verification, control flow, fields, stack
//! allocation, and memory-model routing.

use pretty_assertions::assert_eq;

use sable_ir::{IntrinsicOp, IrType, Lifetime};

use crate::config::{CodegenConfig, MemoryModel};
use crate::target::{verify_module, CalleeRef, Instr, TargetModule, ValueKind};
use crate::testutil::IrBuilder;

use super::{compile, compile_default, run_int};

fn calls_runtime(module: &TargetModule, function: &str, routine: &str) -> bool {
    let Some((_, f)) = module.function_by_name(function) else {
        return false;
    };
    f.values.iter().any(|v| match &v.kind {
        ValueKind::Instr {
            instr: Instr::Call { callee, .. } | Instr::Invoke { callee, .. },
            ..
        } => {
            matches!(callee, CalleeRef::Direct(c) if module.function(*c).name == routine)
        }
        _ => false,
    })
}

#[test]
fn minimal_module_passes_verification_with_zero_diagnostics() {
    // One trivial function and one trivial class.
    let mut b = IrBuilder::new();
    b.class("Trivial", Some(b.root()));
    let body = b.const_i64(0);
    b.function("main", &[], IrType::I64, body);
    let m = compile_default(b);
    assert_eq!(verify_module(&m.module).len(), 0);
}

#[test]
fn while_loop_terminates_with_the_accumulated_value() {
    // var i = 0; while (i != 10) { i = i + 1 }; i
    let mut b = IrBuilder::new();
    let zero = b.const_i64(0);
    let decl = b.var_decl(0, IrType::I64, true, zero);
    let i_read = b.get_var(0, IrType::I64);
    let ten = b.const_i64(10);
    let eq = b.intrinsic(IntrinsicOp::AreEqualByValue, &[i_read, ten], IrType::Bool);
    let cond = b.intrinsic(IntrinsicOp::Not, &[eq], IrType::Bool);
    let i_read2 = b.get_var(0, IrType::I64);
    let one = b.const_i64(1);
    let inc = b.intrinsic(IntrinsicOp::Plus, &[i_read2, one], IrType::I64);
    let assign = b.set_var(0, inc);
    let body = b.block(&[assign], IrType::Unit);
    let loop_expr = b.while_loop(cond, body);
    let i_final = b.get_var(0, IrType::I64);
    let function_body = b.block(&[decl, loop_expr, i_final], IrType::I64);
    b.function("f", &[], IrType::I64, function_body);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 10);
}

#[test]
fn field_stores_and_loads_round_trip_through_the_object() {
    let mut b = IrBuilder::new();
    let point = b.class_with_fields(
        "Point",
        Some(b.root()),
        &[("x", IrType::I64), ("y", IrType::I64)],
    );
    let fx = b.field_ref(point, 0);
    let fy = b.field_ref(point, 1);
    let ctor = b.trivial_ctor(point);

    let obj = b.new_instance(point, ctor, &[]);
    let decl = b.var_decl(0, IrType::Class(point), false, obj);
    let r1 = b.get_var(0, IrType::Class(point));
    let three = b.const_i64(3);
    let set_x = b.set_field(r1, fx, three);
    let r2 = b.get_var(0, IrType::Class(point));
    let four = b.const_i64(4);
    let set_y = b.set_field(r2, fy, four);
    let r3 = b.get_var(0, IrType::Class(point));
    let x = b.get_field(r3, fx, IrType::I64);
    let r4 = b.get_var(0, IrType::Class(point));
    let y = b.get_field(r4, fy, IrType::I64);
    let sum = b.intrinsic(IntrinsicOp::Plus, &[x, y], IrType::I64);
    let body = b.block(&[decl, set_x, set_y, sum], IrType::I64);
    b.function("f", &[], IrType::I64, body);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 7);
}

#[test]
fn stack_lifetime_bypasses_the_heap_allocator() {
    let mut b = IrBuilder::new();
    let scratch = b.class_with_fields("Scratch", Some(b.root()), &[("v", IrType::I64)]);
    let ctor = b.trivial_ctor(scratch);
    let field = b.field_ref(scratch, 0);

    let obj = b.new_instance(scratch, ctor, &[]);
    b.set_lifetime(obj, Lifetime::Stack);
    let decl = b.var_decl(0, IrType::Class(scratch), false, obj);
    let r1 = b.get_var(0, IrType::Class(scratch));
    let five = b.const_i64(5);
    let store = b.set_field(r1, field, five);
    let r2 = b.get_var(0, IrType::Class(scratch));
    let load = b.get_field(r2, field, IrType::I64);
    let body = b.block(&[decl, store, load], IrType::I64);
    b.function("f", &[], IrType::I64, body);

    let m = compile_default(b);
    assert!(
        !calls_runtime(&m.module, "_sbl_f", "sable_alloc_instance"),
        "stack-allocated objects must not call the heap allocator"
    );
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 5);
}

#[test]
fn heap_lifetime_calls_the_allocator() {
    let mut b = IrBuilder::new();
    let boxed = b.class_with_fields("Boxed", Some(b.root()), &[("v", IrType::I64)]);
    let ctor = b.trivial_ctor(boxed);
    let obj = b.new_instance(boxed, ctor, &[]);
    b.set_lifetime(obj, Lifetime::Global);
    let decl = b.var_decl(0, IrType::Class(boxed), false, obj);
    let unit = b.unit_expr();
    let body = b.block(&[decl, unit], IrType::Unit);
    b.function("f", &[], IrType::Unit, body);

    let m = compile_default(b);
    assert!(calls_runtime(&m.module, "_sbl_f", "sable_alloc_instance"));
}

#[test]
fn thread_confined_model_routes_reference_stores_through_helpers() {
    let mut b = IrBuilder::new();
    let other = b.class("Other", Some(b.root()));
    let holder = b.class_with_fields(
        "Holder",
        Some(b.root()),
        &[("r", IrType::Class(other))],
    );
    let field = b.field_ref(holder, 0);
    let recv = b.get_var(0, IrType::Class(holder));
    let value = b.get_var(1, IrType::Class(other));
    let store = b.set_field(recv, field, value);
    b.function(
        "f",
        &[IrType::Class(holder), IrType::Class(other)],
        IrType::Unit,
        store,
    );

    let m = compile(
        b,
        CodegenConfig {
            memory_model: MemoryModel::ThreadConfined,
            ..CodegenConfig::default()
        },
    );
    assert!(calls_runtime(&m.module, "_sbl_f", "sable_update_heap_ref"));
}

#[test]
fn rc_model_also_guards_heap_stores_but_not_stack_slots() {
    let mut b = IrBuilder::new();
    let other = b.class("Other", Some(b.root()));
    let holder = b.class_with_fields(
        "Holder",
        Some(b.root()),
        &[("r", IrType::Class(other))],
    );
    let field = b.field_ref(holder, 0);
    let recv = b.get_var(0, IrType::Class(holder));
    let value = b.get_var(1, IrType::Class(other));
    let store = b.set_field(recv, field, value);
    b.function(
        "f",
        &[IrType::Class(holder), IrType::Class(other)],
        IrType::Unit,
        store,
    );

    let m = compile(
        b,
        CodegenConfig {
            memory_model: MemoryModel::RcFrozen,
            ..CodegenConfig::default()
        },
    );
    assert!(calls_runtime(&m.module, "_sbl_f", "sable_update_heap_ref"));
    assert!(!calls_runtime(&m.module, "_sbl_f", "sable_update_stack_ref"));
}

#[test]
fn volatile_scalar_fields_use_ordered_accesses() {
    let mut b = IrBuilder::new();
    let cell = b.class_with_fields("Cell", Some(b.root()), &[("v", IrType::I64)]);
    b.make_field_volatile(cell, 0);
    let field = b.field_ref(cell, 0);
    let recv = b.get_var(0, IrType::Class(cell));
    let load = b.get_field(recv, field, IrType::I64);
    b.function("f", &[IrType::Class(cell)], IrType::I64, load);

    let m = compile_default(b);
    let (_, f) = m.module.function_by_name("_sbl_f").unwrap();
    let has_ordered_load = f.values.iter().any(|v| {
        matches!(
            &v.kind,
            ValueKind::Instr {
                instr: Instr::Load {
                    ordering: Some(_),
                    volatile: true,
                    ..
                },
                ..
            }
        )
    });
    assert!(has_ordered_load, "volatile loads must carry an ordering");
}

#[test]
fn static_fields_persist_across_reads() {
    let mut b = IrBuilder::new();
    let counter = b.add_static("counter", IrType::I64);
    let nine = b.const_i64(9);
    let store = b.set_static(counter, nine);
    let read = b.get_static(counter, IrType::I64);
    let body = b.block(&[store, read], IrType::I64);
    b.function("f", &[], IrType::I64, body);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 9);
}

#[test]
fn conditional_expression_merges_both_arms() {
    let mut b = IrBuilder::new();
    let flag = b.get_var(0, IrType::Bool);
    let one = b.const_i64(1);
    let two = b.const_i64(2);
    let body = b.if_expr(flag, one, Some(two), IrType::I64);
    b.function("f", &[IrType::Bool], IrType::I64, body);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_f", &[1]).unwrap(), 1);
    assert_eq!(run_int(&m, "_sbl_f", &[0]).unwrap(), 2);
}

#[test]
fn methods_receive_the_receiver_as_the_leading_parameter() {
    let mut b = IrBuilder::new();
    let widget = b.class_with_fields("Widget", Some(b.root()), &[("id", IrType::I64)]);
    let field = b.field_ref(widget, 0);
    // fn get(self) = self.id, dispatched statically.
    let recv = b.get_var(0, IrType::Class(widget));
    let read = b.get_field(recv, field, IrType::I64);
    let getter = b.virtual_method_with_body(widget, "get", None, IrType::I64, read);
    let ctor = b.trivial_ctor(widget);

    let obj = b.new_instance(widget, ctor, &[]);
    let decl = b.var_decl(0, IrType::Class(widget), false, obj);
    let r1 = b.get_var(0, IrType::Class(widget));
    let v = b.const_i64(11);
    let store = b.set_field(r1, field, v);
    let r2 = b.get_var(0, IrType::Class(widget));
    let call = b.call(getter, Some(r2), &[], IrType::I64, false);
    let body = b.block(&[decl, store, call], IrType::I64);
    b.function("f", &[], IrType::I64, body);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 11);
}
