//! Catch dispatch and propagation across the generated unwind paths.

use pretty_assertions::assert_eq;

use sable_ir::IrType;

use crate::eval::EvalError;
use crate::testutil::IrBuilder;

use super::{compile_default, run_int};

/// Builds:
///
/// ```text
/// class BaseExc; class DerivedExc : BaseExc; class OtherExc
///
/// fn f(kind) =
///   try {
///     if kind == 0 { throw DerivedExc() } else { throw OtherExc() }
///     0
///   } catch (d: DerivedExc) { 1 }
///     catch (b: BaseExc)    { 2 }
/// ```
fn dispatch_fixture() -> crate::GeneratedModule {
    let mut b = IrBuilder::new();
    let base_exc = b.class("BaseExc", Some(b.root()));
    let derived_exc = b.class("DerivedExc", Some(base_exc));
    let other_exc = b.class("OtherExc", Some(b.root()));
    let base_ctor = b.trivial_ctor(base_exc);
    let derived_ctor = b.trivial_ctor(derived_exc);
    let other_ctor = b.trivial_ctor(other_exc);
    let _ = base_ctor;

    let kind = b.get_var(0, IrType::I64);
    let zero = b.const_i64(0);
    let is_zero = b.intrinsic(
        sable_ir::IntrinsicOp::AreEqualByValue,
        &[kind, zero],
        IrType::Bool,
    );
    let derived = b.new_instance(derived_exc, derived_ctor, &[]);
    let throw_derived = b.throw(derived);
    let other = b.new_instance(other_exc, other_ctor, &[]);
    let throw_other = b.throw(other);
    let branch = b.if_expr(is_zero, throw_derived, Some(throw_other), IrType::Nothing);
    let zero_result = b.const_i64(0);
    let try_body = b.block(&[branch, zero_result], IrType::I64);

    let one = b.const_i64(1);
    let two = b.const_i64(2);
    let try_expr = b.try_catch(
        try_body,
        &[(derived_exc, 10, one), (base_exc, 11, two)],
        IrType::I64,
    );
    b.function("f", &[IrType::I64], IrType::I64, try_expr);
    compile_default(b)
}

#[test]
fn derived_instance_dispatches_to_the_derived_clause() {
    // Both clauses match a derived instance; declaration order wins.
    let m = dispatch_fixture();
    assert_eq!(run_int(&m, "_sbl_f", &[0]).unwrap(), 1);
}

#[test]
fn unrelated_instance_propagates_to_the_enclosing_handler() {
    let m = dispatch_fixture();
    match run_int(&m, "_sbl_f", &[1]) {
        Err(EvalError::Exception(_)) => {}
        other => panic!("expected the exception to propagate, got {other:?}"),
    }
}

#[test]
fn base_instance_skips_the_derived_clause() {
    let mut b = IrBuilder::new();
    let base_exc = b.class("BaseExc", Some(b.root()));
    let derived_exc = b.class("DerivedExc", Some(base_exc));
    let base_ctor = b.trivial_ctor(base_exc);

    let thrown = b.new_instance(base_exc, base_ctor, &[]);
    let throw = b.throw(thrown);
    let filler = b.const_i64(0);
    let try_body = b.block(&[throw, filler], IrType::I64);
    let one = b.const_i64(1);
    let two = b.const_i64(2);
    let try_expr = b.try_catch(
        try_body,
        &[(derived_exc, 10, one), (base_exc, 11, two)],
        IrType::I64,
    );
    b.function("f", &[], IrType::I64, try_expr);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 2);
}

#[test]
fn universal_clause_matches_anything_and_ends_dispatch() {
    let mut b = IrBuilder::new();
    let some_exc = b.class("SomeExc", Some(b.root()));
    let ctor = b.trivial_ctor(some_exc);
    let root = b.root();

    let thrown = b.new_instance(some_exc, ctor, &[]);
    let throw = b.throw(thrown);
    let filler = b.const_i64(0);
    let try_body = b.block(&[throw, filler], IrType::I64);
    let seven = b.const_i64(7);
    let try_expr = b.try_catch(try_body, &[(root, 10, seven)], IrType::I64);
    b.function("f", &[], IrType::I64, try_expr);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 7);
}

#[test]
fn no_throw_path_returns_the_try_value() {
    let mut b = IrBuilder::new();
    let exc = b.class("Exc", Some(b.root()));
    let body = b.const_i64(42);
    let fallback = b.const_i64(-1);
    let try_expr = b.try_catch(body, &[(exc, 10, fallback)], IrType::I64);
    b.function("f", &[], IrType::I64, try_expr);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 42);
}

#[test]
fn bridge_functions_filter_exceptions_at_the_boundary() {
    // A bridge body that can unwind: the escape path must run through the
    // discriminating landingpad rather than raw propagation.
    let mut b = IrBuilder::new();
    let exc = b.class("Exc", Some(b.root()));
    let ctor = b.trivial_ctor(exc);
    let thrown = b.new_instance(exc, ctor, &[]);
    let throw = b.throw(thrown);
    let filler = b.const_i64(0);
    let body = b.block(&[throw, filler], IrType::I64);
    let f = b.function("bridge", &[], IrType::I64, body);
    b.set_bridge(f);

    let m = compile_default(b);
    let (_, function) = m.module.function_by_name("_sbl_bridge").unwrap();
    let references_typeid_probe = function.values.iter().any(|v| match &v.kind {
        crate::target::ValueKind::Instr {
            instr:
                crate::target::Instr::Call { callee, .. }
                | crate::target::Instr::Invoke { callee, .. },
            ..
        } => matches!(
            callee,
            crate::target::CalleeRef::Direct(c)
                if m.module.function(*c).name == "sable_eh_typeid_for"
        ),
        _ => false,
    });
    assert!(
        references_typeid_probe,
        "bridge must discriminate exception kinds in its landingpad"
    );
}

#[test]
fn rethrow_from_a_catch_reaches_the_outer_try() {
    // Inner try catches everything and rethrows; the outer catch sees it.
    let mut b = IrBuilder::new();
    let exc = b.class("Exc", Some(b.root()));
    let ctor = b.trivial_ctor(exc);
    let root = b.root();

    let thrown = b.new_instance(exc, ctor, &[]);
    let throw = b.throw(thrown);
    let filler = b.const_i64(0);
    let inner_body = b.block(&[throw, filler], IrType::I64);
    let caught = b.get_var(10, IrType::Class(exc));
    let rethrow = b.throw(caught);
    let filler2 = b.const_i64(0);
    let rethrow_block = b.block(&[rethrow, filler2], IrType::I64);
    let inner_try = b.try_catch(inner_body, &[(root, 10, rethrow_block)], IrType::I64);

    let nine = b.const_i64(9);
    let outer_try = b.try_catch(inner_try, &[(root, 11, nine)], IrType::I64);
    b.function("f", &[], IrType::I64, outer_try);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_f", &[]).unwrap(), 9);
}
