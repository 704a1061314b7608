//! Numeric semantics of the lowered arithmetic catalogue.

use pretty_assertions::assert_eq;

use sable_ir::{IntrinsicOp, IrType};

use crate::eval::{EvalError, FaultKind};
use crate::testutil::IrBuilder;

use super::{compile_default, run_int};

/// `fn f(a, b) = intrinsic(op, a, b)` over the given operand type.
fn binary_fixture(op: IntrinsicOp, ty: IrType) -> crate::GeneratedModule {
    let mut b = IrBuilder::new();
    let a = b.get_var(0, ty);
    let bb = b.get_var(1, ty);
    let body = b.intrinsic(op, &[a, bb], ty);
    b.function("f", &[ty, ty], ty, body);
    compile_default(b)
}

#[test]
fn min_divided_by_minus_one_returns_min_i32() {
    let m = binary_fixture(IntrinsicOp::SignedDiv, IrType::I32);
    let r = run_int(&m, "_sbl_f", &[i64::from(i32::MIN), -1]).unwrap();
    assert_eq!(r, i64::from(i32::MIN));
}

#[test]
fn min_divided_by_minus_one_returns_min_i64() {
    let m = binary_fixture(IntrinsicOp::SignedDiv, IrType::I64);
    let r = run_int(&m, "_sbl_f", &[i64::MIN, -1]).unwrap();
    assert_eq!(r, i64::MIN);
}

#[test]
fn min_rem_minus_one_returns_zero() {
    let m32 = binary_fixture(IntrinsicOp::SignedRem, IrType::I32);
    assert_eq!(run_int(&m32, "_sbl_f", &[i64::from(i32::MIN), -1]).unwrap(), 0);
    let m64 = binary_fixture(IntrinsicOp::SignedRem, IrType::I64);
    assert_eq!(run_int(&m64, "_sbl_f", &[i64::MIN, -1]).unwrap(), 0);
}

#[test]
fn ordinary_signed_division_still_works() {
    let m = binary_fixture(IntrinsicOp::SignedDiv, IrType::I64);
    assert_eq!(run_int(&m, "_sbl_f", &[42, 7]).unwrap(), 6);
    assert_eq!(run_int(&m, "_sbl_f", &[-42, 7]).unwrap(), -6);
}

#[test]
fn division_by_zero_raises_the_arithmetic_fault() {
    let m = binary_fixture(IntrinsicOp::SignedDiv, IrType::I64);
    match run_int(&m, "_sbl_f", &[1, 0]) {
        Err(EvalError::Fault(FaultKind::Arithmetic)) => {}
        other => panic!("expected an arithmetic fault, got {other:?}"),
    }
}

#[test]
fn remainder_by_zero_raises_the_arithmetic_fault() {
    let m = binary_fixture(IntrinsicOp::SignedRem, IrType::I32);
    match run_int(&m, "_sbl_f", &[5, 0]) {
        Err(EvalError::Fault(FaultKind::Arithmetic)) => {}
        other => panic!("expected an arithmetic fault, got {other:?}"),
    }
}

#[test]
fn unsigned_division_by_zero_raises_the_arithmetic_fault() {
    let m = binary_fixture(IntrinsicOp::UnsignedDiv, IrType::I64);
    match run_int(&m, "_sbl_f", &[7, 0]) {
        Err(EvalError::Fault(FaultKind::Arithmetic)) => {}
        other => panic!("expected an arithmetic fault, got {other:?}"),
    }
}

#[test]
fn shifts_mask_the_amount_to_the_operand_width_i32() {
    // Shift amounts are masked to 31 for 32-bit operands: shifting by
    // k is observably shifting by k mod 32.
    let m = binary_fixture(IntrinsicOp::Shl, IrType::I32);
    for k in [0i64, 1, 5, 31, 32, 33, 64, 95] {
        let shifted = run_int(&m, "_sbl_f", &[1, k]).unwrap();
        let expected = run_int(&m, "_sbl_f", &[1, k % 32]).unwrap();
        assert_eq!(shifted, expected, "shift by {k}");
    }
}

#[test]
fn shifts_mask_the_amount_to_the_operand_width_i64() {
    let m = binary_fixture(IntrinsicOp::Shl, IrType::I64);
    for k in [0i64, 1, 63, 64, 65, 127] {
        let shifted = run_int(&m, "_sbl_f", &[1, k]).unwrap();
        let expected = run_int(&m, "_sbl_f", &[1, k % 64]).unwrap();
        assert_eq!(shifted, expected, "shift by {k}");
    }
}

#[test]
fn arithmetic_right_shift_keeps_the_sign() {
    let m = binary_fixture(IntrinsicOp::Shr, IrType::I32);
    assert_eq!(run_int(&m, "_sbl_f", &[-8, 1]).unwrap(), -4);
    // 33 masks to 1.
    assert_eq!(run_int(&m, "_sbl_f", &[-8, 33]).unwrap(), -4);
}

#[test]
fn logical_right_shift_zero_fills() {
    let m = binary_fixture(IntrinsicOp::Ushr, IrType::I32);
    assert_eq!(run_int(&m, "_sbl_f", &[-1, 28]).unwrap(), 0xf);
}

#[test]
fn bit_pattern_equality_differs_from_ieee_equality_on_nan() {
    // Raw-bit comparison: NaN equals itself; IEEE comparison: it does not.
    let mut b = IrBuilder::new();
    let nan = b.const_f64(f64::NAN);
    let nan2 = b.const_f64(f64::NAN);
    let by_value = b.intrinsic(IntrinsicOp::AreEqualByValue, &[nan, nan2], IrType::Bool);
    b.function("by_value", &[], IrType::Bool, by_value);

    let nan3 = b.const_f64(f64::NAN);
    let nan4 = b.const_f64(f64::NAN);
    let ieee = b.intrinsic(IntrinsicOp::Ieee754Equals, &[nan3, nan4], IrType::Bool);
    b.function("ieee", &[], IrType::Bool, ieee);

    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_by_value", &[]).unwrap(), 1);
    assert_eq!(run_int(&m, "_sbl_ieee", &[]).unwrap(), 0);
}

#[test]
fn compare_to_orders_signed_operands() {
    let m = binary_fixture(IntrinsicOp::SignedCompareTo, IrType::I64);
    assert_eq!(run_int(&m, "_sbl_f", &[1, 2]).unwrap(), -1);
    assert_eq!(run_int(&m, "_sbl_f", &[2, 2]).unwrap(), 0);
    assert_eq!(run_int(&m, "_sbl_f", &[3, 2]).unwrap(), 1);
    assert_eq!(run_int(&m, "_sbl_f", &[-1, 1]).unwrap(), -1);
}

#[test]
fn unsigned_compare_treats_negative_as_large() {
    let m = binary_fixture(IntrinsicOp::UnsignedCompareTo, IrType::I64);
    assert_eq!(run_int(&m, "_sbl_f", &[-1, 1]).unwrap(), 1);
}

#[test]
fn unary_minus_and_inv() {
    let mut b = IrBuilder::new();
    let x = b.get_var(0, IrType::I64);
    let neg = b.intrinsic(IntrinsicOp::UnaryMinus, &[x], IrType::I64);
    b.function("neg", &[IrType::I64], IrType::I64, neg);
    let y = b.get_var(0, IrType::I64);
    let inv = b.intrinsic(IntrinsicOp::Inv, &[y], IrType::I64);
    b.function("inv", &[IrType::I64], IrType::I64, inv);
    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_neg", &[5]).unwrap(), -5);
    assert_eq!(run_int(&m, "_sbl_inv", &[0]).unwrap(), -1);
}

#[test]
fn narrowing_and_widening_conversions() {
    let mut b = IrBuilder::new();
    let x = b.get_var(0, IrType::I64);
    let narrowed = b.intrinsic(IntrinsicOp::IntTruncate, &[x], IrType::I8);
    let widened = b.intrinsic(IntrinsicOp::SignExtend, &[narrowed], IrType::I64);
    b.function("round_trip", &[IrType::I64], IrType::I64, widened);
    let m = compile_default(b);
    assert_eq!(run_int(&m, "_sbl_round_trip", &[0x17f]).unwrap(), 0x7f);
    assert_eq!(run_int(&m, "_sbl_round_trip", &[0x180]).unwrap(), -128);
}
