//! Lowering of the primitive-operation catalogue.
//!
//! Every [`IntrinsicOp`] maps to a direct instruction-emission routine.
//! The numeric edge cases are reproduced exactly:
//!
//! - integer division/remainder check for zero and raise the arithmetic
//!   fault before dividing;
//! - `MIN / -1` yields `MIN` and `MIN % -1` yields `0`, bypassing the
//!   division instruction on the overflowing pair;
//! - shift amounts are masked to the operand width (31 or 63);
//! - value equality compares raw bits (floats via integer bitcast), while
//!   IEEE-754 equality is an ordered float comparison;
//! - reference-typed atomic field operations route through the
//!   reference-aware runtime helpers, scalar fields use native atomics.

use sable_ir::{IntrinsicOp, Lifetime};

use crate::config::MemoryModel;
use crate::target::{BinOp, CastOp, FloatPredicate, IntPredicate, RmwOp, TypeId, ValueId};

use super::exceptions::ExceptionHandler;
use super::function_gen::FunctionGenerationContext;

/// Pre-resolved field access for the atomic field operations.
#[derive(Clone, Copy, Debug)]
pub struct FieldAccess {
    pub address: ValueId,
    pub is_reference: bool,
}

type Fgc<'a, 'b, 'ir> = &'a mut FunctionGenerationContext<'b, 'ir>;

/// Lower one intrinsic call site to instructions.
///
/// # Panics
/// On catalogue misuse that the upstream lowering must prevent: a
/// non-constant bit-field range, an atomic field op without its field, or
/// an operand width the catalogue does not define.
pub fn evaluate_intrinsic(
    fgc: Fgc<'_, '_, '_>,
    op: IntrinsicOp,
    args: &[ValueId],
    ret_ty: TypeId,
    handler: &ExceptionHandler,
    lifetime: Lifetime,
    result_slot: Option<ValueId>,
    field: Option<FieldAccess>,
) -> ValueId {
    match op {
        IntrinsicOp::Plus => emit_arith(fgc, args, BinOp::Add, BinOp::FAdd),
        IntrinsicOp::Minus => emit_arith(fgc, args, BinOp::Sub, BinOp::FSub),
        IntrinsicOp::Times => emit_arith(fgc, args, BinOp::Mul, BinOp::FMul),
        IntrinsicOp::SignedDiv => emit_signed_div_rem(fgc, args, handler, false),
        IntrinsicOp::SignedRem => emit_signed_div_rem(fgc, args, handler, true),
        IntrinsicOp::UnsignedDiv => emit_unsigned_div_rem(fgc, args, handler, BinOp::UDiv),
        IntrinsicOp::UnsignedRem => emit_unsigned_div_rem(fgc, args, handler, BinOp::URem),
        IntrinsicOp::Inc => emit_inc_dec(fgc, args[0], true),
        IntrinsicOp::Dec => emit_inc_dec(fgc, args[0], false),
        IntrinsicOp::UnaryMinus => emit_unary_minus(fgc, args[0]),
        IntrinsicOp::Shl => emit_shift(fgc, args, BinOp::Shl),
        IntrinsicOp::Shr => emit_shift(fgc, args, BinOp::AShr),
        IntrinsicOp::Ushr => emit_shift(fgc, args, BinOp::LShr),
        IntrinsicOp::And => fgc.binop(BinOp::And, args[0], args[1]),
        IntrinsicOp::Or => fgc.binop(BinOp::Or, args[0], args[1]),
        IntrinsicOp::Xor => fgc.binop(BinOp::Xor, args[0], args[1]),
        IntrinsicOp::Inv => fgc.not(args[0]),
        IntrinsicOp::Not => fgc.not(args[0]),
        IntrinsicOp::SignedCompareTo => emit_compare_to(fgc, args, true),
        IntrinsicOp::UnsignedCompareTo => emit_compare_to(fgc, args, false),
        IntrinsicOp::AreEqualByValue => emit_are_equal_by_value(fgc, args),
        IntrinsicOp::Ieee754Equals => fgc.fcmp(FloatPredicate::Oeq, args[0], args[1]),
        IntrinsicOp::SignExtend => fgc.sext(args[0], ret_ty),
        IntrinsicOp::ZeroExtend => fgc.zext(args[0], ret_ty),
        IntrinsicOp::IntTruncate => fgc.trunc(args[0], ret_ty),
        IntrinsicOp::FloatTruncate => fgc.cast(CastOp::FpTrunc, args[0], ret_ty),
        IntrinsicOp::FloatExtend => fgc.cast(CastOp::FpExt, args[0], ret_ty),
        IntrinsicOp::SignedToFloat => fgc.cast(CastOp::SiToFp, args[0], ret_ty),
        IntrinsicOp::UnsignedToFloat => fgc.cast(CastOp::UiToFp, args[0], ret_ty),
        IntrinsicOp::FloatToSigned => fgc.cast(CastOp::FpToSi, args[0], ret_ty),
        IntrinsicOp::Reinterpret => fgc.bitcast(args[0], ret_ty),
        IntrinsicOp::CompareAndSetField => {
            emit_cmp_exchange(fgc, args, field, CmpExchangeMode::Set, lifetime, result_slot)
        }
        IntrinsicOp::CompareAndExchangeField => {
            emit_cmp_exchange(fgc, args, field, CmpExchangeMode::Swap, lifetime, result_slot)
        }
        IntrinsicOp::GetAndSetField => {
            emit_get_and_set(fgc, args, field, lifetime, result_slot)
        }
        IntrinsicOp::GetAndAddField => emit_get_and_add(fgc, args, field),
        IntrinsicOp::ReadBits => emit_read_bits(fgc, args),
        IntrinsicOp::WriteBits => emit_write_bits(fgc, args),
        IntrinsicOp::ReadPrimitive => fgc.load(args[0], ret_ty),
        IntrinsicOp::WritePrimitive => {
            fgc.store(args[1], args[0]);
            fgc.unit_value()
        }
        IntrinsicOp::GetPointerSize => fgc.const_i32(8),
    }
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

fn is_float_arg(fgc: Fgc<'_, '_, '_>, v: ValueId) -> bool {
    fgc.value_ty(v)
        .is_some_and(|t| fgc.codegen.is_float_ty(t))
}

fn emit_arith(fgc: Fgc<'_, '_, '_>, args: &[ValueId], int_op: BinOp, float_op: BinOp) -> ValueId {
    let op = if is_float_arg(fgc, args[0]) {
        float_op
    } else {
        int_op
    };
    fgc.binop(op, args[0], args[1])
}

fn emit_inc_dec(fgc: Fgc<'_, '_, '_>, v: ValueId, inc: bool) -> ValueId {
    let ty = fgc.value_ty(v).unwrap_or(TypeId::I64);
    if fgc.codegen.is_float_ty(ty) {
        let one = float_const(fgc, ty, 1.0);
        let op = if inc { BinOp::FAdd } else { BinOp::FSub };
        fgc.binop(op, v, one)
    } else {
        let one = fgc.const_int(ty, 1);
        let op = if inc { BinOp::Add } else { BinOp::Sub };
        fgc.binop(op, v, one)
    }
}

fn emit_unary_minus(fgc: Fgc<'_, '_, '_>, v: ValueId) -> ValueId {
    let ty = fgc.value_ty(v).unwrap_or(TypeId::I64);
    if fgc.codegen.is_float_ty(ty) {
        // fneg: subtraction from negative zero preserves NaN payloads and
        // the sign of zero.
        let neg_zero = float_const(fgc, ty, -0.0);
        fgc.binop(BinOp::FSub, neg_zero, v)
    } else {
        let zero = fgc.const_int(ty, 0);
        fgc.binop(BinOp::Sub, zero, v)
    }
}

fn float_const(fgc: Fgc<'_, '_, '_>, ty: TypeId, value: f64) -> ValueId {
    let bits = if ty == TypeId::F32 {
        u64::from((value as f32).to_bits())
    } else {
        value.to_bits()
    };
    fgc.const_float(ty, bits)
}

fn emit_throw_if_zero(fgc: Fgc<'_, '_, '_>, handler: &ExceptionHandler, divisor: ValueId) {
    let ty = fgc.value_ty(divisor).unwrap_or(TypeId::I64);
    let zero = fgc.const_int(ty, 0);
    let is_zero = fgc.icmp_eq(divisor, zero);
    let handler = *handler;
    fgc.if_then(is_zero, |fgc| {
        let callee = fgc.codegen.runtime.throw_arithmetic_fault.clone();
        fgc.call(&callee, &[], Lifetime::Irrelevant, &handler, None);
        fgc.unreachable();
    });
}

fn emit_signed_div_rem(
    fgc: Fgc<'_, '_, '_>,
    args: &[ValueId],
    handler: &ExceptionHandler,
    is_rem: bool,
) -> ValueId {
    let (dividend, divisor) = (args[0], args[1]);
    let ty = fgc.value_ty(divisor).unwrap_or(TypeId::I64);
    if fgc.codegen.is_float_ty(ty) {
        let op = if is_rem { BinOp::FRem } else { BinOp::FDiv };
        return fgc.binop(op, dividend, divisor);
    }

    emit_throw_if_zero(fgc, handler, divisor);

    let min_value = match fgc.codegen.int_bits(ty) {
        Some(32) => fgc.const_int(ty, i64::from(i32::MIN)),
        Some(64) => fgc.const_int(ty, i64::MIN),
        other => panic!("unsupported signed integer division width: {other:?}"),
    };
    let minus_one = fgc.const_int(ty, -1);
    let overflow_value = if is_rem {
        fgc.const_int(ty, 0)
    } else {
        min_value
    };

    let dividend_is_min = fgc.icmp_eq(dividend, min_value);
    let divisor_is_m1 = fgc.icmp_eq(divisor, minus_one);
    let overflows = fgc.and(dividend_is_min, divisor_is_m1);
    fgc.if_then_else(overflows, overflow_value, |fgc| {
        let op = if is_rem { BinOp::SRem } else { BinOp::SDiv };
        fgc.binop(op, dividend, divisor)
    })
}

fn emit_unsigned_div_rem(
    fgc: Fgc<'_, '_, '_>,
    args: &[ValueId],
    handler: &ExceptionHandler,
    op: BinOp,
) -> ValueId {
    emit_throw_if_zero(fgc, handler, args[1]);
    fgc.binop(op, args[0], args[1])
}

/// Shift with the amount masked to the operand's bit width: 63 for 64-bit
/// operands, 31 otherwise.
fn emit_shift(fgc: Fgc<'_, '_, '_>, args: &[ValueId], op: BinOp) -> ValueId {
    let (value, amount) = (args[0], args[1]);
    let value_ty = fgc.value_ty(value).unwrap_or(TypeId::I64);
    let amount_ty = fgc.value_ty(amount).unwrap_or(TypeId::I32);
    let wide = fgc.codegen.int_bits(value_ty) == Some(64);
    let mask = fgc.const_int(amount_ty, if wide { 63 } else { 31 });
    let masked = fgc.and(amount, mask);
    let masked = if amount_ty == value_ty {
        masked
    } else if wide {
        fgc.zext(masked, value_ty)
    } else {
        fgc.trunc(masked, value_ty)
    };
    fgc.binop(op, value, masked)
}

fn emit_compare_to(fgc: Fgc<'_, '_, '_>, args: &[ValueId], signed: bool) -> ValueId {
    let (first, second) = (args[0], args[1]);
    let equal = fgc.icmp_eq(first, second);
    let pred = if signed {
        IntPredicate::Slt
    } else {
        IntPredicate::Ult
    };
    let less = fgc.icmp(pred, first, second);
    let minus_one = fgc.const_i32(-1);
    let one = fgc.const_i32(1);
    let zero = fgc.const_i32(0);
    let ordered = fgc.select(less, minus_one, one);
    fgc.select(equal, zero, ordered)
}

/// Raw bit-pattern equality. Floats compare as their integer images, so
/// `NaN == NaN` here and `-0.0 != +0.0`, unlike IEEE-754 comparison.
fn emit_are_equal_by_value(fgc: Fgc<'_, '_, '_>, args: &[ValueId]) -> ValueId {
    let (first, second) = (args[0], args[1]);
    let ty = fgc.value_ty(first).unwrap_or(TypeId::I64);
    if fgc.codegen.is_float_ty(ty) {
        let int_ty = if ty == TypeId::F32 {
            TypeId::I32
        } else {
            TypeId::I64
        };
        let a = fgc.bitcast(first, int_ty);
        let b = fgc.bitcast(second, int_ty);
        fgc.icmp_eq(a, b)
    } else {
        fgc.icmp_eq(first, second)
    }
}

// ---------------------------------------------------------------------------
// Atomics
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum CmpExchangeMode {
    /// Result is the success flag.
    Set,
    /// Result is the previous value.
    Swap,
}

fn expect_field(field: Option<FieldAccess>) -> FieldAccess {
    field.unwrap_or_else(|| panic!("atomic field operation reached codegen without its field"))
}

fn emit_cmp_exchange(
    fgc: Fgc<'_, '_, '_>,
    args: &[ValueId],
    field: Option<FieldAccess>,
    mode: CmpExchangeMode,
    lifetime: Lifetime,
    result_slot: Option<ValueId>,
) -> ValueId {
    let field = expect_field(field);
    let (expected, new) = (args[0], args[1]);
    if field.is_reference {
        assert!(
            fgc.codegen.config.memory_model == MemoryModel::ThreadConfined,
            "reference-typed atomics require the thread-confined model"
        );
        match mode {
            CmpExchangeMode::Set => {
                let callee = fgc.codegen.runtime.cas_heap_ref.clone();
                fgc.call_no_result(&callee, &[field.address, expected, new])
            }
            CmpExchangeMode::Swap => {
                let callee = fgc.codegen.runtime.swap_heap_ref.clone();
                fgc.call(
                    &callee,
                    &[field.address, expected, new],
                    lifetime,
                    &ExceptionHandler::None,
                    result_slot,
                )
            }
        }
    } else {
        let pair = fgc.cmpxchg(field.address, expected, new);
        let index = match mode {
            CmpExchangeMode::Swap => 0,
            CmpExchangeMode::Set => 1,
        };
        fgc.extract_value(pair, index)
    }
}

fn emit_get_and_set(
    fgc: Fgc<'_, '_, '_>,
    args: &[ValueId],
    field: Option<FieldAccess>,
    lifetime: Lifetime,
    result_slot: Option<ValueId>,
) -> ValueId {
    let field = expect_field(field);
    let value = args[0];
    if field.is_reference {
        assert!(
            fgc.codegen.config.memory_model == MemoryModel::ThreadConfined,
            "reference-typed atomics require the thread-confined model"
        );
        let callee = fgc.codegen.runtime.get_and_set_heap_ref.clone();
        fgc.call(
            &callee,
            &[field.address, value],
            lifetime,
            &ExceptionHandler::None,
            result_slot,
        )
    } else {
        fgc.atomic_rmw(RmwOp::Xchg, field.address, value)
    }
}

fn emit_get_and_add(
    fgc: Fgc<'_, '_, '_>,
    args: &[ValueId],
    field: Option<FieldAccess>,
) -> ValueId {
    let field = expect_field(field);
    assert!(
        !field.is_reference,
        "get-and-add is only defined for scalar fields"
    );
    fgc.atomic_rmw(RmwOp::Add, field.address, args[0])
}

// ---------------------------------------------------------------------------
// Bit fields
// ---------------------------------------------------------------------------

struct BitRange {
    prefix: u32,
    suffix: u32,
    total: u32,
    byte_offset: i64,
}

fn bit_range(fgc: Fgc<'_, '_, '_>, offset_arg: ValueId, size_arg: ValueId) -> BitRange {
    let offset = fgc
        .extract_const_int(offset_arg)
        .unwrap_or_else(|| panic!("bit-field offset is not a constant"));
    let size = fgc
        .extract_const_int(size_arg)
        .unwrap_or_else(|| panic!("bit-field size is not a constant"));
    let size = u32::try_from(size).unwrap_or_else(|_| panic!("negative bit-field size"));
    let prefix = u32::try_from(offset.rem_euclid(8)).unwrap_or(0);
    let suffix = (8 - ((size + prefix) % 8)) % 8;
    let total = prefix + size + suffix;
    assert!(
        total <= 64,
        "bit-field container of {total} bits exceeds the supported 64"
    );
    BitRange {
        prefix,
        suffix,
        total,
        byte_offset: offset.div_euclid(8),
    }
}

/// Read `size` bits at a sub-byte offset: load the minimal padded
/// container, shift the padding out, and widen to `i64`.
fn emit_read_bits(fgc: Fgc<'_, '_, '_>, args: &[ValueId]) -> ValueId {
    let ptr = args[0];
    let signed = fgc
        .extract_const_int(args[3])
        .unwrap_or_else(|| panic!("bit-field signedness is not a constant"))
        != 0;
    let range = bit_range(fgc, args[1], args[2]);

    let container_ty = fgc.codegen.int_with_bits(range.total);
    let byte_index = fgc.const_i64(range.byte_offset);
    let container_ptr = fgc.gep(ptr, TypeId::I8, byte_index);
    let container = fgc.load(container_ptr, container_ty);

    let suffix = fgc.const_int(container_ty, i64::from(range.suffix));
    let shifted_up = fgc.binop(BinOp::Shl, container, suffix);
    let down = fgc.const_int(container_ty, i64::from(range.prefix + range.suffix));
    let op = if signed { BinOp::AShr } else { BinOp::LShr };
    let bits = fgc.binop(op, shifted_up, down);

    match range.total {
        64 => bits,
        _ => fgc.ext(bits, TypeId::I64, signed),
    }
}

/// Write `size` bits at a sub-byte offset, preserving the surrounding
/// bits of the padded container.
fn emit_write_bits(fgc: Fgc<'_, '_, '_>, args: &[ValueId]) -> ValueId {
    let ptr = args[0];
    let value = args[3];
    let range = bit_range(fgc, args[1], args[2]);
    let size = range.total - range.prefix - range.suffix;

    let container_ty = fgc.codegen.int_with_bits(range.total);
    let byte_index = fgc.const_i64(range.byte_offset);
    let container_ptr = fgc.gep(ptr, TypeId::I8, byte_index);

    let bits_ty = fgc.codegen.int_with_bits(size);
    let bits = fgc.trunc(value, bits_ty);

    let to_store = if range.prefix == 0 && range.suffix == 0 {
        bits
    } else {
        let value_mask: u64 = if size >= 64 { u64::MAX } else { (1u64 << size) - 1 };
        let discard_mask = value_mask << range.prefix;
        let preserved_mask = !discard_mask
            & (if range.total >= 64 {
                u64::MAX
            } else {
                (1u64 << range.total) - 1
            });

        let previous = fgc.load(container_ptr, container_ty);
        let preserved_const = fgc.const_int(container_ty, preserved_mask as i64);
        let preserved = fgc.and(previous, preserved_const);
        let widened = fgc.zext(bits, container_ty);
        let prefix = fgc.const_int(container_ty, i64::from(range.prefix));
        let placed = fgc.binop(BinOp::Shl, widened, prefix);
        fgc.or(placed, preserved)
    };
    fgc.store(to_store, container_ptr);
    fgc.unit_value()
}
