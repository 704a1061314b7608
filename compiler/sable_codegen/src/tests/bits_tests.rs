//! Raw bit-field read/write lowering, driven straight through the
//! generation context.

use pretty_assertions::assert_eq;

use sable_ir::{IntrinsicOp, Lifetime};

use crate::codegen::intrinsics::evaluate_intrinsic;
use crate::codegen::{CodeGenerator, ExceptionHandler, FunctionOptions};
use crate::config::CodegenConfig;
use crate::eval::Evaluator;
use crate::target::{verify_module, Signature, TypeId, ValueId};
use crate::testutil::IrBuilder;

/// Build a module with one hand-emitted function and run it.
fn run_emitted(
    code: impl FnOnce(&mut crate::codegen::FunctionGenerationContext<'_, '_>) -> ValueId,
) -> i64 {
    let (ir, interner) = IrBuilder::new().finish_with_interner();
    let codegen = CodeGenerator::new(&ir, &interner, CodegenConfig::default());
    let sig = Signature {
        params: Vec::new(),
        ret: Some(TypeId::I64),
    };
    codegen.generate_function("bits_fixture", sig, true, FunctionOptions::default(), |fgc| {
        let result = code(fgc);
        fgc.ret(Some(result));
    });
    let (module, info) = codegen.finish("bits_test");
    assert!(verify_module(&module).is_empty(), "fixture failed to verify");
    let mut evaluator = Evaluator::new(&module, &info).expect("evaluator setup");
    evaluator
        .call_function("bits_fixture", &[])
        .expect("evaluation failed")
        .as_int()
}

fn bits_args(
    fgc: &mut crate::codegen::FunctionGenerationContext<'_, '_>,
    ptr: ValueId,
    offset: i64,
    size: i64,
    tail: i64,
) -> [ValueId; 4] {
    let offset = fgc.const_i64(offset);
    let size = fgc.const_i64(size);
    let tail = fgc.const_i64(tail);
    [ptr, offset, size, tail]
}

#[test]
fn written_bits_read_back_at_a_sub_byte_offset() {
    let value = 0b101_0101;
    let result = run_emitted(|fgc| {
        let ptr = fgc.alloca(TypeId::I64);
        fgc.memset(ptr, 0, 8);
        let payload = fgc.const_i64(value);
        let write_args = {
            let a = bits_args(fgc, ptr, 5, 7, 0);
            [a[0], a[1], a[2], payload]
        };
        evaluate_intrinsic(
            fgc,
            IntrinsicOp::WriteBits,
            &write_args,
            TypeId::I64,
            &ExceptionHandler::None,
            Lifetime::Irrelevant,
            None,
            None,
        );
        let read_args = bits_args(fgc, ptr, 5, 7, 0);
        evaluate_intrinsic(
            fgc,
            IntrinsicOp::ReadBits,
            &read_args,
            TypeId::I64,
            &ExceptionHandler::None,
            Lifetime::Irrelevant,
            None,
            None,
        )
    });
    assert_eq!(result, value);
}

#[test]
fn writing_preserves_the_surrounding_bits() {
    // Fill the container with ones, clear bits [5, 12), and check that
    // only that range changed.
    let result = run_emitted(|fgc| {
        let ptr = fgc.alloca(TypeId::I64);
        fgc.memset(ptr, 0xff, 8);
        let zero = fgc.const_i64(0);
        let args = {
            let a = bits_args(fgc, ptr, 5, 7, 0);
            [a[0], a[1], a[2], zero]
        };
        evaluate_intrinsic(
            fgc,
            IntrinsicOp::WriteBits,
            &args,
            TypeId::I64,
            &ExceptionHandler::None,
            Lifetime::Irrelevant,
            None,
            None,
        );
        fgc.load(ptr, TypeId::I64)
    });
    let expected = !(0x7fi64 << 5);
    assert_eq!(result, expected);
}

#[test]
fn signed_reads_sign_extend_the_field() {
    let result = run_emitted(|fgc| {
        let ptr = fgc.alloca(TypeId::I64);
        fgc.memset(ptr, 0, 8);
        // Store 0b1111 into a 4-bit field: as signed, that is -1.
        let payload = fgc.const_i64(0b1111);
        let write_args = {
            let a = bits_args(fgc, ptr, 3, 4, 0);
            [a[0], a[1], a[2], payload]
        };
        evaluate_intrinsic(
            fgc,
            IntrinsicOp::WriteBits,
            &write_args,
            TypeId::I64,
            &ExceptionHandler::None,
            Lifetime::Irrelevant,
            None,
            None,
        );
        let read_args = bits_args(fgc, ptr, 3, 4, 1);
        evaluate_intrinsic(
            fgc,
            IntrinsicOp::ReadBits,
            &read_args,
            TypeId::I64,
            &ExceptionHandler::None,
            Lifetime::Irrelevant,
            None,
            None,
        )
    });
    assert_eq!(result, -1);
}

#[test]
fn byte_aligned_fields_take_the_unpadded_path() {
    let result = run_emitted(|fgc| {
        let ptr = fgc.alloca(TypeId::I64);
        fgc.memset(ptr, 0, 8);
        let payload = fgc.const_i64(0xab);
        let write_args = {
            let a = bits_args(fgc, ptr, 8, 8, 0);
            [a[0], a[1], a[2], payload]
        };
        evaluate_intrinsic(
            fgc,
            IntrinsicOp::WriteBits,
            &write_args,
            TypeId::I64,
            &ExceptionHandler::None,
            Lifetime::Irrelevant,
            None,
            None,
        );
        fgc.load(ptr, TypeId::I64)
    });
    assert_eq!(result, 0xab00);
}
