//! End-to-end tests: build IR fixtures, compile, verify, and execute the
//! generated module through the reference evaluator.

mod arithmetic_tests;
mod atomics_tests;
mod bits_tests;
mod exception_tests;
mod module_tests;
mod rtti_tests;

use crate::config::CodegenConfig;
use crate::eval::{EvalValue, Evaluator};
use crate::testutil::IrBuilder;
use crate::{compile_module, GeneratedModule};

/// Compile a fixture, failing the test on any generation or verification
/// diagnostic.
pub(crate) fn compile(builder: IrBuilder, config: CodegenConfig) -> GeneratedModule {
    let (ir, interner) = builder.finish_with_interner();
    compile_module(&ir, &interner, config, "test_module").expect("compilation failed")
}

pub(crate) fn compile_default(builder: IrBuilder) -> GeneratedModule {
    compile(builder, CodegenConfig::default())
}

/// Run one function of a compiled module with integer arguments.
pub(crate) fn run_int(
    generated: &GeneratedModule,
    name: &str,
    args: &[i64],
) -> Result<i64, crate::eval::EvalError> {
    let mut evaluator = Evaluator::new(&generated.module, &generated.runtime_info)
        .expect("evaluator setup failed");
    let args: Vec<EvalValue> = args.iter().map(|&a| EvalValue::Int(a)).collect();
    evaluator.call_function(name, &args).map(|v| v.as_int())
}
