//! The code generation core: module context, per-function emission,
//! exception propagation, dispatch tables, RTTI, and intrinsic lowering.

pub mod context;
pub mod debug_info;
pub mod declarations;
pub mod driver;
pub mod exceptions;
pub mod function_gen;
pub mod intrinsics;
pub mod rtti;
pub mod runtime_decl;
pub mod slots;
pub mod stack_locals;

pub use context::{Callable, CodeGenerator, CommonTypes, RuntimeInfo};
pub use driver::{compile_module, CodegenError, GeneratedModule};
pub use exceptions::{CatchDispatch, ExceptionHandler};
pub use function_gen::{FunctionGenerationContext, FunctionOptions};
pub use rtti::{interface_table_skeleton, RttiGenerator, TypeFlags};
pub use slots::{slot_type, SlotType, VariableManager, VariableRecord};
