//! The in-memory target code representation.
//!
//! Object-file emission and linking live downstream; this family only
//! defines the module the backend produces and the structural verifier
//! that gates it.

pub mod instr;
pub mod module;
pub mod types;
pub mod verify;

pub use instr::{
    Args, AtomicOrdering, BinOp, BlockId, CalleeRef, CastOp, Const, FloatPredicate, FuncId,
    GlobalId, Instr, IntPredicate, RmwOp, ValueData, ValueId, ValueKind,
};
pub use module::{BlockData, ConstInit, GlobalData, Signature, TargetFunction, TargetModule};
pub use types::{TyKind, TypeId, TypePool};
pub use verify::{verify_module, VerifyError};
