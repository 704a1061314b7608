//! Sable IR - the lowered program representation consumed by the backend.
//!
//! This crate contains the data structures handed to code generation by the
//! front end:
//! - Interned identifiers ([`Name`], [`StringInterner`])
//! - Source locations ([`SourceLoc`])
//! - Types ([`IrType`])
//! - Declarations (classes, fields, functions)
//! - The lowered expression tree ([`Expr`], [`ExprArena`])
//! - Escape-analysis results ([`Lifetime`])
//!
//! # Preconditions
//!
//! The tree is fully type-checked and fully lowered before it reaches this
//! crate: every expression carries its type, `finally` blocks and suspension
//! points have been rewritten into primitive loops/branches/calls, and
//! try/catch carries catch clauses only. Several of these preconditions are
//! unrepresentable here by construction (e.g. [`ast::Expr`] has no finally
//! field); the rest are fatal when violated downstream.
//!
//! # Design Philosophy
//!
//! - **Intern Everything**: Strings → `Name(u32)`
//! - **Flatten Everything**: No `Box<Expr>`, use `ExprId(u32)` indices

pub mod ast;
mod interner;
mod lifetime;
mod loc;
mod name;
mod types;

pub use ast::{
    Catch, ClassDecl, ClassFlags, ClassId, ConstValue, Expr, ExprArena, ExprId, ExprKind,
    FieldDecl, FieldId, FieldRef, FunId, Function, FunctionFlags, IntrinsicOp, Module, Param,
    VarId,
};
pub use interner::StringInterner;
pub use lifetime::Lifetime;
pub use loc::SourceLoc;
pub use name::Name;
pub use types::IrType;
