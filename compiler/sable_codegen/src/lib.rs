//! Native code generation core for the Sable compiler.
//!
//! This crate consumes a fully type-checked, fully lowered [`sable_ir`]
//! module and produces an in-memory target module (functions, globals,
//! type descriptors) that passes structural verification and is ready for
//! downstream emission.
//!
//! # Architecture
//!
//! - **Target family** ([`target`]): the instruction set, module data
//!   structures, type pool, and the structural verifier.
//! - **Module context** ([`codegen::CodeGenerator`]): memoized declaration
//!   registry, interned static data, the runtime support catalogue.
//! - **Function emission** ([`codegen::FunctionGenerationContext`]): the
//!   per-function state machine: blocks, cursor, slots, exception
//!   handlers, frame bookkeeping.
//! - **Driver** ([`codegen::compile_module`]): declare-then-define walk
//!   over the IR, RTTI generation, verification.
//! - **Evaluator** ([`eval::Evaluator`]): reference execution of generated
//!   modules against a host model of the runtime; used by tests.
//!
//! # Debug Environment Variables
//!
//! - `RUST_LOG=sable_codegen=debug`: debug-level tracing (declarations,
//!   descriptors, verification summary).
//! - `RUST_LOG=sable_codegen=trace`: very verbose; follows function
//!   generation step by step.

// Codegen threads many context values through many small functions; the
// counts below are inherent to the domain, not accidental complexity.
#![allow(
    clippy::too_many_arguments,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

pub mod codegen;
pub mod config;
pub mod eval;
pub mod target;

#[cfg(test)]
pub(crate) mod testutil;

#[cfg(test)]
mod tests;

pub use codegen::{compile_module, CodegenError, GeneratedModule};
pub use config::{CodegenConfig, ForeignExceptionMode, MemoryModel};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call multiple times; only the first call installs the
/// subscriber, and only when `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
