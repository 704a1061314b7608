//! Per-compilation-unit configuration.
//!
//! The memory model and the table-construction policy constants are chosen
//! once per unit and never change during generation. The numeric thresholds
//! here are tuned policy, not derived truths, so they are configuration
//! rather than hard-coded values.

use sable_ir::IrType;

/// Which ownership model heap-reference stores and interop calls follow.
///
/// Selected once per compilation unit; alters, per call site, whether heap
/// stores route through reference-aware helpers and whether bridge
/// functions switch thread state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryModel {
    /// Reference-counted, freeze-based sharing. Heap stores go through the
    /// count-maintaining helper; stack slots are plain stores; no thread
    /// states exist.
    RcFrozen,
    /// Thread-confined heap with explicit thread states. All reference
    /// stores route through helpers, bridge functions switch state on
    /// entry/exit, and reference-typed atomics use the reference-aware
    /// runtime routines.
    ThreadConfined,
}

/// What a filtering handler does with a foreign (non-native) exception.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForeignExceptionMode {
    /// Terminate the process on any foreign exception.
    Terminate,
    /// Wrap recognized foreign exceptions into a native exception object
    /// and rethrow; terminate on unrecognized ones.
    Wrap,
}

#[derive(Clone, Debug)]
pub struct CodegenConfig {
    pub memory_model: MemoryModel,
    pub foreign_exception_mode: ForeignExceptionMode,
    /// Bit budget for the direct-indexed interface table: candidate sizes
    /// are powers of two up to `1 << max_bits_per_color`. Beyond it the
    /// sorted fallback is used.
    pub max_bits_per_color: u32,
    /// Enables O(1) class-range subtype checks and the optimistic
    /// interface-table fast path. When off, every subtype query goes
    /// through the generic runtime routine.
    pub hierarchy_analysis: bool,
    /// Field types that can never participate in a reference cycle.
    /// Classes whose fields all belong to this set are flagged acyclic.
    pub acyclic_field_types: Vec<IrType>,
    /// Emit explicit null checks before instance member access. Off by
    /// default: the front end proves non-nullness and lowers the nullable
    /// paths itself.
    pub explicit_null_checks: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            memory_model: MemoryModel::ThreadConfined,
            foreign_exception_mode: ForeignExceptionMode::Terminate,
            max_bits_per_color: 7,
            hierarchy_analysis: true,
            acyclic_field_types: vec![
                IrType::Bool,
                IrType::I8,
                IrType::I16,
                IrType::I32,
                IrType::I64,
                IrType::F32,
                IrType::F64,
                IrType::RawPtr,
            ],
            explicit_null_checks: false,
        }
    }
}
