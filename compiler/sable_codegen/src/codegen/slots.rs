//! Slot strategies and the per-function variable table.
//!
//! Reference-producing calls need a frame slot for their result so the
//! collector's root scan sees the reference the moment it exists. The
//! strategy is picked from the expression's [`Lifetime`]; the mapping is
//! fixed and total.

use rustc_hash::FxHashMap;

use sable_ir::{Lifetime, VarId};

use crate::target::{TypeId, ValueId};

// ---------------------------------------------------------------------------
// Slot strategy
// ---------------------------------------------------------------------------

/// Where a call's reference result lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotType {
    /// A fresh stack slot: the object never escapes the frame.
    Stack,
    /// A frame-local arena slot could be used.
    Arena,
    /// The caller's own return slot.
    Return,
    /// The return slot, if it happens to be an arena.
    ReturnIfArena,
    /// A parameter's slot, if it happens to be an arena.
    ParamIfArena(u32),
    /// A fresh anonymous frame slot.
    Anonymous,
    /// No strategy; selecting a slot from this is a fatal error.
    Unknown,
}

/// The fixed, total `Lifetime` → `SlotType` table.
pub fn slot_type(lifetime: Lifetime) -> SlotType {
    match lifetime {
        Lifetime::Stack => SlotType::Stack,
        Lifetime::Local => SlotType::Arena,
        Lifetime::ReturnValue => SlotType::Anonymous,
        Lifetime::IndirectReturnValue => SlotType::ReturnIfArena,
        Lifetime::ParameterField(i) => SlotType::ParamIfArena(i),
        Lifetime::Global | Lifetime::Throw | Lifetime::Argument => SlotType::Anonymous,
        Lifetime::Unknown | Lifetime::Irrelevant => SlotType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// VariableManager
// ---------------------------------------------------------------------------

/// How one source variable is materialized.
#[derive(Clone, Copy, Debug)]
pub enum VariableRecord {
    /// Stack slot; mutable variables and everything GC-visible.
    Slot {
        address: ValueId,
        ty: TypeId,
        is_var: bool,
    },
    /// Immutable binding to an SSA value; no memory traffic.
    Value { value: ValueId },
}

/// Per-function table mapping source variables to storage.
#[derive(Default)]
pub struct VariableManager {
    records: Vec<VariableRecord>,
    map: FxHashMap<VarId, usize>,
    /// Leading GC slots holding parameters; already rooted by the caller,
    /// so frame enter/leave skips them.
    pub skip_slots: u32,
    /// Running count of anonymous result slots, for diagnostics.
    pub anonymous_slots: u32,
}

impl VariableManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, var: Option<VarId>, record: VariableRecord) -> usize {
        let index = self.records.len();
        self.records.push(record);
        if let Some(var) = var {
            self.map.insert(var, index);
        }
        index
    }

    pub fn record(&self, index: usize) -> VariableRecord {
        self.records[index]
    }

    pub fn index_of(&self, var: VarId) -> Option<usize> {
        self.map.get(&var).copied()
    }

    /// Slot address of a variable.
    ///
    /// # Panics
    /// When the variable is an SSA binding; only slot variables have
    /// addresses.
    pub fn address_of(&self, index: usize) -> ValueId {
        match self.records[index] {
            VariableRecord::Slot { address, .. } => address,
            VariableRecord::Value { .. } => {
                panic!("address of an immutable SSA binding requested")
            }
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.map.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
