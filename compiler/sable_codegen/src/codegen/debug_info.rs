//! Debug-information sink.
//!
//! The core supplies (source location, lexical scope) pairs and receives
//! opaque handles to attach to instructions and functions. Formatting the
//! information into any particular debug format happens downstream; this
//! sink only records.

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sable_ir::SourceLoc;

use crate::target::FuncId;

/// Opaque handle to a recorded source location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocationHandle(u32);

/// Opaque handle to a recorded lexical scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeHandle(u32);

/// Records locations and scopes handed over by the emitter.
#[derive(Default)]
pub struct DebugInfoSink {
    locations: Mutex<LocationTable>,
    scopes: Mutex<Vec<String>>,
    function_scopes: DashMap<FuncId, ScopeHandle>,
}

#[derive(Default)]
struct LocationTable {
    entries: Vec<SourceLoc>,
    map: FxHashMap<SourceLoc, LocationHandle>,
}

impl DebugInfoSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a source location.
    pub fn location(&self, loc: SourceLoc) -> LocationHandle {
        let mut table = self.locations.lock();
        if let Some(&h) = table.map.get(&loc) {
            return h;
        }
        let h = LocationHandle(u32::try_from(table.entries.len()).unwrap_or(u32::MAX));
        table.entries.push(loc);
        table.map.insert(loc, h);
        h
    }

    /// Open a function scope and remember it for the function.
    pub fn function_scope(&self, func: FuncId, name: &str) -> ScopeHandle {
        let mut scopes = self.scopes.lock();
        let h = ScopeHandle(u32::try_from(scopes.len()).unwrap_or(u32::MAX));
        scopes.push(name.to_owned());
        drop(scopes);
        self.function_scopes.insert(func, h);
        h
    }

    pub fn scope_of(&self, func: FuncId) -> Option<ScopeHandle> {
        self.function_scopes.get(&func).map(|e| *e.value())
    }

    /// Number of distinct locations recorded so far.
    pub fn location_count(&self) -> usize {
        self.locations.lock().entries.len()
    }
}
