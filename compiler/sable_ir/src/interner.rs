//! String interner backing [`Name`].
//!
//! Shared across the whole compilation: the front end interns identifiers
//! while building the IR, the backend resolves them for symbol names and
//! diagnostics. Interning is thread-safe so independent functions can be
//! compiled concurrently while resolving names.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::name::Name;

/// Thread-safe string interner.
///
/// `intern` returns a stable [`Name`]; `lookup` resolves it back. Resolved
/// strings are owned by the interner and returned by value to keep the lock
/// scope minimal.
#[derive(Default)]
pub struct StringInterner {
    inner: Mutex<InternerInner>,
}

#[derive(Default)]
struct InternerInner {
    strings: Vec<String>,
    map: FxHashMap<String, Name>,
}

impl StringInterner {
    /// Create an empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its stable [`Name`].
    pub fn intern(&self, s: &str) -> Name {
        let mut inner = self.inner.lock();
        if let Some(&name) = inner.map.get(s) {
            return name;
        }
        let name = Name::from_raw(u32::try_from(inner.strings.len()).unwrap_or(u32::MAX));
        inner.strings.push(s.to_owned());
        inner.map.insert(s.to_owned(), name);
        name
    }

    /// Resolve a [`Name`] back to its string.
    ///
    /// Returns an empty string for the `NONE` sentinel.
    pub fn lookup(&self, name: Name) -> String {
        if name.is_none() {
            return String::new();
        }
        let inner = self.inner.lock();
        inner
            .strings
            .get(name.raw() as usize)
            .cloned()
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
