//! Escape-analysis lifetime classes.
//!
//! A prior analysis phase attaches a [`Lifetime`] to every value-producing
//! expression. The backend never recomputes escape information; it only
//! consumes the classification to pick a slot strategy for reference
//! results (see the slot table in the codegen crate, where the fixed and
//! total `Lifetime` → slot-type mapping lives).

/// How long a produced reference may live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Proven not to outlive its scope: the object is allocated inline on
    /// the native stack.
    Stack,
    /// Frame-local: obtained from some call and never leaves the frame.
    Local,
    /// Only returned from the current function.
    ReturnValue,
    /// Stored into a field of a `ReturnValue`/`IndirectReturnValue` object.
    IndirectReturnValue,
    /// Stored into a field of the given incoming parameter.
    ParameterField(u32),
    /// Refers to a global (global object or global variable).
    Global,
    /// Used to throw.
    Throw,
    /// Used as an argument of an outgoing call.
    Argument,
    /// Classification unknown.
    Unknown,
    /// Classification irrelevant (non-reference results, discarded values).
    Irrelevant,
}
