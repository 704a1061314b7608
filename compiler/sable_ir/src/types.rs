//! IR-level types.
//!
//! These are the *source*-side types attached to every expression by the
//! type checker. The backend maps them onto target storage types; the key
//! distinction it cares about is reference-bearing (`Class`) versus scalar.

use crate::ast::ClassId;

/// The type of an IR expression or declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IrType {
    /// No value. Functions returning `Unit` lower to void returns.
    Unit,
    /// `never` - expression does not produce control flow to its parent.
    Nothing,
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Raw platform pointer (interop). Not tracked by the collector.
    RawPtr,
    /// Heap object reference. Always tracked for GC root scanning.
    Class(ClassId),
}

impl IrType {
    /// True for heap references the collector must be able to see.
    #[inline]
    pub fn is_reference(self) -> bool {
        matches!(self, Self::Class(_))
    }

    /// True for floating-point types.
    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Bit width of an integer type, `None` otherwise. `Bool` is 1 bit.
    pub fn int_bits(self) -> Option<u32> {
        match self {
            Self::Bool => Some(1),
            Self::I8 => Some(8),
            Self::I16 => Some(16),
            Self::I32 => Some(32),
            Self::I64 => Some(64),
            _ => None,
        }
    }
}
