//! The target instruction set and value model.
//!
//! Functions are SSA: every parameter, constant, and instruction result is
//! a [`ValueId`] into the function's value table. Blocks list their
//! instructions in order; the last instruction of every block is a
//! terminator (enforced by the verifier, and during emission by the
//! after-terminator cursor guard).

use smallvec::SmallVec;

use super::types::TypeId;

// ---------------------------------------------------------------------------
// ID newtypes
// ---------------------------------------------------------------------------

macro_rules! target_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Sentinel for "absent".
            pub const NONE: Self = Self(u32::MAX);

            #[inline]
            pub fn new(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub fn is_none(self) -> bool {
                self.0 == u32::MAX
            }

            #[inline]
            pub fn raw(self) -> u32 {
                self.0
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

target_id! {
    /// A value in one function: parameter, constant, or instruction result.
    ValueId
}
target_id! {
    /// A basic block within one function.
    BlockId
}
target_id! {
    /// A function in the target module.
    FuncId
}
target_id! {
    /// A global in the target module.
    GlobalId
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    UDiv,
    URem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    And,
    Or,
    Xor,
    Shl,
    AShr,
    LShr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

/// Ordered floating comparisons (false on NaN operands).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatPredicate {
    Oeq,
    Olt,
    Ole,
    Ogt,
    Oge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CastOp {
    Zext,
    Sext,
    Trunc,
    FpExt,
    FpTrunc,
    SiToFp,
    UiToFp,
    FpToSi,
    Bitcast,
    PtrToInt,
    IntToPtr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomicOrdering {
    Monotonic,
    Acquire,
    Release,
    SeqCst,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RmwOp {
    Xchg,
    Add,
}

/// Call target: a declared function or a computed function pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalleeRef {
    Direct(FuncId),
    Indirect(ValueId),
}

pub type Args = SmallVec<[ValueId; 4]>;

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Instr {
    Bin {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    ICmp {
        pred: IntPredicate,
        lhs: ValueId,
        rhs: ValueId,
    },
    FCmp {
        pred: FloatPredicate,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cast {
        op: CastOp,
        value: ValueId,
        to: TypeId,
    },
    Select {
        cond: ValueId,
        if_true: ValueId,
        if_false: ValueId,
    },
    /// Stack allocation of `len` elements of `ty`. `len == 0` is legal and
    /// produces a dangling-but-unused address (empty frames).
    Alloca {
        ty: TypeId,
        len: u32,
    },
    Load {
        ptr: ValueId,
        ty: TypeId,
        ordering: Option<AtomicOrdering>,
        volatile: bool,
    },
    Store {
        value: ValueId,
        ptr: ValueId,
        ordering: Option<AtomicOrdering>,
        volatile: bool,
    },
    Memset {
        ptr: ValueId,
        value: u8,
        len: u64,
    },
    /// Pointer arithmetic: `base + index * size_of(elem_ty)`.
    Gep {
        base: ValueId,
        elem_ty: TypeId,
        index: ValueId,
    },
    /// Address of field `index` of a `struct_ty` value at `base`.
    StructGep {
        base: ValueId,
        struct_ty: TypeId,
        index: u32,
    },
    ExtractValue {
        agg: ValueId,
        index: u32,
    },
    Phi {
        ty: TypeId,
        incoming: Vec<(BlockId, ValueId)>,
    },
    Call {
        callee: CalleeRef,
        sig: TypeId,
        args: Args,
    },
    Invoke {
        callee: CalleeRef,
        sig: TypeId,
        args: Args,
        normal: BlockId,
        unwind: BlockId,
    },
    /// Unwind entry point. Result is `{ Ptr exception_record, i32 type_id }`.
    /// A `None` clause is catch-all.
    Landingpad {
        cleanup: bool,
        clauses: Vec<Option<GlobalId>>,
    },
    Resume {
        value: ValueId,
    },
    Br(BlockId),
    CondBr {
        cond: ValueId,
        if_true: BlockId,
        if_false: BlockId,
    },
    Switch {
        value: ValueId,
        default: BlockId,
        cases: Vec<(i64, BlockId)>,
    },
    Ret(Option<ValueId>),
    Unreachable,
    /// Sequentially-consistent compare-exchange.
    /// Result is `{ ty old_value, i1 success }`.
    CmpXchg {
        ptr: ValueId,
        expected: ValueId,
        new: ValueId,
        ty: TypeId,
    },
    AtomicRmw {
        op: RmwOp,
        ptr: ValueId,
        value: ValueId,
        ty: TypeId,
    },
}

impl Instr {
    /// True for instructions that end a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Br(_)
                | Self::CondBr { .. }
                | Self::Switch { .. }
                | Self::Ret(_)
                | Self::Unreachable
                | Self::Resume { .. }
                | Self::Invoke { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A compile-time constant value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Const {
    Int { ty: TypeId, value: i64 },
    Float { ty: TypeId, bits: u64 },
    /// Null of a pointer or reference type.
    Null(TypeId),
    Global(GlobalId),
    Function(FuncId),
    /// Unspecified value; produced only on unreachable paths.
    Undef(TypeId),
}

#[derive(Clone, Debug)]
pub enum ValueKind {
    /// The `index`-th parameter of the function.
    Param(u32),
    Const(Const),
    Instr { block: BlockId, instr: Instr },
}

/// One entry in a function's value table.
#[derive(Clone, Debug)]
pub struct ValueData {
    /// Result type; `None` for void results and terminators.
    pub ty: Option<TypeId>,
    pub kind: ValueKind,
}
