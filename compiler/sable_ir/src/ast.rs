//! Declarations and the lowered expression tree.
//!
//! Expressions are flattened into an [`ExprArena`] and referenced by
//! [`ExprId`] indices; declarations use their own ID spaces (`ClassId`,
//! `FunId`, ...). All control flow is already primitive: `finally` blocks
//! and suspension points do not exist here, loops are `while`/`do-while`,
//! and try/catch carries catch clauses only.

use rustc_hash::FxHashMap;

use crate::lifetime::Lifetime;
use crate::loc::SourceLoc;
use crate::name::Name;
use crate::types::IrType;

// ---------------------------------------------------------------------------
// ID newtypes
// ---------------------------------------------------------------------------

macro_rules! ir_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// The raw index.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

ir_id! {
    /// Index of a class declaration in [`Module::classes`].
    ClassId
}
ir_id! {
    /// Index of a function declaration in [`Module::functions`].
    FunId
}
ir_id! {
    /// Index of a field within its owning class.
    FieldId
}
ir_id! {
    /// Function-local variable index. Parameters occupy the first indices.
    VarId
}
ir_id! {
    /// Index of an expression in the module's [`ExprArena`].
    ExprId
}

/// A (class, field) pair naming an instance field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: ClassId,
    pub field: FieldId,
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// A compile-time constant. Floats are stored as raw bits so the type is
/// `Eq`/`Hash` and content-addressable by the static-data interner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Unit,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    /// Interned string literal.
    Str(Name),
    Null,
}

// ---------------------------------------------------------------------------
// Intrinsics
// ---------------------------------------------------------------------------

/// The closed catalogue of primitive operations the backend lowers directly
/// to instructions. Anything not listed here reaches the backend as an
/// ordinary call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntrinsicOp {
    // Arithmetic
    Plus,
    Minus,
    Times,
    SignedDiv,
    SignedRem,
    UnsignedDiv,
    UnsignedRem,
    Inc,
    Dec,
    UnaryMinus,
    // Bitwise
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
    Inv,
    // Comparisons
    Not,
    SignedCompareTo,
    UnsignedCompareTo,
    AreEqualByValue,
    Ieee754Equals,
    // Conversions
    SignExtend,
    ZeroExtend,
    IntTruncate,
    FloatTruncate,
    FloatExtend,
    SignedToFloat,
    UnsignedToFloat,
    FloatToSigned,
    Reinterpret,
    // Atomic field operations (carry a `field` on the call site)
    CompareAndSetField,
    CompareAndExchangeField,
    GetAndSetField,
    GetAndAddField,
    // Raw interop
    ReadBits,
    WriteBits,
    ReadPrimitive,
    WritePrimitive,
    GetPointerSize,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// A catch clause. A clause whose class is the module's root class matches
/// any exception and ends dispatch.
#[derive(Clone, Debug)]
pub struct Catch {
    pub class: ClassId,
    pub var: VarId,
    pub body: ExprId,
}

/// One lowered expression. Every expression knows its type and source
/// location; children are arena indices.
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: IrType,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Const(ConstValue),
    GetVar(VarId),
    SetVar {
        var: VarId,
        value: ExprId,
    },
    /// Declare a local in the enclosing scope. Immutable initialized locals
    /// may be bound directly to their value; mutable ones get a slot.
    VarDecl {
        var: VarId,
        ty: IrType,
        mutable: bool,
        init: Option<ExprId>,
    },
    /// Sequence; the value is the last expression's value (or unit).
    Block(Vec<ExprId>),
    GetField {
        receiver: ExprId,
        field: FieldRef,
    },
    SetField {
        receiver: ExprId,
        field: FieldRef,
        value: ExprId,
    },
    /// Read a module-level static field by its index in [`Module::statics`].
    GetStatic(u32),
    SetStatic {
        index: u32,
        value: ExprId,
    },
    Call {
        target: FunId,
        receiver: Option<ExprId>,
        args: Vec<ExprId>,
        /// Dispatch through the vtable/interface table instead of directly.
        virtual_dispatch: bool,
    },
    Intrinsic {
        op: IntrinsicOp,
        /// Present for the atomic field operations.
        field: Option<FieldRef>,
        args: Vec<ExprId>,
    },
    /// Allocate and construct an instance.
    New {
        class: ClassId,
        ctor: FunId,
        args: Vec<ExprId>,
    },
    /// Allocate an array of the given array class.
    NewArray {
        class: ClassId,
        length: ExprId,
    },
    If {
        cond: ExprId,
        then_expr: ExprId,
        else_expr: Option<ExprId>,
    },
    While {
        cond: ExprId,
        body: ExprId,
    },
    DoWhile {
        body: ExprId,
        cond: ExprId,
    },
    /// Jump out of the innermost enclosing loop.
    Break,
    /// Jump to the condition of the innermost enclosing loop.
    Continue,
    Try {
        body: ExprId,
        catches: Vec<Catch>,
    },
    Throw(ExprId),
    Return(Option<ExprId>),
    /// Checked cast. `safe` yields null on failure instead of faulting.
    Cast {
        value: ExprId,
        class: ClassId,
        safe: bool,
    },
    InstanceOf {
        value: ExprId,
        class: ClassId,
        negated: bool,
    },
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

/// Flat expression storage for one module.
#[derive(Default)]
pub struct ExprArena {
    exprs: Vec<Expr>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an expression, returning its id.
    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(u32::try_from(self.exprs.len()).unwrap_or(u32::MAX));
        self.exprs.push(expr);
        id
    }

    /// Fetch an expression by id.
    ///
    /// # Panics
    /// On an out-of-range id; ids are only produced by [`Self::alloc`].
    pub fn get(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// Class-level properties consumed by RTTI generation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassFlags {
    pub is_interface: bool,
    pub is_abstract: bool,
    /// Frozen/immutable instances (reference-counted model).
    pub is_frozen: bool,
    pub has_finalizer: bool,
}

#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub name: Name,
    pub ty: IrType,
    pub is_volatile: bool,
}

#[derive(Clone, Debug)]
pub struct ClassDecl {
    pub name: Name,
    /// `None` only for the root class.
    pub super_class: Option<ClassId>,
    pub interfaces: Vec<ClassId>,
    pub fields: Vec<FieldDecl>,
    /// Open (virtually dispatched) methods declared or overridden here.
    pub methods: Vec<FunId>,
    pub flags: ClassFlags,
    /// `Some` marks an array class of the given element type; such classes
    /// have no declared fields and a negative instance size in RTTI.
    pub element_type: Option<IrType>,
}

/// Function-level properties consumed by call emission.
#[derive(Clone, Copy, Debug, Default)]
pub struct FunctionFlags {
    /// Statically guaranteed not to propagate exceptions. Calls to such
    /// functions never need a landingpad.
    pub no_unwind: bool,
    /// The function must not touch the runtime: no frame, no safepoints,
    /// no thread-state switches. Violations are fatal.
    pub forbid_runtime: bool,
    pub is_abstract: bool,
    /// Participates in virtual dispatch.
    pub is_virtual: bool,
    /// Callable from foreign code; always gets a cleanup landingpad.
    pub exported: bool,
    /// Foreign-to-native bridge: switches thread state on entry/exit under
    /// the thread-confined memory model.
    pub is_bridge: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct Param {
    pub name: Name,
    pub ty: IrType,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: Name,
    /// Owning class for methods and constructors.
    pub owner: Option<ClassId>,
    pub params: Vec<Param>,
    pub ret: IrType,
    /// `None` for external declarations and abstract methods.
    pub body: Option<ExprId>,
    /// The root declaration this overrides, used as the vtable slot key.
    pub overrides: Option<FunId>,
    pub flags: FunctionFlags,
    pub loc: SourceLoc,
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// One compilation unit as handed to the backend.
pub struct Module {
    pub classes: Vec<ClassDecl>,
    pub functions: Vec<Function>,
    /// Module-level (static) fields.
    pub statics: Vec<FieldDecl>,
    pub arena: ExprArena,
    /// Escape-analysis results. Expressions absent from the map are
    /// treated as `Lifetime::Global` (the conservative default).
    pub lifetimes: FxHashMap<ExprId, Lifetime>,
    /// The universal base class; a catch clause of this class matches
    /// unconditionally.
    pub root_class: ClassId,
}

impl Module {
    pub fn class(&self, id: ClassId) -> &ClassDecl {
        &self.classes[id.index()]
    }

    pub fn function(&self, id: FunId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn field(&self, fref: FieldRef) -> &FieldDecl {
        &self.class(fref.class).fields[fref.field.index()]
    }

    /// The lifetime attached to an expression, defaulting to `Global`.
    pub fn lifetime_of(&self, id: ExprId) -> Lifetime {
        self.lifetimes.get(&id).copied().unwrap_or(Lifetime::Global)
    }

    /// Walk the superclass chain from `class` up to the root, inclusive.
    pub fn super_chain(&self, class: ClassId) -> impl Iterator<Item = ClassId> + '_ {
        std::iter::successors(Some(class), move |&c| self.class(c).super_class)
    }

    /// True if `sub` equals `sup` or inherits from it (classes only; for
    /// interface subtyping the backend consults the interface table).
    pub fn is_subclass_of(&self, sub: ClassId, sup: ClassId) -> bool {
        self.super_chain(sub).any(|c| c == sup)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc::SourceLoc;
    use crate::types::IrType;

    fn module_with_chain() -> Module {
        // Any <- A <- B
        let classes = vec![
            ClassDecl {
                name: crate::Name::from_raw(0),
                super_class: None,
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                flags: ClassFlags::default(),
                element_type: None,
            },
            ClassDecl {
                name: crate::Name::from_raw(1),
                super_class: Some(ClassId(0)),
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                flags: ClassFlags::default(),
                element_type: None,
            },
            ClassDecl {
                name: crate::Name::from_raw(2),
                super_class: Some(ClassId(1)),
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                flags: ClassFlags::default(),
                element_type: None,
            },
        ];
        Module {
            classes,
            functions: Vec::new(),
            statics: Vec::new(),
            arena: ExprArena::new(),
            lifetimes: FxHashMap::default(),
            root_class: ClassId(0),
        }
    }

    #[test]
    fn arena_ids_are_dense_and_stable() {
        let mut arena = ExprArena::new();
        let a = arena.alloc(Expr {
            kind: ExprKind::Const(ConstValue::I64(1)),
            ty: IrType::I64,
            loc: SourceLoc::SYNTHETIC,
        });
        let b = arena.alloc(Expr {
            kind: ExprKind::Const(ConstValue::I64(2)),
            ty: IrType::I64,
            loc: SourceLoc::SYNTHETIC,
        });
        assert_eq!(a, ExprId(0));
        assert_eq!(b, ExprId(1));
        assert_eq!(arena.len(), 2);
        assert!(matches!(
            arena.get(a).kind,
            ExprKind::Const(ConstValue::I64(1))
        ));
    }

    #[test]
    fn super_chain_reaches_the_root() {
        let module = module_with_chain();
        let chain: Vec<ClassId> = module.super_chain(ClassId(2)).collect();
        assert_eq!(chain, vec![ClassId(2), ClassId(1), ClassId(0)]);
        assert!(module.is_subclass_of(ClassId(2), ClassId(0)));
        assert!(!module.is_subclass_of(ClassId(1), ClassId(2)));
    }

    #[test]
    fn missing_lifetime_defaults_to_global() {
        let module = module_with_chain();
        assert_eq!(module.lifetime_of(ExprId(7)), Lifetime::Global);
    }
}
