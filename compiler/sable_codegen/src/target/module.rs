//! The in-memory target module.
//!
//! This is what the backend produces: functions (declared or defined),
//! globals with constant initializers, and the type pool. The module is
//! verified structurally before it is handed downstream; rendering support
//! here exists for the verifier's diagnostic dumps and for tests.

use std::fmt::Write as _;

use super::instr::{
    CalleeRef, Const, FuncId, GlobalId, Instr, ValueData, ValueId, ValueKind,
};
use super::types::{TyKind, TypeId, TypePool};

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<TypeId>,
    pub ret: Option<TypeId>,
}

#[derive(Clone, Debug, Default)]
pub struct BlockData {
    pub name: String,
    pub instrs: Vec<ValueId>,
}

pub struct TargetFunction {
    pub name: String,
    pub sig: Signature,
    /// Statically guaranteed not to unwind; such callees never need a
    /// landingpad at call sites.
    pub no_unwind: bool,
    /// Declared but defined elsewhere (runtime support library).
    pub is_external: bool,
    pub values: Vec<ValueData>,
    pub blocks: Vec<BlockData>,
}

impl TargetFunction {
    /// An external declaration with no body.
    pub fn external(name: impl Into<String>, sig: Signature, no_unwind: bool) -> Self {
        Self {
            name: name.into(),
            sig,
            no_unwind,
            is_external: true,
            values: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    pub fn block(&self, id: super::instr::BlockId) -> &BlockData {
        &self.blocks[id.index()]
    }
}

// ---------------------------------------------------------------------------
// Globals
// ---------------------------------------------------------------------------

/// Constant initializer tree for globals and interned static data.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstInit {
    Int { ty: TypeId, value: i64 },
    Float { ty: TypeId, bits: u64 },
    Null(TypeId),
    Bytes(Vec<u8>),
    GlobalRef(GlobalId),
    FuncRef(FuncId),
    Struct { ty: TypeId, fields: Vec<ConstInit> },
    Array { elem: TypeId, elems: Vec<ConstInit> },
    /// All-zero value of the given type.
    Zero(TypeId),
}

pub struct GlobalData {
    pub name: String,
    pub ty: TypeId,
    pub init: Option<ConstInit>,
    pub constant: bool,
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

pub struct TargetModule {
    pub name: String,
    pub types: TypePool,
    pub functions: Vec<TargetFunction>,
    pub globals: Vec<GlobalData>,
}

impl TargetModule {
    pub fn function(&self, id: FuncId) -> &TargetFunction {
        &self.functions[id.index()]
    }

    pub fn global(&self, id: GlobalId) -> &GlobalData {
        &self.globals[id.index()]
    }

    pub fn function_by_name(&self, name: &str) -> Option<(FuncId, &TargetFunction)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
            .map(|(i, f)| (FuncId::new(u32::try_from(i).unwrap_or(u32::MAX)), f))
    }

    /// Render one function for diagnostics. This is the artifact attached
    /// to verification failures.
    pub fn render_function(&self, id: FuncId) -> String {
        let func = self.function(id);
        let mut out = String::new();
        let params = func
            .sig
            .params
            .iter()
            .map(|&t| self.render_ty(t))
            .collect::<Vec<_>>()
            .join(", ");
        let ret = func
            .sig
            .ret
            .map_or_else(|| "void".to_owned(), |t| self.render_ty(t));
        if func.is_external {
            let _ = writeln!(out, "declare {ret} @{}({params})", func.name);
            return out;
        }
        let _ = writeln!(out, "define {ret} @{}({params}) {{", func.name);
        for (bi, block) in func.blocks.iter().enumerate() {
            let _ = writeln!(out, "{}#{bi}:", block.name);
            for &v in &block.instrs {
                let _ = writeln!(out, "  {}", self.render_value(func, v));
            }
        }
        let _ = writeln!(out, "}}");
        out
    }

    fn render_ty(&self, ty: TypeId) -> String {
        match self.types.kind(ty) {
            TyKind::Int(bits) => format!("i{bits}"),
            TyKind::F32 => "f32".into(),
            TyKind::F64 => "f64".into(),
            TyKind::Ptr => "ptr".into(),
            TyKind::Ref => "ref".into(),
            TyKind::Struct(fields) => {
                let inner = fields
                    .clone()
                    .iter()
                    .map(|&f| self.render_ty(f))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{inner}}}")
            }
            TyKind::Array(elem, len) => format!("[{} x {}]", len, self.render_ty(*elem)),
            TyKind::Func { .. } => "fnptr".into(),
        }
    }

    fn render_operand(&self, func: &TargetFunction, v: ValueId) -> String {
        if v.is_none() {
            return "<none>".into();
        }
        match &func.value(v).kind {
            ValueKind::Const(c) => match c {
                Const::Int { value, .. } => format!("{value}"),
                Const::Float { bits, .. } => format!("0x{bits:x}"),
                Const::Null(_) => "null".into(),
                Const::Global(g) => format!("@{}", self.global(*g).name),
                Const::Function(f) => format!("@{}", self.function(*f).name),
                Const::Undef(_) => "undef".into(),
            },
            _ => format!("%{}", v.raw()),
        }
    }

    fn render_callee(&self, func: &TargetFunction, callee: CalleeRef) -> String {
        match callee {
            CalleeRef::Direct(f) => format!("@{}", self.function(f).name),
            CalleeRef::Indirect(v) => self.render_operand(func, v),
        }
    }

    fn render_value(&self, func: &TargetFunction, v: ValueId) -> String {
        let data = func.value(v);
        let ValueKind::Instr { instr, .. } = &data.kind else {
            return format!("%{} = <non-instr>", v.raw());
        };
        let prefix = data
            .ty
            .map_or(String::new(), |_| format!("%{} = ", v.raw()));
        prefix + &self.render_instr_body(func, instr)
    }

    fn render_instr_body(&self, func: &TargetFunction, instr: &Instr) -> String {
        let op = |v: ValueId| self.render_operand(func, v);
        match instr {
            Instr::Bin { op: o, lhs, rhs } => format!("{o:?} {} {}", op(*lhs), op(*rhs)),
            Instr::ICmp { pred, lhs, rhs } => {
                format!("icmp {pred:?} {} {}", op(*lhs), op(*rhs))
            }
            Instr::FCmp { pred, lhs, rhs } => {
                format!("fcmp {pred:?} {} {}", op(*lhs), op(*rhs))
            }
            Instr::Cast { op: o, value, to } => {
                format!("{o:?} {} to {}", op(*value), self.render_ty(*to))
            }
            Instr::Select {
                cond,
                if_true,
                if_false,
            } => format!("select {} {} {}", op(*cond), op(*if_true), op(*if_false)),
            Instr::Alloca { ty, len } => format!("alloca {} x{len}", self.render_ty(*ty)),
            Instr::Load { ptr, ty, .. } => format!("load {} {}", self.render_ty(*ty), op(*ptr)),
            Instr::Store { value, ptr, .. } => format!("store {} -> {}", op(*value), op(*ptr)),
            Instr::Memset { ptr, value, len } => {
                format!("memset {} {value} x{len}", op(*ptr))
            }
            Instr::Gep {
                base,
                elem_ty,
                index,
            } => format!("gep {} {} {}", self.render_ty(*elem_ty), op(*base), op(*index)),
            Instr::StructGep { base, index, .. } => format!("sgep {} #{index}", op(*base)),
            Instr::ExtractValue { agg, index } => format!("extract {} #{index}", op(*agg)),
            Instr::Phi { incoming, .. } => {
                let inner = incoming
                    .iter()
                    .map(|(b, v)| format!("[bb{}: {}]", b.raw(), op(*v)))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("phi {inner}")
            }
            Instr::Call { callee, args, .. } => {
                let inner = args.iter().map(|&a| op(a)).collect::<Vec<_>>().join(", ");
                format!("call {}({inner})", self.render_callee(func, *callee))
            }
            Instr::Invoke {
                callee,
                args,
                normal,
                unwind,
                ..
            } => {
                let inner = args.iter().map(|&a| op(a)).collect::<Vec<_>>().join(", ");
                format!(
                    "invoke {}({inner}) to bb{} unwind bb{}",
                    self.render_callee(func, *callee),
                    normal.raw(),
                    unwind.raw()
                )
            }
            Instr::Landingpad { cleanup, clauses } => {
                format!("landingpad cleanup={cleanup} clauses={}", clauses.len())
            }
            Instr::Resume { value } => format!("resume {}", op(*value)),
            Instr::Br(bb) => format!("br bb{}", bb.raw()),
            Instr::CondBr {
                cond,
                if_true,
                if_false,
            } => format!(
                "condbr {} bb{} bb{}",
                op(*cond),
                if_true.raw(),
                if_false.raw()
            ),
            Instr::Switch {
                value,
                default,
                cases,
            } => format!(
                "switch {} default bb{} cases={}",
                op(*value),
                default.raw(),
                cases.len()
            ),
            Instr::Ret(Some(v)) => format!("ret {}", op(*v)),
            Instr::Ret(None) => "ret void".into(),
            Instr::Unreachable => "unreachable".into(),
            Instr::CmpXchg {
                ptr, expected, new, ..
            } => format!("cmpxchg {} {} {}", op(*ptr), op(*expected), op(*new)),
            Instr::AtomicRmw { op: o, ptr, value, .. } => {
                format!("atomicrmw {o:?} {} {}", op(*ptr), op(*value))
            }
        }
    }
}
