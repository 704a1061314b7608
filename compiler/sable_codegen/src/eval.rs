//! Reference evaluator for generated modules.
//!
//! Executes verified target modules directly, modeling the runtime
//! support catalogue on the host: allocation, reference updates, frame
//! bookkeeping, exception unwinding, and the subtype routines. Used by
//! tests to check observable semantics of generated code (and handy when
//! debugging a miscompile by hand).
//!
//! The machine model is deliberately small: a segmented byte memory with
//! tagged 64-bit addresses, scalar values canonicalized to sign-extended
//! 64-bit integers, and single-threaded atomics.

use rustc_hash::FxHashMap;

use crate::codegen::RuntimeInfo;
use crate::codegen::rtti::{TI_CLASS_ID, TI_INSTANCE_SIZE};
use crate::target::{
    BinOp, BlockId, CalleeRef, CastOp, Const, ConstInit, FloatPredicate, FuncId, GlobalId, Instr,
    IntPredicate, RmwOp, TargetModule, TyKind, TypeId, ValueId, ValueKind,
};

// ---------------------------------------------------------------------------
// Values and errors
// ---------------------------------------------------------------------------

/// A runtime value. Pointers and references are encoded integers; pairs
/// carry the two-field results of `cmpxchg` and `landingpad`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EvalValue {
    Int(i64),
    F32(f32),
    F64(f64),
    Pair(i64, i64),
}

impl EvalValue {
    pub fn as_int(self) -> i64 {
        match self {
            Self::Int(v) => v,
            Self::F32(v) => i64::from(v.to_bits()),
            Self::F64(v) => v.to_bits() as i64,
            Self::Pair(a, _) => a,
        }
    }
}

/// User-visible runtime faults the generated code raises.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    Arithmetic,
    Bounds,
    Cast,
    Null,
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("runtime fault: {0:?}")]
    Fault(FaultKind),
    /// A native exception propagating by unwinding; the payload is the
    /// exception object's address.
    #[error("uncaught exception at {0:#x}")]
    Exception(i64),
    #[error("process terminated")]
    Terminated,
    #[error("evaluation not supported: {0}")]
    Unsupported(String),
}

fn unsupported(msg: impl Into<String>) -> EvalError {
    EvalError::Unsupported(msg.into())
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

const FUNC_TAG: i64 = 1 << 62;
/// Type id the unwinder reports for native exceptions.
const NATIVE_TYPEID: i64 = 1;
const FOREIGN_TYPEID: i64 = 2;

#[derive(Default)]
struct Memory {
    allocs: Vec<Vec<u8>>,
}

impl Memory {
    fn new() -> Self {
        // Allocation 0 is reserved so address 0 stays null.
        Self {
            allocs: vec![Vec::new()],
        }
    }

    fn alloc(&mut self, size: usize) -> i64 {
        let id = self.allocs.len() as i64;
        self.allocs.push(vec![0; size]);
        id << 32
    }

    fn slice_mut(&mut self, addr: i64, len: usize) -> Result<&mut [u8], EvalError> {
        let alloc = (addr >> 32) as usize;
        let offset = (addr & 0xffff_ffff) as usize;
        let buf = self
            .allocs
            .get_mut(alloc)
            .ok_or_else(|| unsupported("wild pointer"))?;
        if offset + len > buf.len() {
            return Err(unsupported("out-of-bounds memory access"));
        }
        Ok(&mut buf[offset..offset + len])
    }

    fn read(&mut self, addr: i64, len: usize) -> Result<u64, EvalError> {
        let bytes = self.slice_mut(addr, len)?;
        let mut out = [0u8; 8];
        out[..len].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(out))
    }

    fn write(&mut self, addr: i64, len: usize, value: u64) -> Result<(), EvalError> {
        let bytes = self.slice_mut(addr, len)?;
        bytes.copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }
}

/// Canonicalize an `bits`-wide integer into the 64-bit value model:
/// sign-extended two's complement, except `i1`, which stays 0 or 1 so
/// boolean equality works on the canonical form.
fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits >= 64 {
        value as i64
    } else if bits == 1 {
        (value & 1) as i64
    } else {
        let shift = 64 - bits;
        ((value << shift) as i64) >> shift
    }
}

fn mask_unsigned(value: i64, bits: u32) -> u64 {
    if bits >= 64 {
        value as u64
    } else {
        (value as u64) & ((1u64 << bits) - 1)
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

pub struct Evaluator<'m> {
    module: &'m TargetModule,
    info: &'m RuntimeInfo,
    memory: Memory,
    global_addrs: Vec<i64>,
    global_by_addr: FxHashMap<i64, GlobalId>,
}

impl<'m> Evaluator<'m> {
    /// Materialize the module's globals and stand ready to execute.
    pub fn new(module: &'m TargetModule, info: &'m RuntimeInfo) -> Result<Self, EvalError> {
        let mut memory = Memory::new();
        let mut global_addrs = Vec::with_capacity(module.globals.len());
        let mut global_by_addr = FxHashMap::default();
        for (i, global) in module.globals.iter().enumerate() {
            let size = module.types.size_of(global.ty).max(8) as usize;
            let addr = memory.alloc(size);
            global_addrs.push(addr);
            global_by_addr.insert(addr, GlobalId::new(i as u32));
        }
        let mut eval = Self {
            module,
            info,
            memory,
            global_addrs,
            global_by_addr,
        };
        for (i, global) in module.globals.iter().enumerate() {
            if let Some(init) = &global.init {
                let addr = eval.global_addrs[i];
                eval.write_const(addr, global.ty, init)?;
            }
        }
        Ok(eval)
    }

    fn write_const(&mut self, addr: i64, _ty: TypeId, init: &ConstInit) -> Result<(), EvalError> {
        let module = self.module;
        let types = &module.types;
        match init {
            ConstInit::Zero(_) => Ok(()),
            ConstInit::Int { ty, value } => {
                let len = types.size_of(*ty) as usize;
                self.memory.write(addr, len, *value as u64)
            }
            ConstInit::Float { ty, bits } => {
                let len = types.size_of(*ty) as usize;
                self.memory.write(addr, len, *bits)
            }
            ConstInit::Null(_) => self.memory.write(addr, 8, 0),
            ConstInit::Bytes(bytes) => {
                for (i, &b) in bytes.iter().enumerate() {
                    self.memory.write(addr + i as i64, 1, u64::from(b))?;
                }
                Ok(())
            }
            ConstInit::GlobalRef(g) => {
                let target = self.global_addrs[g.index()];
                self.memory.write(addr, 8, target as u64)
            }
            ConstInit::FuncRef(f) => self
                .memory
                .write(addr, 8, (FUNC_TAG | i64::from(f.raw())) as u64),
            ConstInit::Struct { ty: struct_ty, fields } => {
                for (i, field) in fields.iter().enumerate() {
                    let offset = types.offset_of(*struct_ty, i as u32);
                    let field_ty = types.field_ty(*struct_ty, i as u32);
                    self.write_const(addr + offset as i64, field_ty, field)?;
                }
                Ok(())
            }
            ConstInit::Array { elem, elems } => {
                let elem_size = types.size_of(*elem);
                for (i, e) in elems.iter().enumerate() {
                    self.write_const(addr + (elem_size * i as u64) as i64, *elem, e)?;
                }
                Ok(())
            }
        }
    }

    /// Run a function by symbol name.
    pub fn call_function(
        &mut self,
        name: &str,
        args: &[EvalValue],
    ) -> Result<EvalValue, EvalError> {
        let (id, _) = self
            .module
            .function_by_name(name)
            .ok_or_else(|| unsupported(format!("no function named `{name}`")))?;
        self.run(id, args.to_vec())
    }

    fn run(&mut self, func: FuncId, args: Vec<EvalValue>) -> Result<EvalValue, EvalError> {
        let function = self.module.function(func);
        if function.is_external {
            return self.host_call(&function.name.clone(), &args);
        }
        if function.blocks.is_empty() {
            return Err(unsupported(format!("function `{}` has no body", function.name)));
        }

        let mut frame: Vec<Option<EvalValue>> = vec![None; function.values.len()];
        let mut block = BlockId::new(0);
        let mut prev_block = BlockId::NONE;
        let mut pending_exception: Option<i64> = None;

        'blocks: loop {
            let instrs = function.block(block).instrs.clone();
            for vid in instrs {
                let ValueKind::Instr { instr, .. } = &function.value(vid).kind else {
                    return Err(unsupported("non-instruction listed in a block"));
                };
                let result_ty = function.value(vid).ty;
                let instr = instr.clone();
                match instr {
                    Instr::Br(target) => {
                        prev_block = block;
                        block = target;
                        continue 'blocks;
                    }
                    Instr::CondBr {
                        cond,
                        if_true,
                        if_false,
                    } => {
                        let c = self.value_of(function, &frame, &args, cond)?.as_int();
                        prev_block = block;
                        block = if c != 0 { if_true } else { if_false };
                        continue 'blocks;
                    }
                    Instr::Switch {
                        value,
                        default,
                        cases,
                    } => {
                        let v = self.value_of(function, &frame, &args, value)?.as_int();
                        prev_block = block;
                        block = cases
                            .iter()
                            .find(|(c, _)| *c == v)
                            .map_or(default, |(_, b)| *b);
                        continue 'blocks;
                    }
                    Instr::Ret(Some(v)) => {
                        return self.value_of(function, &frame, &args, v);
                    }
                    Instr::Ret(None) => return Ok(EvalValue::Int(0)),
                    Instr::Unreachable => {
                        return Err(unsupported(format!(
                            "unreachable executed in `{}`",
                            function.name
                        )));
                    }
                    Instr::Resume { value } => {
                        let v = self.value_of(function, &frame, &args, value)?;
                        let record = match v {
                            EvalValue::Pair(record, _) => record,
                            other => other.as_int(),
                        };
                        return Err(EvalError::Exception(record));
                    }
                    Instr::Invoke {
                        callee,
                        args: call_args,
                        normal,
                        unwind,
                        ..
                    } => {
                        let mut actuals = Vec::with_capacity(call_args.len());
                        for &a in &call_args {
                            actuals.push(self.value_of(function, &frame, &args, a)?);
                        }
                        match self.dispatch(function, &frame, &args, callee, actuals) {
                            Ok(value) => {
                                frame[vid.index()] = Some(value);
                                prev_block = block;
                                block = normal;
                                continue 'blocks;
                            }
                            Err(EvalError::Exception(exc)) => {
                                pending_exception = Some(exc);
                                prev_block = block;
                                block = unwind;
                                continue 'blocks;
                            }
                            Err(other) => return Err(other),
                        }
                    }
                    Instr::Landingpad { .. } => {
                        let exc = pending_exception.take().ok_or_else(|| {
                            unsupported("landingpad executed with no pending exception")
                        })?;
                        frame[vid.index()] = Some(EvalValue::Pair(exc, NATIVE_TYPEID));
                    }
                    Instr::Phi { incoming, .. } => {
                        let (_, source) = incoming
                            .iter()
                            .find(|(b, _)| *b == prev_block)
                            .ok_or_else(|| {
                                unsupported("phi has no incoming for the predecessor")
                            })?;
                        let value = self.value_of(function, &frame, &args, *source)?;
                        frame[vid.index()] = Some(value);
                    }
                    other => {
                        let value =
                            self.exec_instr(function, &mut frame, &args, &other, result_ty)?;
                        frame[vid.index()] = value;
                    }
                }
            }
            return Err(unsupported("fell off the end of a block"));
        }
    }

    fn value_of(
        &mut self,
        function: &crate::target::TargetFunction,
        frame: &[Option<EvalValue>],
        args: &[EvalValue],
        v: ValueId,
    ) -> Result<EvalValue, EvalError> {
        match &function.value(v).kind {
            ValueKind::Param(i) => args
                .get(*i as usize)
                .copied()
                .ok_or_else(|| unsupported("missing argument")),
            ValueKind::Const(c) => Ok(self.const_value(*c)),
            ValueKind::Instr { .. } => frame[v.index()]
                .ok_or_else(|| unsupported("value used before definition")),
        }
    }

    fn const_value(&self, c: Const) -> EvalValue {
        match c {
            Const::Int { value, .. } => EvalValue::Int(value),
            Const::Float { ty, bits } => {
                if ty == TypeId::F32 {
                    EvalValue::F32(f32::from_bits(bits as u32))
                } else {
                    EvalValue::F64(f64::from_bits(bits))
                }
            }
            Const::Null(_) => EvalValue::Int(0),
            Const::Global(g) => EvalValue::Int(self.global_addrs[g.index()]),
            Const::Function(f) => EvalValue::Int(FUNC_TAG | i64::from(f.raw())),
            Const::Undef(ty) => {
                if ty == TypeId::F32 {
                    EvalValue::F32(0.0)
                } else if ty == TypeId::F64 {
                    EvalValue::F64(0.0)
                } else {
                    EvalValue::Int(0)
                }
            }
        }
    }

    fn dispatch(
        &mut self,
        function: &crate::target::TargetFunction,
        frame: &[Option<EvalValue>],
        args: &[EvalValue],
        callee: CalleeRef,
        actuals: Vec<EvalValue>,
    ) -> Result<EvalValue, EvalError> {
        match callee {
            CalleeRef::Direct(f) => self.run(f, actuals),
            CalleeRef::Indirect(ptr) => {
                let raw = self.value_of(function, frame, args, ptr)?.as_int();
                if raw & FUNC_TAG == 0 {
                    return Err(unsupported("indirect call through a non-function pointer"));
                }
                let id = FuncId::new((raw & !FUNC_TAG) as u32);
                self.run(id, actuals)
            }
        }
    }

    fn int_bits_of(&self, ty: TypeId) -> u32 {
        match self.module.types.kind(ty) {
            TyKind::Int(bits) => *bits,
            TyKind::Ptr | TyKind::Ref | TyKind::Func { .. } => 64,
            _ => 64,
        }
    }

    #[allow(clippy::too_many_lines)]
    fn exec_instr(
        &mut self,
        function: &crate::target::TargetFunction,
        frame: &mut [Option<EvalValue>],
        args: &[EvalValue],
        instr: &Instr,
        result_ty: Option<TypeId>,
    ) -> Result<Option<EvalValue>, EvalError> {
        match instr {
            Instr::Bin { op, lhs, rhs } => {
                let a = self.value_of(function, frame, args, *lhs)?;
                let b = self.value_of(function, frame, args, *rhs)?;
                Ok(Some(self.exec_bin(*op, a, b, result_ty)?))
            }
            Instr::ICmp { pred, lhs, rhs } => {
                let ty = function.value(*lhs).ty.unwrap_or(TypeId::I64);
                let bits = self.int_bits_of(ty);
                let a = self.value_of(function, frame, args, *lhs)?.as_int();
                let b = self.value_of(function, frame, args, *rhs)?.as_int();
                let (ua, ub) = (mask_unsigned(a, bits), mask_unsigned(b, bits));
                let r = match pred {
                    IntPredicate::Eq => a == b,
                    IntPredicate::Ne => a != b,
                    IntPredicate::Slt => a < b,
                    IntPredicate::Sle => a <= b,
                    IntPredicate::Sgt => a > b,
                    IntPredicate::Sge => a >= b,
                    IntPredicate::Ult => ua < ub,
                    IntPredicate::Ule => ua <= ub,
                    IntPredicate::Ugt => ua > ub,
                    IntPredicate::Uge => ua >= ub,
                };
                Ok(Some(EvalValue::Int(i64::from(r))))
            }
            Instr::FCmp { pred, lhs, rhs } => {
                let a = self.value_of(function, frame, args, *lhs)?;
                let b = self.value_of(function, frame, args, *rhs)?;
                let (x, y) = match (a, b) {
                    (EvalValue::F32(x), EvalValue::F32(y)) => (f64::from(x), f64::from(y)),
                    (EvalValue::F64(x), EvalValue::F64(y)) => (x, y),
                    _ => return Err(unsupported("fcmp on non-float operands")),
                };
                let r = match pred {
                    FloatPredicate::Oeq => x == y,
                    FloatPredicate::Olt => x < y,
                    FloatPredicate::Ole => x <= y,
                    FloatPredicate::Ogt => x > y,
                    FloatPredicate::Oge => x >= y,
                };
                Ok(Some(EvalValue::Int(i64::from(r))))
            }
            Instr::Cast { op, value, to } => {
                let v = self.value_of(function, frame, args, *value)?;
                let src_ty = function.value(*value).ty.unwrap_or(TypeId::I64);
                Ok(Some(self.exec_cast(*op, v, src_ty, *to)?))
            }
            Instr::Select {
                cond,
                if_true,
                if_false,
            } => {
                let c = self.value_of(function, frame, args, *cond)?.as_int();
                Ok(Some(if c != 0 {
                    self.value_of(function, frame, args, *if_true)?
                } else {
                    self.value_of(function, frame, args, *if_false)?
                }))
            }
            Instr::Alloca { ty, len } => {
                let size = (self.module.types.size_of(*ty) as usize).max(1) * (*len).max(1) as usize;
                Ok(Some(EvalValue::Int(self.memory.alloc(size))))
            }
            Instr::Load { ptr, ty, .. } => {
                let addr = self.value_of(function, frame, args, *ptr)?.as_int();
                Ok(Some(self.load_typed(addr, *ty)?))
            }
            Instr::Store { value, ptr, .. } => {
                let v = self.value_of(function, frame, args, *value)?;
                let addr = self.value_of(function, frame, args, *ptr)?.as_int();
                let ty = function.value(*value).ty.unwrap_or(TypeId::I64);
                self.store_typed(addr, ty, v)?;
                Ok(None)
            }
            Instr::Memset { ptr, value, len } => {
                let addr = self.value_of(function, frame, args, *ptr)?.as_int();
                for i in 0..*len {
                    self.memory.write(addr + i as i64, 1, u64::from(*value))?;
                }
                Ok(None)
            }
            Instr::Gep {
                base,
                elem_ty,
                index,
            } => {
                let b = self.value_of(function, frame, args, *base)?.as_int();
                let i = self.value_of(function, frame, args, *index)?.as_int();
                let size = self.module.types.size_of(*elem_ty) as i64;
                Ok(Some(EvalValue::Int(b + i * size)))
            }
            Instr::StructGep {
                base,
                struct_ty,
                index,
            } => {
                let b = self.value_of(function, frame, args, *base)?.as_int();
                let offset = self.module.types.offset_of(*struct_ty, *index) as i64;
                Ok(Some(EvalValue::Int(b + offset)))
            }
            Instr::ExtractValue { agg, index } => {
                let v = self.value_of(function, frame, args, *agg)?;
                match (v, index) {
                    (EvalValue::Pair(a, _), 0) => Ok(Some(EvalValue::Int(a))),
                    (EvalValue::Pair(_, b), 1) => Ok(Some(EvalValue::Int(b))),
                    _ => Err(unsupported("extractvalue on a non-pair value")),
                }
            }
            Instr::Phi { incoming, .. } => {
                // `prev_block` is threaded through run(); phis are executed
                // through this path only via exec_phi.
                let _ = incoming;
                Err(unsupported("phi executed outside block entry"))
            }
            Instr::Call {
                callee,
                args: call_args,
                ..
            } => {
                let mut actuals = Vec::with_capacity(call_args.len());
                for &a in call_args {
                    actuals.push(self.value_of(function, frame, args, a)?);
                }
                self.dispatch(function, frame, args, *callee, actuals)
                    .map(Some)
            }
            Instr::CmpXchg {
                ptr,
                expected,
                new,
                ty,
            } => {
                let addr = self.value_of(function, frame, args, *ptr)?.as_int();
                let exp = self.value_of(function, frame, args, *expected)?.as_int();
                let newv = self.value_of(function, frame, args, *new)?.as_int();
                let len = self.module.types.size_of(*ty) as usize;
                let bits = self.int_bits_of(*ty);
                let old = sign_extend(self.memory.read(addr, len)?, bits);
                let success = old == exp;
                if success {
                    self.memory.write(addr, len, newv as u64)?;
                }
                Ok(Some(EvalValue::Pair(old, i64::from(success))))
            }
            Instr::AtomicRmw { op, ptr, value, ty } => {
                let addr = self.value_of(function, frame, args, *ptr)?.as_int();
                let v = self.value_of(function, frame, args, *value)?.as_int();
                let len = self.module.types.size_of(*ty) as usize;
                let bits = self.int_bits_of(*ty);
                let old = sign_extend(self.memory.read(addr, len)?, bits);
                let new = match op {
                    RmwOp::Xchg => v,
                    RmwOp::Add => old.wrapping_add(v),
                };
                self.memory.write(addr, len, new as u64)?;
                Ok(Some(EvalValue::Int(old)))
            }
            _ => Err(unsupported("unhandled instruction")),
        }
    }

    fn exec_bin(
        &self,
        op: BinOp,
        a: EvalValue,
        b: EvalValue,
        result_ty: Option<TypeId>,
    ) -> Result<EvalValue, EvalError> {
        use BinOp::*;
        match op {
            FAdd | FSub | FMul | FDiv | FRem => {
                let r = |x: f64, y: f64| match op {
                    FAdd => x + y,
                    FSub => x - y,
                    FMul => x * y,
                    FDiv => x / y,
                    _ => x % y,
                };
                match (a, b) {
                    (EvalValue::F32(x), EvalValue::F32(y)) => {
                        Ok(EvalValue::F32(r(f64::from(x), f64::from(y)) as f32))
                    }
                    (EvalValue::F64(x), EvalValue::F64(y)) => Ok(EvalValue::F64(r(x, y))),
                    _ => Err(unsupported("float op on non-float operands")),
                }
            }
            _ => {
                let bits = result_ty.map_or(64, |t| self.int_bits_of(t));
                let (x, y) = (a.as_int(), b.as_int());
                let (ux, uy) = (mask_unsigned(x, bits), mask_unsigned(y, bits));
                let raw: i64 = match op {
                    Add => x.wrapping_add(y),
                    Sub => x.wrapping_sub(y),
                    Mul => x.wrapping_mul(y),
                    SDiv => {
                        if y == 0 {
                            return Err(unsupported("sdiv by zero reached the instruction"));
                        }
                        x.wrapping_div(y)
                    }
                    SRem => {
                        if y == 0 {
                            return Err(unsupported("srem by zero reached the instruction"));
                        }
                        x.wrapping_rem(y)
                    }
                    UDiv => {
                        if uy == 0 {
                            return Err(unsupported("udiv by zero reached the instruction"));
                        }
                        (ux / uy) as i64
                    }
                    URem => {
                        if uy == 0 {
                            return Err(unsupported("urem by zero reached the instruction"));
                        }
                        (ux % uy) as i64
                    }
                    And => x & y,
                    Or => x | y,
                    Xor => x ^ y,
                    Shl | AShr | LShr => {
                        let amount = uy;
                        if amount >= u64::from(bits) {
                            // The catalogue masks shift amounts; reaching
                            // here means the mask was dropped.
                            return Err(unsupported("shift amount exceeds operand width"));
                        }
                        match op {
                            Shl => x.wrapping_shl(amount as u32),
                            AShr => x.wrapping_shr(amount as u32),
                            _ => (ux >> amount) as i64,
                        }
                    }
                    _ => unreachable!(),
                };
                Ok(EvalValue::Int(sign_extend(raw as u64, bits)))
            }
        }
    }

    fn exec_cast(
        &self,
        op: CastOp,
        v: EvalValue,
        src_ty: TypeId,
        to: TypeId,
    ) -> Result<EvalValue, EvalError> {
        let src_bits = self.int_bits_of(src_ty);
        let dst_bits = self.int_bits_of(to);
        let result = match op {
            CastOp::Zext => EvalValue::Int(mask_unsigned(v.as_int(), src_bits) as i64),
            CastOp::Sext => EvalValue::Int(v.as_int()),
            CastOp::Trunc => EvalValue::Int(sign_extend(v.as_int() as u64, dst_bits)),
            CastOp::PtrToInt | CastOp::IntToPtr => EvalValue::Int(v.as_int()),
            CastOp::FpExt => match v {
                EvalValue::F32(x) => EvalValue::F64(f64::from(x)),
                other => other,
            },
            CastOp::FpTrunc => match v {
                EvalValue::F64(x) => EvalValue::F32(x as f32),
                other => other,
            },
            CastOp::SiToFp => {
                let x = v.as_int();
                if to == TypeId::F32 {
                    EvalValue::F32(x as f32)
                } else {
                    EvalValue::F64(x as f64)
                }
            }
            CastOp::UiToFp => {
                let x = mask_unsigned(v.as_int(), src_bits);
                if to == TypeId::F32 {
                    EvalValue::F32(x as f32)
                } else {
                    EvalValue::F64(x as f64)
                }
            }
            CastOp::FpToSi => {
                let x = match v {
                    EvalValue::F32(x) => f64::from(x),
                    EvalValue::F64(x) => x,
                    other => other.as_int() as f64,
                };
                EvalValue::Int(sign_extend(x as i64 as u64, dst_bits))
            }
            CastOp::Bitcast => match (v, self.module.types.kind(to)) {
                (EvalValue::F32(x), TyKind::Int(_)) => {
                    EvalValue::Int(sign_extend(u64::from(x.to_bits()), 32))
                }
                (EvalValue::F64(x), TyKind::Int(_)) => EvalValue::Int(x.to_bits() as i64),
                (EvalValue::Int(x), TyKind::F32) => EvalValue::F32(f32::from_bits(x as u32)),
                (EvalValue::Int(x), TyKind::F64) => EvalValue::F64(f64::from_bits(x as u64)),
                (other, _) => other,
            },
        };
        Ok(result)
    }

    fn load_typed(&mut self, addr: i64, ty: TypeId) -> Result<EvalValue, EvalError> {
        match self.module.types.kind(ty) {
            TyKind::F32 => Ok(EvalValue::F32(f32::from_bits(
                self.memory.read(addr, 4)? as u32,
            ))),
            TyKind::F64 => Ok(EvalValue::F64(f64::from_bits(self.memory.read(addr, 8)?))),
            TyKind::Int(bits) => {
                let bits = *bits;
                let len = ((bits + 7) / 8) as usize;
                Ok(EvalValue::Int(sign_extend(self.memory.read(addr, len)?, bits)))
            }
            TyKind::Ptr | TyKind::Ref | TyKind::Func { .. } => {
                Ok(EvalValue::Int(self.memory.read(addr, 8)? as i64))
            }
            _ => Err(unsupported("aggregate load")),
        }
    }

    fn store_typed(&mut self, addr: i64, ty: TypeId, v: EvalValue) -> Result<(), EvalError> {
        match self.module.types.kind(ty) {
            TyKind::F32 => {
                let bits = match v {
                    EvalValue::F32(x) => u64::from(x.to_bits()),
                    other => other.as_int() as u64,
                };
                self.memory.write(addr, 4, bits)
            }
            TyKind::F64 => {
                let bits = match v {
                    EvalValue::F64(x) => x.to_bits(),
                    other => other.as_int() as u64,
                };
                self.memory.write(addr, 8, bits)
            }
            TyKind::Int(bits) => {
                let len = ((*bits + 7) / 8) as usize;
                self.memory.write(addr, len, v.as_int() as u64)
            }
            TyKind::Ptr | TyKind::Ref | TyKind::Func { .. } => {
                self.memory.write(addr, 8, v.as_int() as u64)
            }
            _ => Err(unsupported("aggregate store")),
        }
    }

    // -----------------------------------------------------------------------
    // Runtime model
    // -----------------------------------------------------------------------

    fn class_of_typeinfo(&self, ti_addr: i64) -> Result<sable_ir::ClassId, EvalError> {
        let global = self
            .global_by_addr
            .get(&ti_addr)
            .ok_or_else(|| unsupported("type-info pointer does not name a descriptor"))?;
        self.info
            .typeinfo_classes
            .get(global)
            .copied()
            .ok_or_else(|| unsupported("descriptor global is not registered"))
    }

    fn typeinfo_field(&mut self, ti_addr: i64, field: u32) -> Result<i64, EvalError> {
        let ti_ty = self.info.typeinfo_ty;
        let offset = self.module.types.offset_of(ti_ty, field) as i64;
        let field_ty = self.module.types.field_ty(ti_ty, field);
        Ok(self.load_typed(ti_addr + offset, field_ty)?.as_int())
    }

    #[allow(clippy::too_many_lines)]
    fn host_call(&mut self, name: &str, args: &[EvalValue]) -> Result<EvalValue, EvalError> {
        let int = |i: usize| args.get(i).map_or(0, |v| v.as_int());
        match name {
            "sable_throw_arithmetic_fault" => Err(EvalError::Fault(FaultKind::Arithmetic)),
            "sable_throw_bounds_fault" => Err(EvalError::Fault(FaultKind::Bounds)),
            "sable_throw_cast_fault" => Err(EvalError::Fault(FaultKind::Cast)),
            "sable_throw_null_fault" => Err(EvalError::Fault(FaultKind::Null)),
            "sable_throw_exception" => Err(EvalError::Exception(int(0))),
            "sable_terminate" => Err(EvalError::Terminated),

            "sable_enter_frame" | "sable_leave_frame" | "sable_set_current_frame"
            | "sable_safepoint" | "sable_init_runtime" | "sable_end_catch"
            | "sable_switch_thread_state_native" | "sable_switch_thread_state_runnable" => {
                Ok(EvalValue::Int(0))
            }

            "sable_update_stack_ref" | "sable_update_heap_ref"
            | "sable_update_volatile_heap_ref" | "sable_update_return_ref" => {
                self.memory.write(int(0), 8, int(1) as u64)?;
                Ok(EvalValue::Int(0))
            }
            "sable_zero_heap_ref" => {
                self.memory.write(int(0), 8, 0)?;
                Ok(EvalValue::Int(0))
            }
            "sable_zero_array_refs" => {
                let obj = int(0);
                let header_ty = self.info.array_header_ty;
                let count_off = self.module.types.offset_of(header_ty, 1) as i64;
                let count = sign_extend(self.memory.read(obj + count_off, 4)?, 32);
                let body = self.array_body_offset();
                for i in 0..count {
                    self.memory.write(obj + body + i * 8, 8, 0)?;
                }
                Ok(EvalValue::Int(0))
            }

            "sable_alloc_instance" => {
                let ti = int(0);
                let slot = int(1);
                let size = self.typeinfo_field(ti, TI_INSTANCE_SIZE)?;
                if size < 0 {
                    return Err(unsupported("instance allocation of an array class"));
                }
                let obj = self.memory.alloc(size as usize);
                self.memory.write(obj, 8, ti as u64)?;
                self.memory.write(slot, 8, obj as u64)?;
                Ok(EvalValue::Int(obj))
            }
            "sable_alloc_array" => {
                let ti = int(0);
                let len = int(1);
                let slot = int(2);
                let elem_size = -self.typeinfo_field(ti, TI_INSTANCE_SIZE)?;
                if elem_size <= 0 {
                    return Err(unsupported("array allocation of a non-array class"));
                }
                let body = self.array_body_offset();
                let obj = self
                    .memory
                    .alloc((body + len * elem_size) as usize);
                self.memory.write(obj, 8, ti as u64)?;
                let header_ty = self.info.array_header_ty;
                let count_off = self.module.types.offset_of(header_ty, 1) as i64;
                self.memory.write(obj + count_off, 4, len as u64)?;
                self.memory.write(slot, 8, obj as u64)?;
                Ok(EvalValue::Int(obj))
            }

            "sable_begin_catch" => Ok(EvalValue::Int(int(0))),
            "sable_get_exception_object" => {
                let exc = int(0);
                let slot = int(1);
                self.memory.write(slot, 8, exc as u64)?;
                Ok(EvalValue::Int(exc))
            }
            "sable_eh_typeid_for" => {
                let native = self.global_addrs
                    [self.module.globals.iter().position(|g| g.name == "sable_native_exception_rtti").unwrap_or(0)];
                Ok(EvalValue::Int(if int(0) == native {
                    NATIVE_TYPEID
                } else {
                    FOREIGN_TYPEID
                }))
            }

            "sable_is_subtype" => {
                let obj_class = self.class_of_typeinfo(int(0))?;
                let dst_class = self.class_of_typeinfo(int(1))?;
                let mut cursor = Some(obj_class);
                let mut result = false;
                while let Some(c) = cursor {
                    if c == dst_class {
                        result = true;
                        break;
                    }
                    cursor = self.info.class_supers[c.index()];
                }
                Ok(EvalValue::Int(i64::from(result)))
            }
            "sable_is_subclass_fast" => {
                let id = self.typeinfo_field(int(0), TI_CLASS_ID)?;
                let (lo, hi) = (int(1), int(2));
                Ok(EvalValue::Int(i64::from(id >= lo && id < hi)))
            }
            "sable_lookup_interface_record" => {
                let (itable, count, id) = (int(0), int(1), int(2));
                let record_size = 16i64; // { i32, i32, ptr } with natural alignment
                let (mut lo, mut hi) = (0i64, count);
                while lo < hi {
                    let mid = (lo + hi) / 2;
                    let mid_id = sign_extend(self.memory.read(itable + mid * record_size, 4)?, 32);
                    if mid_id < id {
                        lo = mid + 1;
                    } else {
                        hi = mid;
                    }
                }
                Ok(EvalValue::Int(itable + lo * record_size))
            }

            "sable_cas_heap_ref" => {
                let (addr, expected, new) = (int(0), int(1), int(2));
                let old = self.memory.read(addr, 8)? as i64;
                let success = old == expected;
                if success {
                    self.memory.write(addr, 8, new as u64)?;
                }
                Ok(EvalValue::Int(i64::from(success)))
            }
            "sable_swap_heap_ref" => {
                let (addr, expected, new, slot) = (int(0), int(1), int(2), int(3));
                let old = self.memory.read(addr, 8)? as i64;
                if old == expected {
                    self.memory.write(addr, 8, new as u64)?;
                }
                self.memory.write(slot, 8, old as u64)?;
                Ok(EvalValue::Int(old))
            }
            "sable_get_and_set_heap_ref" => {
                let (addr, value, slot) = (int(0), int(1), int(2));
                let old = self.memory.read(addr, 8)? as i64;
                self.memory.write(addr, 8, value as u64)?;
                self.memory.write(slot, 8, old as u64)?;
                Ok(EvalValue::Int(old))
            }

            other => Err(unsupported(format!("runtime routine `{other}`"))),
        }
    }

    /// Offset of the first array element past the header, elements aligned
    /// to 8 bytes.
    fn array_body_offset(&self) -> i64 {
        let header = self.module.types.size_of(self.info.array_header_ty) as i64;
        (header + 7) & !7
    }
}
