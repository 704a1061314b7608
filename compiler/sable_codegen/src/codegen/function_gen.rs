//! Per-function emission state machine.
//!
//! A [`FunctionGenerationContext`] owns the body of exactly one function
//! while it is being generated: the ordered block list, the insertion
//! cursor, the slot table, and the frame bookkeeping. The block skeleton
//! is fixed:
//!
//! ```text
//! prologue -> locals_init -> stack_locals_init -> entry -> body... -> epilogue
//!                                   cleanup_landingpad (unwind edges only)
//! ```
//!
//! The cursor carries an after-terminator flag: emitting past a terminator
//! silently opens a fresh unreachable block instead of producing a
//! malformed double-terminated one. Returns funnel through a shared
//! epilogue phi; returning twice from one block is a fatal error, as is an
//! unwindable call with no active exception handler.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use sable_ir::{FunId, Lifetime, VarId};

use crate::config::MemoryModel;
use crate::target::{
    Args, AtomicOrdering, BinOp, BlockData, BlockId, CalleeRef, CastOp, Const, FloatPredicate,
    FuncId, GlobalId, Instr, IntPredicate, RmwOp, Signature, TypeId, ValueData, ValueId, ValueKind,
};

use super::context::{Callable, CodeGenerator};
use super::exceptions::ExceptionHandler;
use super::slots::{slot_type, SlotType, VariableManager, VariableRecord};
use super::stack_locals::StackLocalsState;

/// Slots reserved at the front of the frame for the runtime's frame
/// overlay; the slot counter starts past them.
pub const FRAME_OVERLAY_SLOT_COUNT: u32 = 2;

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// The mutable position instructions are inserted at: a block plus the
/// after-terminator flag that guards against emission into a finished
/// block.
#[derive(Clone, Copy, Debug)]
struct PositionHolder {
    block: BlockId,
    after_terminator: bool,
}

/// One recorded caller-unwind invoke, kept so the pair can be relaxed to a
/// plain call when the cleanup landingpad turns out to be unnecessary.
struct InvokeRecord {
    value: ValueId,
    success: BlockId,
}

/// Per-function toggles fixed at construction.
#[derive(Clone, Copy, Debug, Default)]
pub struct FunctionOptions {
    /// Foreign-to-native bridge: switch thread state on entry/exit.
    pub switch_to_runnable: bool,
    pub need_safepoint: bool,
    /// Callable from foreign code; always keeps the cleanup landingpad.
    pub exported: bool,
    /// The function must not touch the runtime at all.
    pub forbid_runtime: bool,
    /// The declared signature carries a trailing result-slot parameter.
    pub returns_ref: bool,
}

// ---------------------------------------------------------------------------
// FunctionGenerationContext
// ---------------------------------------------------------------------------

pub struct FunctionGenerationContext<'a, 'ir> {
    pub codegen: &'a CodeGenerator<'ir>,
    pub vars: VariableManager,
    pub stack_locals: StackLocalsState,
    pub needs_runtime_init: bool,

    func: FuncId,
    name: String,
    sig: Signature,
    options: FunctionOptions,
    switch_to_runnable: bool,
    need_safepoint: bool,

    values: Vec<ValueData>,
    blocks: Vec<BlockData>,
    const_cache: FxHashMap<Const, ValueId>,

    prologue_bb: BlockId,
    locals_init_bb: BlockId,
    stack_locals_init_bb: BlockId,
    entry_bb: BlockId,
    cleanup_landingpad_bb: BlockId,
    epilogue_bb: BlockId,

    cursor: PositionHolder,
    slot_count: u32,
    local_allocs: u32,
    slots_base: ValueId,
    return_slot: Option<ValueId>,
    returns: Vec<(BlockId, Option<ValueId>)>,
    invoke_records: Vec<InvokeRecord>,
    finished: bool,
}

impl<'a, 'ir> FunctionGenerationContext<'a, 'ir> {
    pub fn new(
        codegen: &'a CodeGenerator<'ir>,
        func: FuncId,
        sig: Signature,
        options: FunctionOptions,
    ) -> Self {
        let name = codegen.function_name(func);
        trace!(function = %name, "starting function generation");

        let mut values = Vec::new();
        for (i, &ty) in sig.params.iter().enumerate() {
            values.push(ValueData {
                ty: Some(ty),
                kind: ValueKind::Param(u32::try_from(i).unwrap_or(u32::MAX)),
            });
        }

        let thread_confined = codegen.config.memory_model == MemoryModel::ThreadConfined;
        let mut fgc = Self {
            codegen,
            vars: VariableManager::new(),
            stack_locals: StackLocalsState::new(),
            needs_runtime_init: false,
            func,
            name,
            sig,
            options,
            switch_to_runnable: thread_confined && options.switch_to_runnable,
            need_safepoint: thread_confined && options.need_safepoint,
            values,
            blocks: Vec::new(),
            const_cache: FxHashMap::default(),
            prologue_bb: BlockId::NONE,
            locals_init_bb: BlockId::NONE,
            stack_locals_init_bb: BlockId::NONE,
            entry_bb: BlockId::NONE,
            cleanup_landingpad_bb: BlockId::NONE,
            epilogue_bb: BlockId::NONE,
            cursor: PositionHolder {
                block: BlockId::NONE,
                after_terminator: false,
            },
            slot_count: FRAME_OVERLAY_SLOT_COUNT,
            local_allocs: 0,
            slots_base: ValueId::NONE,
            return_slot: None,
            returns: Vec::new(),
            invoke_records: Vec::new(),
            finished: false,
        };

        fgc.prologue_bb = fgc.append_block("prologue");
        fgc.locals_init_bb = fgc.append_block("locals_init");
        fgc.stack_locals_init_bb = fgc.append_block("stack_locals_init");
        fgc.entry_bb = fgc.append_block("entry");
        fgc.cleanup_landingpad_bb = fgc.append_block("cleanup_landingpad");
        fgc.epilogue_bb = fgc.append_block("epilogue");
        fgc.cursor = PositionHolder {
            block: fgc.entry_bb,
            after_terminator: false,
        };
        fgc
    }

    pub fn func_id(&self) -> FuncId {
        self.func
    }

    pub fn return_ty(&self) -> Option<TypeId> {
        self.sig.ret
    }

    pub fn return_slot(&self) -> Option<ValueId> {
        self.return_slot
    }

    pub fn forbid_runtime(&self) -> bool {
        self.options.forbid_runtime
    }

    pub fn cleanup_landingpad(&self) -> BlockId {
        self.cleanup_landingpad_bb
    }

    pub(crate) fn stack_locals_init_block(&self) -> BlockId {
        self.stack_locals_init_bb
    }

    pub(crate) fn slots_base(&self) -> ValueId {
        self.slots_base
    }

    // -----------------------------------------------------------------------
    // Blocks and cursor
    // -----------------------------------------------------------------------

    fn append_block(&mut self, name: &str) -> BlockId {
        let id = BlockId::new(u32::try_from(self.blocks.len()).unwrap_or(u32::MAX));
        self.blocks.push(BlockData {
            name: name.to_owned(),
            instrs: Vec::new(),
        });
        id
    }

    /// Open a new body block.
    pub fn basic_block(&mut self, name: &str) -> BlockId {
        self.append_block(name)
    }

    pub fn current_block(&self) -> BlockId {
        self.cursor.block
    }

    /// True iff the position is located right after a terminator.
    pub fn is_after_terminator(&self) -> bool {
        self.cursor.after_terminator
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        let after_terminator = self.blocks[block.index()]
            .instrs
            .last()
            .is_some_and(|&v| match &self.values[v.index()].kind {
                ValueKind::Instr { instr, .. } => instr.is_terminator(),
                _ => false,
            });
        self.cursor = PositionHolder {
            block,
            after_terminator,
        };
    }

    /// Temporarily redirect emission into `block`, restoring the previous
    /// position afterwards.
    pub fn appending_to<R>(&mut self, block: BlockId, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.cursor;
        self.position_at_end(block);
        let result = f(self);
        self.cursor = saved;
        result
    }

    fn push_instr(&mut self, instr: Instr, ty: Option<TypeId>) -> ValueId {
        if self.cursor.after_terminator {
            // Emission past a terminator lands in a fresh unreachable
            // block rather than corrupting the finished one.
            let bb = self.append_block("unreachable");
            self.cursor = PositionHolder {
                block: bb,
                after_terminator: false,
            };
        }
        let is_terminator = instr.is_terminator();
        let id = ValueId::new(u32::try_from(self.values.len()).unwrap_or(u32::MAX));
        self.values.push(ValueData {
            ty,
            kind: ValueKind::Instr {
                block: self.cursor.block,
                instr,
            },
        });
        self.blocks[self.cursor.block.index()].instrs.push(id);
        if is_terminator {
            self.cursor.after_terminator = true;
        }
        id
    }

    /// Raw instruction push for sibling modules extending the context.
    pub(super) fn push_raw(&mut self, instr: Instr, ty: Option<TypeId>) -> ValueId {
        self.push_instr(instr, ty)
    }

    /// Retire a block whose landingpad turned out to be unused: nothing
    /// unwinds into it, so its contents are replaced by a lone
    /// `unreachable` and the old instructions are orphaned.
    pub fn retire_block_to_unreachable(&mut self, block: BlockId) {
        let dead = ValueId::new(u32::try_from(self.values.len()).unwrap_or(u32::MAX));
        self.values.push(ValueData {
            ty: None,
            kind: ValueKind::Instr {
                block,
                instr: Instr::Unreachable,
            },
        });
        self.blocks[block.index()].instrs = vec![dead];
    }

    /// True if any invoke emitted so far unwinds into `block`.
    pub fn has_unwind_edges_to(&self, block: BlockId) -> bool {
        self.values.iter().any(|v| {
            matches!(
                &v.kind,
                ValueKind::Instr {
                    instr: Instr::Invoke { unwind, .. },
                    ..
                } if *unwind == block
            )
        })
    }

    // -----------------------------------------------------------------------
    // Constants and parameters
    // -----------------------------------------------------------------------

    pub fn param(&self, index: usize) -> ValueId {
        assert!(index < self.sig.params.len(), "parameter index out of range");
        ValueId::new(u32::try_from(index).unwrap_or(u32::MAX))
    }

    fn const_value(&mut self, c: Const, ty: TypeId) -> ValueId {
        if let Some(&v) = self.const_cache.get(&c) {
            return v;
        }
        let id = ValueId::new(u32::try_from(self.values.len()).unwrap_or(u32::MAX));
        self.values.push(ValueData {
            ty: Some(ty),
            kind: ValueKind::Const(c),
        });
        self.const_cache.insert(c, id);
        id
    }

    pub fn const_int(&mut self, ty: TypeId, value: i64) -> ValueId {
        self.const_value(Const::Int { ty, value }, ty)
    }

    pub fn const_i32(&mut self, value: i32) -> ValueId {
        self.const_int(TypeId::I32, i64::from(value))
    }

    pub fn const_i64(&mut self, value: i64) -> ValueId {
        self.const_int(TypeId::I64, value)
    }

    pub fn const_bool(&mut self, value: bool) -> ValueId {
        self.const_int(TypeId::I1, i64::from(value))
    }

    pub fn const_float(&mut self, ty: TypeId, bits: u64) -> ValueId {
        self.const_value(Const::Float { ty, bits }, ty)
    }

    pub fn null_ref(&mut self) -> ValueId {
        self.const_value(Const::Null(TypeId::REF), TypeId::REF)
    }

    pub fn null_ptr(&mut self) -> ValueId {
        self.const_value(Const::Null(TypeId::PTR), TypeId::PTR)
    }

    pub fn global_ref(&mut self, global: GlobalId) -> ValueId {
        self.const_value(Const::Global(global), TypeId::PTR)
    }

    pub fn func_ref(&mut self, func: FuncId) -> ValueId {
        self.const_value(Const::Function(func), TypeId::PTR)
    }

    pub fn undef(&mut self, ty: TypeId) -> ValueId {
        self.const_value(Const::Undef(ty), ty)
    }

    /// The unit value: unit lowers to `i64 0`.
    pub fn unit_value(&mut self) -> ValueId {
        self.const_i64(0)
    }

    /// The constant behind a value, when it is an integer constant.
    pub fn extract_const_int(&self, v: ValueId) -> Option<i64> {
        match self.values[v.index()].kind {
            ValueKind::Const(Const::Int { value, .. }) => Some(value),
            _ => None,
        }
    }

    pub fn value_ty(&self, v: ValueId) -> Option<TypeId> {
        self.values[v.index()].ty
    }

    // -----------------------------------------------------------------------
    // Arithmetic, bitwise, comparisons, casts
    // -----------------------------------------------------------------------

    pub fn binop(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.value_ty(lhs);
        self.push_instr(Instr::Bin { op, lhs, rhs }, ty)
    }

    pub fn add(&mut self, l: ValueId, r: ValueId) -> ValueId {
        self.binop(BinOp::Add, l, r)
    }

    pub fn sub(&mut self, l: ValueId, r: ValueId) -> ValueId {
        self.binop(BinOp::Sub, l, r)
    }

    pub fn and(&mut self, l: ValueId, r: ValueId) -> ValueId {
        self.binop(BinOp::And, l, r)
    }

    pub fn or(&mut self, l: ValueId, r: ValueId) -> ValueId {
        self.binop(BinOp::Or, l, r)
    }

    pub fn xor(&mut self, l: ValueId, r: ValueId) -> ValueId {
        self.binop(BinOp::Xor, l, r)
    }

    pub fn not(&mut self, v: ValueId) -> ValueId {
        let all_ones = match self.value_ty(v) {
            Some(ty) => {
                let bits = self.codegen.int_bits(ty).unwrap_or(64);
                let value = if bits >= 64 { -1 } else { (1i64 << bits) - 1 };
                self.const_int(ty, value)
            }
            None => self.const_bool(true),
        };
        self.xor(v, all_ones)
    }

    pub fn icmp(&mut self, pred: IntPredicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push_instr(Instr::ICmp { pred, lhs, rhs }, Some(TypeId::I1))
    }

    pub fn icmp_eq(&mut self, l: ValueId, r: ValueId) -> ValueId {
        self.icmp(IntPredicate::Eq, l, r)
    }

    pub fn icmp_ne(&mut self, l: ValueId, r: ValueId) -> ValueId {
        self.icmp(IntPredicate::Ne, l, r)
    }

    pub fn fcmp(&mut self, pred: FloatPredicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push_instr(Instr::FCmp { pred, lhs, rhs }, Some(TypeId::I1))
    }

    pub fn cast(&mut self, op: CastOp, value: ValueId, to: TypeId) -> ValueId {
        self.push_instr(Instr::Cast { op, value, to }, Some(to))
    }

    pub fn zext(&mut self, v: ValueId, to: TypeId) -> ValueId {
        self.cast(CastOp::Zext, v, to)
    }

    pub fn sext(&mut self, v: ValueId, to: TypeId) -> ValueId {
        self.cast(CastOp::Sext, v, to)
    }

    /// Signed or unsigned widening.
    pub fn ext(&mut self, v: ValueId, to: TypeId, signed: bool) -> ValueId {
        if signed {
            self.sext(v, to)
        } else {
            self.zext(v, to)
        }
    }

    pub fn trunc(&mut self, v: ValueId, to: TypeId) -> ValueId {
        self.cast(CastOp::Trunc, v, to)
    }

    pub fn bitcast(&mut self, v: ValueId, to: TypeId) -> ValueId {
        self.cast(CastOp::Bitcast, v, to)
    }

    pub fn ptr_to_int(&mut self, v: ValueId, to: TypeId) -> ValueId {
        self.cast(CastOp::PtrToInt, v, to)
    }

    pub fn int_to_ptr(&mut self, v: ValueId, to: TypeId) -> ValueId {
        self.cast(CastOp::IntToPtr, v, to)
    }

    pub fn select(&mut self, cond: ValueId, if_true: ValueId, if_false: ValueId) -> ValueId {
        let ty = self.value_ty(if_true);
        self.push_instr(
            Instr::Select {
                cond,
                if_true,
                if_false,
            },
            ty,
        )
    }

    // -----------------------------------------------------------------------
    // Memory
    // -----------------------------------------------------------------------

    /// Allocate a storage cell. Reference-bearing cells become frame slots
    /// in the locals-init block, zeroed and visible to root scanning;
    /// scalars get a plain stack allocation in the prologue.
    pub fn alloca(&mut self, ty: TypeId) -> ValueId {
        if self.codegen.with_types(|t| t.is_ref(ty)) {
            let index = self.slot_count;
            self.slot_count += 1;
            self.appending_to(self.locals_init_bb, |fgc| {
                let idx = fgc.const_i32(i32::try_from(index).unwrap_or(i32::MAX));
                fgc.gep(fgc.slots_base, TypeId::REF, idx)
            })
        } else {
            self.appending_to(self.prologue_bb, |fgc| {
                fgc.push_instr(Instr::Alloca { ty, len: 1 }, Some(TypeId::PTR))
            })
        }
    }

    /// A fresh anonymous GC slot for an intermediate reference.
    pub fn create_anonymous_slot(&mut self) -> ValueId {
        self.vars.anonymous_slots += 1;
        self.alloca(TypeId::REF)
    }

    pub fn load(&mut self, ptr: ValueId, ty: TypeId) -> ValueId {
        self.push_instr(
            Instr::Load {
                ptr,
                ty,
                ordering: None,
                volatile: false,
            },
            Some(ty),
        )
    }

    pub fn load_ordered(
        &mut self,
        ptr: ValueId,
        ty: TypeId,
        ordering: Option<AtomicOrdering>,
        volatile: bool,
    ) -> ValueId {
        self.push_instr(
            Instr::Load {
                ptr,
                ty,
                ordering,
                volatile,
            },
            Some(ty),
        )
    }

    /// Load a possibly-reference value; a mutable reference load is rooted
    /// into `result_slot` (or a fresh anonymous slot) immediately.
    pub fn load_slot(
        &mut self,
        ptr: ValueId,
        ty: TypeId,
        is_var: bool,
        result_slot: Option<ValueId>,
    ) -> ValueId {
        let value = self.load(ptr, ty);
        if self.codegen.with_types(|t| t.is_ref(ty)) && is_var {
            let slot = result_slot.unwrap_or_else(|| self.create_anonymous_slot());
            self.store_stack_ref(value, slot);
        }
        value
    }

    pub fn store(&mut self, value: ValueId, ptr: ValueId) {
        self.push_instr(
            Instr::Store {
                value,
                ptr,
                ordering: None,
                volatile: false,
            },
            None,
        );
    }

    pub fn store_ordered(
        &mut self,
        value: ValueId,
        ptr: ValueId,
        ordering: Option<AtomicOrdering>,
        volatile: bool,
    ) {
        self.push_instr(
            Instr::Store {
                value,
                ptr,
                ordering,
                volatile,
            },
            None,
        );
    }

    pub fn memset(&mut self, ptr: ValueId, value: u8, len: u64) {
        self.push_instr(Instr::Memset { ptr, value, len }, None);
    }

    pub fn gep(&mut self, base: ValueId, elem_ty: TypeId, index: ValueId) -> ValueId {
        self.push_instr(
            Instr::Gep {
                base,
                elem_ty,
                index,
            },
            Some(TypeId::PTR),
        )
    }

    pub fn struct_gep(&mut self, base: ValueId, struct_ty: TypeId, index: u32) -> ValueId {
        self.push_instr(
            Instr::StructGep {
                base,
                struct_ty,
                index,
            },
            Some(TypeId::PTR),
        )
    }

    pub fn extract_value(&mut self, agg: ValueId, index: u32) -> ValueId {
        let ty = self
            .value_ty(agg)
            .map(|t| self.codegen.field_ty(t, index));
        self.push_instr(Instr::ExtractValue { agg, index }, ty)
    }

    pub fn cmpxchg(&mut self, ptr: ValueId, expected: ValueId, new: ValueId) -> ValueId {
        let ty = self.value_ty(expected).unwrap_or(TypeId::I64);
        let result_ty = self.codegen.struct_of(vec![ty, TypeId::I1]);
        self.push_instr(
            Instr::CmpXchg {
                ptr,
                expected,
                new,
                ty,
            },
            Some(result_ty),
        )
    }

    pub fn atomic_rmw(&mut self, op: RmwOp, ptr: ValueId, value: ValueId) -> ValueId {
        let ty = self.value_ty(value).unwrap_or(TypeId::I64);
        self.push_instr(Instr::AtomicRmw { op, ptr, value, ty }, Some(ty))
    }

    // -----------------------------------------------------------------------
    // Reference stores
    // -----------------------------------------------------------------------

    pub fn store_stack_ref(&mut self, value: ValueId, ptr: ValueId) {
        self.update_ref(value, ptr, true, false);
    }

    pub fn store_heap_ref(&mut self, value: ValueId, ptr: ValueId) {
        self.update_ref(value, ptr, false, false);
    }

    /// Store that dispatches on the value's type: references go through
    /// the GC-aware write paths, scalars through plain stores (volatile
    /// scalars with sequentially-consistent ordering).
    pub fn store_any(&mut self, value: ValueId, ptr: ValueId, on_stack: bool, volatile: bool) {
        let is_ref = self
            .value_ty(value)
            .is_some_and(|t| self.codegen.with_types(|p| p.is_ref(t)));
        if is_ref {
            self.update_ref(value, ptr, on_stack, volatile);
        } else {
            let ordering = volatile.then_some(AtomicOrdering::SeqCst);
            self.store_ordered(value, ptr, ordering, volatile);
        }
    }

    fn update_ref(&mut self, value: ValueId, ptr: ValueId, on_stack: bool, volatile: bool) {
        assert!(
            !(on_stack && volatile),
            "a stack reference update cannot be volatile"
        );
        let model = self.codegen.config.memory_model;
        match (model, on_stack) {
            (MemoryModel::RcFrozen, true) => self.store(value, ptr),
            (MemoryModel::RcFrozen, false) => {
                let callee = self.codegen.runtime.update_heap_ref.clone();
                self.call_no_result(&callee, &[ptr, value]);
            }
            (MemoryModel::ThreadConfined, true) => {
                let callee = self.codegen.runtime.update_stack_ref.clone();
                self.call_no_result(&callee, &[ptr, value]);
            }
            (MemoryModel::ThreadConfined, false) => {
                let callee = if volatile {
                    self.codegen.runtime.update_volatile_heap_ref.clone()
                } else {
                    self.codegen.runtime.update_heap_ref.clone()
                };
                self.call_no_result(&callee, &[ptr, value]);
            }
        }
    }

    fn update_return_ref(&mut self, value: ValueId, ptr: ValueId) {
        match self.codegen.config.memory_model {
            MemoryModel::RcFrozen => self.store(value, ptr),
            MemoryModel::ThreadConfined => {
                let callee = self.codegen.runtime.update_return_ref.clone();
                self.call_no_result(&callee, &[ptr, value]);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    /// Call a no-unwind helper without result-slot machinery.
    pub fn call_no_result(&mut self, callee: &Callable, args: &[ValueId]) -> ValueId {
        self.call(callee, args, Lifetime::Irrelevant, &ExceptionHandler::None, None)
    }

    /// Emit a call. If the callee produces a tracked reference, a result
    /// slot is appended to the arguments, chosen from the lifetime's slot
    /// strategy (or supplied by the caller). The callee's no-unwind
    /// guarantee decides between a plain call and an invoke paired with
    /// the active handler's landingpad.
    pub fn call(
        &mut self,
        callee: &Callable,
        args: &[ValueId],
        result_lifetime: Lifetime,
        exception_handler: &ExceptionHandler,
        result_slot: Option<ValueId>,
    ) -> ValueId {
        let mut full_args: Args = SmallVec::from_slice(args);
        if callee.returns_ref {
            let slot = match result_slot {
                Some(slot) => slot,
                None => match slot_type(result_lifetime) {
                    SlotType::Stack => {
                        self.local_allocs += 1;
                        self.alloca(TypeId::REF)
                    }
                    SlotType::Return => self.return_slot.unwrap_or_else(|| {
                        panic!(
                            "return-slot lifetime in `{}`, which has no return slot",
                            self.name
                        )
                    }),
                    // The frame-local arena is not materialized; arena
                    // flavors degrade to a fresh anonymous slot.
                    SlotType::Arena
                    | SlotType::ReturnIfArena
                    | SlotType::ParamIfArena(_)
                    | SlotType::Anonymous => self.create_anonymous_slot(),
                    SlotType::Unknown => panic!(
                        "incorrect slot type for lifetime {result_lifetime:?} in `{}`",
                        self.name
                    ),
                },
            };
            full_args.push(slot);
        }
        self.call_raw(
            CalleeRef::Direct(callee.func),
            callee,
            full_args,
            exception_handler,
        )
    }

    /// Call with the argument list passed through untouched, regardless of
    /// the callee's return type.
    pub fn call_verbatim(
        &mut self,
        callee: &Callable,
        args: &[ValueId],
        exception_handler: &ExceptionHandler,
    ) -> ValueId {
        self.call_raw(
            CalleeRef::Direct(callee.func),
            callee,
            SmallVec::from_slice(args),
            exception_handler,
        )
    }

    /// Indirect call through a function pointer with `proto`'s signature;
    /// verbatim argument semantics.
    pub fn call_indirect(
        &mut self,
        fn_ptr: ValueId,
        proto: &Callable,
        args: &[ValueId],
        exception_handler: &ExceptionHandler,
    ) -> ValueId {
        self.call_raw(
            CalleeRef::Indirect(fn_ptr),
            proto,
            SmallVec::from_slice(args),
            exception_handler,
        )
    }

    fn call_raw(
        &mut self,
        callee_ref: CalleeRef,
        callee: &Callable,
        args: Args,
        exception_handler: &ExceptionHandler,
    ) -> ValueId {
        if callee.no_unwind {
            return self.push_instr(
                Instr::Call {
                    callee: callee_ref,
                    sig: callee.sig_ty,
                    args,
                },
                callee.sig.ret,
            );
        }

        let unwind = match exception_handler {
            ExceptionHandler::Caller => self.cleanup_landingpad_bb,
            ExceptionHandler::Local { unwind, .. } => *unwind,
            ExceptionHandler::None => panic!(
                "no exception handler specified when calling a function \
                 without the no-unwind guarantee in `{}`",
                self.name
            ),
        };
        let success = self.basic_block("call_success");
        let result = self.push_instr(
            Instr::Invoke {
                callee: callee_ref,
                sig: callee.sig_ty,
                args,
                normal: success,
                unwind,
            },
            callee.sig.ret,
        );
        if matches!(exception_handler, ExceptionHandler::Caller) {
            self.invoke_records.push(InvokeRecord {
                value: result,
                success,
            });
        }
        self.position_at_end(success);
        result
    }

    // -----------------------------------------------------------------------
    // Control flow
    // -----------------------------------------------------------------------

    pub fn br(&mut self, block: BlockId) {
        self.push_instr(Instr::Br(block), None);
    }

    pub fn cond_br(&mut self, cond: ValueId, if_true: BlockId, if_false: BlockId) {
        self.push_instr(
            Instr::CondBr {
                cond,
                if_true,
                if_false,
            },
            None,
        );
    }

    pub fn switch(&mut self, value: ValueId, default: BlockId, cases: Vec<(i64, BlockId)>) {
        self.push_instr(
            Instr::Switch {
                value,
                default,
                cases,
            },
            None,
        );
    }

    pub fn unreachable(&mut self) {
        self.push_instr(Instr::Unreachable, None);
    }

    pub fn phi(&mut self, ty: TypeId) -> ValueId {
        self.push_instr(
            Instr::Phi {
                ty,
                incoming: Vec::new(),
            },
            Some(ty),
        )
    }

    pub fn add_phi_incoming(&mut self, phi: ValueId, from: BlockId, value: ValueId) {
        match &mut self.values[phi.index()].kind {
            ValueKind::Instr {
                instr: Instr::Phi { incoming, .. },
                ..
            } => incoming.push((from, value)),
            _ => panic!("phi incoming added to a non-phi value"),
        }
    }

    /// Record `value` as the incoming of `phi` from the current block.
    pub fn assign_phi(&mut self, phi: ValueId, value: ValueId) {
        let block = self.cursor.block;
        self.add_phi_incoming(phi, block, value);
    }

    /// Branch to the shared epilogue, recording this block's return value.
    /// Returning twice from one block is fatal.
    pub fn ret(&mut self, value: Option<ValueId>) {
        let block = self.cursor.block;
        if self.returns.iter().any(|(b, _)| *b == block) {
            panic!("ret() twice in the same basic block in `{}`", self.name);
        }
        self.returns.push((block, value));
        self.br(self.epilogue_bb);
    }

    /// Structured two-armed conditional producing a value.
    pub fn if_then_else(
        &mut self,
        cond: ValueId,
        then_value: ValueId,
        else_block: impl FnOnce(&mut Self) -> ValueId,
    ) -> ValueId {
        let result_ty = self.value_ty(then_value).unwrap_or(TypeId::I64);
        let bb_exit = self.basic_block("ite_exit");
        let result_phi = self.appending_to(bb_exit, |fgc| fgc.phi(result_ty));
        let bb_else = self.basic_block("ite_else");

        let bb_cond = self.cursor.block;
        self.cond_br(cond, bb_exit, bb_else);
        self.add_phi_incoming(result_phi, bb_cond, then_value);

        self.appending_to(bb_else, |fgc| {
            let else_value = else_block(fgc);
            let from = fgc.cursor.block;
            fgc.br(bb_exit);
            fgc.add_phi_incoming(result_phi, from, else_value);
        });

        self.position_at_end(bb_exit);
        result_phi
    }

    /// Structured one-armed conditional.
    pub fn if_then(&mut self, cond: ValueId, then_block: impl FnOnce(&mut Self)) {
        let bb_exit = self.basic_block("it_exit");
        let bb_then = self.basic_block("it_then");
        self.cond_br(cond, bb_then, bb_exit);
        self.appending_to(bb_then, |fgc| {
            then_block(fgc);
            if !fgc.is_after_terminator() {
                fgc.br(bb_exit);
            }
        });
        self.position_at_end(bb_exit);
    }

    // -----------------------------------------------------------------------
    // Thread states
    // -----------------------------------------------------------------------

    /// Switch the memory-manager thread state. Only meaningful under the
    /// thread-confined model; fatal when runtime access is forbidden.
    pub fn switch_thread_state_native(&mut self) {
        self.check_thread_state_switch();
        let callee = self.codegen.runtime.switch_thread_state_native.clone();
        self.call_no_result(&callee, &[]);
    }

    pub fn switch_thread_state_runnable(&mut self) {
        self.check_thread_state_switch();
        let callee = self.codegen.runtime.switch_thread_state_runnable.clone();
        self.call_no_result(&callee, &[]);
    }

    fn check_thread_state_switch(&self) {
        assert!(
            self.codegen.config.memory_model == MemoryModel::ThreadConfined,
            "thread state switching exists only under the thread-confined model"
        );
        assert!(
            !self.options.forbid_runtime,
            "attempt to switch the thread state when runtime is forbidden in `{}`",
            self.name
        );
    }

    // -----------------------------------------------------------------------
    // Type metadata access
    // -----------------------------------------------------------------------

    /// Load the type-descriptor pointer out of an object header, masking
    /// the low tag bits.
    pub fn load_type_info(&mut self, obj: ValueId) -> ValueId {
        let header_ty = self.codegen.common.object_header;
        let slot = self.struct_gep(obj, header_ty, 0);
        let raw = self.load_ordered(slot, TypeId::PTR, Some(AtomicOrdering::Acquire), false);
        let as_int = self.ptr_to_int(raw, TypeId::I64);
        let mask = self.const_i64(!0b11);
        let masked = self.and(as_int, mask);
        self.int_to_ptr(masked, TypeId::PTR)
    }

    /// Address of the interface-table record for `interface_id`, using the
    /// direct-index fast path when the table's size field is non-negative
    /// and the sorted-search runtime routine otherwise.
    pub fn interface_table_record(&mut self, typeinfo: ValueId, interface_id: i32) -> ValueId {
        let ti_ty = self.codegen.common.typeinfo;
        let size_ptr = self.struct_gep(typeinfo, ti_ty, super::rtti::TI_ITABLE_SIZE);
        let itable_size = self.load(size_ptr, TypeId::I32);
        let itable_ptr = self.struct_gep(typeinfo, ti_ty, super::rtti::TI_ITABLE);
        let itable = self.load(itable_ptr, TypeId::PTR);
        let record_ty = self.codegen.common.itable_record;

        let fast_bb = self.basic_block("itable_fast");
        let slow_bb = self.basic_block("itable_slow");
        let merge_bb = self.basic_block("itable_merge");
        let zero = self.const_i32(0);
        let ge = self.icmp(IntPredicate::Sge, itable_size, zero);
        self.cond_br(ge, fast_bb, slow_bb);

        let result_phi = self.appending_to(merge_bb, |fgc| fgc.phi(TypeId::PTR));

        self.appending_to(fast_bb, |fgc| {
            // The size field stores the power-of-two mask on the fast path.
            let id = fgc.const_i32(interface_id);
            let index = fgc.and(itable_size, id);
            let record = fgc.gep(itable, record_ty, index);
            let from = fgc.current_block();
            fgc.br(merge_bb);
            fgc.add_phi_incoming(result_phi, from, record);
        });

        self.appending_to(slow_bb, |fgc| {
            // Negative size encodes the sorted fallback: -size records.
            let zero = fgc.const_i32(0);
            let count = fgc.sub(zero, itable_size);
            let id = fgc.const_i32(interface_id);
            let callee = fgc.codegen.runtime.lookup_interface_record.clone();
            let record = fgc.call_no_result(&callee, &[itable, count, id]);
            let from = fgc.current_block();
            fgc.br(merge_bb);
            fgc.add_phi_incoming(result_phi, from, record);
        });

        self.position_at_end(merge_bb);
        result_phi
    }

    /// Resolve the implementation pointer for a virtual call on `receiver`.
    pub fn virtual_impl(&mut self, receiver: ValueId, fun: FunId) -> ValueId {
        let ir = self.codegen.ir;
        let decl = ir.function(fun);
        let owner = decl
            .owner
            .unwrap_or_else(|| panic!("virtual dispatch of an unowned function"));
        let typeinfo = self.load_type_info(receiver);

        if ir.class(owner).flags.is_interface {
            let place = super::declarations::itable_place(ir, &self.codegen.hierarchy, fun);
            let record = self.interface_table_record(typeinfo, place.interface_id);
            let record_ty = self.codegen.common.itable_record;
            let vtable_ptr = self.struct_gep(record, record_ty, 2);
            let vtable = self.load(vtable_ptr, TypeId::PTR);
            let index = self.const_i32(i32::try_from(place.method_index).unwrap_or(i32::MAX));
            let slot = self.gep(vtable, TypeId::PTR, index);
            self.load(slot, TypeId::PTR)
        } else {
            let index = super::declarations::vtable_index(ir, owner, fun);
            // The vtable begins immediately after the descriptor record.
            let one = self.const_i32(1);
            let vtable = self.gep(typeinfo, self.codegen.common.typeinfo, one);
            let idx = self.const_i32(i32::try_from(index).unwrap_or(i32::MAX));
            let slot = self.gep(vtable, TypeId::PTR, idx);
            self.load(slot, TypeId::PTR)
        }
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    /// Bind a parameter: GC-visible parameters get a frame slot (counted
    /// into the skip region, since the caller already rooted them),
    /// scalars are bound directly to the incoming value.
    pub fn declare_parameter(&mut self, var: VarId, index: usize) -> usize {
        let value = self.param(index);
        let ty = self.sig.params[index];
        if self.codegen.with_types(|t| t.is_ref(ty)) {
            let address = self.alloca(ty);
            self.vars.skip_slots += 1;
            self.appending_to(self.locals_init_bb, |fgc| fgc.store(value, address));
            self.vars.add_record(
                Some(var),
                VariableRecord::Slot {
                    address,
                    ty,
                    is_var: false,
                },
            )
        } else {
            self.vars
                .add_record(Some(var), VariableRecord::Value { value })
        }
    }

    /// Declare a local. Immutable initialized scalars become SSA bindings;
    /// everything else gets a slot, stored through the reference-aware
    /// path when applicable.
    pub fn declare_variable(
        &mut self,
        var: VarId,
        ty: TypeId,
        mutable: bool,
        init: Option<ValueId>,
    ) -> usize {
        let is_ref = self.codegen.with_types(|t| t.is_ref(ty));
        if !mutable && !is_ref {
            if let Some(value) = init {
                return self
                    .vars
                    .add_record(Some(var), VariableRecord::Value { value });
            }
        }
        let address = self.alloca(ty);
        if let Some(value) = init {
            self.store_any(value, address, true, false);
        }
        self.vars.add_record(
            Some(var),
            VariableRecord::Slot {
                address,
                ty,
                is_var: mutable,
            },
        )
    }

    pub fn load_variable(&mut self, index: usize, result_slot: Option<ValueId>) -> ValueId {
        match self.vars.record(index) {
            VariableRecord::Slot { address, ty, is_var } => {
                self.load_slot(address, ty, is_var, result_slot)
            }
            VariableRecord::Value { value } => value,
        }
    }

    pub fn store_variable(&mut self, index: usize, value: ValueId) {
        match self.vars.record(index) {
            VariableRecord::Slot { address, .. } => self.store_any(value, address, true, false),
            VariableRecord::Value { .. } => {
                panic!("assignment to an immutable SSA binding in `{}`", self.name)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Prologue / epilogue
    // -----------------------------------------------------------------------

    /// Enter the prologue state: reserve the frame-slot array and pick up
    /// the return slot. Emission resumes at the entry block.
    pub fn prologue(&mut self) {
        if self.options.returns_ref {
            self.return_slot = Some(self.param(self.sig.params.len() - 1));
        }
        self.slots_base = self.appending_to(self.prologue_bb, |fgc| {
            // Length patched in the epilogue once the slot count is known.
            fgc.push_instr(
                Instr::Alloca {
                    ty: TypeId::REF,
                    len: 0,
                },
                Some(TypeId::PTR),
            )
        });
        self.position_at_end(self.entry_bb);
    }

    fn need_cleanup_landingpad_and_leave_frame(&self) -> bool {
        self.options.exported
            || (!self.stack_locals.is_empty()
                && self.codegen.config.memory_model == MemoryModel::RcFrozen)
            || self.switch_to_runnable
    }

    fn need_slots(&self) -> bool {
        self.slot_count - self.vars.skip_slots > FRAME_OVERLAY_SLOT_COUNT
    }

    /// Release frame resources on every normal return path.
    fn release_vars(&mut self) {
        if self.need_cleanup_landingpad_and_leave_frame() || self.need_slots() {
            assert!(
                !self.options.forbid_runtime,
                "attempt to leave a frame where runtime usage is forbidden in `{}`",
                self.name
            );
            let callee = self.codegen.runtime.leave_frame.clone();
            let base = self.slots_base;
            let skip = self.const_i32(i32::try_from(self.vars.skip_slots).unwrap_or(0));
            let count = self.const_i32(i32::try_from(self.slot_count).unwrap_or(0));
            self.call_no_result(&callee, &[base, skip, count]);
        }
        if !self.stack_locals.is_empty()
            && self.codegen.config.memory_model == MemoryModel::RcFrozen
        {
            // Only bother about not leaving dangling references behind.
            self.clean_stack_locals(true);
        }
    }

    fn on_return(&mut self) {
        self.release_vars();
        if self.switch_to_runnable {
            self.switch_thread_state_native();
        }
    }

    fn process_returns(&mut self) {
        let epilogue = self.epilogue_bb;
        let returns = std::mem::take(&mut self.returns);
        let ret_ty = self.sig.ret;
        self.appending_to(epilogue, |fgc| match ret_ty {
            None => {
                fgc.on_return();
                fgc.push_instr(Instr::Ret(None), None);
            }
            Some(ret_ty) if !returns.is_empty() => {
                let phi = fgc.phi(ret_ty);
                for (block, value) in &returns {
                    let value = value.unwrap_or_else(|| fgc.undef(ret_ty));
                    fgc.add_phi_incoming(phi, *block, value);
                }
                if let Some(slot) = fgc.return_slot {
                    fgc.update_return_ref(phi, slot);
                }
                fgc.on_return();
                fgc.push_instr(Instr::Ret(Some(phi)), None);
            }
            // All paths throw.
            Some(_) => fgc.unreachable(),
        });
    }

    /// Finish the function: materialize the prologue/init blocks, the
    /// cleanup landingpad, the shared return path, and relax unused
    /// caller-unwind invokes back to plain calls.
    pub fn epilogue(&mut self) {
        let need_cleanup = self.need_cleanup_landingpad_and_leave_frame();

        // Prologue: size the slot array, zero it if the frame is live.
        let prologue = self.prologue_bb;
        let locals_init = self.locals_init_bb;
        let slot_count = self.slot_count;
        self.patch_alloca_len(self.slots_base, slot_count);
        let need_frame = self.need_slots() || need_cleanup;
        self.appending_to(prologue, |fgc| {
            if need_frame {
                assert!(
                    !fgc.options.forbid_runtime,
                    "attempt to start a frame where runtime usage is forbidden in `{}`",
                    fgc.name
                );
                let base = fgc.slots_base;
                fgc.memset(base, 0, u64::from(slot_count) * 8);
            }
            fgc.br(locals_init);
        });

        let stack_locals_init = self.stack_locals_init_bb;
        self.appending_to(locals_init, |fgc| fgc.br(stack_locals_init));

        if need_cleanup {
            let cleanup = self.cleanup_landingpad_bb;
            self.appending_to(cleanup, |fgc| {
                let lp = fgc.cleanup_landingpad_instr();
                fgc.release_vars();
                if fgc.switch_to_runnable {
                    fgc.switch_thread_state_native();
                }
                fgc.push_instr(Instr::Resume { value: lp }, None);
            });
        }

        let entry = self.entry_bb;
        self.appending_to(stack_locals_init, |fgc| {
            if fgc.needs_runtime_init || fgc.switch_to_runnable {
                assert!(
                    !fgc.options.forbid_runtime,
                    "attempt to init runtime where runtime usage is forbidden in `{}`",
                    fgc.name
                );
                let callee = fgc.codegen.runtime.init_runtime.clone();
                fgc.call_no_result(&callee, &[]);
            }
            if fgc.switch_to_runnable {
                fgc.switch_thread_state_runnable();
            }
            if need_frame {
                let callee = fgc.codegen.runtime.enter_frame.clone();
                let base = fgc.slots_base;
                let skip = fgc.const_i32(i32::try_from(fgc.vars.skip_slots).unwrap_or(0));
                let count = fgc.const_i32(i32::try_from(slot_count).unwrap_or(0));
                fgc.call_no_result(&callee, &[base, skip, count]);
            }
            if fgc.codegen.config.memory_model == MemoryModel::ThreadConfined
                && !fgc.options.forbid_runtime
                && fgc.need_safepoint
            {
                let callee = fgc.codegen.runtime.safepoint.clone();
                fgc.call_no_result(&callee, &[]);
            }
            fgc.br(entry);
        });

        self.process_returns();

        // If the cleanup landingpad is trivial or unused, downgrade the
        // recorded invokes to calls and retire the block.
        if !need_cleanup || self.invoke_records.is_empty() {
            let records = std::mem::take(&mut self.invoke_records);
            for record in records {
                self.replace_invoke_with_call(&record);
            }
            let cleanup = self.cleanup_landingpad_bb;
            self.retire_block_to_unreachable(cleanup);
        }

        self.vars.clear();
        self.return_slot = None;
    }

    fn replace_invoke_with_call(&mut self, record: &InvokeRecord) {
        let (block, callee, sig, args) = match &self.values[record.value.index()].kind {
            ValueKind::Instr {
                block,
                instr: Instr::Invoke {
                    callee, sig, args, ..
                },
            } => (*block, *callee, *sig, args.clone()),
            _ => panic!("recorded invoke is not an invoke"),
        };
        self.values[record.value.index()].kind = ValueKind::Instr {
            block,
            instr: Instr::Call { callee, sig, args },
        };
        let br = ValueId::new(u32::try_from(self.values.len()).unwrap_or(u32::MAX));
        self.values.push(ValueData {
            ty: None,
            kind: ValueKind::Instr {
                block,
                instr: Instr::Br(record.success),
            },
        });
        self.blocks[block.index()].instrs.push(br);
    }

    fn patch_alloca_len(&mut self, value: ValueId, new_len: u32) {
        match &mut self.values[value.index()].kind {
            ValueKind::Instr {
                instr: Instr::Alloca { len, .. },
                ..
            } => *len = new_len,
            _ => panic!("slot-array patch target is not an alloca"),
        }
    }

    /// Hand the finished body to the module. Must be called exactly once,
    /// after [`Self::epilogue`].
    pub fn finish(mut self) {
        assert!(!self.finished, "function `{}` finished twice", self.name);
        self.finished = true;
        let values = std::mem::take(&mut self.values);
        let blocks = std::mem::take(&mut self.blocks);
        self.codegen.define_function(self.func, values, blocks);
    }
}

// ---------------------------------------------------------------------------
// Helper generation on the module context
// ---------------------------------------------------------------------------

impl<'ir> CodeGenerator<'ir> {
    /// Generate a small helper function in one closure, with the standard
    /// prologue/termination/epilogue bracket applied.
    pub fn generate_function(
        &self,
        name: &str,
        sig: Signature,
        no_unwind: bool,
        options: FunctionOptions,
        code: impl FnOnce(&mut FunctionGenerationContext<'_, 'ir>),
    ) -> FuncId {
        let func = self.declare_function(name, sig.clone(), no_unwind);
        let mut fgc = FunctionGenerationContext::new(self, func, sig, options);
        fgc.prologue();
        code(&mut fgc);
        if !fgc.is_after_terminator() {
            fgc.unreachable();
        }
        fgc.epilogue();
        fgc.finish();
        func
    }

    /// The memoized trampoline that performs the vtable/interface-table
    /// lookup for a virtual call and tail-calls the implementation. Call
    /// sites dispatch through it so that dispatch-table changes do not
    /// touch every caller.
    pub fn virtual_trampoline(&self, fun: FunId) -> Callable {
        let cell = self.trampoline_cell(fun);
        cell.get_or_init(|| {
            let target = self.fun_callable(fun);
            let name = format!("{}-trampoline", self.function_name(target.func));
            let sig = target.sig.clone();
            let options = FunctionOptions {
                need_safepoint: false,
                returns_ref: target.returns_ref,
                ..FunctionOptions::default()
            };
            let target_for_body = target.clone();
            let func = self.generate_function(&name, sig.clone(), false, options, |fgc| {
                let args: Vec<ValueId> =
                    (0..sig.params.len()).map(|i| fgc.param(i)).collect();
                let receiver = fgc.param(0);
                let callee_ptr = fgc.virtual_impl(receiver, fun);
                let result = fgc.call_indirect(
                    callee_ptr,
                    &target_for_body,
                    &args,
                    &ExceptionHandler::Caller,
                );
                match fgc.return_ty() {
                    Some(_) => fgc.ret(Some(result)),
                    None => fgc.ret(None),
                }
            });
            Callable {
                func,
                sig: target.sig,
                sig_ty: target.sig_ty,
                no_unwind: false,
                returns_ref: target.returns_ref,
            }
        })
        .clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodegenConfig;
    use crate::testutil::IrBuilder;

    fn with_fgc(code: impl FnOnce(&mut FunctionGenerationContext<'_, '_>)) {
        let (ir, interner) = IrBuilder::new().finish_with_interner();
        let cg = CodeGenerator::new(&ir, &interner, CodegenConfig::default());
        let sig = Signature {
            params: Vec::new(),
            ret: None,
        };
        let func = cg.declare_function("fixture", sig.clone(), true);
        let mut fgc =
            FunctionGenerationContext::new(&cg, func, sig, FunctionOptions::default());
        fgc.prologue();
        code(&mut fgc);
    }

    #[test]
    fn emission_after_a_terminator_opens_a_fresh_block() {
        with_fgc(|fgc| {
            let before = fgc.current_block();
            fgc.unreachable();
            assert!(fgc.is_after_terminator());
            // The next instruction must not extend the terminated block.
            let a = fgc.const_i64(1);
            let b = fgc.const_i64(2);
            fgc.add(a, b);
            assert_ne!(fgc.current_block(), before);
            assert!(!fgc.is_after_terminator());
        });
    }

    #[test]
    #[should_panic(expected = "twice in the same basic block")]
    fn returning_twice_from_one_block_is_fatal() {
        with_fgc(|fgc| {
            fgc.ret(None);
            fgc.ret(None);
        });
    }

    #[test]
    #[should_panic(expected = "no exception handler specified")]
    fn unwindable_call_without_a_handler_is_fatal() {
        with_fgc(|fgc| {
            let callee = fgc.codegen.runtime.throw_exception.clone();
            let exc = fgc.null_ref();
            fgc.call(
                &callee,
                &[exc],
                sable_ir::Lifetime::Irrelevant,
                &ExceptionHandler::None,
                None,
            );
        });
    }

    #[test]
    #[should_panic(expected = "incorrect slot type")]
    fn reference_result_with_an_unknown_lifetime_is_fatal() {
        with_fgc(|fgc| {
            let callee = fgc.codegen.runtime.alloc_instance.clone();
            let ti = fgc.null_ptr();
            fgc.call(
                &callee,
                &[ti],
                sable_ir::Lifetime::Unknown,
                &ExceptionHandler::Caller,
                None,
            );
        });
    }

    #[test]
    #[should_panic(expected = "runtime is forbidden")]
    fn thread_state_switch_under_forbidden_runtime_is_fatal() {
        let (ir, interner) = IrBuilder::new().finish_with_interner();
        let cg = CodeGenerator::new(&ir, &interner, CodegenConfig::default());
        let sig = Signature {
            params: Vec::new(),
            ret: None,
        };
        let func = cg.declare_function("fixture", sig.clone(), true);
        let options = FunctionOptions {
            forbid_runtime: true,
            ..FunctionOptions::default()
        };
        let mut fgc = FunctionGenerationContext::new(&cg, func, sig, options);
        fgc.prologue();
        fgc.switch_thread_state_runnable();
    }

    #[test]
    fn position_save_and_restore_round_trips() {
        with_fgc(|fgc| {
            let other = fgc.basic_block("other");
            let home = fgc.current_block();
            let emitted = fgc.appending_to(other, |fgc| {
                let a = fgc.const_i64(1);
                let b = fgc.const_i64(2);
                fgc.add(a, b);
                fgc.current_block()
            });
            assert_eq!(emitted, other);
            assert_eq!(fgc.current_block(), home);
        });
    }
}
