//! IR-to-module driver.
//!
//! Walks the module's declarations in two passes (declare, then define),
//! generates RTTI for every class, emits each function body through a
//! [`FunctionGenerationContext`], and verifies the finished module.
//!
//! The ambient emission state the original visitor kept in mutable scope
//! objects is an explicit, immutable environment value here: the active
//! exception handler, the innermost loop targets, and the variable
//! bindings travel down the recursive emitter as a cheap structurally
//! shared value.

use im::HashMap as ImHashMap;
use tracing::{debug, info};

use sable_ir::{
    Catch, ClassId, ConstValue, ExprId, ExprKind, FieldRef, FunId, IntrinsicOp, IrType, Lifetime,
    Module, StringInterner, VarId,
};

use crate::config::CodegenConfig;
use crate::target::{verify_module, BlockId, TypeId, ValueId, VerifyError};

use super::context::{CodeGenerator, RuntimeInfo};
use super::exceptions::{CatchDispatch, ExceptionHandler};
use super::function_gen::{FunctionGenerationContext, FunctionOptions};
use super::intrinsics::{evaluate_intrinsic, FieldAccess};
use super::rtti::RttiGenerator;

// ---------------------------------------------------------------------------
// Public entry
// ---------------------------------------------------------------------------

/// Fatal generation failures. Internal invariant violations panic instead;
/// there is no partial output.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// The produced module failed structural verification. Each diagnostic
    /// carries a rendered dump of the offending function.
    #[error("target module verification failed with {} diagnostic(s)", .0.len())]
    Verification(Vec<VerifyError>),
}

/// The backend's product: a verified in-memory module plus the metadata a
/// runtime model needs to execute or inspect it.
pub struct GeneratedModule {
    pub module: crate::target::TargetModule,
    pub runtime_info: RuntimeInfo,
}

/// Compile one IR module to a verified target module.
pub fn compile_module(
    ir: &Module,
    interner: &StringInterner,
    config: CodegenConfig,
    module_name: &str,
) -> Result<GeneratedModule, CodegenError> {
    info!(module = module_name, "starting code generation");
    let codegen = CodeGenerator::new(ir, interner, config);

    // Declare pass: every class layout and function handle exists before
    // any body is emitted.
    for i in 0..ir.classes.len() {
        codegen.class_decls(ClassId(u32::try_from(i).unwrap_or(u32::MAX)));
    }
    for i in 0..ir.functions.len() {
        codegen.fun_callable(FunId(u32::try_from(i).unwrap_or(u32::MAX)));
    }
    for i in 0..ir.statics.len() {
        codegen.static_global(u32::try_from(i).unwrap_or(u32::MAX));
    }

    // Type descriptors.
    let rtti = RttiGenerator::new(&codegen);
    for i in 0..ir.classes.len() {
        rtti.generate(ClassId(u32::try_from(i).unwrap_or(u32::MAX)));
    }

    // Define pass.
    for (i, function) in ir.functions.iter().enumerate() {
        if function.body.is_some() {
            emit_function(&codegen, FunId(u32::try_from(i).unwrap_or(u32::MAX)));
        }
    }

    let (module, runtime_info) = codegen.finish(module_name);
    let errors = verify_module(&module);
    if !errors.is_empty() {
        return Err(CodegenError::Verification(errors));
    }
    debug!(
        functions = module.functions.len(),
        globals = module.globals.len(),
        "module verified"
    );
    Ok(GeneratedModule {
        module,
        runtime_info,
    })
}

// ---------------------------------------------------------------------------
// Emission environment
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct LoopCtx {
    continue_bb: BlockId,
    exit_bb: BlockId,
}

/// The explicit ambient state of emission, passed down the recursion.
/// Cloning is O(1): the bindings map is structurally shared.
#[derive(Clone)]
struct EmitEnv {
    handler: ExceptionHandler,
    loop_ctx: Option<LoopCtx>,
    bindings: ImHashMap<VarId, usize>,
}

impl EmitEnv {
    fn with_handler(&self, handler: ExceptionHandler) -> Self {
        Self {
            handler,
            ..self.clone()
        }
    }

    fn with_loop(&self, loop_ctx: LoopCtx) -> Self {
        Self {
            loop_ctx: Some(loop_ctx),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Function emission
// ---------------------------------------------------------------------------

fn emit_function(codegen: &CodeGenerator<'_>, fun: FunId) {
    let ir = codegen.ir;
    let decl = ir.function(fun);
    let callable = codegen.fun_callable(fun);
    if decl.flags.forbid_runtime {
        assert!(
            !callable.returns_ref,
            "cannot return an object from a function without runtime access"
        );
    }
    let options = FunctionOptions {
        switch_to_runnable: decl.flags.is_bridge,
        need_safepoint: true,
        exported: decl.flags.exported,
        forbid_runtime: decl.flags.forbid_runtime,
        returns_ref: callable.returns_ref,
    };
    let mut fgc = FunctionGenerationContext::new(codegen, callable.func, callable.sig.clone(), options);
    if decl.flags.is_bridge {
        fgc.needs_runtime_init = true;
    }
    fgc.prologue();
    codegen
        .debug
        .function_scope(callable.func, &codegen.function_name(callable.func));
    codegen.debug.location(decl.loc);

    // Parameters: the receiver (when present) and the declared parameters
    // occupy the leading variable ids in order.
    let mut bindings = ImHashMap::new();
    let explicit_params = decl.params.len() + usize::from(decl.owner.is_some());
    for i in 0..explicit_params {
        let var = VarId(u32::try_from(i).unwrap_or(u32::MAX));
        let record = fgc.declare_parameter(var, i);
        bindings.insert(var, record);
    }

    // Bridge functions sit on the foreign call boundary: anything escaping
    // the body is filtered so foreign exceptions never unwind raw through
    // native frames.
    let root_handler = if decl.flags.is_bridge {
        let switch_state =
            codegen.config.memory_model == crate::config::MemoryModel::ThreadConfined;
        fgc.filtering_exception_handler(&ExceptionHandler::Caller, switch_state)
    } else {
        ExceptionHandler::Caller
    };
    let env = EmitEnv {
        handler: root_handler,
        loop_ctx: None,
        bindings,
    };
    let body = decl.body.unwrap_or_else(|| panic!("defining a bodyless function"));
    let mut emitter = FunctionEmitter { fgc };
    let body_value = emitter.ev(&env, body, None);

    let mut fgc = emitter.fgc;
    if let ExceptionHandler::Local { unwind, .. } = root_handler {
        if !fgc.has_unwind_edges_to(unwind) {
            fgc.retire_block_to_unreachable(unwind);
        }
    }
    if !fgc.is_after_terminator() {
        match decl.ret {
            IrType::Unit | IrType::Nothing => fgc.ret(None),
            _ => fgc.ret(Some(body_value)),
        }
    }
    fgc.epilogue();
    fgc.finish();
}

struct FunctionEmitter<'a, 'ir> {
    fgc: FunctionGenerationContext<'a, 'ir>,
}

impl<'a, 'ir> FunctionEmitter<'a, 'ir> {
    fn ir(&self) -> &'ir Module {
        self.fgc.codegen.ir
    }

    fn expr_target_ty(&self, id: ExprId) -> TypeId {
        let ty = self.ir().arena.get(id).ty;
        self.fgc.codegen.target_ty(ty)
    }

    fn result_lifetime(&self, id: ExprId) -> Lifetime {
        self.ir().lifetime_of(id)
    }

    /// Evaluate one expression, returning the value it produces. `Nothing`
    /// typed expressions return an undef placeholder; emission after them
    /// lands in unreachable blocks.
    fn ev(&mut self, env: &EmitEnv, id: ExprId, result_slot: Option<ValueId>) -> ValueId {
        let expr = self.ir().arena.get(id).clone();
        self.fgc.codegen.debug.location(expr.loc);
        match expr.kind {
            ExprKind::Const(c) => self.emit_const(c),
            ExprKind::GetVar(var) => {
                let record = self.binding(env, var);
                self.fgc.load_variable(record, result_slot)
            }
            ExprKind::SetVar { var, value } => {
                let v = self.ev(env, value, None);
                let record = self.binding(env, var);
                self.fgc.store_variable(record, v);
                self.fgc.unit_value()
            }
            ExprKind::VarDecl { .. } => {
                panic!("variable declaration outside a block; upstream lowering is broken")
            }
            ExprKind::Block(children) => self.emit_block(env, &children, result_slot),
            ExprKind::GetField { receiver, field } => {
                let recv = self.ev(env, receiver, None);
                self.null_check(env, recv);
                let (addr, ty, volatile) = self.field_access(recv, field);
                if volatile {
                    let value = self.fgc.load_ordered(
                        addr,
                        ty,
                        Some(crate::target::AtomicOrdering::SeqCst),
                        true,
                    );
                    self.root_if_reference(value, result_slot);
                    value
                } else {
                    self.fgc.load_slot(addr, ty, true, result_slot)
                }
            }
            ExprKind::SetField {
                receiver,
                field,
                value,
            } => {
                let recv = self.ev(env, receiver, None);
                self.null_check(env, recv);
                let v = self.ev(env, value, None);
                let (addr, _, volatile) = self.field_access(recv, field);
                self.fgc.store_any(v, addr, false, volatile);
                self.fgc.unit_value()
            }
            ExprKind::GetStatic(index) => {
                let global = self.fgc.codegen.static_global(index);
                let addr = self.fgc.global_ref(global);
                let field = &self.ir().statics[index as usize];
                let ty = self.fgc.codegen.target_ty(field.ty);
                if field.is_volatile {
                    let value = self.fgc.load_ordered(
                        addr,
                        ty,
                        Some(crate::target::AtomicOrdering::SeqCst),
                        true,
                    );
                    self.root_if_reference(value, result_slot);
                    value
                } else {
                    self.fgc.load_slot(addr, ty, true, result_slot)
                }
            }
            ExprKind::SetStatic { index, value } => {
                let v = self.ev(env, value, None);
                let global = self.fgc.codegen.static_global(index);
                let addr = self.fgc.global_ref(global);
                let volatile = self.ir().statics[index as usize].is_volatile;
                self.fgc.store_any(v, addr, false, volatile);
                self.fgc.unit_value()
            }
            ExprKind::Call {
                target,
                receiver,
                args,
                virtual_dispatch,
            } => self.emit_call(env, id, target, receiver, &args, virtual_dispatch, result_slot),
            ExprKind::Intrinsic { op, field, args } => {
                self.emit_intrinsic(env, id, op, field, &args, result_slot)
            }
            ExprKind::New { class, ctor, args } => {
                self.emit_new(env, id, class, ctor, &args, result_slot)
            }
            ExprKind::NewArray { class, length } => {
                let len = self.ev(env, length, None);
                let lifetime = self.result_lifetime(id);
                if lifetime == Lifetime::Stack {
                    self.fgc.alloc_stack_array(class, len)
                } else {
                    let typeinfo = self.fgc.codegen.typeinfo_of(class);
                    let ti = self.fgc.global_ref(typeinfo);
                    let callee = self.fgc.codegen.runtime.alloc_array.clone();
                    self.fgc
                        .call(&callee, &[ti, len], lifetime, &env.handler, result_slot)
                }
            }
            ExprKind::If {
                cond,
                then_expr,
                else_expr,
            } => self.emit_if(env, id, cond, then_expr, else_expr, result_slot),
            ExprKind::While { cond, body } => self.emit_while(env, cond, body),
            ExprKind::DoWhile { body, cond } => self.emit_do_while(env, body, cond),
            ExprKind::Break => {
                let ctx = env
                    .loop_ctx
                    .unwrap_or_else(|| panic!("break outside of a loop"));
                self.fgc.br(ctx.exit_bb);
                self.undef_for(id)
            }
            ExprKind::Continue => {
                let ctx = env
                    .loop_ctx
                    .unwrap_or_else(|| panic!("continue outside of a loop"));
                self.fgc.br(ctx.continue_bb);
                self.undef_for(id)
            }
            ExprKind::Try { body, catches } => {
                self.emit_try(env, id, body, &catches, result_slot)
            }
            ExprKind::Throw(value) => {
                let exception = self.ev(env, value, None);
                let handler = env.handler;
                handler.gen_throw(&mut self.fgc, exception);
                self.undef_for(id)
            }
            ExprKind::Return(value) => {
                let v = value.map(|v| self.ev(env, v, None));
                match self.fgc.return_ty() {
                    Some(_) => self.fgc.ret(v),
                    None => self.fgc.ret(None),
                }
                self.undef_for(id)
            }
            ExprKind::Cast { value, class, safe } => {
                let v = self.ev(env, value, None);
                let is_instance = self.emit_instance_check(env, v, class);
                if safe {
                    let null = self.fgc.null_ref();
                    self.fgc.select(is_instance, v, null)
                } else {
                    let failed = self.fgc.not(is_instance);
                    let handler = env.handler;
                    self.fgc.if_then(failed, |fgc| {
                        let callee = fgc.codegen.runtime.throw_cast_fault.clone();
                        fgc.call(&callee, &[], Lifetime::Irrelevant, &handler, None);
                        fgc.unreachable();
                    });
                    v
                }
            }
            ExprKind::InstanceOf {
                value,
                class,
                negated,
            } => {
                let v = self.ev(env, value, None);
                let check = self.emit_instance_check(env, v, class);
                if negated {
                    self.fgc.not(check)
                } else {
                    check
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Leaves
    // -----------------------------------------------------------------------

    fn emit_const(&mut self, c: ConstValue) -> ValueId {
        match c {
            ConstValue::Unit => self.fgc.unit_value(),
            ConstValue::Bool(b) => self.fgc.const_bool(b),
            ConstValue::I8(v) => self.fgc.const_int(TypeId::I8, i64::from(v)),
            ConstValue::I16(v) => self.fgc.const_int(TypeId::I16, i64::from(v)),
            ConstValue::I32(v) => self.fgc.const_int(TypeId::I32, i64::from(v)),
            ConstValue::I64(v) => self.fgc.const_i64(v),
            ConstValue::F32(bits) => self.fgc.const_float(TypeId::F32, u64::from(bits)),
            ConstValue::F64(bits) => self.fgc.const_float(TypeId::F64, bits),
            ConstValue::Str(name) => {
                let global = self.fgc.codegen.string_literal(name);
                let ptr = self.fgc.global_ref(global);
                self.fgc.bitcast(ptr, TypeId::REF)
            }
            ConstValue::Null => self.fgc.null_ref(),
        }
    }

    fn undef_for(&mut self, id: ExprId) -> ValueId {
        let ty = self.expr_target_ty(id);
        self.fgc.undef(ty)
    }

    fn binding(&self, env: &EmitEnv, var: VarId) -> usize {
        env.bindings
            .get(&var)
            .copied()
            .unwrap_or_else(|| panic!("reference to undeclared variable {var:?}"))
    }

    fn field_access(&mut self, receiver: ValueId, field: FieldRef) -> (ValueId, TypeId, bool) {
        let decls = self.fgc.codegen.class_decls(field.class);
        let decl = self.ir().field(field);
        let index = decls.field_indices[field.field.index()];
        let addr = self.fgc.struct_gep(receiver, decls.body_ty, index);
        let ty = self.fgc.codegen.target_ty(decl.ty);
        (addr, ty, decl.is_volatile)
    }

    /// Root a freshly loaded reference into a frame slot so it survives a
    /// collection between the load and its use.
    fn root_if_reference(&mut self, value: ValueId, result_slot: Option<ValueId>) {
        let is_ref = self
            .fgc
            .value_ty(value)
            .is_some_and(|t| t == TypeId::REF);
        if is_ref {
            let slot = result_slot.unwrap_or_else(|| self.fgc.create_anonymous_slot());
            self.fgc.store_stack_ref(value, slot);
        }
    }

    fn null_check(&mut self, env: &EmitEnv, value: ValueId) {
        if !self.fgc.codegen.config.explicit_null_checks {
            return;
        }
        let null = self.fgc.null_ref();
        let is_null = self.fgc.icmp_eq(value, null);
        let handler = env.handler;
        self.fgc.if_then(is_null, |fgc| {
            let callee = fgc.codegen.runtime.throw_null_fault.clone();
            fgc.call(&callee, &[], Lifetime::Irrelevant, &handler, None);
            fgc.unreachable();
        });
    }

    // -----------------------------------------------------------------------
    // Blocks, conditionals, loops
    // -----------------------------------------------------------------------

    fn emit_block(
        &mut self,
        env: &EmitEnv,
        children: &[ExprId],
        result_slot: Option<ValueId>,
    ) -> ValueId {
        let mut scope_env = env.clone();
        let mut last = None;
        for (i, &child) in children.iter().enumerate() {
            let is_last = i + 1 == children.len();
            let expr = self.ir().arena.get(child).clone();
            if let ExprKind::VarDecl {
                var,
                ty,
                mutable,
                init,
            } = expr.kind
            {
                let init_value = init.map(|e| self.ev(&scope_env, e, None));
                let target_ty = self.fgc.codegen.target_ty(ty);
                let record = self
                    .fgc
                    .declare_variable(var, target_ty, mutable, init_value);
                scope_env.bindings.insert(var, record);
                last = None;
            } else {
                let slot = if is_last { result_slot } else { None };
                let value = self.ev(&scope_env, child, slot);
                last = Some(value);
            }
            if self.fgc.is_after_terminator() {
                break;
            }
        }
        match last {
            Some(v) => v,
            None => self.fgc.unit_value(),
        }
    }

    fn emit_if(
        &mut self,
        env: &EmitEnv,
        id: ExprId,
        cond: ExprId,
        then_expr: ExprId,
        else_expr: Option<ExprId>,
        result_slot: Option<ValueId>,
    ) -> ValueId {
        let expr_ty = self.ir().arena.get(id).ty;
        let needs_value =
            else_expr.is_some() && !matches!(expr_ty, IrType::Unit | IrType::Nothing);

        let cond_value = self.ev(env, cond, None);
        let bb_then = self.fgc.basic_block("if_then");
        let bb_exit = self.fgc.basic_block("if_exit");
        let bb_else = if else_expr.is_some() {
            self.fgc.basic_block("if_else")
        } else {
            bb_exit
        };
        self.fgc.cond_br(cond_value, bb_then, bb_else);

        let result_phi = needs_value.then(|| {
            let ty = self.expr_target_ty(id);
            self.fgc.appending_to(bb_exit, |fgc| fgc.phi(ty))
        });

        self.fgc.position_at_end(bb_then);
        let then_value = self.ev(env, then_expr, result_slot);
        if !self.fgc.is_after_terminator() {
            if let Some(phi) = result_phi {
                self.fgc.assign_phi(phi, then_value);
            }
            self.fgc.br(bb_exit);
        }

        if let Some(else_expr) = else_expr {
            self.fgc.position_at_end(bb_else);
            let else_value = self.ev(env, else_expr, result_slot);
            if !self.fgc.is_after_terminator() {
                if let Some(phi) = result_phi {
                    self.fgc.assign_phi(phi, else_value);
                }
                self.fgc.br(bb_exit);
            }
        }

        self.fgc.position_at_end(bb_exit);
        match result_phi {
            Some(phi) => phi,
            None => self.fgc.unit_value(),
        }
    }

    fn emit_while(&mut self, env: &EmitEnv, cond: ExprId, body: ExprId) -> ValueId {
        let bb_cond = self.fgc.basic_block("while_cond");
        let bb_body = self.fgc.basic_block("while_body");
        let bb_exit = self.fgc.basic_block("while_exit");

        self.fgc.enter_stack_locals_scope();
        self.fgc.br(bb_cond);

        self.fgc.position_at_end(bb_cond);
        let cond_value = self.ev(env, cond, None);
        self.fgc.cond_br(cond_value, bb_body, bb_exit);

        self.fgc.position_at_end(bb_body);
        let loop_env = env.with_loop(LoopCtx {
            continue_bb: bb_cond,
            exit_bb: bb_exit,
        });
        self.ev(&loop_env, body, None);
        if !self.fgc.is_after_terminator() {
            self.fgc.br(bb_cond);
        }

        self.fgc.position_at_end(bb_exit);
        self.fgc.exit_stack_locals_scope();
        self.fgc.unit_value()
    }

    fn emit_do_while(&mut self, env: &EmitEnv, body: ExprId, cond: ExprId) -> ValueId {
        let bb_body = self.fgc.basic_block("dowhile_body");
        let bb_cond = self.fgc.basic_block("dowhile_cond");
        let bb_exit = self.fgc.basic_block("dowhile_exit");

        self.fgc.enter_stack_locals_scope();
        self.fgc.br(bb_body);

        self.fgc.position_at_end(bb_body);
        let loop_env = env.with_loop(LoopCtx {
            continue_bb: bb_cond,
            exit_bb: bb_exit,
        });
        self.ev(&loop_env, body, None);
        if !self.fgc.is_after_terminator() {
            self.fgc.br(bb_cond);
        }

        self.fgc.position_at_end(bb_cond);
        let cond_value = self.ev(env, cond, None);
        self.fgc.cond_br(cond_value, bb_body, bb_exit);

        self.fgc.position_at_end(bb_exit);
        self.fgc.exit_stack_locals_scope();
        self.fgc.unit_value()
    }

    // -----------------------------------------------------------------------
    // Calls and allocation
    // -----------------------------------------------------------------------

    fn emit_call(
        &mut self,
        env: &EmitEnv,
        id: ExprId,
        target: FunId,
        receiver: Option<ExprId>,
        args: &[ExprId],
        virtual_dispatch: bool,
        result_slot: Option<ValueId>,
    ) -> ValueId {
        let mut values = Vec::with_capacity(args.len() + 1);
        if let Some(recv) = receiver {
            let v = self.ev(env, recv, None);
            if virtual_dispatch {
                self.null_check(env, v);
            }
            values.push(v);
        }
        for &arg in args {
            values.push(self.ev(env, arg, None));
        }

        let callable = if virtual_dispatch {
            self.fgc.codegen.virtual_trampoline(target)
        } else {
            self.fgc.codegen.fun_callable(target)
        };
        let lifetime = self.result_lifetime(id);
        let result = self
            .fgc
            .call(&callable, &values, lifetime, &env.handler, result_slot);

        if self.ir().function(target).ret == IrType::Nothing {
            self.fgc.unreachable();
            return self.undef_for(id);
        }
        if callable.sig.ret.is_none() {
            return self.fgc.unit_value();
        }
        result
    }

    fn emit_new(
        &mut self,
        env: &EmitEnv,
        id: ExprId,
        class: ClassId,
        ctor: FunId,
        args: &[ExprId],
        result_slot: Option<ValueId>,
    ) -> ValueId {
        let lifetime = self.result_lifetime(id);
        let this = if lifetime == Lifetime::Stack {
            self.fgc.alloc_stack_instance(class)
        } else {
            let typeinfo = self.fgc.codegen.typeinfo_of(class);
            let ti = self.fgc.global_ref(typeinfo);
            let callee = self.fgc.codegen.runtime.alloc_instance.clone();
            self.fgc
                .call(&callee, &[ti], lifetime, &env.handler, result_slot)
        };
        let mut values = vec![this];
        for &arg in args {
            values.push(self.ev(env, arg, None));
        }
        let ctor_callable = self.fgc.codegen.fun_callable(ctor);
        self.fgc.call(
            &ctor_callable,
            &values,
            Lifetime::Irrelevant,
            &env.handler,
            None,
        );
        this
    }

    fn emit_intrinsic(
        &mut self,
        env: &EmitEnv,
        id: ExprId,
        op: IntrinsicOp,
        field: Option<FieldRef>,
        args: &[ExprId],
        result_slot: Option<ValueId>,
    ) -> ValueId {
        let is_field_op = matches!(
            op,
            IntrinsicOp::CompareAndSetField
                | IntrinsicOp::CompareAndExchangeField
                | IntrinsicOp::GetAndSetField
                | IntrinsicOp::GetAndAddField
        );

        let (field_access, value_args) = if is_field_op {
            let fref =
                field.unwrap_or_else(|| panic!("atomic field operation without a field"));
            let recv = self.ev(env, args[0], None);
            self.null_check(env, recv);
            let (addr, _, _) = self.field_access(recv, fref);
            let is_reference = self.ir().field(fref).ty.is_reference();
            let rest: Vec<ValueId> = args[1..]
                .iter()
                .map(|&a| self.ev(env, a, None))
                .collect();
            (
                Some(FieldAccess {
                    address: addr,
                    is_reference,
                }),
                rest,
            )
        } else {
            let values: Vec<ValueId> = args.iter().map(|&a| self.ev(env, a, None)).collect();
            (None, values)
        };

        let ret_ty = self.expr_target_ty(id);
        let lifetime = self.result_lifetime(id);
        evaluate_intrinsic(
            &mut self.fgc,
            op,
            &value_args,
            ret_ty,
            &env.handler,
            lifetime,
            result_slot,
            field_access,
        )
    }

    // -----------------------------------------------------------------------
    // Subtype checks
    // -----------------------------------------------------------------------

    fn emit_instance_check(
        &mut self,
        _env: &EmitEnv,
        value: ValueId,
        dst_class: ClassId,
    ) -> ValueId {
        let cg = self.fgc.codegen;
        let ir = cg.ir;
        if !cg.config.hierarchy_analysis {
            let obj_ti = self.fgc.load_type_info(value);
            let dst = cg.typeinfo_of(dst_class);
            let dst_ti = self.fgc.global_ref(dst);
            let callee = cg.runtime.is_subtype.clone();
            return self.fgc.call_no_result(&callee, &[obj_ti, dst_ti]);
        }
        let info = cg.hierarchy[dst_class.index()];
        if ir.class(dst_class).flags.is_interface {
            let obj_ti = self.fgc.load_type_info(value);
            let record = self
                .fgc
                .interface_table_record(obj_ti, info.interface_id);
            let record_ty = cg.common.itable_record;
            let id_ptr = self.fgc.struct_gep(record, record_ty, 0);
            let stored_id = self.fgc.load(id_ptr, TypeId::I32);
            let query = self.fgc.const_i32(info.interface_id);
            self.fgc.icmp_eq(stored_id, query)
        } else {
            let obj_ti = self.fgc.load_type_info(value);
            let callee = cg.runtime.is_subclass_fast.clone();
            let lo = self.fgc.const_i32(info.class_id_lo);
            let hi = self.fgc.const_i32(info.class_id_hi);
            self.fgc.call_no_result(&callee, &[obj_ti, lo, hi])
        }
    }

    // -----------------------------------------------------------------------
    // Try / catch
    // -----------------------------------------------------------------------

    fn emit_try(
        &mut self,
        env: &EmitEnv,
        id: ExprId,
        body: ExprId,
        catches: &[Catch],
        result_slot: Option<ValueId>,
    ) -> ValueId {
        if catches.is_empty() {
            return self.ev(env, body, result_slot);
        }

        let expr_ty = self.ir().arena.get(id).ty;
        let needs_value = !matches!(expr_ty, IrType::Unit | IrType::Nothing);
        let bb_cont = self.fgc.basic_block("try_continue");
        let cont_phi = needs_value.then(|| {
            let ty = self.expr_target_ty(id);
            self.fgc.appending_to(bb_cont, |fgc| fgc.phi(ty))
        });

        let bb_landingpad = self.fgc.basic_block("try_landingpad");
        let bb_dispatch = self.fgc.basic_block("catch_dispatch");
        let exception_phi = self
            .fgc
            .appending_to(bb_dispatch, |fgc| fgc.phi(TypeId::REF));

        let local_handler = ExceptionHandler::Local {
            unwind: bb_landingpad,
            dispatch: Some(CatchDispatch {
                block: bb_dispatch,
                exception_phi,
            }),
        };

        // Body under the local handler.
        let body_env = env.with_handler(local_handler);
        let body_value = self.ev(&body_env, body, result_slot);
        if !self.fgc.is_after_terminator() {
            if let Some(phi) = cont_phi {
                self.fgc.assign_phi(phi, body_value);
            }
            self.fgc.br(bb_cont);
        }

        // The landingpad catches the unwound exception and feeds it into
        // the same dispatch the direct throws jump to. When nothing inside
        // the body can unwind, the pad decays to a dead block.
        if self.fgc.has_unwind_edges_to(bb_landingpad) {
            self.fgc.appending_to(bb_landingpad, |fgc| {
                let exception = fgc.catch_native_exception();
                let from = fgc.current_block();
                fgc.add_phi_incoming(exception_phi, from, exception);
                fgc.br(bb_dispatch);
            });
        } else {
            self.fgc
                .appending_to(bb_landingpad, |fgc| fgc.unreachable());
        }

        // Catch dispatch: clauses in declared order; the universal base
        // class matches unconditionally; no match forwards to the
        // enclosing handler.
        self.fgc.position_at_end(bb_dispatch);
        let mut matched_unconditionally = false;
        for catch in catches {
            let mut catch_env = env.clone();
            if catch.class == self.ir().root_class {
                self.emit_catch_body(&mut catch_env, catch, exception_phi, cont_phi, bb_cont);
                matched_unconditionally = true;
                break;
            }
            let is_instance = self.emit_instance_check(env, exception_phi, catch.class);
            let bb_body = self.fgc.basic_block("catch_body");
            let bb_next = self.fgc.basic_block("catch_check");
            self.fgc.cond_br(is_instance, bb_body, bb_next);
            self.fgc.position_at_end(bb_body);
            self.emit_catch_body(&mut catch_env, catch, exception_phi, cont_phi, bb_cont);
            self.fgc.position_at_end(bb_next);
        }
        if !matched_unconditionally {
            let outer = env.handler;
            outer.gen_throw(&mut self.fgc, exception_phi);
        }

        self.fgc.position_at_end(bb_cont);
        match cont_phi {
            Some(phi) => phi,
            None => self.fgc.unit_value(),
        }
    }

    fn emit_catch_body(
        &mut self,
        env: &mut EmitEnv,
        catch: &Catch,
        exception: ValueId,
        cont_phi: Option<ValueId>,
        bb_cont: BlockId,
    ) {
        let record = self.fgc.declare_variable(
            catch.var,
            TypeId::REF,
            false,
            Some(exception),
        );
        env.bindings.insert(catch.var, record);
        let value = self.ev(env, catch.body, None);
        if !self.fgc.is_after_terminator() {
            if let Some(phi) = cont_phi {
                self.fgc.assign_phi(phi, value);
            }
            self.fgc.br(bb_cont);
        }
    }
}
