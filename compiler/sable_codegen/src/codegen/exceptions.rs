//! Exception propagation strategies.
//!
//! Exactly one handler is active at any emission point, forming a stack
//! that mirrors lexical try/catch nesting. The closed set of strategies is
//! threaded through every call emission:
//!
//! - `None`: calls must carry the no-unwind guarantee; an unwindable call
//!   here is fatal.
//! - `Caller`: unwind edges target the function's cleanup landingpad,
//!   which releases the frame and resumes propagation.
//! - `Local`: unwind edges target a catch landingpad owned by an enclosing
//!   try scope.
//!
//! There is no `finally` at this layer; such blocks were rewritten away
//! upstream.

use sable_ir::Lifetime;

use crate::config::ForeignExceptionMode;
use crate::target::{BlockId, Instr, TypeId, ValueId};

use super::function_gen::FunctionGenerationContext;

/// Jump target for a local handler that dispatches catch clauses: the
/// dispatch block and the phi merging the exception value from every
/// thrower.
#[derive(Clone, Copy, Debug)]
pub struct CatchDispatch {
    pub block: BlockId,
    pub exception_phi: ValueId,
}

/// The active exception propagation strategy.
#[derive(Clone, Copy, Debug)]
pub enum ExceptionHandler {
    /// No handler; only no-unwind calls may be emitted.
    None,
    /// Delegate to the enclosing frame through the cleanup landingpad.
    Caller,
    /// A local unwind block. When `dispatch` is present, throws within the
    /// same function bypass the unwind machinery and jump straight to the
    /// catch dispatch.
    Local {
        unwind: BlockId,
        dispatch: Option<CatchDispatch>,
    },
}

impl ExceptionHandler {
    /// Emit a throw of `exception` under this handler. For a dispatching
    /// local handler this is a direct jump; otherwise the runtime throw
    /// routine unwinds into whatever landingpad the handler designates.
    pub fn gen_throw(&self, fgc: &mut FunctionGenerationContext<'_, '_>, exception: ValueId) {
        match self {
            Self::Local {
                dispatch: Some(dispatch),
                ..
            } => {
                let from = fgc.current_block();
                fgc.add_phi_incoming(dispatch.exception_phi, from, exception);
                fgc.br(dispatch.block);
            }
            _ => {
                let callee = fgc.codegen.runtime.throw_exception.clone();
                fgc.call(&callee, &[exception], Lifetime::Irrelevant, self, None);
                fgc.unreachable();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Landingpad emission
// ---------------------------------------------------------------------------

impl<'a, 'ir> FunctionGenerationContext<'a, 'ir> {
    /// A landingpad followed by the frame re-registration the unwinder
    /// undid. `clauses` uses `None` for catch-all.
    pub fn landingpad(
        &mut self,
        cleanup: bool,
        clauses: Vec<Option<crate::target::GlobalId>>,
        switch_thread_state: bool,
    ) -> ValueId {
        let result_ty = self.codegen.common.landingpad_result;
        let lp = self.push_landingpad(cleanup, clauses, result_ty);
        if switch_thread_state {
            self.switch_thread_state_runnable();
        }
        let callee = self.codegen.runtime.set_current_frame.clone();
        let base = self.slots_base();
        self.call_no_result(&callee, &[base]);
        lp
    }

    fn push_landingpad(
        &mut self,
        cleanup: bool,
        clauses: Vec<Option<crate::target::GlobalId>>,
        result_ty: TypeId,
    ) -> ValueId {
        // Landingpads are not built through the cursor guard: they must
        // open their block.
        self.push_raw(Instr::Landingpad { cleanup, clauses }, Some(result_ty))
    }

    /// The cleanup landingpad's opening sequence; the caller adds frame
    /// release and the resume.
    pub(super) fn cleanup_landingpad_instr(&mut self) -> ValueId {
        self.landingpad(true, Vec::new(), false)
    }

    /// Catch a native exception: catch-all landingpad, then unwrap the
    /// exception object out of the unwinder's record.
    pub fn catch_native_exception(&mut self) -> ValueId {
        let lp = self.landingpad(false, vec![None], false);
        self.extract_exception_object(lp)
    }

    fn extract_exception_object(&mut self, landingpad: ValueId) -> ValueId {
        let record = self.extract_value(landingpad, 0);
        let begin = self.codegen.runtime.begin_catch.clone();
        let raw = self.call_no_result(&begin, &[record]);
        let get = self.codegen.runtime.get_exception_object.clone();
        let exception = self.call(
            &get,
            &[raw],
            Lifetime::Global,
            &ExceptionHandler::None,
            None,
        );
        let end = self.codegen.runtime.end_catch.clone();
        self.call_no_result(&end, &[]);
        exception
    }

    /// Terminate the process from within a catch region, so the pending
    /// exception is reported by the runtime's terminate hook.
    pub fn terminate_with_current_exception(&mut self, landingpad: ValueId) {
        let record = self.extract_value(landingpad, 0);
        let begin = self.codegen.runtime.begin_catch.clone();
        self.call_no_result(&begin, &[record]);
        self.terminate();
    }

    pub fn terminate(&mut self) {
        let callee = self.codegen.runtime.terminate.clone();
        self.call_no_result(&callee, &[]);
        // A self-loop instead of `unreachable`, keeping the unwinder's
        // view of the block well-formed if termination returns spuriously.
        let loop_bb = self.basic_block("terminate_loop");
        self.br(loop_bb);
        self.appending_to(loop_bb, |fgc| fgc.br(loop_bb));
    }

    /// Build a landingpad that filters foreign exceptions out of the
    /// unwind stream before they reach `outer`:
    ///
    /// - native exceptions are rethrown to `outer`;
    /// - foreign exceptions are wrapped and rethrown when the configured
    ///   mode says so, otherwise the process terminates;
    /// - unrecognized exceptions always terminate.
    pub fn filtering_exception_handler(
        &mut self,
        outer: &ExceptionHandler,
        switch_thread_state: bool,
    ) -> ExceptionHandler {
        let wrap_mode =
            self.codegen.config.foreign_exception_mode == ForeignExceptionMode::Wrap;
        let native_rtti = self.codegen.runtime.native_exception_rtti;
        let foreign_rtti = self.codegen.runtime.foreign_exception_rtti;

        let lp_block = self.basic_block("filtering_landingpad");
        self.appending_to(lp_block, |fgc| {
            let mut clauses = vec![Some(native_rtti)];
            if wrap_mode {
                clauses.push(Some(foreign_rtti));
            }
            clauses.push(None);
            let lp = fgc.landingpad(false, clauses, switch_thread_state);

            let fatal_bb = fgc.basic_block("fatal_foreign_exception");
            let forward_native_bb = fgc.basic_block("forward_native_exception");

            let type_id = fgc.extract_value(lp, 1);
            let typeid_for = fgc.codegen.runtime.eh_typeid_for.clone();
            let native_global = fgc.global_ref(native_rtti);
            let native_id = fgc.call_no_result(&typeid_for, &[native_global]);
            let is_native = fgc.icmp_eq(type_id, native_id);

            if wrap_mode {
                let foreign_bb = fgc.basic_block("foreign_exception");
                let wrap_bb = fgc.basic_block("wrap_foreign_exception");
                fgc.cond_br(is_native, forward_native_bb, foreign_bb);

                fgc.appending_to(foreign_bb, |fgc| {
                    let foreign_global = fgc.global_ref(foreign_rtti);
                    let foreign_id = fgc.call_no_result(&typeid_for, &[foreign_global]);
                    let is_foreign = fgc.icmp_eq(type_id, foreign_id);
                    fgc.cond_br(is_foreign, wrap_bb, fatal_bb);
                });
                fgc.appending_to(wrap_bb, |fgc| {
                    let record = fgc.extract_value(lp, 0);
                    let begin = fgc.codegen.runtime.begin_catch.clone();
                    let raw = fgc.call_no_result(&begin, &[record]);
                    let wrap = fgc.codegen.runtime.wrap_foreign_exception.clone();
                    let wrapped = fgc.call(&wrap, &[raw], Lifetime::Global, outer, None);
                    let end = fgc.codegen.runtime.end_catch.clone();
                    fgc.call_no_result(&end, &[]);
                    outer.gen_throw(fgc, wrapped);
                });
            } else {
                fgc.cond_br(is_native, forward_native_bb, fatal_bb);
            }

            fgc.appending_to(forward_native_bb, |fgc| {
                let exception = fgc.extract_exception_object(lp);
                outer.gen_throw(fgc, exception);
            });

            fgc.appending_to(fatal_bb, |fgc| {
                fgc.terminate_with_current_exception(lp);
            });
        });

        ExceptionHandler::Local {
            unwind: lp_block,
            dispatch: None,
        }
    }
}
