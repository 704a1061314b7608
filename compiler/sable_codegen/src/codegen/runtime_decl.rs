//! Runtime support library declarations.
//!
//! The backend links against a fixed catalogue of pre-built helper
//! routines by stable symbol name. Declared once per module before any
//! function generation; the signatures here must stay in sync with the
//! actual runtime's exports.
//!
//! Reference-returning helpers carry a trailing slot parameter: the caller
//! passes the frame slot the result is stored into, which is how the
//! root-set accounting sees intermediate references.

use crate::target::{GlobalData, Signature, TargetFunction, TypeId, TypePool};

use super::context::Callable;

/// Handles to every runtime routine the generated code may call, plus the
/// exception-discrimination globals used by filtering landingpads.
pub struct RuntimeCatalogue {
    // Allocation
    pub alloc_instance: Callable,
    pub alloc_array: Callable,
    // Frame and root-set maintenance
    pub enter_frame: Callable,
    pub leave_frame: Callable,
    pub set_current_frame: Callable,
    pub safepoint: Callable,
    pub init_runtime: Callable,
    // Reference updates
    pub update_stack_ref: Callable,
    pub update_heap_ref: Callable,
    pub update_volatile_heap_ref: Callable,
    pub update_return_ref: Callable,
    pub zero_heap_ref: Callable,
    pub zero_array_refs: Callable,
    // Exceptions and faults
    pub throw_exception: Callable,
    pub throw_arithmetic_fault: Callable,
    pub throw_bounds_fault: Callable,
    pub throw_cast_fault: Callable,
    pub throw_null_fault: Callable,
    pub get_exception_object: Callable,
    pub begin_catch: Callable,
    pub end_catch: Callable,
    pub wrap_foreign_exception: Callable,
    pub eh_typeid_for: Callable,
    pub personality: Callable,
    pub terminate: Callable,
    // Subtype checks and dispatch
    pub is_subtype: Callable,
    pub is_subclass_fast: Callable,
    pub lookup_interface_record: Callable,
    // Thread states (thread-confined model)
    pub switch_thread_state_native: Callable,
    pub switch_thread_state_runnable: Callable,
    // Reference-aware atomics
    pub cas_heap_ref: Callable,
    pub swap_heap_ref: Callable,
    pub get_and_set_heap_ref: Callable,
    // Exception discrimination globals
    pub native_exception_rtti: crate::target::GlobalId,
    pub foreign_exception_rtti: crate::target::GlobalId,
}

/// Declare the whole catalogue as external functions. Call once per module.
pub fn declare_runtime(
    types: &mut TypePool,
    functions: &mut Vec<TargetFunction>,
    globals: &mut Vec<GlobalData>,
) -> RuntimeCatalogue {
    let ptr = TypeId::PTR;
    let obj = TypeId::REF;
    let i1 = TypeId::I1;
    let i32t = TypeId::I32;
    let void = None;

    let mut declare = |name: &str, params: Vec<TypeId>, ret: Option<TypeId>, no_unwind: bool| {
        let sig = Signature {
            params: params.clone(),
            ret,
        };
        let sig_ty = types.func_of(params, ret);
        let func = crate::target::FuncId::new(u32::try_from(functions.len()).unwrap_or(u32::MAX));
        functions.push(TargetFunction::external(name, sig.clone(), no_unwind));
        Callable {
            func,
            sig,
            sig_ty,
            no_unwind,
            returns_ref: ret == Some(obj),
        }
    };

    // Allocation. Unwindable: allocation failure raises an out-of-memory
    // exception through the normal unwind path.
    let alloc_instance = declare("sable_alloc_instance", vec![ptr, ptr], Some(obj), false);
    let alloc_array = declare("sable_alloc_array", vec![ptr, i32t, ptr], Some(obj), false);

    // Frame bookkeeping never throws.
    let enter_frame = declare("sable_enter_frame", vec![ptr, i32t, i32t], void, true);
    let leave_frame = declare("sable_leave_frame", vec![ptr, i32t, i32t], void, true);
    let set_current_frame = declare("sable_set_current_frame", vec![ptr], void, true);
    let safepoint = declare("sable_safepoint", vec![], void, true);
    let init_runtime = declare("sable_init_runtime", vec![], void, true);

    // Reference updates never throw.
    let update_stack_ref = declare("sable_update_stack_ref", vec![ptr, obj], void, true);
    let update_heap_ref = declare("sable_update_heap_ref", vec![ptr, obj], void, true);
    let update_volatile_heap_ref =
        declare("sable_update_volatile_heap_ref", vec![ptr, obj], void, true);
    let update_return_ref = declare("sable_update_return_ref", vec![ptr, obj], void, true);
    let zero_heap_ref = declare("sable_zero_heap_ref", vec![ptr], void, true);
    let zero_array_refs = declare("sable_zero_array_refs", vec![obj], void, true);

    // Throw helpers unwind by definition.
    let throw_exception = declare("sable_throw_exception", vec![obj], void, false);
    let throw_arithmetic_fault = declare("sable_throw_arithmetic_fault", vec![], void, false);
    let throw_bounds_fault = declare("sable_throw_bounds_fault", vec![], void, false);
    let throw_cast_fault = declare("sable_throw_cast_fault", vec![], void, false);
    let throw_null_fault = declare("sable_throw_null_fault", vec![], void, false);

    let get_exception_object =
        declare("sable_get_exception_object", vec![ptr, ptr], Some(obj), true);
    let begin_catch = declare("sable_begin_catch", vec![ptr], Some(ptr), true);
    let end_catch = declare("sable_end_catch", vec![], void, true);
    let wrap_foreign_exception =
        declare("sable_wrap_foreign_exception", vec![ptr, ptr], Some(obj), false);
    let eh_typeid_for = declare("sable_eh_typeid_for", vec![ptr], Some(i32t), true);
    let personality = declare("sable_personality", vec![i32t], Some(i32t), true);
    let terminate = declare("sable_terminate", vec![], void, true);

    let is_subtype = declare("sable_is_subtype", vec![ptr, ptr], Some(i1), true);
    let is_subclass_fast = declare("sable_is_subclass_fast", vec![ptr, i32t, i32t], Some(i1), true);
    let lookup_interface_record =
        declare("sable_lookup_interface_record", vec![ptr, i32t, i32t], Some(ptr), true);

    let switch_thread_state_native =
        declare("sable_switch_thread_state_native", vec![], void, true);
    let switch_thread_state_runnable =
        declare("sable_switch_thread_state_runnable", vec![], void, true);

    let cas_heap_ref = declare("sable_cas_heap_ref", vec![ptr, obj, obj], Some(i1), true);
    let swap_heap_ref = declare("sable_swap_heap_ref", vec![ptr, obj, obj, ptr], Some(obj), true);
    let get_and_set_heap_ref =
        declare("sable_get_and_set_heap_ref", vec![ptr, obj, ptr], Some(obj), true);

    let mut declare_global = |name: &str| {
        let id = crate::target::GlobalId::new(u32::try_from(globals.len()).unwrap_or(u32::MAX));
        globals.push(GlobalData {
            name: name.to_owned(),
            ty: ptr,
            init: None,
            constant: true,
        });
        id
    };
    let native_exception_rtti = declare_global("sable_native_exception_rtti");
    let foreign_exception_rtti = declare_global("sable_foreign_exception_rtti");

    RuntimeCatalogue {
        alloc_instance,
        alloc_array,
        enter_frame,
        leave_frame,
        set_current_frame,
        safepoint,
        init_runtime,
        update_stack_ref,
        update_heap_ref,
        update_volatile_heap_ref,
        update_return_ref,
        zero_heap_ref,
        zero_array_refs,
        throw_exception,
        throw_arithmetic_fault,
        throw_bounds_fault,
        throw_cast_fault,
        throw_null_fault,
        get_exception_object,
        begin_catch,
        end_catch,
        wrap_foreign_exception,
        eh_typeid_for,
        personality,
        terminate,
        is_subtype,
        is_subclass_fast,
        lookup_interface_record,
        switch_thread_state_native,
        switch_thread_state_runnable,
        cas_heap_ref,
        swap_heap_ref,
        get_and_set_heap_ref,
        native_exception_rtti,
        foreign_exception_rtti,
    }
}
