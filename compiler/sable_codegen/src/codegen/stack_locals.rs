//! Escape-driven inline stack allocation.
//!
//! Objects the escape analysis proved frame-local are allocated inline in
//! the native frame instead of the heap. Scopes form a depth-counted
//! stack; when a non-root scope exits, reference fields of the stack
//! objects it created are zeroed immediately so root scans never observe
//! stale pointers past the scope's end. Stack arrays get a dedicated
//! per-(class, length) aggregate layout to keep the frame layout stable
//! across varying lengths.

use sable_ir::{ClassId, IrType};

use crate::config::MemoryModel;
use crate::target::{Instr, TypeId, ValueId};

use super::function_gen::FunctionGenerationContext;

/// One stack-allocated object or array.
#[derive(Clone, Copy, Debug)]
struct StackLocal {
    class: ClassId,
    /// Fixed length for arrays, `None` for plain objects.
    array_len: Option<u32>,
    /// The frame allocation (pointer to the aggregate).
    alloc_ptr: ValueId,
    /// The object header within the aggregate, as a tracked reference.
    header_ref: ValueId,
    /// Root-set slot mirroring the object, when the model needs one.
    root_slot: Option<ValueId>,
    /// Aggregate type of the allocation.
    local_ty: TypeId,
    /// Scope depth the object was created at.
    depth: u32,
}

/// Per-function stack-locals bookkeeping, owned by the generation context.
#[derive(Default)]
pub struct StackLocalsState {
    scope_depth: u32,
    locals: Vec<StackLocal>,
}

impl StackLocalsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    fn is_root_scope(&self) -> bool {
        self.scope_depth == 0
    }
}

impl<'a, 'ir> FunctionGenerationContext<'a, 'ir> {
    pub fn enter_stack_locals_scope(&mut self) {
        self.stack_locals.scope_depth += 1;
    }

    /// Exit the current scope, immediately zeroing reference fields of the
    /// stack objects it created.
    pub fn exit_stack_locals_scope(&mut self) {
        let depth = self.stack_locals.scope_depth;
        let locals: Vec<StackLocal> = self
            .stack_locals
            .locals
            .iter()
            .copied()
            .filter(|l| l.depth == depth)
            .collect();
        for local in locals {
            self.clean_stack_local(local, true);
        }
        self.stack_locals.scope_depth -= 1;
    }

    /// Allocate an instance inline in the frame. Returns the object
    /// reference.
    pub fn alloc_stack_instance(&mut self, class: ClassId) -> ValueId {
        let decls = self.codegen.class_decls(class);
        let body_ty = decls.body_ty;
        let size = self.codegen.size_of(body_ty);
        let init_bb = self.stack_locals_init_block();
        let (alloc_ptr, header_ref) = self.appending_to(init_bb, |fgc| {
            let slot = fgc.push_raw(Instr::Alloca { ty: body_ty, len: 1 }, Some(TypeId::PTR));
            fgc.memset(slot, 0, size);
            let header = fgc.struct_gep(slot, body_ty, 0);
            fgc.set_local_object_type_info(header, class);
            let header_ref = fgc.bitcast(header, TypeId::REF);
            (slot, header_ref)
        });
        let root_slot = self.create_root_set_slot();
        let local = StackLocal {
            class,
            array_len: None,
            alloc_ptr,
            header_ref,
            root_slot,
            local_ty: body_ty,
            depth: self.stack_locals.scope_depth,
        };
        self.stack_locals.locals.push(local);
        if !self.stack_locals.is_root_scope() {
            // Init-block zeroing ran once at function entry; a scoped
            // allocation must be re-zeroed each time the scope is entered.
            self.clean_stack_local(local, false);
        }
        if let Some(slot) = root_slot {
            self.store_stack_ref(header_ref, slot);
        }
        header_ref
    }

    /// Allocate an array inline in the frame. The length must be a
    /// compile-time constant; escape analysis only marks such arrays as
    /// stack-allocatable.
    pub fn alloc_stack_array(&mut self, class: ClassId, count: ValueId) -> ValueId {
        let len = self
            .extract_const_int(count)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or_else(|| panic!("stack array length is not a constant"));
        let local_ty = self.codegen.local_array_type(class, len);
        let array_header = self.codegen.common.array_header;
        let elem_size = self.stack_array_elem_size(class);
        let init_bb = self.stack_locals_init_block();
        let (alloc_ptr, header_ref) = self.appending_to(init_bb, |fgc| {
            let slot = fgc.push_raw(Instr::Alloca { ty: local_ty, len: 1 }, Some(TypeId::PTR));
            let header = fgc.struct_gep(slot, local_ty, 0);
            fgc.set_local_object_type_info(header, class);
            let count_field = fgc.struct_gep(header, array_header, 1);
            fgc.store(count, count_field);
            let body = fgc.struct_gep(slot, local_ty, 1);
            fgc.memset(body, 0, u64::from(len) * elem_size);
            let header_ref = fgc.bitcast(header, TypeId::REF);
            (slot, header_ref)
        });
        let root_slot = self.create_root_set_slot();
        let local = StackLocal {
            class,
            array_len: Some(len),
            alloc_ptr,
            header_ref,
            root_slot,
            local_ty,
            depth: self.stack_locals.scope_depth,
        };
        self.stack_locals.locals.push(local);
        if !self.stack_locals.is_root_scope() {
            self.clean_stack_local(local, false);
        }
        if let Some(slot) = root_slot {
            self.store_stack_ref(header_ref, slot);
        }
        header_ref
    }

    /// Zero the reference fields (or the whole body) of every live stack
    /// local; part of frame teardown.
    pub(super) fn clean_stack_locals(&mut self, refs_only: bool) {
        let locals = self.stack_locals.locals.clone();
        for local in locals {
            self.clean_stack_local(local, refs_only);
        }
    }

    fn clean_stack_local(&mut self, local: StackLocal, refs_only: bool) {
        if let Some(len) = local.array_len {
            let elem = self.codegen.ir.class(local.class).element_type;
            if matches!(elem, Some(IrType::Class(_))) {
                let callee = self.codegen.runtime.zero_array_refs.clone();
                let header = local.header_ref;
                self.call_no_result(&callee, &[header]);
            } else if !refs_only {
                let elem_size = self.stack_array_elem_size(local.class);
                let body = self.struct_gep(local.alloc_ptr, local.local_ty, 1);
                self.memset(body, 0, u64::from(len) * elem_size);
            }
        } else {
            let decls = self.codegen.class_decls(local.class);
            let fields = &self.codegen.ir.class(local.class).fields;
            for (field, &index) in fields.iter().zip(decls.field_indices.iter()) {
                if !field.ty.is_reference() {
                    continue;
                }
                let ptr = self.struct_gep(local.alloc_ptr, decls.body_ty, index);
                if refs_only {
                    let null = self.null_ref();
                    self.store_heap_ref(null, ptr);
                } else {
                    let callee = self.codegen.runtime.zero_heap_ref.clone();
                    self.call_no_result(&callee, &[ptr]);
                }
            }
            if !refs_only {
                // Re-zero the body past the header word.
                let header_size = self.codegen.size_of(self.codegen.common.object_header);
                let body_size = self.codegen.size_of(decls.body_ty);
                let skip = self.const_i64(i64::try_from(header_size).unwrap_or(8));
                let past_header = self.gep(local.alloc_ptr, TypeId::I8, skip);
                self.memset(past_header, 0, body_size.saturating_sub(header_size));
            }
        }
        if let Some(slot) = local.root_slot {
            let null = self.null_ref();
            self.store_stack_ref(null, slot);
        }
    }

    fn create_root_set_slot(&mut self) -> Option<ValueId> {
        (self.codegen.config.memory_model == MemoryModel::ThreadConfined)
            .then(|| self.alloca(TypeId::REF))
    }

    /// Tag the header with the type descriptor plus the permanent and
    /// nontrivial container bits, marking the object as non-heap.
    fn set_local_object_type_info(&mut self, header: ValueId, class: ClassId) {
        let typeinfo = self.codegen.typeinfo_of(class);
        let ti_ptr = self.global_ref(typeinfo);
        let as_int = self.ptr_to_int(ti_ptr, TypeId::I64);
        let tag = self.const_i64(0b11);
        let tagged = self.or(as_int, tag);
        let tagged_ptr = self.int_to_ptr(tagged, TypeId::PTR);
        let header_ty = self.codegen.common.object_header;
        let slot = self.struct_gep(header, header_ty, 0);
        self.store(tagged_ptr, slot);
    }

    fn stack_array_elem_size(&self, class: ClassId) -> u64 {
        let elem = self
            .codegen
            .ir
            .class(class)
            .element_type
            .unwrap_or_else(|| panic!("stack array allocation of a non-array class"));
        let ty = self.codegen.target_ty(elem);
        self.codegen.size_of(ty)
    }
}
