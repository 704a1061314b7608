//! Module-wide code generation context.
//!
//! [`CodeGenerator`] owns the target module under construction and every
//! module-level registry: declaration handles, interned static data, local
//! array layouts, and the runtime catalogue. Declaration handles are
//! created lazily on first reference and memoized with a single-computation
//! guarantee, so independent functions can be compiled concurrently; this
//! registry is the only shared mutable state between them.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use sable_ir::{ClassId, FunId, IrType, Module, Name, StringInterner};

use crate::config::CodegenConfig;
use crate::target::{
    ConstInit, FuncId, GlobalData, GlobalId, Signature, TargetFunction, TargetModule, TypeId,
    TypePool, ValueData,
};

use super::debug_info::DebugInfoSink;
use super::declarations::{
    compute_hierarchy, vtable_entries, ClassDeclarations, HierarchyInfo,
};
use super::runtime_decl::{declare_runtime, RuntimeCatalogue};

// ---------------------------------------------------------------------------
// Callable
// ---------------------------------------------------------------------------

/// A declared target function together with everything call emission
/// needs: the declared signature, its interned function type, the
/// no-unwind guarantee, and whether the result is a tracked reference
/// (which makes calls carry a trailing result-slot argument).
#[derive(Clone, Debug)]
pub struct Callable {
    pub func: FuncId,
    pub sig: Signature,
    pub sig_ty: TypeId,
    pub no_unwind: bool,
    pub returns_ref: bool,
}

// ---------------------------------------------------------------------------
// Common types
// ---------------------------------------------------------------------------

/// Aggregate types every part of the backend agrees on.
#[derive(Clone, Copy, Debug)]
pub struct CommonTypes {
    /// Object header: `{ ptr type_info_or_meta }`.
    pub object_header: TypeId,
    /// Array header: `{ ptr type_info_or_meta, i32 count }`.
    pub array_header: TypeId,
    /// The type-descriptor record; see `rtti` for the field indices.
    pub typeinfo: TypeId,
    /// Interface table record: `{ i32 id, i32 vtable_size, ptr vtable }`.
    pub itable_record: TypeId,
    /// Landingpad result: `{ ptr exception_record, i32 type_id }`.
    pub landingpad_result: TypeId,
}

impl CommonTypes {
    fn new(types: &mut TypePool) -> Self {
        let ptr = TypeId::PTR;
        let i32t = TypeId::I32;
        let object_header = types.struct_of(vec![ptr]);
        let array_header = types.struct_of(vec![ptr, i32t]);
        let typeinfo = types.struct_of(vec![
            ptr,  // self
            ptr,  // super type
            i32t, // instance size (negative encodes array element size)
            ptr,  // reference-field offsets
            i32t, // reference-field count
            ptr,  // implemented interfaces
            i32t, // implemented interface count
            i32t, // interface table size (mask, or negative count)
            ptr,  // interface table
            i32t, // flags
            i32t, // class id
            i32t, // array element runtime type
            ptr,  // associated objects
        ]);
        let itable_record = types.struct_of(vec![i32t, i32t, ptr]);
        let landingpad_result = types.struct_of(vec![ptr, i32t]);
        Self {
            object_header,
            array_header,
            typeinfo,
            itable_record,
            landingpad_result,
        }
    }
}

// ---------------------------------------------------------------------------
// CodeGenerator
// ---------------------------------------------------------------------------

/// Metadata handed to the evaluator and other downstream consumers that
/// need to model the runtime (class of each type descriptor, superclass
/// chain, descriptor layout).
pub struct RuntimeInfo {
    pub typeinfo_classes: FxHashMap<GlobalId, ClassId>,
    pub class_supers: Vec<Option<ClassId>>,
    pub typeinfo_ty: TypeId,
    pub object_header_ty: TypeId,
    pub array_header_ty: TypeId,
}

pub struct CodeGenerator<'ir> {
    pub ir: &'ir Module,
    pub interner: &'ir StringInterner,
    pub config: CodegenConfig,
    pub hierarchy: Vec<HierarchyInfo>,
    pub common: CommonTypes,
    pub runtime: RuntimeCatalogue,
    pub debug: DebugInfoSink,

    types: Mutex<TypePool>,
    functions: Mutex<Vec<TargetFunction>>,
    globals: Mutex<Vec<GlobalData>>,

    class_decls: DashMap<ClassId, Arc<OnceLock<Arc<ClassDeclarations>>>>,
    fun_decls: DashMap<FunId, Arc<OnceLock<Callable>>>,
    trampolines: DashMap<FunId, Arc<OnceLock<Callable>>>,
    static_globals: DashMap<u32, Arc<OnceLock<GlobalId>>>,
    interned_data: DashMap<ConstInit, GlobalId>,
    local_array_types: DashMap<(ClassId, u32), TypeId>,
    typeinfo_classes: DashMap<GlobalId, ClassId>,
}

impl<'ir> CodeGenerator<'ir> {
    pub fn new(ir: &'ir Module, interner: &'ir StringInterner, config: CodegenConfig) -> Self {
        let mut types = TypePool::new();
        let common = CommonTypes::new(&mut types);
        let mut functions = Vec::new();
        let mut globals = Vec::new();
        let runtime = declare_runtime(&mut types, &mut functions, &mut globals);
        let hierarchy = compute_hierarchy(ir);
        Self {
            ir,
            interner,
            config,
            hierarchy,
            common,
            runtime,
            debug: DebugInfoSink::new(),
            types: Mutex::new(types),
            functions: Mutex::new(functions),
            globals: Mutex::new(globals),
            class_decls: DashMap::default(),
            fun_decls: DashMap::default(),
            trampolines: DashMap::default(),
            static_globals: DashMap::default(),
            interned_data: DashMap::default(),
            local_array_types: DashMap::default(),
            typeinfo_classes: DashMap::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Type pool access
    // -----------------------------------------------------------------------

    pub fn with_types<R>(&self, f: impl FnOnce(&mut TypePool) -> R) -> R {
        f(&mut self.types.lock())
    }

    pub fn struct_of(&self, fields: Vec<TypeId>) -> TypeId {
        self.with_types(|t| t.struct_of(fields))
    }

    pub fn array_of(&self, elem: TypeId, len: u64) -> TypeId {
        self.with_types(|t| t.array_of(elem, len))
    }

    pub fn int_with_bits(&self, bits: u32) -> TypeId {
        self.with_types(|t| t.int_with_bits(bits))
    }

    pub fn func_ty(&self, sig: &Signature) -> TypeId {
        self.with_types(|t| t.func_of(sig.params.clone(), sig.ret))
    }

    pub fn size_of(&self, ty: TypeId) -> u64 {
        self.with_types(|t| t.size_of(ty))
    }

    pub fn offset_of(&self, ty: TypeId, index: u32) -> u64 {
        self.with_types(|t| t.offset_of(ty, index))
    }

    pub fn field_ty(&self, ty: TypeId, index: u32) -> TypeId {
        self.with_types(|t| t.field_ty(ty, index))
    }

    pub fn int_bits(&self, ty: TypeId) -> Option<u32> {
        self.with_types(|t| t.int_bits(ty))
    }

    pub fn is_float_ty(&self, ty: TypeId) -> bool {
        self.with_types(|t| t.is_float(ty))
    }

    /// The target storage type for an IR-level type.
    ///
    /// `Unit` and `Nothing` map to `i64` so they can be stored, passed,
    /// and merged in phis.
    pub fn target_ty(&self, ty: IrType) -> TypeId {
        match ty {
            IrType::Unit | IrType::Nothing | IrType::I64 => TypeId::I64,
            IrType::Bool => TypeId::I1,
            IrType::I8 => TypeId::I8,
            IrType::I16 => TypeId::I16,
            IrType::I32 => TypeId::I32,
            IrType::F32 => TypeId::F32,
            IrType::F64 => TypeId::F64,
            IrType::RawPtr => TypeId::PTR,
            IrType::Class(_) => TypeId::REF,
        }
    }

    // -----------------------------------------------------------------------
    // Functions and globals
    // -----------------------------------------------------------------------

    /// Reserve a function id with a declaration; the body is attached later
    /// by [`Self::define_function`].
    pub fn declare_function(&self, name: &str, sig: Signature, no_unwind: bool) -> FuncId {
        let mut functions = self.functions.lock();
        let id = FuncId::new(u32::try_from(functions.len()).unwrap_or(u32::MAX));
        functions.push(TargetFunction {
            name: name.to_owned(),
            sig,
            no_unwind,
            is_external: false,
            values: Vec::new(),
            blocks: Vec::new(),
        });
        id
    }

    pub fn declare_external(&self, name: &str, sig: Signature, no_unwind: bool) -> FuncId {
        let mut functions = self.functions.lock();
        let id = FuncId::new(u32::try_from(functions.len()).unwrap_or(u32::MAX));
        functions.push(TargetFunction::external(name, sig, no_unwind));
        id
    }

    /// Attach a generated body to a previously declared function.
    pub fn define_function(
        &self,
        func: FuncId,
        values: Vec<ValueData>,
        blocks: Vec<crate::target::BlockData>,
    ) {
        let mut functions = self.functions.lock();
        let entry = &mut functions[func.index()];
        assert!(
            !entry.is_external && entry.blocks.is_empty(),
            "function `{}` defined twice",
            entry.name
        );
        entry.values = values;
        entry.blocks = blocks;
    }

    pub fn function_sig(&self, func: FuncId) -> Signature {
        self.functions.lock()[func.index()].sig.clone()
    }

    pub fn function_name(&self, func: FuncId) -> String {
        self.functions.lock()[func.index()].name.clone()
    }

    pub fn add_global(
        &self,
        name: &str,
        ty: TypeId,
        init: Option<ConstInit>,
        constant: bool,
    ) -> GlobalId {
        let mut globals = self.globals.lock();
        let id = GlobalId::new(u32::try_from(globals.len()).unwrap_or(u32::MAX));
        globals.push(GlobalData {
            name: name.to_owned(),
            ty,
            init,
            constant,
        });
        id
    }

    /// Attach the deferred initializer of a reserved global. A struct
    /// initializer may widen the global's type (descriptor records grow a
    /// trailing vtable); the address and the leading layout are unchanged.
    pub fn set_global_init(&self, global: GlobalId, init: ConstInit) {
        let mut globals = self.globals.lock();
        let entry = &mut globals[global.index()];
        assert!(
            entry.init.is_none(),
            "global `{}` initialized twice",
            entry.name
        );
        if let ConstInit::Struct { ty, .. } = &init {
            entry.ty = *ty;
        }
        entry.init = Some(init);
    }

    /// Content-addressed constant data: equal initializers share one
    /// global.
    pub fn intern_const_data(&self, name_hint: &str, ty: TypeId, init: ConstInit) -> GlobalId {
        if let Some(existing) = self.interned_data.get(&init) {
            return *existing.value();
        }
        let id = self.add_global(name_hint, ty, Some(init.clone()), true);
        // First writer wins; a racing duplicate global is unreferenced.
        *self.interned_data.entry(init).or_insert(id)
    }

    /// An interned string literal: `{ i32 len, [len x i8] }`.
    pub fn string_literal(&self, text: Name) -> GlobalId {
        let s = self.interner.lookup(text);
        let bytes = s.into_bytes();
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        let array_ty = self.array_of(TypeId::I8, u64::from(len));
        let ty = self.struct_of(vec![TypeId::I32, array_ty]);
        let init = ConstInit::Struct {
            ty,
            fields: vec![
                ConstInit::Int {
                    ty: TypeId::I32,
                    value: i64::from(len),
                },
                ConstInit::Bytes(bytes),
            ],
        };
        self.intern_const_data("sstr", ty, init)
    }

    // -----------------------------------------------------------------------
    // Declaration registry
    // -----------------------------------------------------------------------

    /// Layout of a class, created on first reference. At most one
    /// computation per class even under concurrent first access.
    pub fn class_decls(&self, class: ClassId) -> Arc<ClassDeclarations> {
        let cell = self.class_decls.entry(class).or_default().clone();
        cell.get_or_init(|| Arc::new(self.compute_class_decls(class)))
            .clone()
    }

    fn compute_class_decls(&self, class: ClassId) -> ClassDeclarations {
        let decl = self.ir.class(class);
        let name = self.interner.lookup(decl.name);
        debug!(class = %name, "laying out class");

        let (body_ty, field_indices) = if decl.element_type.is_some() {
            (self.common.array_header, Vec::new())
        } else {
            let mut fields = vec![self.common.object_header];
            let mut indices = Vec::with_capacity(decl.fields.len());
            for field in &decl.fields {
                indices.push(u32::try_from(fields.len()).unwrap_or(u32::MAX));
                fields.push(self.target_ty(field.ty));
            }
            (self.struct_of(fields), indices)
        };

        let typeinfo_global =
            self.add_global(&format!("stype:{name}"), self.common.typeinfo, None, true);
        self.typeinfo_classes.insert(typeinfo_global, class);

        let vtable = if decl.flags.is_interface {
            Vec::new()
        } else {
            vtable_entries(self.ir, class)
        };

        ClassDeclarations {
            body_ty,
            field_indices,
            typeinfo_global,
            vtable,
            alignment: TypePool::POINTER_SIZE,
        }
    }

    /// The type-descriptor global of a class.
    pub fn typeinfo_of(&self, class: ClassId) -> GlobalId {
        self.class_decls(class).typeinfo_global
    }

    /// Callable handle for an IR function, created on first reference.
    pub fn fun_callable(&self, fun: FunId) -> Callable {
        let cell = self.fun_decls.entry(fun).or_default().clone();
        cell.get_or_init(|| self.compute_fun_callable(fun)).clone()
    }

    fn compute_fun_callable(&self, fun: FunId) -> Callable {
        let decl = self.ir.function(fun);
        let symbol = self.mangle(fun);

        let mut params = Vec::with_capacity(decl.params.len() + 2);
        if decl.owner.is_some() {
            params.push(TypeId::REF);
        }
        for p in &decl.params {
            params.push(self.target_ty(p.ty));
        }
        let returns_ref = decl.ret.is_reference();
        if returns_ref {
            // Trailing result-slot parameter for root-set accounting.
            params.push(TypeId::PTR);
        }
        let ret = match decl.ret {
            IrType::Unit | IrType::Nothing => None,
            other => Some(self.target_ty(other)),
        };
        let sig = Signature { params, ret };
        let sig_ty = self.func_ty(&sig);

        let func = if decl.body.is_some() {
            self.declare_function(&symbol, sig.clone(), decl.flags.no_unwind)
        } else {
            self.declare_external(&symbol, sig.clone(), decl.flags.no_unwind)
        };
        debug!(symbol, params = sig.params.len(), "declared function");

        Callable {
            func,
            sig,
            sig_ty,
            no_unwind: decl.flags.no_unwind,
            returns_ref,
        }
    }

    fn mangle(&self, fun: FunId) -> String {
        let decl = self.ir.function(fun);
        let name = self.interner.lookup(decl.name);
        match decl.owner {
            Some(class) => {
                let owner = self.interner.lookup(self.ir.class(class).name);
                format!("_sbl_{owner}${name}")
            }
            None => format!("_sbl_{name}"),
        }
    }

    /// Global for a module-level static field, zero-initialized.
    pub fn static_global(&self, index: u32) -> GlobalId {
        let cell = self.static_globals.entry(index).or_default().clone();
        *cell.get_or_init(|| {
            let field = &self.ir.statics[index as usize];
            let ty = self.target_ty(field.ty);
            let name = self.interner.lookup(field.name);
            self.add_global(&format!("sstatic:{name}"), ty, Some(ConstInit::Zero(ty)), false)
        })
    }

    /// Dedicated aggregate layout for a stack-allocated array of a fixed
    /// length: `{ array_header, [len x elem] }`. Interned per
    /// (class, length) so frame layout stays stable.
    pub fn local_array_type(&self, class: ClassId, len: u32) -> TypeId {
        if let Some(existing) = self.local_array_types.get(&(class, len)) {
            return *existing.value();
        }
        let elem_ir = self
            .ir
            .class(class)
            .element_type
            .unwrap_or_else(|| panic!("stack array allocation of a non-array class"));
        let elem = self.target_ty(elem_ir);
        let array = self.array_of(elem, u64::from(len));
        let ty = self.struct_of(vec![self.common.array_header, array]);
        *self.local_array_types.entry((class, len)).or_insert(ty)
    }

    /// Memoized trampoline cell; the body generation lives with the
    /// function-generation machinery.
    pub(crate) fn trampoline_cell(&self, fun: FunId) -> Arc<OnceLock<Callable>> {
        self.trampolines.entry(fun).or_default().clone()
    }

    // -----------------------------------------------------------------------
    // Finish
    // -----------------------------------------------------------------------

    /// Assemble the final module and the runtime metadata that downstream
    /// consumers (verifier artifacts aside, chiefly the evaluator) need.
    pub fn finish(self, module_name: &str) -> (TargetModule, RuntimeInfo) {
        let types = self.types.into_inner();
        let functions = self.functions.into_inner();
        let globals = self.globals.into_inner();
        let typeinfo_classes = self
            .typeinfo_classes
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        let class_supers = self.ir.classes.iter().map(|c| c.super_class).collect();
        let info = RuntimeInfo {
            typeinfo_classes,
            class_supers,
            typeinfo_ty: self.common.typeinfo,
            object_header_ty: self.common.object_header,
            array_header_ty: self.common.array_header,
        };
        let module = TargetModule {
            name: module_name.to_owned(),
            types,
            functions,
            globals,
        };
        (module, info)
    }
}
