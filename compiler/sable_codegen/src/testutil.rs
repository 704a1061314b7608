//! IR fixture builder for tests.
//!
//! Small front-end stand-in: builds type-checked, lowered modules the way
//! the real front end would hand them over, with a root class preinstalled
//! and synthetic locations everywhere.

use rustc_hash::FxHashMap;

use sable_ir::{
    Catch, ClassDecl, ClassFlags, ClassId, ConstValue, Expr, ExprArena, ExprId, ExprKind,
    FieldDecl, FieldId, FieldRef, FunId, Function, FunctionFlags, IntrinsicOp, IrType, Lifetime,
    Module, Param, SourceLoc, StringInterner, VarId,
};

pub struct IrBuilder {
    interner: StringInterner,
    classes: Vec<ClassDecl>,
    functions: Vec<Function>,
    statics: Vec<FieldDecl>,
    arena: ExprArena,
    lifetimes: FxHashMap<ExprId, Lifetime>,
    root: ClassId,
}

impl IrBuilder {
    pub fn new() -> Self {
        let interner = StringInterner::new();
        let root_name = interner.intern("Any");
        let root = ClassDecl {
            name: root_name,
            super_class: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            flags: ClassFlags::default(),
            element_type: None,
        };
        Self {
            interner,
            classes: vec![root],
            functions: Vec::new(),
            statics: Vec::new(),
            arena: ExprArena::new(),
            lifetimes: FxHashMap::default(),
            root: ClassId(0),
        }
    }

    pub fn root(&self) -> ClassId {
        self.root
    }

    pub fn interner(&self) -> &StringInterner {
        &self.interner
    }

    // -----------------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------------

    fn push_class(&mut self, decl: ClassDecl) -> ClassId {
        let id = ClassId(u32::try_from(self.classes.len()).unwrap_or(u32::MAX));
        self.classes.push(decl);
        id
    }

    pub fn class(&mut self, name: &str, super_class: Option<ClassId>) -> ClassId {
        let name = self.interner.intern(name);
        self.push_class(ClassDecl {
            name,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            flags: ClassFlags::default(),
            element_type: None,
        })
    }

    pub fn abstract_class(&mut self, name: &str, super_class: Option<ClassId>) -> ClassId {
        let id = self.class(name, super_class);
        self.classes[id.index()].flags.is_abstract = true;
        id
    }

    pub fn interface(&mut self, name: &str) -> ClassId {
        let name = self.interner.intern(name);
        self.push_class(ClassDecl {
            name,
            super_class: Some(self.root),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            flags: ClassFlags {
                is_interface: true,
                is_abstract: true,
                ..ClassFlags::default()
            },
            element_type: None,
        })
    }

    pub fn class_with_interfaces(
        &mut self,
        name: &str,
        super_class: Option<ClassId>,
        interfaces: &[ClassId],
    ) -> ClassId {
        let id = self.class(name, super_class);
        self.classes[id.index()].interfaces = interfaces.to_vec();
        id
    }

    pub fn class_with_fields(
        &mut self,
        name: &str,
        super_class: Option<ClassId>,
        fields: &[(&str, IrType)],
    ) -> ClassId {
        let id = self.class(name, super_class);
        let fields: Vec<FieldDecl> = fields
            .iter()
            .map(|(n, ty)| FieldDecl {
                name: self.interner.intern(n),
                ty: *ty,
                is_volatile: false,
            })
            .collect();
        self.classes[id.index()].fields = fields;
        id
    }

    pub fn array_class(&mut self, name: &str, element: IrType) -> ClassId {
        let id = self.class(name, Some(self.root));
        self.classes[id.index()].element_type = Some(element);
        id
    }

    pub fn make_field_volatile(&mut self, class: ClassId, field: u32) {
        self.classes[class.index()].fields[field as usize].is_volatile = true;
    }

    pub fn add_field(&mut self, class: ClassId, name: &str, ty: IrType) -> FieldRef {
        let name = self.interner.intern(name);
        let fields = &mut self.classes[class.index()].fields;
        let index = FieldId(u32::try_from(fields.len()).unwrap_or(u32::MAX));
        fields.push(FieldDecl {
            name,
            ty,
            is_volatile: false,
        });
        FieldRef {
            class,
            field: index,
        }
    }

    pub fn add_static(&mut self, name: &str, ty: IrType) -> u32 {
        let name = self.interner.intern(name);
        let index = u32::try_from(self.statics.len()).unwrap_or(u32::MAX);
        self.statics.push(FieldDecl {
            name,
            ty,
            is_volatile: false,
        });
        index
    }

    pub fn get_static(&mut self, index: u32, ty: IrType) -> ExprId {
        self.expr(ExprKind::GetStatic(index), ty)
    }

    pub fn set_static(&mut self, index: u32, value: ExprId) -> ExprId {
        self.expr(ExprKind::SetStatic { index, value }, IrType::Unit)
    }

    pub fn set_bridge(&mut self, fun: FunId) {
        self.functions[fun.index()].flags.is_bridge = true;
    }

    pub fn set_class_frozen(&mut self, class: ClassId) {
        self.classes[class.index()].flags.is_frozen = true;
    }

    pub fn set_class_finalizer(&mut self, class: ClassId) {
        self.classes[class.index()].flags.has_finalizer = true;
    }

    pub fn field_ref(&self, class: ClassId, field: u32) -> FieldRef {
        FieldRef {
            class,
            field: FieldId(field),
        }
    }

    fn push_function(&mut self, function: Function) -> FunId {
        let id = FunId(u32::try_from(self.functions.len()).unwrap_or(u32::MAX));
        self.functions.push(function);
        id
    }

    pub fn virtual_method(
        &mut self,
        class: ClassId,
        name: &str,
        overrides: Option<FunId>,
    ) -> FunId {
        self.method_impl(class, name, overrides, false, None)
    }

    pub fn virtual_method_with_body(
        &mut self,
        class: ClassId,
        name: &str,
        overrides: Option<FunId>,
        ret: IrType,
        body: ExprId,
    ) -> FunId {
        let name = self.interner.intern(name);
        let id = self.push_function(Function {
            name,
            owner: Some(class),
            params: Vec::new(),
            ret,
            body: Some(body),
            overrides,
            flags: FunctionFlags {
                is_virtual: true,
                ..FunctionFlags::default()
            },
            loc: SourceLoc::SYNTHETIC,
        });
        self.classes[class.index()].methods.push(id);
        id
    }

    pub fn abstract_method(&mut self, class: ClassId, name: &str) -> FunId {
        self.method_impl(class, name, None, true, None)
    }

    fn method_impl(
        &mut self,
        class: ClassId,
        name: &str,
        overrides: Option<FunId>,
        is_abstract: bool,
        body: Option<ExprId>,
    ) -> FunId {
        let name = self.interner.intern(name);
        let id = self.push_function(Function {
            name,
            owner: Some(class),
            params: Vec::new(),
            ret: IrType::Unit,
            body,
            overrides,
            flags: FunctionFlags {
                is_virtual: true,
                is_abstract,
                ..FunctionFlags::default()
            },
            loc: SourceLoc::SYNTHETIC,
        });
        self.classes[class.index()].methods.push(id);
        id
    }

    /// A trivial constructor: takes the receiver, does nothing.
    pub fn trivial_ctor(&mut self, class: ClassId) -> FunId {
        let unit = self.unit_expr();
        let name = self.interner.intern("init");
        self.push_function(Function {
            name,
            owner: Some(class),
            params: Vec::new(),
            ret: IrType::Unit,
            body: Some(unit),
            overrides: None,
            flags: FunctionFlags::default(),
            loc: SourceLoc::SYNTHETIC,
        })
    }

    pub fn function(&mut self, name: &str, params: &[IrType], ret: IrType, body: ExprId) -> FunId {
        let name = self.interner.intern(name);
        let params = params
            .iter()
            .enumerate()
            .map(|(i, ty)| Param {
                name: self.interner.intern(&format!("p{i}")),
                ty: *ty,
            })
            .collect();
        self.push_function(Function {
            name,
            owner: None,
            params,
            ret,
            body: Some(body),
            overrides: None,
            flags: FunctionFlags::default(),
            loc: SourceLoc::SYNTHETIC,
        })
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    pub fn expr(&mut self, kind: ExprKind, ty: IrType) -> ExprId {
        self.arena.alloc(Expr {
            kind,
            ty,
            loc: SourceLoc::SYNTHETIC,
        })
    }

    pub fn unit_expr(&mut self) -> ExprId {
        self.expr(ExprKind::Const(ConstValue::Unit), IrType::Unit)
    }

    pub fn const_i32(&mut self, v: i32) -> ExprId {
        self.expr(ExprKind::Const(ConstValue::I32(v)), IrType::I32)
    }

    pub fn const_i64(&mut self, v: i64) -> ExprId {
        self.expr(ExprKind::Const(ConstValue::I64(v)), IrType::I64)
    }

    pub fn const_bool(&mut self, v: bool) -> ExprId {
        self.expr(ExprKind::Const(ConstValue::Bool(v)), IrType::Bool)
    }

    pub fn const_f64(&mut self, v: f64) -> ExprId {
        self.expr(ExprKind::Const(ConstValue::F64(v.to_bits())), IrType::F64)
    }

    pub fn get_var(&mut self, var: u32, ty: IrType) -> ExprId {
        self.expr(ExprKind::GetVar(VarId(var)), ty)
    }

    pub fn intrinsic(&mut self, op: IntrinsicOp, args: &[ExprId], ty: IrType) -> ExprId {
        self.expr(
            ExprKind::Intrinsic {
                op,
                field: None,
                args: args.to_vec(),
            },
            ty,
        )
    }

    pub fn intrinsic_on_field(
        &mut self,
        op: IntrinsicOp,
        field: FieldRef,
        args: &[ExprId],
        ty: IrType,
    ) -> ExprId {
        self.expr(
            ExprKind::Intrinsic {
                op,
                field: Some(field),
                args: args.to_vec(),
            },
            ty,
        )
    }

    pub fn block(&mut self, children: &[ExprId], ty: IrType) -> ExprId {
        self.expr(ExprKind::Block(children.to_vec()), ty)
    }

    pub fn ret(&mut self, value: Option<ExprId>) -> ExprId {
        self.expr(ExprKind::Return(value), IrType::Nothing)
    }

    pub fn var_decl(&mut self, var: u32, ty: IrType, mutable: bool, init: ExprId) -> ExprId {
        self.expr(
            ExprKind::VarDecl {
                var: VarId(var),
                ty,
                mutable,
                init: Some(init),
            },
            IrType::Unit,
        )
    }

    pub fn new_instance(&mut self, class: ClassId, ctor: FunId, args: &[ExprId]) -> ExprId {
        self.expr(
            ExprKind::New {
                class,
                ctor,
                args: args.to_vec(),
            },
            IrType::Class(class),
        )
    }

    pub fn throw(&mut self, value: ExprId) -> ExprId {
        self.expr(ExprKind::Throw(value), IrType::Nothing)
    }

    pub fn try_catch(&mut self, body: ExprId, catches: &[(ClassId, u32, ExprId)], ty: IrType) -> ExprId {
        let catches = catches
            .iter()
            .map(|(class, var, body)| Catch {
                class: *class,
                var: VarId(*var),
                body: *body,
            })
            .collect();
        self.expr(ExprKind::Try { body, catches }, ty)
    }

    pub fn if_expr(
        &mut self,
        cond: ExprId,
        then_expr: ExprId,
        else_expr: Option<ExprId>,
        ty: IrType,
    ) -> ExprId {
        self.expr(
            ExprKind::If {
                cond,
                then_expr,
                else_expr,
            },
            ty,
        )
    }

    pub fn while_loop(&mut self, cond: ExprId, body: ExprId) -> ExprId {
        self.expr(ExprKind::While { cond, body }, IrType::Unit)
    }

    pub fn get_field(&mut self, receiver: ExprId, field: FieldRef, ty: IrType) -> ExprId {
        self.expr(ExprKind::GetField { receiver, field }, ty)
    }

    pub fn set_field(&mut self, receiver: ExprId, field: FieldRef, value: ExprId) -> ExprId {
        self.expr(
            ExprKind::SetField {
                receiver,
                field,
                value,
            },
            IrType::Unit,
        )
    }

    pub fn set_var(&mut self, var: u32, value: ExprId) -> ExprId {
        self.expr(
            ExprKind::SetVar {
                var: VarId(var),
                value,
            },
            IrType::Unit,
        )
    }

    pub fn instance_of(&mut self, value: ExprId, class: ClassId) -> ExprId {
        self.expr(
            ExprKind::InstanceOf {
                value,
                class,
                negated: false,
            },
            IrType::Bool,
        )
    }

    pub fn call(
        &mut self,
        target: FunId,
        receiver: Option<ExprId>,
        args: &[ExprId],
        ty: IrType,
        virtual_dispatch: bool,
    ) -> ExprId {
        self.expr(
            ExprKind::Call {
                target,
                receiver,
                args: args.to_vec(),
                virtual_dispatch,
            },
            ty,
        )
    }

    pub fn set_lifetime(&mut self, expr: ExprId, lifetime: Lifetime) {
        self.lifetimes.insert(expr, lifetime);
    }

    // -----------------------------------------------------------------------
    // Assembly
    // -----------------------------------------------------------------------

    pub fn finish_with_interner(self) -> (Module, StringInterner) {
        let module = Module {
            classes: self.classes,
            functions: self.functions,
            statics: self.statics,
            arena: self.arena,
            lifetimes: self.lifetimes,
            root_class: self.root,
        };
        (module, self.interner)
    }

    pub fn finish(self) -> Module {
        self.finish_with_interner().0
    }
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}
