//! Declaration layout: class bodies, hierarchy numbering, dispatch tables.
//!
//! Everything here is derived once per module from the IR declarations and
//! memoized by the [`CodeGenerator`](super::context::CodeGenerator)
//! registry. The numbering scheme backs the O(1) subtype fast paths:
//! classes get DFS intervals (`sub <: sup` iff `lo(sub)` lies in
//! `[lo(sup), hi(sup))`), interfaces get dense sequential ids that feed
//! interface-table placement.

use sable_ir::{ClassId, FunId, Module};

use crate::target::{GlobalId, TypeId};

// ---------------------------------------------------------------------------
// Hierarchy numbering
// ---------------------------------------------------------------------------

/// Per-class numbering for fast subtype checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct HierarchyInfo {
    /// DFS entry number; doubles as the class id stored in RTTI.
    pub class_id_lo: i32,
    /// End (exclusive) of the DFS interval covering all subclasses.
    pub class_id_hi: i32,
    /// Dense interface id; 0 for non-interfaces.
    pub interface_id: i32,
}

/// Number the whole hierarchy. Interfaces are numbered densely starting at
/// 1; classes get DFS intervals rooted at the universal base class.
pub fn compute_hierarchy(ir: &Module) -> Vec<HierarchyInfo> {
    let mut info = vec![HierarchyInfo::default(); ir.classes.len()];

    let mut next_interface_id = 1;
    for (i, class) in ir.classes.iter().enumerate() {
        if class.flags.is_interface {
            info[i].interface_id = next_interface_id;
            next_interface_id += 1;
        }
    }

    // Children lists over the class (non-interface) tree.
    let mut children: Vec<Vec<ClassId>> = vec![Vec::new(); ir.classes.len()];
    for (i, class) in ir.classes.iter().enumerate() {
        if class.flags.is_interface {
            continue;
        }
        if let Some(sup) = class.super_class {
            children[sup.index()].push(ClassId(u32::try_from(i).unwrap_or(u32::MAX)));
        }
    }

    let mut counter = 0i32;
    // Iterative DFS to keep deep hierarchies off the host stack.
    let mut stack: Vec<(ClassId, bool)> = vec![(ir.root_class, false)];
    while let Some((class, exiting)) = stack.pop() {
        if exiting {
            info[class.index()].class_id_hi = counter;
            continue;
        }
        info[class.index()].class_id_lo = counter;
        counter += 1;
        stack.push((class, true));
        for &child in children[class.index()].iter().rev() {
            stack.push((child, false));
        }
    }

    info
}

// ---------------------------------------------------------------------------
// Virtual tables
// ---------------------------------------------------------------------------

/// One virtual-table slot: the root declaration that keys the slot, and
/// the implementation installed for the current class (`None` when
/// abstract).
#[derive(Clone, Copy, Debug)]
pub struct VtableSlot {
    pub key: FunId,
    pub imp: Option<FunId>,
}

/// The root declaration a function ultimately overrides (itself when it
/// overrides nothing). Slots are keyed by this identity so every override
/// lands on the same stable ordinal.
pub fn root_declaration(ir: &Module, fun: FunId) -> FunId {
    let mut current = fun;
    while let Some(parent) = ir.function(current).overrides {
        current = parent;
    }
    current
}

/// Virtual-table slots for a class: the superclass slots in order, with
/// overrides installed in place, followed by newly introduced methods.
pub fn vtable_entries(ir: &Module, class: ClassId) -> Vec<VtableSlot> {
    let decl = ir.class(class);
    let mut slots = match decl.super_class {
        Some(sup) => vtable_entries(ir, sup),
        None => Vec::new(),
    };

    for &m in &decl.methods {
        let fun = ir.function(m);
        if !fun.flags.is_virtual {
            continue;
        }
        let key = root_declaration(ir, m);
        let imp = if fun.flags.is_abstract { None } else { Some(m) };
        if let Some(slot) = slots.iter_mut().find(|s| s.key == key) {
            slot.imp = imp;
        } else {
            slots.push(VtableSlot { key, imp });
        }
    }
    slots
}

/// Stable ordinal of `fun` in its class's virtual table.
///
/// # Panics
/// When the function is not virtually dispatched through this class; the
/// IR guaranteed it would be.
pub fn vtable_index(ir: &Module, class: ClassId, fun: FunId) -> u32 {
    let key = root_declaration(ir, fun);
    let slots = vtable_entries(ir, class);
    let index = slots
        .iter()
        .position(|s| s.key == key)
        .unwrap_or_else(|| panic!("function {fun:?} has no vtable slot in class {class:?}"));
    u32::try_from(index).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// All interfaces a class implements, own first then inherited, deduplicated.
pub fn implemented_interfaces(ir: &Module, class: ClassId) -> Vec<ClassId> {
    let mut result = Vec::new();
    for c in ir.super_chain(class) {
        for &iface in &ir.class(c).interfaces {
            if !result.contains(&iface) {
                result.push(iface);
            }
        }
    }
    result
}

/// An interface's dispatch-table layout is its method list in declaration
/// order.
pub fn interface_methods(ir: &Module, iface: ClassId) -> Vec<FunId> {
    ir.class(iface).methods.clone()
}

/// Where a virtually dispatched interface method lives: which interface
/// table record, and which index inside that record's vtable.
#[derive(Clone, Copy, Debug)]
pub struct ItablePlace {
    pub interface_id: i32,
    pub method_index: u32,
}

/// # Panics
/// When `fun`'s owner is not an interface or `fun` is not one of its
/// methods.
pub fn itable_place(ir: &Module, hierarchy: &[HierarchyInfo], fun: FunId) -> ItablePlace {
    let owner = ir
        .function(fun)
        .owner
        .unwrap_or_else(|| panic!("interface dispatch of an unowned function {fun:?}"));
    assert!(
        ir.class(owner).flags.is_interface,
        "itable place requested for a non-interface method"
    );
    let index = ir
        .class(owner)
        .methods
        .iter()
        .position(|&m| m == fun)
        .unwrap_or_else(|| panic!("function {fun:?} is not a method of its owner"));
    ItablePlace {
        interface_id: hierarchy[owner.index()].interface_id,
        method_index: u32::try_from(index).unwrap_or(u32::MAX),
    }
}

/// The implementation a class provides for an interface method, found by
/// walking the superclass chain for a method whose override chain reaches
/// the interface declaration.
pub fn resolve_override(ir: &Module, class: ClassId, iface_method: FunId) -> Option<FunId> {
    for c in ir.super_chain(class) {
        for &m in &ir.class(c).methods {
            let fun = ir.function(m);
            if fun.flags.is_abstract {
                continue;
            }
            let mut cursor = Some(m);
            while let Some(f) = cursor {
                if f == iface_method {
                    return Some(m);
                }
                cursor = ir.function(f).overrides;
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Per-class target layout
// ---------------------------------------------------------------------------

/// Memoized target-side layout of one class.
pub struct ClassDeclarations {
    /// Target struct: object header followed by the declared fields.
    pub body_ty: TypeId,
    /// Body-struct index per [`sable_ir::FieldId`].
    pub field_indices: Vec<u32>,
    /// Reserved at declaration time; the RTTI generator attaches the
    /// initializer later. Never otherwise mutated.
    pub typeinfo_global: GlobalId,
    pub vtable: Vec<VtableSlot>,
    pub alignment: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::IrBuilder;

    #[test]
    fn hierarchy_intervals_nest() {
        // root <- a <- b, root <- c
        let mut b = IrBuilder::new();
        let a = b.class("A", Some(b.root()));
        let bb = b.class("B", Some(a));
        let c = b.class("C", Some(b.root()));
        let ir = b.finish();

        let h = compute_hierarchy(&ir);
        let within = |sub: ClassId, sup: ClassId| {
            h[sub.index()].class_id_lo >= h[sup.index()].class_id_lo
                && h[sub.index()].class_id_lo < h[sup.index()].class_id_hi
        };
        assert!(within(bb, a));
        assert!(within(a, ir.root_class));
        assert!(within(c, ir.root_class));
        assert!(!within(c, a));
        assert!(!within(a, bb));
    }

    #[test]
    fn interface_ids_are_dense_and_nonzero() {
        let mut b = IrBuilder::new();
        let i1 = b.interface("I1");
        let i2 = b.interface("I2");
        let ir = b.finish();

        let h = compute_hierarchy(&ir);
        assert_eq!(h[i1.index()].interface_id, 1);
        assert_eq!(h[i2.index()].interface_id, 2);
        assert_eq!(h[ir.root_class.index()].interface_id, 0);
    }

    #[test]
    fn override_replaces_vtable_slot_in_place() {
        let mut b = IrBuilder::new();
        let base = b.class("Base", Some(b.root()));
        let derived = b.class("Derived", Some(base));
        let base_m = b.virtual_method(base, "m", None);
        let base_n = b.virtual_method(base, "n", None);
        let derived_m = b.virtual_method(derived, "m", Some(base_m));
        let ir = b.finish();

        let base_slots = vtable_entries(&ir, base);
        let derived_slots = vtable_entries(&ir, derived);
        assert_eq!(base_slots.len(), 2);
        assert_eq!(derived_slots.len(), 2);
        // Same ordinal, different implementation.
        assert_eq!(vtable_index(&ir, base, base_m), 0);
        assert_eq!(vtable_index(&ir, derived, derived_m), 0);
        assert_eq!(derived_slots[0].imp, Some(derived_m));
        assert_eq!(derived_slots[1].imp, Some(base_n));
    }

    #[test]
    fn abstract_slot_is_null_until_overridden() {
        let mut b = IrBuilder::new();
        let base = b.abstract_class("Shape", Some(b.root()));
        let area = b.abstract_method(base, "area");
        let circle = b.class("Circle", Some(base));
        let circle_area = b.virtual_method(circle, "area", Some(area));
        let ir = b.finish();

        assert_eq!(vtable_entries(&ir, base)[0].imp, None);
        assert_eq!(vtable_entries(&ir, circle)[0].imp, Some(circle_area));
    }

    #[test]
    fn implemented_interfaces_include_inherited() {
        let mut b = IrBuilder::new();
        let i1 = b.interface("I1");
        let i2 = b.interface("I2");
        let base = b.class_with_interfaces("Base", Some(b.root()), &[i1]);
        let derived = b.class_with_interfaces("Derived", Some(base), &[i2]);
        let ir = b.finish();

        assert_eq!(implemented_interfaces(&ir, derived), vec![i2, i1]);
    }
}
