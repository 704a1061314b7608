//! Runtime type metadata generation.
//!
//! One descriptor record per class, immutable after creation: identity,
//! superclass, instance layout for the collector, implemented interfaces,
//! the interface dispatch table, and the virtual table attached directly
//! after the record. Interface tables prefer a direct-indexed
//! power-of-two layout; hierarchies that cannot place their interface ids
//! collision-free within the configured bit budget fall back to a sorted
//! table searched at runtime, with the fallback encoded as a negative
//! size.

use bitflags::bitflags;
use tracing::debug;

use sable_ir::{ClassId, IrType};

use crate::target::{ConstInit, TypeId};

use super::context::CodeGenerator;
use super::declarations::{implemented_interfaces, interface_methods, resolve_override};

// Field indices of the descriptor record; keep in sync with
// `CommonTypes::typeinfo`.
pub const TI_SELF: u32 = 0;
pub const TI_SUPER: u32 = 1;
pub const TI_INSTANCE_SIZE: u32 = 2;
pub const TI_OBJ_OFFSETS: u32 = 3;
pub const TI_OBJ_OFFSETS_COUNT: u32 = 4;
pub const TI_INTERFACES: u32 = 5;
pub const TI_INTERFACES_COUNT: u32 = 6;
pub const TI_ITABLE_SIZE: u32 = 7;
pub const TI_ITABLE: u32 = 8;
pub const TI_FLAGS: u32 = 9;
pub const TI_CLASS_ID: u32 = 10;
pub const TI_ELEMENT_RT: u32 = 11;
pub const TI_ASSOCIATED: u32 = 12;

bitflags! {
    /// Behavior flags stored in the descriptor; consumed by the collector
    /// and the runtime.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TypeFlags: i32 {
        const IMMUTABLE = 1;
        const ACYCLIC = 2;
        const INTERFACE = 4;
        const HAS_FINALIZER = 8;
    }
}

// ---------------------------------------------------------------------------
// Interface table placement
// ---------------------------------------------------------------------------

/// Lay out an interface table for the given interface ids.
///
/// Returns the skeleton (each slot holds the index of the interface
/// placed there) and the encoded size field: the power-of-two mask when
/// every id lands in a distinct slot within the bit budget, or the
/// negative record count selecting the sorted-search fallback.
///
/// # Panics
/// When two interfaces share an id; ids are assigned densely and must be
/// unique.
pub fn interface_table_skeleton(ids: &[i32], max_bits: u32) -> (Vec<Option<usize>>, i32) {
    let max_size = 1usize << max_bits;
    let mut size = 1usize;
    while size <= max_size {
        let mut used = vec![false; size];
        let mut ok = true;
        for &id in ids {
            // Masking rather than modulo, so negative ids need no care.
            let index = (id as usize) & (size - 1);
            if used[index] {
                ok = false;
                break;
            }
            used[index] = true;
        }
        if ok {
            let mut skeleton = vec![None; size];
            for (i, &id) in ids.iter().enumerate() {
                skeleton[(id as usize) & (size - 1)] = Some(i);
            }
            return (skeleton, i32::try_from(size).unwrap_or(i32::MAX) - 1);
        }
        size *= 2;
    }

    // Sorted fallback, searched by binary search at runtime.
    let mut order: Vec<usize> = (0..ids.len()).collect();
    order.sort_by_key(|&i| ids[i]);
    for pair in order.windows(2) {
        assert!(
            ids[pair[0]] != ids[pair[1]],
            "two interfaces share id {}",
            ids[pair[0]]
        );
    }
    let count = i32::try_from(order.len()).unwrap_or(i32::MAX);
    (order.into_iter().map(Some).collect(), -count)
}

// ---------------------------------------------------------------------------
// RttiGenerator
// ---------------------------------------------------------------------------

pub struct RttiGenerator<'g, 'ir> {
    codegen: &'g CodeGenerator<'ir>,
}

impl<'g, 'ir> RttiGenerator<'g, 'ir> {
    pub fn new(codegen: &'g CodeGenerator<'ir>) -> Self {
        Self { codegen }
    }

    /// Build and attach the descriptor for one class.
    pub fn generate(&self, class: ClassId) {
        let cg = self.codegen;
        let ir = cg.ir;
        let decl = ir.class(class);
        let name = cg.interner.lookup(decl.name);
        debug!(class = %name, "generating type descriptor");

        let decls = cg.class_decls(class);
        let ti_ty = cg.common.typeinfo;

        let instance_size = match decl.element_type {
            Some(elem) => {
                let elem_size = cg.size_of(cg.target_ty(elem));
                -(i64::try_from(elem_size).unwrap_or(8) as i32)
            }
            None => i32::try_from(cg.size_of(decls.body_ty)).unwrap_or(i32::MAX),
        };

        let super_init = match decl.super_class {
            Some(sup) => ConstInit::GlobalRef(cg.typeinfo_of(sup)),
            None => ConstInit::Null(TypeId::PTR),
        };

        // Offsets of reference-typed fields, for the collector's scan.
        let obj_offsets: Vec<i64> = decl
            .fields
            .iter()
            .zip(decls.field_indices.iter())
            .filter(|(f, _)| f.ty.is_reference())
            .map(|(_, &i)| i64::try_from(cg.offset_of(decls.body_ty, i)).unwrap_or(0))
            .collect();
        let obj_offsets_count = if matches!(decl.element_type, Some(IrType::Class(_))) {
            1 // Reference arrays are never leaves.
        } else {
            i32::try_from(obj_offsets.len()).unwrap_or(0)
        };
        let offsets_ty = cg.array_of(TypeId::I32, obj_offsets.len() as u64);
        let obj_offsets_global = cg.add_global(
            &format!("srefs:{name}"),
            offsets_ty,
            Some(ConstInit::Array {
                elem: TypeId::I32,
                elems: obj_offsets
                    .iter()
                    .map(|&o| ConstInit::Int {
                        ty: TypeId::I32,
                        value: o,
                    })
                    .collect(),
            }),
            true,
        );

        let interfaces = implemented_interfaces(ir, class);
        let interfaces_ty = cg.array_of(TypeId::PTR, interfaces.len() as u64);
        let interfaces_global = cg.add_global(
            &format!("sintf:{name}"),
            interfaces_ty,
            Some(ConstInit::Array {
                elem: TypeId::PTR,
                elems: interfaces
                    .iter()
                    .map(|&i| ConstInit::GlobalRef(cg.typeinfo_of(i)))
                    .collect(),
            }),
            true,
        );

        let needs_itable =
            !decl.flags.is_interface && !decl.flags.is_abstract && decl.element_type.is_none();
        let (itable_records, itable_size) = if needs_itable {
            self.interface_table_records(class, &name, &interfaces)
        } else {
            (Vec::new(), -1)
        };
        let itable_ty = cg.array_of(cg.common.itable_record, itable_records.len() as u64);
        let itable_global = cg.add_global(
            &format!("sifacetable:{name}"),
            itable_ty,
            Some(ConstInit::Array {
                elem: cg.common.itable_record,
                elems: itable_records,
            }),
            true,
        );

        let flags = self.flags_from_class(class);
        let class_id = cg.hierarchy[class.index()].class_id_lo;
        let element_rt = decl
            .element_type
            .map_or(0, |e| runtime_type_code(cg.target_ty(e)));

        let i32c = |value: i32| ConstInit::Int {
            ty: TypeId::I32,
            value: i64::from(value),
        };
        let typeinfo = ConstInit::Struct {
            ty: ti_ty,
            fields: vec![
                ConstInit::GlobalRef(decls.typeinfo_global),
                super_init,
                i32c(instance_size),
                ConstInit::GlobalRef(obj_offsets_global),
                i32c(obj_offsets_count),
                ConstInit::GlobalRef(interfaces_global),
                i32c(i32::try_from(interfaces.len()).unwrap_or(0)),
                i32c(itable_size),
                ConstInit::GlobalRef(itable_global),
                i32c(flags.bits()),
                i32c(class_id),
                i32c(element_rt),
                ConstInit::Null(TypeId::PTR),
            ],
        };

        let vtable_attached = !decl.flags.is_interface && !decl.flags.is_abstract;
        let init = if vtable_attached {
            let vtable_entries: Vec<ConstInit> = decls
                .vtable
                .iter()
                .map(|slot| match slot.imp {
                    Some(imp) => ConstInit::FuncRef(cg.fun_callable(imp).func),
                    None => ConstInit::Null(TypeId::PTR),
                })
                .collect();
            let vtable_ty = cg.array_of(TypeId::PTR, vtable_entries.len() as u64);
            let global_ty = cg.struct_of(vec![ti_ty, vtable_ty]);
            ConstInit::Struct {
                ty: global_ty,
                fields: vec![
                    typeinfo,
                    ConstInit::Array {
                        elem: TypeId::PTR,
                        elems: vtable_entries,
                    },
                ],
            }
        } else {
            typeinfo
        };

        cg.set_global_init(decls.typeinfo_global, init);
    }

    fn interface_table_records(
        &self,
        class: ClassId,
        class_name: &str,
        interfaces: &[ClassId],
    ) -> (Vec<ConstInit>, i32) {
        let cg = self.codegen;
        let ir = cg.ir;
        let ids: Vec<i32> = interfaces
            .iter()
            .map(|&i| cg.hierarchy[i.index()].interface_id)
            .collect();
        let (skeleton, itable_size) =
            interface_table_skeleton(&ids, cg.config.max_bits_per_color);

        let records = skeleton
            .iter()
            .map(|slot| match slot {
                None => ConstInit::Struct {
                    ty: cg.common.itable_record,
                    fields: vec![
                        ConstInit::Int {
                            ty: TypeId::I32,
                            value: 0,
                        },
                        ConstInit::Int {
                            ty: TypeId::I32,
                            value: 0,
                        },
                        ConstInit::Null(TypeId::PTR),
                    ],
                },
                Some(i) => {
                    let iface = interfaces[*i];
                    let id = ids[*i];
                    let methods = interface_methods(ir, iface);
                    let entries: Vec<ConstInit> = methods
                        .iter()
                        .map(|&m| match resolve_override(ir, class, m) {
                            Some(imp) => ConstInit::FuncRef(cg.fun_callable(imp).func),
                            None => ConstInit::Null(TypeId::PTR),
                        })
                        .collect();
                    let vtable_ty = cg.array_of(TypeId::PTR, entries.len() as u64);
                    let vtable_global = cg.add_global(
                        &format!("sifacevtable:{class_name}_{id}"),
                        vtable_ty,
                        Some(ConstInit::Array {
                            elem: TypeId::PTR,
                            elems: entries,
                        }),
                        true,
                    );
                    ConstInit::Struct {
                        ty: cg.common.itable_record,
                        fields: vec![
                            ConstInit::Int {
                                ty: TypeId::I32,
                                value: i64::from(id),
                            },
                            ConstInit::Int {
                                ty: TypeId::I32,
                                value: i64::try_from(methods.len()).unwrap_or(0),
                            },
                            ConstInit::GlobalRef(vtable_global),
                        ],
                    }
                }
            })
            .collect();
        (records, itable_size)
    }

    // -----------------------------------------------------------------------
    // Flags
    // -----------------------------------------------------------------------

    fn flags_from_class(&self, class: ClassId) -> TypeFlags {
        let decl = self.codegen.ir.class(class);
        let mut flags = TypeFlags::empty();
        if decl.flags.is_frozen {
            flags |= TypeFlags::IMMUTABLE;
        }
        if !decl.flags.is_interface
            && !decl.flags.is_abstract
            && self.check_acyclic_class(class)
        {
            flags |= TypeFlags::ACYCLIC;
        }
        if decl.flags.is_interface {
            flags |= TypeFlags::INTERFACE;
        }
        if decl.flags.has_finalizer {
            flags |= TypeFlags::HAS_FINALIZER;
        }
        flags
    }

    /// A class is conservatively acyclic when every field's type is drawn
    /// from the cycle-free allowlist.
    fn check_acyclic_class(&self, class: ClassId) -> bool {
        let decl = self.codegen.ir.class(class);
        match decl.element_type {
            Some(IrType::Class(_)) => false,
            Some(_) => true,
            None => decl.fields.iter().all(|f| self.check_acyclic_field_type(f.ty)),
        }
    }

    fn check_acyclic_field_type(&self, ty: IrType) -> bool {
        match ty {
            IrType::Class(c) => {
                let decl = self.codegen.ir.class(c);
                if decl.flags.is_interface {
                    return false;
                }
                // Arrays of primitives cannot close a cycle.
                matches!(decl.element_type, Some(e) if !matches!(e, IrType::Class(_)))
            }
            other => self.codegen.config.acyclic_field_types.contains(&other),
        }
    }
}

/// Runtime type code of an array element, stored in the descriptor.
fn runtime_type_code(ty: TypeId) -> i32 {
    match ty {
        TypeId::REF => 1,
        TypeId::I8 => 2,
        TypeId::I16 => 3,
        TypeId::I32 => 4,
        TypeId::I64 => 5,
        TypeId::F32 => 6,
        TypeId::F64 => 7,
        TypeId::PTR => 8,
        TypeId::I1 => 9,
        _ => panic!("unmapped array element type {ty:?}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
