//! Shape of the generated type descriptors.

use pretty_assertions::assert_eq;

use sable_ir::IrType;

use crate::codegen::rtti::{
    TypeFlags, TI_FLAGS, TI_INSTANCE_SIZE, TI_ITABLE_SIZE, TI_OBJ_OFFSETS_COUNT,
};
use crate::target::{ConstInit, GlobalData};
use crate::testutil::IrBuilder;

use super::{compile_default, dispatch_tests::descriptor_field};

fn find_descriptor<'a>(m: &'a crate::GeneratedModule, name: &str) -> &'a GlobalData {
    let wanted = format!("stype:{name}");
    m.module
        .globals
        .iter()
        .find(|g| g.name == wanted)
        .unwrap_or_else(|| panic!("no descriptor global `{wanted}`"))
}

fn flags_of(m: &crate::GeneratedModule, name: &str) -> TypeFlags {
    let raw = descriptor_field(find_descriptor(m, name), TI_FLAGS);
    TypeFlags::from_bits_truncate(i32::try_from(raw).unwrap())
}

#[test]
fn primitive_only_class_is_flagged_acyclic() {
    let mut b = IrBuilder::new();
    b.class_with_fields(
        "Point",
        Some(b.root()),
        &[("x", IrType::I64), ("y", IrType::F64)],
    );
    let m = compile_default(b);
    assert!(flags_of(&m, "Point").contains(TypeFlags::ACYCLIC));
}

#[test]
fn self_referential_field_clears_the_acyclic_flag() {
    let mut b = IrBuilder::new();
    let node = b.class_with_fields("Node", Some(b.root()), &[("value", IrType::I64)]);
    b.add_field(node, "next", IrType::Class(node));
    let m = compile_default(b);
    assert!(!flags_of(&m, "Node").contains(TypeFlags::ACYCLIC));
}

#[test]
fn primitive_array_field_is_still_acyclic() {
    let mut b = IrBuilder::new();
    let bytes = b.array_class("ByteArray", IrType::I8);
    b.class_with_fields(
        "Buffer",
        Some(b.root()),
        &[("data", IrType::Class(bytes))],
    );
    let m = compile_default(b);
    assert!(flags_of(&m, "Buffer").contains(TypeFlags::ACYCLIC));
}

#[test]
fn interfaces_are_flagged_and_never_acyclic() {
    let mut b = IrBuilder::new();
    b.interface("Marker");
    let m = compile_default(b);
    let flags = flags_of(&m, "Marker");
    assert!(flags.contains(TypeFlags::INTERFACE));
    assert!(!flags.contains(TypeFlags::ACYCLIC));
}

#[test]
fn frozen_and_finalizer_flags_carry_through() {
    let mut b = IrBuilder::new();
    let c = b.class("Config", Some(b.root()));
    b.set_class_frozen(c);
    b.set_class_finalizer(c);
    let m = compile_default(b);
    let flags = flags_of(&m, "Config");
    assert!(flags.contains(TypeFlags::IMMUTABLE));
    assert!(flags.contains(TypeFlags::HAS_FINALIZER));
}

#[test]
fn array_descriptor_encodes_negative_element_size() {
    let mut b = IrBuilder::new();
    b.array_class("IntArray", IrType::I32);
    let m = compile_default(b);
    let size = descriptor_field(find_descriptor(&m, "IntArray"), TI_INSTANCE_SIZE);
    assert_eq!(size, -4);
}

#[test]
fn reference_fields_are_listed_for_the_collector() {
    let mut b = IrBuilder::new();
    let other = b.class("Other", Some(b.root()));
    b.class_with_fields(
        "Holder",
        Some(b.root()),
        &[
            ("a", IrType::I64),
            ("b", IrType::Class(other)),
            ("c", IrType::Class(other)),
        ],
    );
    let m = compile_default(b);
    let count = descriptor_field(find_descriptor(&m, "Holder"), TI_OBJ_OFFSETS_COUNT);
    assert_eq!(count, 2);
}

#[test]
fn collision_free_interfaces_get_a_direct_indexed_table() {
    let mut b = IrBuilder::new();
    let i1 = b.interface("A");
    let i2 = b.interface("B");
    b.class_with_interfaces("Impl", Some(b.root()), &[i1, i2]);
    let m = compile_default(b);
    // Ids 1 and 2 are distinct modulo 4; the mask is non-negative.
    let size = descriptor_field(find_descriptor(&m, "Impl"), TI_ITABLE_SIZE);
    assert!(size >= 0, "expected the direct-indexed fast path");
}

#[test]
fn abstract_classes_carry_no_attached_vtable() {
    let mut b = IrBuilder::new();
    let shape = b.abstract_class("Shape", Some(b.root()));
    b.abstract_method(shape, "area");
    let m = compile_default(b);
    // Abstract classes carry no attached vtable at all.
    let descriptor = find_descriptor(&m, "Shape");
    match descriptor.init.as_ref().expect("initializer") {
        ConstInit::Struct { fields, .. } => {
            assert!(
                !matches!(fields[0], ConstInit::Struct { .. }),
                "abstract descriptor should not attach a vtable"
            );
        }
        other => panic!("unexpected initializer {other:?}"),
    }
}
