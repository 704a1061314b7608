//! Interned target type pool.
//!
//! Every target type is interned once and referenced by a `Copy`
//! [`TypeId`]. Primitive types occupy fixed indices so hot paths never
//! need to consult the pool; aggregate types (structs, arrays, function
//! signatures) are interned on demand.
//!
//! The pool also owns target layout: sizes, alignments, and field offsets
//! follow natural alignment on a 64-bit target with 8-byte pointers.

use rustc_hash::FxHashMap;

/// Opaque handle to an interned target type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    /// Sentinel for "no type".
    pub const NONE: Self = Self(u32::MAX);

    // Pre-interned primitives. Kept in sync with `TypePool::new`.
    pub const I1: Self = Self(0);
    pub const I8: Self = Self(1);
    pub const I16: Self = Self(2);
    pub const I32: Self = Self(3);
    pub const I64: Self = Self(4);
    pub const F32: Self = Self(5);
    pub const F64: Self = Self(6);
    /// Raw untracked pointer.
    pub const PTR: Self = Self(7);
    /// Heap object reference, visible to GC root scanning.
    pub const REF: Self = Self(8);

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Structural description of a target type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TyKind {
    /// Integer of the given bit width. Widths that are not a power of two
    /// occur as bit-field containers and occupy `ceil(bits / 8)` bytes.
    Int(u32),
    F32,
    F64,
    /// Raw pointer; not tracked by the collector.
    Ptr,
    /// Object reference; tracked for GC root scanning.
    Ref,
    Struct(Vec<TypeId>),
    Array(TypeId, u64),
    Func {
        params: Vec<TypeId>,
        ret: Option<TypeId>,
    },
}

/// Interning pool plus target layout queries.
pub struct TypePool {
    kinds: Vec<TyKind>,
    map: FxHashMap<TyKind, TypeId>,
}

impl TypePool {
    /// Pointer size of the target, in bytes.
    pub const POINTER_SIZE: u64 = 8;

    pub fn new() -> Self {
        let mut pool = Self {
            kinds: Vec::new(),
            map: FxHashMap::default(),
        };
        // Order matches the TypeId constants above.
        for kind in [
            TyKind::Int(1),
            TyKind::Int(8),
            TyKind::Int(16),
            TyKind::Int(32),
            TyKind::Int(64),
            TyKind::F32,
            TyKind::F64,
            TyKind::Ptr,
            TyKind::Ref,
        ] {
            pool.intern(kind);
        }
        pool
    }

    /// Intern a type, returning its stable id.
    pub fn intern(&mut self, kind: TyKind) -> TypeId {
        if let Some(&id) = self.map.get(&kind) {
            return id;
        }
        let id = TypeId(u32::try_from(self.kinds.len()).unwrap_or(u32::MAX));
        self.kinds.push(kind.clone());
        self.map.insert(kind, id);
        id
    }

    /// Integer type of an arbitrary bit width (bit-field containers).
    pub fn int_with_bits(&mut self, bits: u32) -> TypeId {
        self.intern(TyKind::Int(bits))
    }

    pub fn struct_of(&mut self, fields: Vec<TypeId>) -> TypeId {
        self.intern(TyKind::Struct(fields))
    }

    pub fn array_of(&mut self, elem: TypeId, len: u64) -> TypeId {
        self.intern(TyKind::Array(elem, len))
    }

    pub fn func_of(&mut self, params: Vec<TypeId>, ret: Option<TypeId>) -> TypeId {
        self.intern(TyKind::Func { params, ret })
    }

    pub fn kind(&self, id: TypeId) -> &TyKind {
        &self.kinds[id.index()]
    }

    /// True for the GC-visible reference type.
    #[inline]
    pub fn is_ref(&self, id: TypeId) -> bool {
        id == TypeId::REF
    }

    /// Integer bit width, if `id` is an integer type.
    pub fn int_bits(&self, id: TypeId) -> Option<u32> {
        match self.kind(id) {
            TyKind::Int(bits) => Some(*bits),
            _ => None,
        }
    }

    pub fn is_float(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TyKind::F32 | TyKind::F64)
    }

    /// Store size in bytes.
    pub fn size_of(&self, id: TypeId) -> u64 {
        match self.kind(id) {
            TyKind::Int(bits) => u64::from((bits + 7) / 8),
            TyKind::F32 => 4,
            TyKind::F64 => 8,
            TyKind::Ptr | TyKind::Ref | TyKind::Func { .. } => Self::POINTER_SIZE,
            TyKind::Array(elem, len) => self.size_of(*elem) * len,
            TyKind::Struct(fields) => {
                let fields = fields.clone();
                let mut offset = 0u64;
                for &f in &fields {
                    let align = self.align_of(f);
                    offset = round_up(offset, align) + self.size_of(f);
                }
                round_up(offset, self.align_of(id))
            }
        }
    }

    /// Natural alignment in bytes.
    pub fn align_of(&self, id: TypeId) -> u64 {
        match self.kind(id) {
            TyKind::Int(bits) => u64::from((bits + 7) / 8).next_power_of_two().min(8),
            TyKind::F32 => 4,
            TyKind::F64 => 8,
            TyKind::Ptr | TyKind::Ref | TyKind::Func { .. } => Self::POINTER_SIZE,
            TyKind::Array(elem, _) => self.align_of(*elem),
            TyKind::Struct(fields) => fields
                .clone()
                .iter()
                .map(|&f| self.align_of(f))
                .max()
                .unwrap_or(1),
        }
    }

    /// Byte offset of a struct field.
    ///
    /// # Panics
    /// If `id` is not a struct or `index` is out of range.
    pub fn offset_of(&self, id: TypeId, index: u32) -> u64 {
        let TyKind::Struct(fields) = self.kind(id) else {
            panic!("offset_of on non-struct type {id:?}");
        };
        let fields = fields.clone();
        assert!((index as usize) < fields.len(), "field index out of range");
        let mut offset = 0u64;
        for (i, &f) in fields.iter().enumerate() {
            offset = round_up(offset, self.align_of(f));
            if i == index as usize {
                return offset;
            }
            offset += self.size_of(f);
        }
        unreachable!()
    }

    /// Field type of a struct.
    pub fn field_ty(&self, id: TypeId, index: u32) -> TypeId {
        match self.kind(id) {
            TyKind::Struct(fields) => fields[index as usize],
            _ => panic!("field_ty on non-struct type {id:?}"),
        }
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
