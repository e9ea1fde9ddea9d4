//! Target data layout: sizes, alignment and record layout

use crate::{FloatKind, IntKind, Member, StructDef, Type};

/// Byte widths that vary across targets.
///
/// `char`/`short`/`int`/`long long` are fixed at 1/2/4/8 bytes; `long` and
/// pointers are supplied per target so one parse is consistent with the
/// backend it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetLayout {
    pub long_bytes: usize,
    pub pointer_bytes: usize,
}

impl TargetLayout {
    /// LP64 layout used by the native x86-64 backend.
    pub const X86_64: TargetLayout = TargetLayout { long_bytes: 8, pointer_bytes: 8 };

    /// ILP32 layout used by the wasm32 backend.
    pub const WASM32: TargetLayout = TargetLayout { long_bytes: 4, pointer_bytes: 4 };

    pub fn int_size(&self, kind: IntKind) -> usize {
        match kind {
            IntKind::Char => 1,
            IntKind::Short => 2,
            IntKind::Int => 4,
            IntKind::Long => self.long_bytes,
            IntKind::LongLong => 8,
        }
    }

    /// Size in bytes. Incomplete types report 0; `void` reports 1 so byte
    /// arithmetic on `void*` keeps working.
    pub fn size_of(&self, ty: &Type) -> usize {
        match ty {
            Type::Void => 1,
            Type::Int { kind, .. } => self.int_size(*kind),
            Type::Float(FloatKind::F32) => 4,
            Type::Float(FloatKind::F64) => 8,
            Type::Ptr(_) | Type::Func(_) => self.pointer_bytes,
            Type::Array { elem, len: Some(n) } => self.size_of(elem) * n,
            Type::Array { len: None, .. } => 0,
            Type::Struct(def) => def.size.get(),
            Type::Enum(_) => 4,
        }
    }

    pub fn align_of(&self, ty: &Type) -> usize {
        match ty {
            Type::Void => 1,
            Type::Array { elem, .. } => self.align_of(elem),
            Type::Struct(def) => def.align.get(),
            _ => self.size_of(ty).max(1),
        }
    }
}

/// Round `offset` up to a multiple of `align` (a power of two).
pub fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Compute member offsets, bitfield positions, total size and alignment for
/// a record whose member list is final, and mark it complete.
///
/// Members pack at natural alignment. Consecutive bitfields share a storage
/// unit while their widths fit and the base kind's size is unchanged; a
/// zero-width field closes the current unit. Unions overlay everything at
/// offset 0.
pub fn layout_struct(def: &StructDef, layout: &TargetLayout) {
    let mut members = def.members.borrow_mut();

    if def.is_union {
        let mut size = 0usize;
        let mut align = 1usize;
        for m in members.iter_mut() {
            m.offset = 0;
            if let Some(bf) = &mut m.bitfield {
                bf.position = 0;
            }
            size = size.max(layout.size_of(&m.ty));
            align = align.max(layout.align_of(&m.ty));
        }
        def.size.set(align_up(size.max(1), align));
        def.align.set(align);
        def.is_complete.set(true);
        return;
    }

    let mut offset = 0usize;
    let mut align = 1usize;
    // Open bitfield unit: (byte offset, unit size in bytes, bits used).
    let mut unit: Option<(usize, usize, u32)> = None;

    for m in members.iter_mut() {
        let msize = layout.size_of(&m.ty);
        let malign = layout.align_of(&m.ty);

        match &mut m.bitfield {
            Some(bf) if bf.width == 0 => {
                // Zero width: close the unit, occupy nothing.
                if let Some((uoff, usize_, _)) = unit.take() {
                    offset = uoff + usize_;
                }
                m.offset = offset;
            }
            Some(bf) => {
                let unit_bits = (msize * 8) as u32;
                let reuse = matches!(unit, Some((_, us, used)) if us == msize && used + bf.width <= unit_bits);
                if !reuse {
                    if let Some((uoff, usize_, _)) = unit.take() {
                        offset = uoff + usize_;
                    }
                    offset = align_up(offset, malign);
                    unit = Some((offset, msize, 0));
                }
                if let Some((uoff, _, used)) = unit.as_mut() {
                    m.offset = *uoff;
                    bf.position = *used;
                    *used += bf.width;
                }
                align = align.max(malign);
            }
            None => {
                if let Some((uoff, usize_, _)) = unit.take() {
                    offset = uoff + usize_;
                }
                offset = align_up(offset, malign);
                m.offset = offset;
                offset += msize;
                align = align.max(malign);
            }
        }
    }

    if let Some((uoff, usize_, _)) = unit {
        offset = uoff + usize_;
    }

    def.size.set(align_up(offset.max(1), align));
    def.align.set(align);
    def.is_complete.set(true);
}

/// Convenience for building a member before layout runs.
pub fn member(name: &str, ty: crate::TypeRef) -> Member {
    Member {
        name: name.to_string(),
        ty,
        quals: crate::Qualifiers::empty(),
        offset: 0,
        bitfield: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bitfield, Qualifiers, Type};
    use pretty_assertions::assert_eq;

    #[test]
    fn long_width_follows_target() {
        let long = Type::int(IntKind::Long, true);
        assert_eq!(TargetLayout::X86_64.size_of(&long), 8);
        assert_eq!(TargetLayout::WASM32.size_of(&long), 4);
        assert_eq!(TargetLayout::X86_64.size_of(&Type::ptr_to(Type::void())), 8);
        assert_eq!(TargetLayout::WASM32.size_of(&Type::ptr_to(Type::void())), 4);
    }

    #[test]
    fn struct_members_pack_at_natural_alignment() {
        let def = StructDef::incomplete(None, false);
        def.members.borrow_mut().extend([
            member("c", Type::char_type()),
            member("i", Type::plain_int()),
            member("c2", Type::char_type()),
        ]);
        layout_struct(&def, &TargetLayout::X86_64);

        let members = def.members.borrow();
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 4);
        assert_eq!(members[2].offset, 8);
        assert_eq!(def.size.get(), 12);
        assert_eq!(def.align.get(), 4);
    }

    #[test]
    fn union_members_overlay() {
        let def = StructDef::incomplete(None, true);
        def.members.borrow_mut().extend([
            member("c", Type::char_type()),
            member("l", Type::int(IntKind::LongLong, true)),
        ]);
        layout_struct(&def, &TargetLayout::X86_64);

        let members = def.members.borrow();
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 0);
        assert_eq!(def.size.get(), 8);
        assert_eq!(def.align.get(), 8);
    }

    #[test]
    fn adjacent_bitfields_share_a_unit() {
        let def = StructDef::incomplete(None, false);
        let mut a = member("a", Type::plain_int());
        a.bitfield = Some(Bitfield { width: 3, position: 0 });
        let mut b = member("b", Type::plain_int());
        b.bitfield = Some(Bitfield { width: 5, position: 0 });
        let mut c = member("c", Type::plain_int());
        c.bitfield = Some(Bitfield { width: 30, position: 0 });
        def.members.borrow_mut().extend([a, b, c]);
        layout_struct(&def, &TargetLayout::X86_64);

        let members = def.members.borrow();
        // a and b share the first unit; c does not fit and opens a second.
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[0].bitfield.unwrap().position, 0);
        assert_eq!(members[1].offset, 0);
        assert_eq!(members[1].bitfield.unwrap().position, 3);
        assert_eq!(members[2].offset, 4);
        assert_eq!(members[2].bitfield.unwrap().position, 0);
        assert_eq!(def.size.get(), 8);
    }

    #[test]
    fn self_referential_struct_sizes() {
        let def = StructDef::incomplete(Some("node".into()), false);
        let ty = std::rc::Rc::new(Type::Struct(def.clone()));
        def.members.borrow_mut().extend([
            member("value", Type::plain_int()),
            Member {
                name: "next".into(),
                ty: Type::ptr_to(ty),
                quals: Qualifiers::empty(),
                offset: 0,
                bitfield: None,
            },
        ]);
        layout_struct(&def, &TargetLayout::X86_64);
        assert_eq!(def.size.get(), 16);
        assert_eq!(def.members.borrow()[1].offset, 8);
    }
}
