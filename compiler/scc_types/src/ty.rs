//! Type descriptors

use bitflags::bitflags;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Shared handle to a type descriptor
pub type TypeRef = Rc<Type>;

/// Width class of an integer type; byte sizes come from [`TargetLayout`]
///
/// [`TargetLayout`]: crate::TargetLayout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntKind {
    Char,
    Short,
    Int,
    Long,
    LongLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FloatKind {
    F32,
    F64,
}

bitflags! {
    /// Type qualifiers recorded at the use site (declaration or member),
    /// never interned into the type graph itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Qualifiers: u8 {
        const CONST = 1 << 0;
    }
}

/// A type descriptor
#[derive(Debug)]
pub enum Type {
    Void,
    Int { kind: IntKind, signed: bool },
    Float(FloatKind),
    Ptr(TypeRef),
    Array { elem: TypeRef, len: Option<usize> },
    Struct(Rc<StructDef>),
    Func(Rc<FuncSig>),
    Enum(Rc<EnumDef>),
}

/// A struct or union definition.
///
/// Members live behind a `RefCell` so a body can reference itself through a
/// pointer before the closing brace completes it. Size and alignment are
/// filled in by [`layout_struct`](crate::layout_struct).
#[derive(Debug)]
pub struct StructDef {
    pub name: Option<String>,
    pub is_union: bool,
    pub members: RefCell<Vec<Member>>,
    pub size: Cell<usize>,
    pub align: Cell<usize>,
    pub is_complete: Cell<bool>,
}

impl StructDef {
    pub fn incomplete(name: Option<String>, is_union: bool) -> Rc<Self> {
        Rc::new(Self {
            name,
            is_union,
            members: RefCell::new(Vec::new()),
            size: Cell::new(0),
            align: Cell::new(1),
            is_complete: Cell::new(false),
        })
    }

    /// Member lookup by name; clones the member record out of the cell.
    pub fn find_member(&self, name: &str) -> Option<Member> {
        self.members.borrow().iter().find(|m| m.name == name).cloned()
    }
}

/// An ordered struct/union member
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub ty: TypeRef,
    pub quals: Qualifiers,
    /// Byte offset of the member's storage unit from the start of the record.
    pub offset: usize,
    pub bitfield: Option<Bitfield>,
}

/// Bitfield placement within the member's storage unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitfield {
    /// Width in bits.
    pub width: u32,
    /// Bit position of the field's least significant bit within the unit.
    pub position: u32,
}

/// A function signature.
///
/// Equality and hashing are structural over the return type and the ordered
/// parameter list, so signatures can key a deduplication table.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct FuncSig {
    pub ret: TypeRef,
    pub params: Vec<TypeRef>,
    pub varargs: bool,
}

/// An enum definition. Enumerators are plain integer constants declared in
/// the enclosing scope; the definition itself only carries the tag.
#[derive(Debug)]
pub struct EnumDef {
    pub name: Option<String>,
    pub is_complete: Cell<bool>,
}

impl EnumDef {
    pub fn incomplete(name: Option<String>) -> Rc<Self> {
        Rc::new(Self { name, is_complete: Cell::new(false) })
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Void, Type::Void) => true,
            (Type::Int { kind: a, signed: sa }, Type::Int { kind: b, signed: sb }) => {
                a == b && sa == sb
            }
            (Type::Float(a), Type::Float(b)) => a == b,
            (Type::Ptr(a), Type::Ptr(b)) => a == b,
            (Type::Array { elem: a, len: la }, Type::Array { elem: b, len: lb }) => {
                a == b && la == lb
            }
            // Nominal identity for records and enums.
            (Type::Struct(a), Type::Struct(b)) => Rc::ptr_eq(a, b),
            (Type::Enum(a), Type::Enum(b)) => Rc::ptr_eq(a, b),
            (Type::Func(a), Type::Func(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Type::Void => {}
            Type::Int { kind, signed } => {
                kind.hash(state);
                signed.hash(state);
            }
            Type::Float(kind) => kind.hash(state),
            Type::Ptr(inner) => inner.hash(state),
            Type::Array { elem, len } => {
                elem.hash(state);
                len.hash(state);
            }
            Type::Struct(def) => (Rc::as_ptr(def) as usize).hash(state),
            Type::Enum(def) => (Rc::as_ptr(def) as usize).hash(state),
            Type::Func(sig) => sig.hash(state),
        }
    }
}

impl Type {
    pub fn void() -> TypeRef {
        Rc::new(Type::Void)
    }

    pub fn int(kind: IntKind, signed: bool) -> TypeRef {
        Rc::new(Type::Int { kind, signed })
    }

    /// Plain `int`, the workhorse type of promotions and enum constants.
    pub fn plain_int() -> TypeRef {
        Self::int(IntKind::Int, true)
    }

    pub fn char_type() -> TypeRef {
        Self::int(IntKind::Char, true)
    }

    pub fn float(kind: FloatKind) -> TypeRef {
        Rc::new(Type::Float(kind))
    }

    pub fn ptr_to(inner: TypeRef) -> TypeRef {
        Rc::new(Type::Ptr(inner))
    }

    pub fn array_of(elem: TypeRef, len: Option<usize>) -> TypeRef {
        Rc::new(Type::Array { elem, len })
    }

    pub fn func(ret: TypeRef, params: Vec<TypeRef>, varargs: bool) -> TypeRef {
        Rc::new(Type::Func(Rc::new(FuncSig { ret, params, varargs })))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int { .. } | Type::Enum(_))
    }

    pub fn is_flonum(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    pub fn is_arith(&self) -> bool {
        self.is_integer() || self.is_flonum()
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct(_))
    }

    pub fn is_func(&self) -> bool {
        matches!(self, Type::Func(_))
    }

    /// Scalar: usable in a condition.
    pub fn is_scalar(&self) -> bool {
        self.is_arith() || self.is_ptr()
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, Type::Int { signed: false, .. })
    }

    /// Pointee of a pointer, element of an array.
    pub fn pointee(&self) -> Option<&TypeRef> {
        match self {
            Type::Ptr(inner) => Some(inner),
            Type::Array { elem, .. } => Some(elem),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&Rc<FuncSig>> {
        match self {
            Type::Func(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Rc<StructDef>> {
        match self {
            Type::Struct(def) => Some(def),
            _ => None,
        }
    }

    /// The signature of a callee expression: a function, or a pointer to one.
    pub fn callee_sig(&self) -> Option<&Rc<FuncSig>> {
        match self {
            Type::Func(sig) => Some(sig),
            Type::Ptr(inner) => inner.as_func(),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int { kind, signed } => {
                if !signed {
                    write!(f, "unsigned ")?;
                }
                match kind {
                    IntKind::Char => write!(f, "char"),
                    IntKind::Short => write!(f, "short"),
                    IntKind::Int => write!(f, "int"),
                    IntKind::Long => write!(f, "long"),
                    IntKind::LongLong => write!(f, "long long"),
                }
            }
            Type::Float(FloatKind::F32) => write!(f, "float"),
            Type::Float(FloatKind::F64) => write!(f, "double"),
            Type::Ptr(inner) => write!(f, "{}*", inner),
            Type::Array { elem, len: Some(n) } => write!(f, "{}[{}]", elem, n),
            Type::Array { elem, len: None } => write!(f, "{}[]", elem),
            Type::Struct(def) => {
                let tag = if def.is_union { "union" } else { "struct" };
                match &def.name {
                    Some(name) => write!(f, "{} {}", tag, name),
                    None => write!(f, "{} <anonymous>", tag),
                }
            }
            Type::Func(sig) => {
                write!(f, "{}(", sig.ret)?;
                for (i, p) in sig.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                if sig.varargs {
                    if !sig.params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
            Type::Enum(def) => match &def.name {
                Some(name) => write!(f, "enum {}", name),
                None => write!(f, "enum <anonymous>"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_signature_equality_is_structural() {
        let a = Type::func(Type::plain_int(), vec![Type::plain_int()], false);
        let b = Type::func(Type::plain_int(), vec![Type::plain_int()], false);
        let c = Type::func(Type::plain_int(), vec![Type::char_type()], false);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn varargs_distinguishes_signatures() {
        let a = Type::func(Type::void(), vec![Type::plain_int()], false);
        let b = Type::func(Type::void(), vec![Type::plain_int()], true);
        assert_ne!(a, b);
    }

    #[test]
    fn struct_identity_is_nominal() {
        let a = StructDef::incomplete(Some("s".into()), false);
        let b = StructDef::incomplete(Some("s".into()), false);
        let ta = Rc::new(Type::Struct(a.clone()));
        let tb = Rc::new(Type::Struct(b));
        let ta2 = Rc::new(Type::Struct(a));
        assert_ne!(ta, tb);
        assert_eq!(ta, ta2);
    }

    #[test]
    fn self_referential_struct_compares_without_recursing() {
        let def = StructDef::incomplete(Some("node".into()), false);
        let ty = Rc::new(Type::Struct(def.clone()));
        def.members.borrow_mut().push(Member {
            name: "next".into(),
            ty: Type::ptr_to(ty.clone()),
            quals: Qualifiers::empty(),
            offset: 0,
            bitfield: None,
        });
        def.is_complete.set(true);
        // Equality through the pointer member must terminate.
        assert_eq!(ty, Rc::new(Type::Struct(def)));
    }
}
