//! The type system.
//!
//! [`TypeDescriptor`] is a closed variant over everything a Sable value can
//! be. Equality is structural by variant tag (and component-wise for
//! function types), with one deliberate exception: class and enum types
//! carry a layout identity assigned at declaration, so two structurally
//! identical but separately declared classes are distinct types.
//!
//! Numeric promotion follows the total order
//! `bool < int widths < float widths`; a binary numeric operation widens
//! both operands to the wider of the two types.

use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FloatWidth {
    W32,
    W64,
}

impl FloatWidth {
    pub fn bits(self) -> u32 {
        match self {
            FloatWidth::W32 => 32,
            FloatWidth::W64 => 64,
        }
    }
}

/// Identity of a generated class or enum layout.
///
/// Assigned once per declaration by the generator; used for the
/// declaration-identity side of type equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutId(pub u32);

/// A single class field. `mutable` distinguishes `var` fields, writable
/// anywhere, from `let` fields, writable only inside the constructor.
#[derive(Debug)]
pub struct ClassField {
    pub name: String,
    pub ty: TypeDescriptor,
    pub mutable: bool,
}

/// A declared class: its name, layout identity, and ordered fields.
#[derive(Debug)]
pub struct ClassType {
    pub name: String,
    pub layout: LayoutId,
    pub fields: Vec<ClassField>,
}

impl ClassType {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A declared enum: its name, layout identity, and variant names in
/// declaration order. The discriminant of a variant is its index.
#[derive(Debug)]
pub struct EnumType {
    pub name: String,
    pub layout: LayoutId,
    pub variants: Vec<String>,
}

impl EnumType {
    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|v| v == name)
    }
}

#[derive(Debug, Clone)]
pub enum TypeDescriptor {
    /// Placeholder produced only on error paths.
    Invalid,
    Bool,
    Int { width: IntWidth, signed: bool },
    Float { width: FloatWidth },
    Str,
    Void,
    /// A reference to a value of the inner type (`&x`, implicit `self`).
    Reference(Box<TypeDescriptor>),
    Function {
        params: Vec<TypeDescriptor>,
        ret: Box<TypeDescriptor>,
        variadic: bool,
    },
    Class(Rc<ClassType>),
    Enum(Rc<EnumType>),
    /// Namespace marker for a whole-module import bound to an alias.
    Module(String),
}

impl TypeDescriptor {
    /// The default integer type, spelled `int`.
    pub fn int() -> TypeDescriptor {
        TypeDescriptor::Int {
            width: IntWidth::W64,
            signed: true,
        }
    }

    /// The default float type, spelled `float`.
    pub fn float() -> TypeDescriptor {
        TypeDescriptor::Float {
            width: FloatWidth::W64,
        }
    }

    pub fn reference(inner: TypeDescriptor) -> TypeDescriptor {
        TypeDescriptor::Reference(Box::new(inner))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeDescriptor::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, TypeDescriptor::Int { .. })
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeDescriptor::Float { .. })
    }

    /// Numeric for the purposes of promotion: bool, int widths, floats.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TypeDescriptor::Bool | TypeDescriptor::Int { .. } | TypeDescriptor::Float { .. }
        )
    }

    pub fn is_signed(&self) -> bool {
        match self {
            TypeDescriptor::Int { signed, .. } => *signed,
            TypeDescriptor::Float { .. } => true,
            _ => false,
        }
    }

    /// Strip one level of reference, if present.
    pub fn deref(&self) -> &TypeDescriptor {
        match self {
            TypeDescriptor::Reference(inner) => inner,
            other => other,
        }
    }

    /// Position in the promotion order, for numeric types only.
    fn promotion_rank(&self) -> Option<u32> {
        match self {
            TypeDescriptor::Bool => Some(0),
            TypeDescriptor::Int { width, .. } => Some(width.bits()),
            TypeDescriptor::Float { width } => Some(100 + width.bits()),
            _ => None,
        }
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        use TypeDescriptor::*;
        match (self, other) {
            (Invalid, Invalid) => true,
            (Bool, Bool) => true,
            (
                Int {
                    width: a,
                    signed: sa,
                },
                Int {
                    width: b,
                    signed: sb,
                },
            ) => a == b && sa == sb,
            (Float { width: a }, Float { width: b }) => a == b,
            (Str, Str) => true,
            (Void, Void) => true,
            (Reference(a), Reference(b)) => a == b,
            (
                Function {
                    params: pa,
                    ret: ra,
                    variadic: va,
                },
                Function {
                    params: pb,
                    ret: rb,
                    variadic: vb,
                },
            ) => pa == pb && ra == rb && va == vb,
            // Declaration identity, not field shape.
            (Class(a), Class(b)) => a.layout == b.layout,
            (Enum(a), Enum(b)) => a.layout == b.layout,
            (Module(a), Module(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TypeDescriptor {}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Invalid => write!(f, "<invalid>"),
            TypeDescriptor::Bool => write!(f, "bool"),
            TypeDescriptor::Int { width, signed } => {
                let prefix = if *signed { "int" } else { "uint" };
                if width.bits() == 64 {
                    write!(f, "{prefix}")
                } else {
                    write!(f, "{prefix}{}", width.bits())
                }
            }
            TypeDescriptor::Float { width } => {
                if width.bits() == 64 {
                    write!(f, "float")
                } else {
                    write!(f, "float32")
                }
            }
            TypeDescriptor::Str => write!(f, "str"),
            TypeDescriptor::Void => write!(f, "void"),
            TypeDescriptor::Reference(inner) => write!(f, "&{inner}"),
            TypeDescriptor::Function { params, ret, variadic } => {
                write!(f, "func(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                if *variadic {
                    if !params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ") -> {ret}")
            }
            TypeDescriptor::Class(class) => write!(f, "{}", class.name),
            TypeDescriptor::Enum(e) => write!(f, "{}", e.name),
            TypeDescriptor::Module(alias) => write!(f, "module `{alias}`"),
        }
    }
}

/// The common type two numeric operands widen to, if any.
///
/// Returns `None` when either side is non-numeric; the caller decides
/// whether the combination is one of the promotion bypasses (reference,
/// class-instance, or enum-discriminant equality).
pub fn promote(a: &TypeDescriptor, b: &TypeDescriptor) -> Option<TypeDescriptor> {
    let ra = a.promotion_rank()?;
    let rb = b.promotion_rank()?;
    if ra > rb {
        return Some(a.clone());
    }
    if rb > ra {
        return Some(b.clone());
    }
    // Same rank. For same-width ints with mixed signedness the unsigned
    // operand wins, mirroring the widening rule for the value range.
    match (a, b) {
        (
            TypeDescriptor::Int { width, signed: sa },
            TypeDescriptor::Int { signed: sb, .. },
        ) => Some(TypeDescriptor::Int {
            width: *width,
            signed: *sa && *sb,
        }),
        _ => Some(a.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32() -> TypeDescriptor {
        TypeDescriptor::Int {
            width: IntWidth::W32,
            signed: true,
        }
    }

    #[test]
    fn promotion_widens_to_the_wider_operand() {
        assert_eq!(promote(&int32(), &TypeDescriptor::int()), Some(TypeDescriptor::int()));
        assert_eq!(
            promote(&TypeDescriptor::int(), &TypeDescriptor::float()),
            Some(TypeDescriptor::float())
        );
        assert_eq!(
            promote(&TypeDescriptor::Bool, &int32()),
            Some(int32())
        );
    }

    #[test]
    fn promotion_rejects_non_numeric_operands() {
        assert_eq!(promote(&TypeDescriptor::Str, &TypeDescriptor::int()), None);
        assert_eq!(promote(&TypeDescriptor::Void, &TypeDescriptor::Void), None);
    }

    #[test]
    fn same_width_mixed_signedness_widens_to_unsigned() {
        let unsigned = TypeDescriptor::Int {
            width: IntWidth::W64,
            signed: false,
        };
        assert_eq!(
            promote(&TypeDescriptor::int(), &unsigned),
            Some(unsigned.clone())
        );
    }

    #[test]
    fn function_types_compare_component_wise() {
        let a = TypeDescriptor::Function {
            params: vec![TypeDescriptor::int()],
            ret: Box::new(TypeDescriptor::Void),
            variadic: false,
        };
        let b = TypeDescriptor::Function {
            params: vec![TypeDescriptor::int()],
            ret: Box::new(TypeDescriptor::Void),
            variadic: false,
        };
        let c = TypeDescriptor::Function {
            params: vec![TypeDescriptor::float()],
            ret: Box::new(TypeDescriptor::Void),
            variadic: false,
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn separately_declared_classes_are_distinct() {
        let field = || ClassField {
            name: "x".into(),
            ty: TypeDescriptor::int(),
            mutable: true,
        };
        let a = TypeDescriptor::Class(Rc::new(ClassType {
            name: "Point".into(),
            layout: LayoutId(0),
            fields: vec![field()],
        }));
        let b = TypeDescriptor::Class(Rc::new(ClassType {
            name: "Point".into(),
            layout: LayoutId(1),
            fields: vec![field()],
        }));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn display_uses_source_spellings() {
        assert_eq!(TypeDescriptor::int().to_string(), "int");
        assert_eq!(int32().to_string(), "int32");
        assert_eq!(TypeDescriptor::float().to_string(), "float");
        assert_eq!(
            TypeDescriptor::reference(TypeDescriptor::Bool).to_string(),
            "&bool"
        );
    }
}
