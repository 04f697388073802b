//! The contract type system: primitive integer widths with exact bounds,
//! addresses, fixed-capacity arrays, total maps, structs, events, resources,
//! interfaces, and unions.

use std::fmt;

use num_bigint::BigInt;
use num_traits::One;
use serde::{Deserialize, Serialize};

// ── Integer widths ──────────────────────────────────────────────────

/// A fixed-width integer type. Bounds are exact big integers so that
/// `uint256` arithmetic never overflows the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntKind {
    pub bits: u32,
    pub signed: bool,
}

impl IntKind {
    pub const fn new(bits: u32, signed: bool) -> Self {
        Self { bits, signed }
    }

    /// Smallest representable value.
    pub fn lower_bound(&self) -> BigInt {
        if self.signed {
            -(BigInt::one() << (self.bits - 1))
        } else {
            BigInt::from(0)
        }
    }

    /// Largest representable value.
    pub fn upper_bound(&self) -> BigInt {
        if self.signed {
            (BigInt::one() << (self.bits - 1)) - 1
        } else {
            (BigInt::one() << self.bits) - 1
        }
    }
}

/// `int128`, the default type of integer literals.
pub const INT128: IntKind = IntKind::new(128, true);
/// `uint256`, the type of wei amounts, timestamps, and loop indices.
pub const UINT256: IntKind = IntKind::new(256, false);
/// Addresses are 160-bit unsigned integers.
pub const ADDRESS_BITS: u32 = 160;

// ── Types ───────────────────────────────────────────────────────────

/// A contract type, attached to every expression node by the annotator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int(IntKind),
    Bool,
    /// A bounded integer in `[0, 2^160)`.
    Address,
    /// Byte strings; the literal length is the capacity.
    Bytes(usize),
    /// Fixed-capacity array with a length predicate.
    Array(Box<Type>, usize),
    /// Total map with default values.
    Map(Box<Type>, Box<Type>),
    /// Named struct with ordered, typed fields.
    Struct(StructType),
    /// Event payloads are typed tuples.
    Event(String, Vec<Type>),
    /// A typed external contract handle.
    Contract(String),
    /// An interface type usable as a receiver.
    Interface(String),
    /// A declared resource; carries its parameter record.
    Resource(StructType),
    /// `creator(R)` wrapper resource.
    Creator(Box<Type>),
    /// A union of alternatives, checked as a disjunction.
    Union(Vec<Type>),
}

/// The record part shared by structs and resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl StructType {
    pub fn field_type(&self, name: &str) -> Option<&Type> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }
}

impl Type {
    pub const fn int128() -> Self {
        Type::Int(INT128)
    }

    pub const fn uint256() -> Self {
        Type::Int(UINT256)
    }

    /// The type of `msg.value` and `self.balance`.
    pub const fn wei() -> Self {
        Type::Int(UINT256)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int(_) | Type::Address)
    }

    /// Bounds for integer-sorted types; addresses are bounded like uint160.
    pub fn bounds(&self) -> Option<(BigInt, BigInt)> {
        match self {
            Type::Int(kind) => Some((kind.lower_bound(), kind.upper_bound())),
            Type::Address => {
                let kind = IntKind::new(ADDRESS_BITS, false);
                Some((kind.lower_bound(), kind.upper_bound()))
            }
            _ => None,
        }
    }

    /// For two integer operands of different widths, the wider compatible
    /// type wins; literals adopt the expected type. Returns `None` when the
    /// operands cannot be unified.
    pub fn join_arith(&self, other: &Type) -> Option<Type> {
        match (self, other) {
            (Type::Int(a), Type::Int(b)) if a.signed == b.signed => {
                Some(Type::Int(if a.bits >= b.bits { *a } else { *b }))
            }
            // Mixed signedness joins only when one side is the literal
            // default, which re-types to the other side.
            (Type::Int(a), Type::Int(_)) if *self == Type::int128() => Some(Type::Int(*a)),
            (Type::Int(_), Type::Int(b)) if *other == Type::int128() => Some(Type::Int(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int(kind) => {
                let prefix = if kind.signed { "int" } else { "uint" };
                write!(f, "{}{}", prefix, kind.bits)
            }
            Type::Bool => write!(f, "bool"),
            Type::Address => write!(f, "address"),
            Type::Bytes(n) => write!(f, "bytes[{}]", n),
            Type::Array(elem, n) => write!(f, "{}[{}]", elem, n),
            Type::Map(k, v) => write!(f, "map({}, {})", k, v),
            Type::Struct(s) => write!(f, "{}", s.name),
            Type::Event(name, _) => write!(f, "event {}", name),
            Type::Contract(name) => write!(f, "contract {}", name),
            Type::Interface(name) => write!(f, "interface {}", name),
            Type::Resource(s) => write!(f, "resource {}", s.name),
            Type::Creator(inner) => write!(f, "creator({})", inner),
            Type::Union(alts) => {
                let parts: Vec<_> = alts.iter().map(|t| t.to_string()).collect();
                write!(f, "{}", parts.join(" | "))
            }
        }
    }
}

// ── Type annotations ────────────────────────────────────────────────

/// A syntactic type annotation as delivered by the frontend, resolved to a
/// [`Type`] by [`TypeBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeAnnotation {
    Named(String),
    Array(Box<TypeAnnotation>, usize),
    Map(Box<TypeAnnotation>, Box<TypeAnnotation>),
    Union(Vec<TypeAnnotation>),
}

/// Resolves annotations against the program's declared structs, interfaces,
/// and contracts.
pub struct TypeBuilder<'a> {
    structs: &'a dyn Fn(&str) -> Option<StructType>,
    interfaces: &'a dyn Fn(&str) -> bool,
}

impl<'a> TypeBuilder<'a> {
    pub fn new(
        structs: &'a dyn Fn(&str) -> Option<StructType>,
        interfaces: &'a dyn Fn(&str) -> bool,
    ) -> Self {
        Self { structs, interfaces }
    }

    pub fn build(&self, ann: &TypeAnnotation) -> Option<Type> {
        match ann {
            TypeAnnotation::Named(name) => self.build_named(name),
            TypeAnnotation::Array(elem, size) => {
                Some(Type::Array(Box::new(self.build(elem)?), *size))
            }
            TypeAnnotation::Map(k, v) => Some(Type::Map(
                Box::new(self.build(k)?),
                Box::new(self.build(v)?),
            )),
            TypeAnnotation::Union(alts) => {
                let alts = alts.iter().map(|a| self.build(a)).collect::<Option<Vec<_>>>()?;
                Some(Type::Union(alts))
            }
        }
    }

    fn build_named(&self, name: &str) -> Option<Type> {
        match name {
            "bool" => Some(Type::Bool),
            "address" => Some(Type::Address),
            "wei_value" => Some(Type::wei()),
            "timestamp" => Some(Type::uint256()),
            _ => {
                if let Some(rest) = name.strip_prefix("uint") {
                    if let Ok(bits) = rest.parse::<u32>() {
                        return Some(Type::Int(IntKind::new(bits, false)));
                    }
                }
                if let Some(rest) = name.strip_prefix("int") {
                    if let Ok(bits) = rest.parse::<u32>() {
                        return Some(Type::Int(IntKind::new(bits, true)));
                    }
                }
                if let Some(s) = (self.structs)(name) {
                    return Some(Type::Struct(s));
                }
                if (self.interfaces)(name) {
                    return Some(Type::Interface(name.to_string()));
                }
                None
            }
        }
    }
}
