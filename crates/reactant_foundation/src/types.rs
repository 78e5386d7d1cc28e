//! Type descriptors for property validation.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Type descriptor for property validation.
///
/// Used to declare property and dictionary types and to validate create and
/// update payloads at runtime.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// Any type (accepts any value).
    Any,
    /// Boolean type.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point (also accepts integers).
    Float,
    /// Either numeric kind.
    Number,
    /// String type.
    String,
    /// Record reference.
    Id,
    /// Milliseconds since the Unix epoch, stored as an integer.
    Timestamp,
    /// Homogeneous list type.
    List(Box<Type>),
    /// Nested record (string-keyed map).
    Map,
    /// Optional type (value or nil).
    Option(Box<Type>),
}

impl Type {
    /// Creates a list type with the given element type.
    #[must_use]
    pub fn list(element: Type) -> Self {
        Self::List(Box::new(element))
    }

    /// Creates an optional type.
    #[must_use]
    pub fn option(inner: Type) -> Self {
        Self::Option(Box::new(inner))
    }

    /// Returns true if this type is `Any`.
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Returns true if this type can be nil.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        matches!(self, Self::Option(_) | Self::Any)
    }

    /// Returns true for the numeric kinds usable by summations.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Number | Self::Timestamp)
    }

    /// Checks whether a value is accepted by this type.
    ///
    /// - `Any` accepts everything
    /// - `Option(T)` accepts nil and anything `T` accepts
    /// - `Float` and `Number` accept integers
    /// - `List(T)` checks every element
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _)
            | (Self::Bool, Value::Bool(_))
            | (Self::Int | Self::Timestamp, Value::Int(_))
            | (Self::Float | Self::Number, Value::Int(_) | Value::Float(_))
            | (Self::String, Value::String(_))
            | (Self::Id, Value::Id(_))
            | (Self::Map, Value::Map(_)) => true,
            (Self::Option(_), Value::Nil) => true,
            (Self::Option(inner), v) => inner.accepts(v),
            (Self::List(elem), Value::List(items)) => items.iter().all(|v| elem.accepts(v)),
            _ => false,
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Number => write!(f, "number"),
            Self::String => write!(f, "string"),
            Self::Id => write!(f, "id"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::List(t) => write!(f, "list<{t}>"),
            Self::Map => write!(f, "map"),
            Self::Option(t) => write!(f, "option<{t}>"),
        }
    }
}
