//! Owned dynamic values and the argument kinds a handler may declare.

use std::collections::HashMap;

/// An ordered list of values.
pub type Array = Vec<Value>;

/// A map with string keys.
pub type Map = HashMap<String, Value>;

/// Any value the stream codec can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int64(i64),
    Uint64(u64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Array),
    Map(Map),
}

impl Value {
    /// Kind of this value, or `None` for nil.
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Value::Nil => None,
            Value::Bool(_) => Some(Kind::Bool),
            Value::Int64(_) => Some(Kind::Int),
            Value::Uint64(_) => Some(Kind::Uint),
            Value::Float64(_) => Some(Kind::Float),
            Value::String(_) => Some(Kind::String),
            Value::Bytes(_) => Some(Kind::Bytes),
            Value::Array(_) => Some(Kind::Array),
            Value::Map(_) => Some(Kind::Map),
        }
    }

    /// Name used in call signatures, e.g. `Int` or `String`.
    pub fn type_name(&self) -> &'static str {
        self.kind().map_or("Nil", Kind::name)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

/// The eight argument kinds a handler can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Bool,
    Int,
    Uint,
    Float,
    String,
    Bytes,
    Array,
    Map,
}

impl Kind {
    /// Every kind, in kind-string order.
    pub const ALL: [Kind; 8] = [
        Kind::Bool,
        Kind::Int,
        Kind::Uint,
        Kind::Float,
        Kind::String,
        Kind::Bytes,
        Kind::Array,
        Kind::Map,
    ];

    /// One-character code used in kind-strings.
    pub fn code(self) -> char {
        match self {
            Kind::Bool => 'B',
            Kind::Int => 'I',
            Kind::Uint => 'U',
            Kind::Float => 'F',
            Kind::String => 'S',
            Kind::Bytes => 'X',
            Kind::Array => 'A',
            Kind::Map => 'M',
        }
    }

    pub fn from_code(c: char) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.code() == c)
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Bool => "Bool",
            Kind::Int => "Int",
            Kind::Uint => "Uint",
            Kind::Float => "Float",
            Kind::String => "String",
            Kind::Bytes => "Bytes",
            Kind::Array => "Array",
            Kind::Map => "Map",
        }
    }

    /// Builds the kind-string for an argument list, e.g. `BIS`.
    pub fn string_of(kinds: &[Kind]) -> String {
        kinds.iter().map(|k| k.code()).collect()
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i64 => Int64,
    i32 => Int64,
    u64 => Uint64,
    u32 => Uint64,
    f64 => Float64,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
    Array => Array,
    Map => Map,
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}
