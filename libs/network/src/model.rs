//! Marshallable payload objects
//!
//! These are the values that travel inside message bodies: invocation
//! requests and their results, failures, transaction branch identifiers,
//! locators and session ids. Their byte encoding is owned by a
//! [`Marshaller`](crate::marshalling::Marshaller).

use serde::de::{self, DeserializeSeed, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Deepest `List`/`Map` nesting accepted when decoding a [`Value`]
pub const MAX_VALUE_DEPTH: usize = 128;

/// Value model for arguments, return values and attachments
///
/// Decoding is depth-limited: input nested deeper than [`MAX_VALUE_DEPTH`]
/// fails instead of recursing without bound.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

const VALUE_VARIANTS: &[&str] = &["Null", "Bool", "Int", "Float", "Str", "Bytes", "List", "Map"];

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ValueSeed { depth: 0 }.deserialize(deserializer)
    }
}

/// Decodes one [`Value`] at a known nesting depth
#[derive(Clone, Copy)]
struct ValueSeed {
    depth: usize,
}

impl ValueSeed {
    fn nested(self) -> Self {
        Self {
            depth: self.depth + 1,
        }
    }
}

impl<'de> DeserializeSeed<'de> for ValueSeed {
    type Value = Value;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        if self.depth > MAX_VALUE_DEPTH {
            return Err(de::Error::custom(format_args!(
                "value nested deeper than {} levels",
                MAX_VALUE_DEPTH
            )));
        }
        deserializer.deserialize_enum("Value", VALUE_VARIANTS, self)
    }
}

impl<'de> Visitor<'de> for ValueSeed {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("enum Value")
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<Value, A::Error> {
        let (kind, variant) = data.variant::<ValueKind>()?;
        match kind {
            ValueKind::Null => variant.unit_variant().map(|()| Value::Null),
            ValueKind::Bool => variant.newtype_variant().map(Value::Bool),
            ValueKind::Int => variant.newtype_variant().map(Value::Int),
            ValueKind::Float => variant.newtype_variant().map(Value::Float),
            ValueKind::Str => variant.newtype_variant().map(Value::Str),
            ValueKind::Bytes => variant.newtype_variant().map(Value::Bytes),
            ValueKind::List => variant
                .newtype_variant_seed(ListSeed(self.nested()))
                .map(Value::List),
            ValueKind::Map => variant
                .newtype_variant_seed(MapSeed(self.nested()))
                .map(Value::Map),
        }
    }
}

enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    List,
    Map,
}

impl ValueKind {
    fn from_index<E: de::Error>(index: u64) -> Result<Self, E> {
        Ok(match index {
            0 => Self::Null,
            1 => Self::Bool,
            2 => Self::Int,
            3 => Self::Float,
            4 => Self::Str,
            5 => Self::Bytes,
            6 => Self::List,
            7 => Self::Map,
            other => {
                return Err(de::Error::invalid_value(
                    de::Unexpected::Unsigned(other),
                    &"variant index 0 <= i < 8",
                ))
            }
        })
    }
}

impl<'de> Deserialize<'de> for ValueKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KindVisitor;

        impl<'de> Visitor<'de> for KindVisitor {
            type Value = ValueKind;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("Value variant")
            }

            fn visit_u64<E: de::Error>(self, index: u64) -> Result<ValueKind, E> {
                ValueKind::from_index(index)
            }

            fn visit_str<E: de::Error>(self, name: &str) -> Result<ValueKind, E> {
                match VALUE_VARIANTS.iter().position(|v| *v == name) {
                    Some(index) => ValueKind::from_index(index as u64),
                    None => Err(de::Error::unknown_variant(name, VALUE_VARIANTS)),
                }
            }
        }

        deserializer.deserialize_identifier(KindVisitor)
    }
}

struct ListSeed(ValueSeed);

impl<'de> DeserializeSeed<'de> for ListSeed {
    type Value = Vec<Value>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Vec<Value>, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ListSeed {
    type Value = Vec<Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of values")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<Value>, A::Error> {
        // Length hints come from the peer; cap the preallocation
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(1024));
        while let Some(value) = seq.next_element_seed(self.0)? {
            values.push(value);
        }
        Ok(values)
    }
}

struct MapSeed(ValueSeed);

impl<'de> DeserializeSeed<'de> for MapSeed {
    type Value = BTreeMap<String, Value>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for MapSeed {
    type Value = BTreeMap<String, Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut values = BTreeMap::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value_seed(self.0)?;
            values.insert(key, value);
        }
        Ok(values)
    }
}

/// String-keyed invocation context data
pub type Attachments = BTreeMap<String, Value>;

/// Deployment module coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleIdentifier {
    pub app_name: String,
    pub module_name: String,
    pub distinct_name: String,
}

impl ModuleIdentifier {
    pub fn new(
        app_name: impl Into<String>,
        module_name: impl Into<String>,
        distinct_name: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            module_name: module_name.into(),
            distinct_name: distinct_name.into(),
        }
    }
}

impl fmt::Display for ModuleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.module_name, self.distinct_name)
    }
}

/// Identity of a deployed bean
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EjbLocator {
    pub module: ModuleIdentifier,
    pub bean_name: String,
}

impl EjbLocator {
    pub fn new(module: ModuleIdentifier, bean_name: impl Into<String>) -> Self {
        Self {
            module,
            bean_name: bean_name.into(),
        }
    }
}

impl fmt::Display for EjbLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.bean_name)
    }
}

/// Method name plus parameter type names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodLocator {
    pub name: String,
    pub parameter_types: Vec<String>,
}

impl MethodLocator {
    pub fn new<I, S>(name: impl Into<String>, parameter_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            parameter_types: parameter_types.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for MethodLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.parameter_types.join(","))
    }
}

/// Unmarshalled body of an invocation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub locator: EjbLocator,
    pub method: MethodLocator,
    pub arguments: Vec<Value>,
    pub attachments: Attachments,
}

/// Successful invocation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub value: Value,
    pub attachments: Attachments,
}

/// Marshalled form of a server-side failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub exception_type: String,
    pub message: String,
}

impl RemoteFailure {
    pub fn new(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exception_type, self.message)
    }
}

/// Transaction branch identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    pub format_id: i32,
    pub global_transaction_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

impl Xid {
    pub fn new(format_id: i32, global_transaction_id: &[u8], branch_qualifier: &[u8]) -> Self {
        Self {
            format_id,
            global_transaction_id: global_transaction_id.to_vec(),
            branch_qualifier: branch_qualifier.to_vec(),
        }
    }
}

/// Opaque session handle of a stateful bean
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Vec<u8>);

/// Every object a marshaller can put on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireObject {
    Invocation(InvocationRequest),
    Response(InvocationResponse),
    Failure(RemoteFailure),
    Xid(Xid),
    Locator(EjbLocator),
    Session(SessionId),
}

impl WireObject {
    pub fn kind(&self) -> &'static str {
        match self {
            WireObject::Invocation(_) => "invocation request",
            WireObject::Response(_) => "invocation response",
            WireObject::Failure(_) => "failure",
            WireObject::Xid(_) => "xid",
            WireObject::Locator(_) => "ejb locator",
            WireObject::Session(_) => "session id",
        }
    }
}
