use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::num::FpCategory;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::traits::{ExportedFunction, FnExport};

/// Maximum nesting depth accepted when serializing a [`Value`].
///
/// Matches the default recursion limit of the `rmp-serde` decoder, so anything
/// deeper could never be read back anyway.
pub const MAX_DEPTH: usize = 1024;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Dynamic value tree exported by a loaded module.
///
/// Plain variants map one-to-one onto `MsgPack` types. `Function` and `Shared`
/// only exist on the side that owns the live module: functions never cross the
/// boundary, and shared nodes are flattened into plain copies when serialized.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit IEEE 754 float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Plain key/value mapping. `BTreeMap` keeps serialization order deterministic.
    Map(BTreeMap<String, Value>),
    /// Live callable export. Never serializable.
    Function(FunctionRef),
    /// Reference-counted node that may be aliased, or even point back at itself.
    Shared(SharedValue),
}

impl Value {
    /// Wraps an async closure as a function export.
    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Value::Function(FunctionRef::new(FnExport(f)))
    }

    /// Wraps `value` in a fresh shared node.
    #[must_use]
    pub fn shared(value: Value) -> Self {
        Value::Shared(SharedValue::new(value))
    }

    /// JavaScript-style falsiness: null, `false`, zero, NaN and the empty string.
    #[must_use]
    pub fn is_falsy(&self) -> bool {
        match self {
            Value::Null | Value::Bool(false) => true,
            Value::Int(i) => *i == 0,
            Value::Float(f) => matches!(f.classify(), FpCategory::Zero | FpCategory::Nan),
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// The function behind this value, looking through one shared node.
    #[must_use]
    pub fn function_ref(&self) -> Option<FunctionRef> {
        match self {
            Value::Function(function) => Some(function.clone()),
            Value::Shared(node) => node.with(|inner| match inner {
                Value::Function(function) => Some(function.clone()),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Returns the string slice if this is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the entries if this is a `Map`.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
            Value::Shared(_) => "shared",
        }
    }
}

/// Structural equality for plain variants, identity for functions and shared nodes.
///
/// Floats compare by bit pattern, so `-0.0 != 0.0` and a NaN equals an identical NaN.
/// Use [`crate::serializable::deep_strict_equal`] to look through shared nodes.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Shared(a), Value::Shared(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Renders the value the way a JavaScript `String(value)` call would, which is
/// how error messages are built from raw outcome data.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) if x.is_nan() => f.write_str("NaN"),
            Value::Float(x) if x.is_infinite() => {
                f.write_str(if x.is_sign_positive() { "Infinity" } else { "-Infinity" })
            }
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "[bytes; {}]", b.len()),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Map(_) | Value::Shared(_) => f.write_str("[object Object]"),
            Value::Function(_) => f.write_str("[function]"),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

// ---------------------------------------------------------------------------
// FunctionRef
// ---------------------------------------------------------------------------

/// Shared handle to a live function export.
#[derive(Clone)]
pub struct FunctionRef(Arc<dyn ExportedFunction>);

impl FunctionRef {
    /// Wraps a concrete function implementation.
    pub fn new(function: impl ExportedFunction + 'static) -> Self {
        Self(Arc::new(function))
    }

    /// Calls the underlying function with no arguments.
    ///
    /// # Errors
    ///
    /// Returns whatever error the function itself raises.
    pub async fn call(&self) -> anyhow::Result<Value> {
        self.0.call().await
    }

    /// Whether both handles point at the same function.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0).cast::<()>(),
            Arc::as_ptr(&other.0).cast::<()>(),
        )
    }
}

impl From<Arc<dyn ExportedFunction>> for FunctionRef {
    fn from(function: Arc<dyn ExportedFunction>) -> Self {
        Self(function)
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

// ---------------------------------------------------------------------------
// SharedValue
// ---------------------------------------------------------------------------

/// Aliasable, interior-mutable node inside a [`Value`] tree.
///
/// Cloning the handle aliases the node. Setting a node's contents to a tree
/// that contains the node itself creates a cycle.
#[derive(Clone, Default)]
pub struct SharedValue(Arc<RwLock<Value>>);

impl SharedValue {
    /// Creates a new node holding `value`.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Replaces the node's contents.
    pub fn set(&self, value: Value) {
        *self.0.write() = value;
    }

    /// Returns a shallow clone of the node's contents.
    #[must_use]
    pub fn get(&self) -> Value {
        self.0.read().clone()
    }

    /// Runs `f` against the node's contents under a read lock.
    ///
    /// The lock is taken recursively, so `f` may read an alias of this node.
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.0.read_recursive())
    }

    /// Whether both handles point at the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable address of the node, used to detect cycles.
    #[must_use]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Contents are not printed: the node may be part of a cycle.
        write!(f, "SharedValue({:#x})", self.addr())
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let path = RefCell::new(Vec::new());
        Tracked {
            value: self,
            path: &path,
            depth: 0,
        }
        .serialize(serializer)
    }
}

/// Serializes a value while tracking the shared nodes on the current path.
struct Tracked<'a> {
    value: &'a Value,
    path: &'a RefCell<Vec<usize>>,
    depth: usize,
}

impl<'a> Tracked<'a> {
    fn child(&self, value: &'a Value) -> Tracked<'a> {
        Tracked {
            value,
            path: self.path,
            depth: self.depth + 1,
        }
    }
}

impl Serialize for Tracked<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.depth > MAX_DEPTH {
            return Err(ser::Error::custom("value nesting is too deep"));
        }
        match self.value {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::String(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&self.child(item))?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, &self.child(value))?;
                }
                map.end()
            }
            Value::Function(_) => Err(ser::Error::custom(
                "function values cannot be serialized",
            )),
            Value::Shared(node) => {
                let addr = node.addr();
                if self.path.borrow().contains(&addr) {
                    return Err(ser::Error::custom("value contains a circular reference"));
                }
                self.path.borrow_mut().push(addr);
                let result = node.with(|inner| {
                    Tracked {
                        value: inner,
                        path: self.path,
                        depth: self.depth + 1,
                    }
                    .serialize(serializer)
                });
                self.path.borrow_mut().pop();
                result
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a plain data value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(i64::try_from(v).map_or(Value::Float(v as f64), Value::Int))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Bytes(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            entries.insert(key, value);
        }
        Ok(Value::Map(entries))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn round_trip(value: &Value) -> Value {
        let bytes = rmp_serde::to_vec_named(value).expect("serialize");
        rmp_serde::from_slice(&bytes).expect("deserialize")
    }

    // ---- Falsiness ----

    #[test]
    fn falsy_values() {
        assert!(Value::Null.is_falsy());
        assert!(Value::Bool(false).is_falsy());
        assert!(Value::Int(0).is_falsy());
        assert!(Value::Float(0.0).is_falsy());
        assert!(Value::Float(-0.0).is_falsy());
        assert!(Value::Float(f64::NAN).is_falsy());
        assert!(Value::String(String::new()).is_falsy());
    }

    #[test]
    fn truthy_values() {
        assert!(!Value::Bool(true).is_falsy());
        assert!(!Value::Int(-1).is_falsy());
        assert!(!Value::Float(0.5).is_falsy());
        assert!(!Value::from("0").is_falsy());
        assert!(!Value::Array(vec![]).is_falsy());
        assert!(!Value::Map(BTreeMap::new()).is_falsy());
        assert!(!Value::Bytes(vec![]).is_falsy());
        assert!(!Value::function(|| async { Ok(Value::Null) }).is_falsy());
    }

    // ---- Equality ----

    #[test]
    fn floats_compare_by_bits() {
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn functions_compare_by_identity() {
        let f = Value::function(|| async { Ok(Value::Int(1)) });
        let g = Value::function(|| async { Ok(Value::Int(1)) });
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }

    #[test]
    fn shared_nodes_compare_by_identity() {
        let a = SharedValue::new(Value::Int(1));
        let b = SharedValue::new(Value::Int(1));
        assert_eq!(Value::Shared(a.clone()), Value::Shared(a));
        assert_ne!(Value::Shared(b), Value::Int(1));
    }

    #[test]
    fn function_ref_looks_through_one_shared_node() {
        let f = Value::function(|| async { Ok(Value::Null) });
        let shared = Value::shared(f.clone());
        assert!(f.function_ref().is_some());
        assert!(shared.function_ref().is_some());
        assert!(Value::shared(shared).function_ref().is_none());
        assert!(Value::Int(1).function_ref().is_none());
    }

    // ---- Conversions and display ----

    #[test]
    fn from_json_builds_plain_tree() {
        let value = Value::from(json!({"a": [1, 2.5, "x"], "b": null, "c": true}));
        let map = value.as_map().expect("map");
        assert_eq!(
            map["a"],
            Value::Array(vec![Value::Int(1), Value::Float(2.5), Value::from("x")])
        );
        assert_eq!(map["b"], Value::Null);
        assert_eq!(map["c"], Value::Bool(true));
    }

    #[test]
    fn display_follows_string_conversion() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Float(f64::INFINITY).to_string(), "Infinity");
        assert_eq!(Value::Float(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::from(json!([1, [2, 3]])).to_string(), "1,2,3");
        assert_eq!(Value::from(json!({"a": 1})).to_string(), "[object Object]");
        assert_eq!(Value::from("boom").to_string(), "boom");
    }

    // ---- Serialization ----

    #[test]
    fn integers_and_floats_keep_their_variant() {
        assert_eq!(round_trip(&Value::Int(7)), Value::Int(7));
        assert_eq!(round_trip(&Value::Int(i64::MIN)), Value::Int(i64::MIN));
        assert_eq!(round_trip(&Value::Float(2.0)), Value::Float(2.0));
        assert_eq!(round_trip(&Value::Float(-0.0)), Value::Float(-0.0));
    }

    #[test]
    fn bytes_survive_as_binary() {
        let value = Value::Bytes(vec![0, 1, 255]);
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn function_fails_to_serialize() {
        let value = Value::from(json!({"a": 1}));
        let Value::Map(mut entries) = value else {
            unreachable!()
        };
        entries.insert("f".to_string(), Value::function(|| async { Ok(Value::Null) }));
        let err = rmp_serde::to_vec_named(&Value::Map(entries)).unwrap_err();
        assert!(err.to_string().contains("function"));
    }

    #[test]
    fn shared_node_serializes_as_its_contents() {
        let node = SharedValue::new(Value::from("leaf"));
        let value = Value::Array(vec![Value::Shared(node.clone()), Value::Shared(node)]);
        assert_eq!(
            round_trip(&value),
            Value::Array(vec![Value::from("leaf"), Value::from("leaf")])
        );
    }

    #[test]
    fn self_reference_fails_to_serialize() {
        let node = SharedValue::new(Value::Null);
        node.set(Value::Array(vec![Value::Shared(node.clone())]));
        let err = rmp_serde::to_vec_named(&Value::Shared(node)).unwrap_err();
        assert!(err.to_string().contains("circular"));
    }

    #[test]
    fn excessive_nesting_fails_to_serialize() {
        let mut value = Value::Null;
        for _ in 0..=MAX_DEPTH + 1 {
            value = Value::Array(vec![value]);
        }
        assert!(rmp_serde::to_vec_named(&value).is_err());
    }
}
