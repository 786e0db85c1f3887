use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;

/// Structured-clone value carried across the worker boundary.
///
/// Arguments and results of offloaded methods are copied by value through a
/// `MsgPack` encoding; live handles, closures and references cannot be
/// represented and therefore cannot cross. A provider reconstructed inside a
/// worker shares no memory with the caller's instance, so only what is
/// returned as a `Value` is ever observed by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value (also the result of unit-returning methods).
    Null,
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit IEEE 754 float. `MsgPack` preserves every bit.
    Float(f64),
    String(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    Array(Vec<Value>),
    /// Uses `BTreeMap` for deterministic serialization order.
    Map(BTreeMap<String, Value>),
    /// A request context object. Only valid as the first argument of a
    /// request-scoped offloaded method.
    Request(RequestContext),
}

impl Value {
    /// Builds a `Value::Map` from key/value pairs.
    #[must_use]
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the numeric value as `f64`, widening integers.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_request(&self) -> Option<&RequestContext> {
        match self {
            Value::Request(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Looks up `key` in a map value or in a request context's payload.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.get(key),
            Value::Request(ctx) => ctx.get(key),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<RequestContext> for Value {
    fn from(v: RequestContext) -> Self {
        Value::Request(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_survives_msgpack_bit_for_bit() {
        let pi = Value::Float(3.141_492_653_590_034_5);
        let bytes = rmp_serde::to_vec_named(&pi).expect("serialize");
        let decoded: Value = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(decoded, pi);
    }

    #[test]
    fn map_builder_and_get() {
        let v = Value::map([("requestId", "r1"), ("tenant", "acme")]);
        assert_eq!(v.get("requestId").and_then(Value::as_str), Some("r1"));
        assert!(v.get("missing").is_none());
    }

    #[test]
    fn as_f64_widens_integers() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::from("3").as_f64(), None);
    }

    #[test]
    fn accessors_reject_other_variants() {
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::Int(1).as_bool(), None);

        let list = Value::from(vec![Value::Int(1), Value::from("two")]);
        assert_eq!(list.as_array().map(<[Value]>::len), Some(2));
        assert!(Value::from("two").as_array().is_none());
    }

    #[test]
    fn option_maps_none_to_null() {
        let none: Option<i64> = None;
        assert!(Value::from(none).is_null());
        assert_eq!(Value::from(Some(7_i64)), Value::Int(7));
    }

    #[test]
    fn get_reads_request_payload() {
        let ctx = RequestContext::new().with("requestId", "r9");
        let v = Value::from(ctx);
        assert_eq!(v.get("requestId").and_then(Value::as_str), Some("r9"));
        assert!(v.as_request().is_some());
    }
}
