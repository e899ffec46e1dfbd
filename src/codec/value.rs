//! Typed topic values and the type-tag space shared by NT3 and NT4.
//!
//! `Value` is a tagged union over `ValueType`. Payloads arriving from either
//! wire generation are first decoded into the untyped `WireValue` and then
//! converted with `Value::from_wire`, which is total over the tag enum and
//! rejects every other shape.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum ValueType {
    Boolean = 0,
    Double = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Raw = 5,
    BooleanArray = 16,
    DoubleArray = 17,
    IntArray = 18,
    FloatArray = 19,
    StringArray = 20,
}

impl ValueType {
    pub fn tag(self) -> u8 {
        self.into()
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::try_from(tag).ok()
    }

    /// Type string used by NT4 control messages.
    pub fn type_str(self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Double => "double",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Raw => "raw",
            ValueType::BooleanArray => "boolean[]",
            ValueType::DoubleArray => "double[]",
            ValueType::IntArray => "int[]",
            ValueType::FloatArray => "float[]",
            ValueType::StringArray => "string[]",
        }
    }

    /// `json` travels as a string and `msgpack` as raw bytes.
    pub fn from_type_str(s: &str) -> Option<Self> {
        let ty = match s {
            "boolean" => ValueType::Boolean,
            "double" => ValueType::Double,
            "int" => ValueType::Int,
            "float" => ValueType::Float,
            "string" | "json" => ValueType::String,
            "raw" | "msgpack" | "rpc" => ValueType::Raw,
            "boolean[]" => ValueType::BooleanArray,
            "double[]" => ValueType::DoubleArray,
            "int[]" => ValueType::IntArray,
            "float[]" => ValueType::FloatArray,
            "string[]" => ValueType::StringArray,
            _ => return None,
        };
        Some(ty)
    }

    pub fn default_value(self) -> Value {
        match self {
            ValueType::Boolean => Value::Boolean(false),
            ValueType::Double => Value::Double(0.0),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::String => Value::String(String::new()),
            ValueType::Raw => Value::Raw(Vec::new()),
            ValueType::BooleanArray => Value::BooleanArray(Vec::new()),
            ValueType::DoubleArray => Value::DoubleArray(Vec::new()),
            ValueType::IntArray => Value::IntArray(Vec::new()),
            ValueType::FloatArray => Value::FloatArray(Vec::new()),
            ValueType::StringArray => Value::StringArray(Vec::new()),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_str())
    }
}

impl Serialize for ValueType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.type_str())
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ValueType::from_type_str(&s)
            .ok_or_else(|| de::Error::custom(format!("unknown topic type '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Double(f64),
    Int(i64),
    Float(f32),
    String(String),
    Raw(Vec<u8>),
    BooleanArray(Vec<bool>),
    DoubleArray(Vec<f64>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f32>),
    StringArray(Vec<String>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Double(_) => ValueType::Double,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Raw(_) => ValueType::Raw,
            Value::BooleanArray(_) => ValueType::BooleanArray,
            Value::DoubleArray(_) => ValueType::DoubleArray,
            Value::IntArray(_) => ValueType::IntArray,
            Value::FloatArray(_) => ValueType::FloatArray,
            Value::StringArray(_) => ValueType::StringArray,
        }
    }

    /// Apply the declared type to an untyped wire payload.
    ///
    /// Numbers are accepted across integer/float encodings when no precision
    /// is lost, since JSON peers do not distinguish `1` from `1.0`.
    pub fn from_wire(ty: ValueType, wire: WireValue) -> Result<Value, ShapeMismatch> {
        let mismatch = || ShapeMismatch { expected: ty };
        let value = match ty {
            ValueType::Boolean => Value::Boolean(wire.as_bool().ok_or_else(mismatch)?),
            ValueType::Double => Value::Double(wire.as_f64().ok_or_else(mismatch)?),
            ValueType::Int => Value::Int(wire.as_i64().ok_or_else(mismatch)?),
            ValueType::Float => Value::Float(wire.as_f64().ok_or_else(mismatch)? as f32),
            ValueType::String => Value::String(wire.into_string().ok_or_else(mismatch)?),
            ValueType::Raw => Value::Raw(wire.into_bytes().ok_or_else(mismatch)?),
            ValueType::BooleanArray => {
                Value::BooleanArray(wire.map_array(WireValue::as_bool).ok_or_else(mismatch)?)
            }
            ValueType::DoubleArray => {
                Value::DoubleArray(wire.map_array(WireValue::as_f64).ok_or_else(mismatch)?)
            }
            ValueType::IntArray => {
                Value::IntArray(wire.map_array(WireValue::as_i64).ok_or_else(mismatch)?)
            }
            ValueType::FloatArray => Value::FloatArray(
                wire.map_array(|w| w.as_f64().map(|f| f as f32))
                    .ok_or_else(mismatch)?,
            ),
            ValueType::StringArray => Value::StringArray(
                wire.map_array(|w| w.clone().into_string())
                    .ok_or_else(mismatch)?,
            ),
        };
        Ok(value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f32(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Raw(bytes) => serializer.serialize_bytes(bytes),
            Value::BooleanArray(items) => serialize_items(serializer, items),
            Value::DoubleArray(items) => serialize_items(serializer, items),
            Value::IntArray(items) => serialize_items(serializer, items),
            Value::FloatArray(items) => serialize_items(serializer, items),
            Value::StringArray(items) => serialize_items(serializer, items),
        }
    }
}

fn serialize_items<S: Serializer, T: Serialize>(
    serializer: S,
    items: &[T],
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(items.len()))?;
    for item in items {
        seq.serialize_element(item)?;
    }
    seq.end()
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("payload does not have the shape of a {expected} value")]
pub struct ShapeMismatch {
    pub expected: ValueType,
}

/// A payload as decoded from MessagePack or JSON, before typing.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<WireValue>),
}

impl WireValue {
    fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Float(f) => Some(*f),
            WireValue::Int(i) => Some(*i as f64),
            WireValue::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            WireValue::Int(i) => Some(*i),
            WireValue::UInt(u) => i64::try_from(*u).ok(),
            WireValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    fn into_string(self) -> Option<String> {
        match self {
            WireValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// JSON peers send raw payloads as arrays of byte values.
    fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            WireValue::Bytes(b) => Some(b),
            WireValue::Array(items) => items
                .iter()
                .map(|w| w.as_i64().and_then(|i| u8::try_from(i).ok()))
                .collect(),
            _ => None,
        }
    }

    fn map_array<T>(self, f: impl Fn(&WireValue) -> Option<T>) -> Option<Vec<T>> {
        match self {
            WireValue::Array(items) => items.iter().map(f).collect(),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for WireValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(WireValueVisitor)
    }
}

struct WireValueVisitor;

impl<'de> Visitor<'de> for WireValueVisitor {
    type Value = WireValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a boolean, number, string, byte string or array")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<WireValue, E> {
        Ok(WireValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<WireValue, E> {
        Ok(WireValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<WireValue, E> {
        Ok(WireValue::UInt(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<WireValue, E> {
        Ok(WireValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<WireValue, E> {
        Ok(WireValue::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<WireValue, E> {
        Ok(WireValue::Str(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<WireValue, E> {
        Ok(WireValue::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<WireValue, E> {
        Ok(WireValue::Bytes(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<WireValue, E> {
        Ok(WireValue::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<WireValue, E> {
        Ok(WireValue::Nil)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<WireValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(WireValue::Array(items))
    }
}
