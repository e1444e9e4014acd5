//! CBOR helpers on top of cbor4ii
//!
//! Requests are decoded once into a generic [`Value`] tree. Handlers then pull
//! typed parameters out of it through [`MapParser`] and the `as_*` accessors,
//! which translate shape mismatches into CTAP status codes. Responses are
//! assembled with [`MapBuilder`], which emits integer keys in CTAP2 canonical
//! order.

use crate::status::{Result, StatusCode};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type Value = cbor4ii::core::Value;

/// Encode a value to CBOR bytes
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    cbor4ii::serde::to_writer(&mut buffer, value).map_err(|err| {
        tracing::error!(error = %err, "CBOR encoding failed");
        StatusCode::Other
    })?;
    Ok(buffer)
}

/// Decode CBOR bytes
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    cbor4ii::serde::from_slice(data).map_err(|_| StatusCode::InvalidCbor)
}

pub fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub fn bytes(value: impl Into<Vec<u8>>) -> Value {
    Value::Bytes(value.into())
}

pub fn int(value: i64) -> Value {
    Value::Integer(value.into())
}

pub fn as_bytes(value: &Value) -> Result<&[u8]> {
    match value {
        Value::Bytes(b) => Ok(b),
        _ => Err(StatusCode::CborUnexpectedType),
    }
}

pub fn as_text(value: &Value) -> Result<&str> {
    match value {
        Value::Text(s) => Ok(s),
        _ => Err(StatusCode::CborUnexpectedType),
    }
}

pub fn as_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        _ => Err(StatusCode::CborUnexpectedType),
    }
}

pub fn as_int(value: &Value) -> Result<i64> {
    match value {
        Value::Integer(i) => i64::try_from(*i).map_err(|_| StatusCode::CborUnexpectedType),
        _ => Err(StatusCode::CborUnexpectedType),
    }
}

pub fn as_array(value: &Value) -> Result<&[Value]> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(StatusCode::CborUnexpectedType),
    }
}

pub fn as_map(value: &Value) -> Result<&[(Value, Value)]> {
    match value {
        Value::Map(entries) => Ok(entries),
        _ => Err(StatusCode::CborUnexpectedType),
    }
}

/// Look up a text key in a decoded map
pub fn text_map_get<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries.iter().find_map(|(k, v)| match k {
        Value::Text(name) if name == key => Some(v),
        _ => None,
    })
}

/// Build a text-keyed map in canonical order (shorter keys first, then bytewise)
pub fn canonical_text_map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
    let mut entries: Vec<(String, Value)> =
        entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
    entries.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    Value::Map(entries.into_iter().map(|(k, v)| (Value::Text(k), v)).collect())
}

/// i32 ordered the way CBOR canonical encoding sorts integer keys
///
/// Unsigned major type 0 encodes before negative major type 1, and within the
/// negative range -1 encodes smallest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CborOrderedI32(i32);

impl PartialOrd for CborOrderedI32 {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CborOrderedI32 {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        use core::cmp::Ordering;

        match (self.0 >= 0, other.0 >= 0) {
            (true, true) => self.0.cmp(&other.0),
            (false, false) => other.0.cmp(&self.0),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
        }
    }
}

/// Build a CBOR map with integer keys
#[derive(Debug, Default)]
pub struct MapBuilder {
    entries: BTreeMap<CborOrderedI32, Value>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: i32, value: Value) -> Self {
        self.entries.insert(CborOrderedI32(key), value);
        self
    }

    /// Insert only if `value` is `Some`
    pub fn insert_opt(self, key: i32, value: Option<Value>) -> Self {
        match value {
            Some(v) => self.insert(key, v),
            None => self,
        }
    }

    pub fn insert_bytes(self, key: i32, data: &[u8]) -> Self {
        self.insert(key, bytes(data))
    }

    pub fn insert_text(self, key: i32, value: &str) -> Self {
        self.insert(key, text(value))
    }

    /// Insert a serde value, going through its CBOR encoding
    pub fn insert_serialized<T: Serialize>(self, key: i32, value: &T) -> Result<Self> {
        let value: Value = decode(&encode(value)?)?;
        Ok(self.insert(key, value))
    }

    pub fn build_value(self) -> Value {
        Value::Map(
            self.entries
                .into_iter()
                .map(|(key, value)| (int(key.0.into()), value))
                .collect(),
        )
    }

    pub fn build(self) -> Result<Vec<u8>> {
        encode(&self.build_value())
    }
}

/// Integer-keyed request map
///
/// CTAP2 parameters are numbered; this keeps the decoded values addressable by
/// number and maps absence to `MissingParameter`.
#[derive(Debug)]
pub struct MapParser {
    map: BTreeMap<i32, Value>,
}

impl MapParser {
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Map(entries) = value else {
            return Err(StatusCode::CborUnexpectedType);
        };

        let mut map = BTreeMap::new();
        for (key, value) in entries {
            let key = i32::try_from(as_int(&key)?).map_err(|_| StatusCode::CborUnexpectedType)?;
            map.insert(key, value);
        }
        Ok(Self { map })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_value(decode(data)?)
    }

    pub fn get(&self, key: i32) -> Result<&Value> {
        self.map.get(&key).ok_or(StatusCode::MissingParameter)
    }

    pub fn get_opt(&self, key: i32) -> Option<&Value> {
        self.map.get(&key)
    }

    pub fn contains_key(&self, key: i32) -> bool {
        self.map.contains_key(&key)
    }

    pub fn bytes(&self, key: i32) -> Result<&[u8]> {
        as_bytes(self.get(key)?)
    }

    pub fn text(&self, key: i32) -> Result<&str> {
        as_text(self.get(key)?)
    }

    pub fn int(&self, key: i32) -> Result<i64> {
        as_int(self.get(key)?)
    }

    pub fn array_opt(&self, key: i32) -> Result<Option<&[Value]>> {
        self.get_opt(key).map(as_array).transpose()
    }

    pub fn map_opt(&self, key: i32) -> Result<Option<&[(Value, Value)]>> {
        self.get_opt(key).map(as_map).transpose()
    }
}
