//! 📦 Records: the things the host hands us, and the one JSON line each becomes.
//!
//! A [`Record`] is a nested map of string keys to [`Value`]s. Keys live in a
//! `BTreeMap`, so the encoded line always comes out in the same order. Same record
//! in, same bytes out. Redelivery by the host produces an identical line, which is
//! the only kind of idempotency an at-least-once sink can promise.
//!
//! 🧠 Knowledge graph:
//! - `Value::Bytes` is written as a UTF-8 string, never base64. Log lines are text
//!   that happened to arrive as bytes.
//! - Non-finite floats are an encoding error. JSON has no spelling for NaN and
//!   `serde_json` would quietly write `null`, which is lossy.
//! - `From<serde_json::Value>` exists so the CLI can feed NDJSON straight in.
//!
//! 🦆

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// 🎭 One value inside a record. Scalars, bytes, lists, and more records all the way down.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    /// 📡 raw bytes from the host, written out as (lossy) UTF-8 text
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(Record),
}

/// 📦 An immutable-once-received, arbitrarily nested log record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a field, handing back whatever was there before.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Builder flavor of [`Record::insert`], for when you're assembling fixtures and feeling fluent.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// 🚀 Encode one record into one JSON line (no trailing newline; the batch adds those).
///
/// Deterministic: keys are sorted. Lossless: anything JSON can't spell is an error,
/// not a silent `null`.
pub fn encode(record: &Record) -> Result<Vec<u8>> {
    serde_json::to_vec(record).context(
        "💀 The record refused to become JSON. Somewhere inside it is a value JSON has no word for.",
    )
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::UInt(u) => serializer.serialize_u64(*u),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(f) => Err(S::Error::custom(format!(
                "non-finite float {f} cannot be encoded without loss"
            ))),
            Value::String(s) => serializer.serialize_str(s),
            // -- 📡 bytes are text in disguise. take off the mask. no base64 here.
            Value::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(record) => record.serialize(serializer),
        }
    }
}

// ===== Conversions =====

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
        Value::Int(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
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

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Map(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                // -- 🔢 i64 first, then u64 for the big ones, then float for everything with a dot
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(map.into_iter().collect()),
        }
    }
}

impl TryFrom<serde_json::Value> for Record {
    type Error = anyhow::Error;

    fn try_from(v: serde_json::Value) -> Result<Self> {
        match v {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            other => anyhow::bail!(
                "💀 A record must be a JSON object with string keys. We got this instead: {}",
                other
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_keys_come_out_sorted_every_single_time() -> Result<()> {
        let record = Record::new()
            .with("zebra", 1)
            .with("apple", "red")
            .with("mango", true);
        let line = encode(&record)?;
        assert_eq!(line, br#"{"apple":"red","mango":true,"zebra":1}"#.to_vec());
        // 🧪 same input, same bytes. redelivery is boring, as it should be.
        assert_eq!(encode(&record)?, line);
        Ok(())
    }

    #[test]
    fn the_one_where_bytes_stay_text_and_skip_base64() -> Result<()> {
        let record = Record::new().with("log", b"GET /health 200".to_vec());
        let line = encode(&record)?;
        assert_eq!(line, br#"{"log":"GET /health 200"}"#.to_vec());
        Ok(())
    }

    #[test]
    fn the_one_where_nesting_survives_the_trip() -> Result<()> {
        let inner = Record::new().with("pod", "api-7").with("restarts", 0u64);
        let record = Record::new()
            .with("kubernetes", inner)
            .with("tags", vec![Value::from("a"), Value::from(2), Value::Null]);
        let line = encode(&record)?;
        let parsed: serde_json::Value = serde_json::from_slice(&line)?;
        assert_eq!(parsed["kubernetes"]["pod"], "api-7");
        assert_eq!(parsed["kubernetes"]["restarts"], 0);
        assert_eq!(parsed["tags"][1], 2);
        assert!(parsed["tags"][2].is_null());
        Ok(())
    }

    #[test]
    fn the_one_where_nan_is_not_welcome() {
        let record = Record::new().with("latency", f64::NAN);
        assert!(encode(&record).is_err(), "NaN should not sneak out as null");

        let deep = Record::new().with("outer", Record::new().with("inner", f64::INFINITY));
        assert!(encode(&deep).is_err());
    }

    #[test]
    fn the_one_where_json_objects_become_records() -> Result<()> {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"b":18446744073709551615,"a":-3,"c":1.5,"d":{"e":[1]}}"#)?;
        let record = Record::try_from(json)?;
        assert_eq!(record.get("a"), Some(&Value::Int(-3)));
        assert_eq!(record.get("b"), Some(&Value::UInt(u64::MAX)));
        assert_eq!(record.get("c"), Some(&Value::Float(1.5)));
        assert_eq!(record.len(), 4);
        assert_eq!(
            encode(&record)?,
            br#"{"a":-3,"b":18446744073709551615,"c":1.5,"d":{"e":[1]}}"#.to_vec()
        );
        Ok(())
    }

    #[test]
    fn the_one_where_fields_are_walked_in_key_order() -> Result<()> {
        let mut record = Record::new();
        assert!(record.is_empty());
        assert_eq!(encode(&record)?, b"{}".to_vec());

        record.insert("level", "warn");
        let previous = record.insert("level", "error");
        record.insert("code", 500u64);
        assert_eq!(previous, Some(Value::from("warn")));
        assert!(!record.is_empty());

        let fields: Vec<(&str, &Value)> = record.iter().map(|(k, v)| (k.as_str(), v)).collect();
        assert_eq!(
            fields,
            vec![("code", &Value::UInt(500)), ("level", &Value::from("error"))]
        );
        Ok(())
    }

    #[test]
    fn the_one_where_a_json_array_is_not_a_record() {
        let json = serde_json::json!([1, 2, 3]);
        assert!(Record::try_from(json).is_err());
    }
}
