//! Bin values and records as the store returns them.

use std::collections::HashMap;

use bytes::Bytes;

/// A value held in one bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
    Blob(Bytes),
    List(Vec<Value>),
}

impl Value {
    /// Approximate encoded size, used for the record size ceiling.
    pub fn size(&self) -> usize {
        match self {
            Value::Int(_) => 8,
            Value::Str(s) => s.len(),
            Value::Blob(b) => b.len(),
            Value::List(items) => items.iter().map(|v| v.size() + 1).sum(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
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

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Blob(b)
    }
}

/// A named value to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    pub name: String,
    pub value: Value,
}

impl Bin {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Record metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub generation: u32,
    /// Remaining lifetime in seconds; `None` when the record never expires
    pub ttl: Option<u32>,
}

/// A record read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub bins: HashMap<String, Value>,
    pub generation: u32,
    pub ttl: Option<u32>,
}

impl Record {
    pub fn bin(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }

    pub fn header(&self) -> RecordHeader {
        RecordHeader {
            generation: self.generation,
            ttl: self.ttl,
        }
    }
}
