use serde::{Deserialize, Serialize};
use std::fmt;

use super::Value;

pub type RowId = u64;

pub type Row = Vec<Value>;

/// Storage type tag of a single property (or of a list's elements).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    Uuid,
    Data,
    Object,
}

impl PropertyType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Float, Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Timestamp, Value::Timestamp(_)) => true,
            (Self::Uuid, Value::Uuid(_)) => true,
            (Self::Data, Value::Data(_)) => true,
            (Self::Object, Value::Link(_)) => true,
            _ => false,
        }
    }

    /// Converts an already-compatible value into its stored representation.
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (Self::Float, Value::Integer(i)) => Value::Float(i as f64),
            (_, other) => other,
        }
    }

    /// Value a non-optional property holds when none was supplied.
    pub fn zero_value(&self) -> Value {
        match self {
            Self::Integer => Value::Integer(0),
            Self::Float => Value::Float(0.0),
            Self::Text => Value::Text(String::new()),
            Self::Boolean => Value::Boolean(false),
            Self::Data => Value::Data(Vec::new()),
            Self::Timestamp | Self::Uuid | Self::Object => Value::Null,
        }
    }

    pub fn is_indexable(&self) -> bool {
        matches!(
            self,
            Self::Integer | Self::Text | Self::Boolean | Self::Timestamp | Self::Uuid
        )
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "int"),
            Self::Float => write!(f, "double"),
            Self::Text => write!(f, "string"),
            Self::Boolean => write!(f, "bool"),
            Self::Timestamp => write!(f, "date"),
            Self::Uuid => write!(f, "uuid"),
            Self::Data => write!(f, "data"),
            Self::Object => write!(f, "object"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CollectionKind {
    #[default]
    None,
    List,
    /// Computed reverse links; never stored in a column.
    LinkingObjects,
}
