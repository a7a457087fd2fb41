//! Explicit column types for written layers.
//!
//! Type inference on write may widen integer columns, so writers take the
//! column types from configuration instead.

use serde::Deserialize;
use serde_json::{Number, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::models::AttrValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int32,
    Int64,
    Float,
    Text,
    Bool,
}

impl ColumnType {
    fn name(&self) -> &'static str {
        match self {
            ColumnType::Int32 => "int32",
            ColumnType::Int64 => "int64",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Bool => "bool",
        }
    }
}

/// Declared types per column; undeclared columns are written as they are
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ColumnSchema {
    columns: BTreeMap<String, ColumnType>,
}

impl ColumnSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.insert(column.into(), column_type);
        self
    }

    pub fn get(&self, column: &str) -> Option<ColumnType> {
        self.columns.get(column).copied()
    }

    /// Convert a value to JSON under the column's declared type
    pub fn to_json(&self, column: &str, value: &AttrValue) -> Result<Value> {
        let mismatch = |expected: ColumnType| Error::ColumnType {
            column: column.to_string(),
            value: format!("{:?}", value),
            expected: expected.name(),
        };

        let Some(column_type) = self.get(column) else {
            return Ok(plain_json(value));
        };
        if value.is_null() {
            return Ok(Value::Null);
        }

        match column_type {
            ColumnType::Int32 | ColumnType::Int64 => {
                let int = match value {
                    AttrValue::Int(i) => Some(*i),
                    AttrValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
                    AttrValue::Bool(b) => Some(i64::from(*b)),
                    _ => None,
                }
                .ok_or_else(|| mismatch(column_type))?;
                if column_type == ColumnType::Int32 && i32::try_from(int).is_err() {
                    return Err(mismatch(column_type));
                }
                Ok(Value::from(int))
            }
            ColumnType::Float => value
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| mismatch(column_type)),
            ColumnType::Text => Ok(Value::String(value.to_string())),
            ColumnType::Bool => match value {
                AttrValue::Bool(b) => Ok(Value::Bool(*b)),
                AttrValue::Int(0) => Ok(Value::Bool(false)),
                AttrValue::Int(1) => Ok(Value::Bool(true)),
                _ => Err(mismatch(column_type)),
            },
        }
    }
}

fn plain_json(value: &AttrValue) -> Value {
    match value {
        AttrValue::Null => Value::Null,
        AttrValue::Bool(b) => Value::Bool(*b),
        AttrValue::Int(i) => Value::from(*i),
        AttrValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        AttrValue::Text(s) => Value::String(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_keeps_integers_narrow() {
        let schema = ColumnSchema::new().with("lines", ColumnType::Int32);
        assert_eq!(schema.to_json("lines", &AttrValue::Float(3.0)).unwrap(), Value::from(3));
        assert!(schema.to_json("lines", &AttrValue::Int(i64::MAX)).is_err());
        assert!(schema.to_json("lines", &AttrValue::Float(2.5)).is_err());
    }

    #[test]
    fn test_undeclared_columns_pass_through() {
        let schema = ColumnSchema::new();
        assert_eq!(
            schema.to_json("name", &AttrValue::from("x")).unwrap(),
            Value::String("x".into())
        );
    }

    #[test]
    fn test_deserialize_from_toml() {
        let schema: ColumnSchema = toml::from_str("lines = \"int32\"\nvolume = \"int64\"").unwrap();
        assert_eq!(schema.get("lines"), Some(ColumnType::Int32));
        assert_eq!(schema.get("volume"), Some(ColumnType::Int64));
    }
}
