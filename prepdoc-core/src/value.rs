//! Typed parameter values and the binding registry.
//!
//! A [`Bindings`] registry maps placeholder names to [`TypedValue`]s. Names are
//! matched against template keys during compilation, so the registry itself is
//! a flat map: nesting in the template plays no part in name resolution.

use bson::{Bson, DateTime as BsonDateTime};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, hash_map};

use crate::fields::FILTER_OPERATOR;

/// A value bound to a named placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// UTF-8 string.
    Str(String),
    /// Boolean.
    Bool(bool),
    /// UTC timestamp, stored as a BSON date.
    Date(DateTime<Utc>),
}

impl TypedValue {
    /// Converts this value into its BSON representation.
    pub fn to_bson(&self) -> Bson {
        match self {
            TypedValue::Int32(value) => Bson::Int32(*value),
            TypedValue::Int64(value) => Bson::Int64(*value),
            TypedValue::Str(value) => Bson::String(value.clone()),
            TypedValue::Bool(value) => Bson::Boolean(*value),
            TypedValue::Date(value) => {
                Bson::DateTime(BsonDateTime::from_millis(value.timestamp_millis()))
            }
        }
    }

    /// Reads this value as a pipeline limit.
    ///
    /// Integers are taken as-is and strings are parsed; anything else yields `None`.
    pub fn as_limit(&self) -> Option<i64> {
        match self {
            TypedValue::Int32(value) => Some(i64::from(*value)),
            TypedValue::Int64(value) => Some(*value),
            TypedValue::Str(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns `true` when this value is the wildcard sentinel.
    pub fn is_filter_operator(&self) -> bool {
        matches!(self, TypedValue::Str(value) if value == FILTER_OPERATOR)
    }
}

impl From<i32> for TypedValue {
    fn from(value: i32) -> Self {
        TypedValue::Int32(value)
    }
}

impl From<i64> for TypedValue {
    fn from(value: i64) -> Self {
        TypedValue::Int64(value)
    }
}

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        TypedValue::Str(value)
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        TypedValue::Str(value.to_string())
    }
}

impl From<bool> for TypedValue {
    fn from(value: bool) -> Self {
        TypedValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for TypedValue {
    fn from(value: DateTime<Utc>) -> Self {
        TypedValue::Date(value)
    }
}

impl From<TypedValue> for Bson {
    fn from(value: TypedValue) -> Self {
        value.to_bson()
    }
}

/// Flat name → value registry. Last write wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: HashMap<String, TypedValue>,
}

impl Bindings {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` under `name`, returning the value it replaced.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<TypedValue>) -> Option<TypedValue> {
        self.values.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Number of distinct bound names.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, TypedValue> {
        self.values.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Bindings
where
    K: Into<String>,
    V: Into<TypedValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}
