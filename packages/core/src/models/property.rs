//! Property Values
//!
//! Typed property payloads carried by every node:
//!
//! - **Scalars**: string, long, double, boolean, datetime, binary reference
//! - **Arrays**: homogeneous lists of scalars (collection properties)
//!
//! Values are plain data with deep `Clone` semantics: copying a node deep-clones
//! its property values, so a copy never aliases the source arrays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content handle for binary property values.
///
/// Resolved against the external binary store; independent of node lifecycle
/// except that removing the last reference makes the content collectible by
/// the binary garbage collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryRef {
    /// Hex-encoded content digest (sha-256).
    pub digest: String,
    /// Content length in bytes.
    pub length: u64,
}

impl fmt::Display for BinaryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} bytes)", self.digest, self.length)
    }
}

/// A single typed scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum ScalarValue {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Binary(BinaryRef),
}

impl ScalarValue {
    /// Kind name used in error messages and schema checks.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ScalarValue::String(_) => "string",
            ScalarValue::Long(_) => "long",
            ScalarValue::Double(_) => "double",
            ScalarValue::Boolean(_) => "boolean",
            ScalarValue::DateTime(_) => "datetime",
            ScalarValue::Binary(_) => "binary",
        }
    }
}

/// A property value: either a single scalar or an ordered array of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Scalar(ScalarValue),
    Array(Vec<ScalarValue>),
}

impl PropertyValue {
    /// Convenience constructor for string scalars.
    pub fn string(value: impl Into<String>) -> Self {
        PropertyValue::Scalar(ScalarValue::String(value.into()))
    }

    /// Convenience constructor for long scalars.
    pub fn long(value: i64) -> Self {
        PropertyValue::Scalar(ScalarValue::Long(value))
    }

    /// Convenience constructor for boolean scalars.
    pub fn boolean(value: bool) -> Self {
        PropertyValue::Scalar(ScalarValue::Boolean(value))
    }

    /// Convenience constructor for datetime scalars.
    pub fn datetime(value: DateTime<Utc>) -> Self {
        PropertyValue::Scalar(ScalarValue::DateTime(value))
    }

    /// Convenience constructor for binary references.
    pub fn binary(digest: impl Into<String>, length: u64) -> Self {
        PropertyValue::Scalar(ScalarValue::Binary(BinaryRef {
            digest: digest.into(),
            length,
        }))
    }

    /// Convenience constructor for string arrays.
    pub fn strings<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropertyValue::Array(
            values
                .into_iter()
                .map(|s| ScalarValue::String(s.into()))
                .collect(),
        )
    }

    /// Whether this value is an array (collection property).
    pub fn is_array(&self) -> bool {
        matches!(self, PropertyValue::Array(_))
    }

    /// Returns the string payload for string scalars, `None` otherwise.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Scalar(ScalarValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the long payload for long scalars, `None` otherwise.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            PropertyValue::Scalar(ScalarValue::Long(n)) => Some(*n),
            _ => None,
        }
    }

    /// Returns the array elements for collection values, `None` otherwise.
    pub fn as_array(&self) -> Option<&[ScalarValue]> {
        match self {
            PropertyValue::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Returns the binary reference for binary scalars, `None` otherwise.
    pub fn as_binary(&self) -> Option<&BinaryRef> {
        match self {
            PropertyValue::Scalar(ScalarValue::Binary(b)) => Some(b),
            _ => None,
        }
    }

    /// Iterates the binary references held by this value, scalars and arrays alike.
    pub fn binary_refs(&self) -> impl Iterator<Item = &BinaryRef> {
        let scalars: Vec<&ScalarValue> = match self {
            PropertyValue::Scalar(s) => vec![s],
            PropertyValue::Array(items) => items.iter().collect(),
        };
        scalars.into_iter().filter_map(|s| match s {
            ScalarValue::Binary(b) => Some(b),
            _ => None,
        })
    }
}
