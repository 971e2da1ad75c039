//! Argument and result values crossing the worker boundary.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A structured value passed to or returned from a worker handler.
///
/// The tree mirrors structured-clone semantics: plain data plus refcounted
/// binary buffers ([`Payload::Blob`]) that can be handed off to the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Payload {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 text.
    Text(Box<str>),
    /// Binary buffer; the handoff-capable leaf.
    Blob(Bytes),
    /// Ordered sequence.
    List(Vec<Payload>),
    /// String-keyed map.
    Map(BTreeMap<Box<str>, Payload>),
}

impl Payload {
    /// Build a text payload.
    pub fn text(value: impl AsRef<str>) -> Self {
        Self::Text(value.as_ref().into())
    }

    /// Build a blob payload.
    pub fn blob(value: impl Into<Bytes>) -> Self {
        Self::Blob(value.into())
    }

    /// Build a map payload from key/value pairs.
    pub fn map(entries: impl IntoIterator<Item = (&'static str, Self)>) -> Self {
        Self::Map(
            entries
                .into_iter()
                .map(|(key, value)| (Box::from(key), value))
                .collect(),
        )
    }

    /// Returns true for [`Payload::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the text content, when this is a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// The integer content, when this is an integer payload.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Borrow the blob content, when this is a blob payload.
    #[must_use]
    pub const fn as_blob(&self) -> Option<&Bytes> {
        match self {
            Self::Blob(value) => Some(value),
            _ => None,
        }
    }

    /// A short label for the payload variant, for logs and events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(value: Vec<Payload>) -> Self {
        Self::List(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_variants() {
        assert_eq!(Payload::from(7).as_int(), Some(7));
        assert_eq!(Payload::text("hi").as_text(), Some("hi"));
        assert!(Payload::Null.is_null());
        assert_eq!(Payload::blob(vec![1u8, 2]).kind(), "blob");
        assert_eq!(Payload::from(true).as_int(), None);
    }

    #[test]
    fn map_builder_orders_keys() {
        let payload = Payload::map([("b", Payload::from(2)), ("a", Payload::from(1))]);
        let Payload::Map(entries) = payload else {
            panic!("expected map");
        };
        let keys: Vec<&str> = entries.keys().map(AsRef::as_ref).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn payload_serializes_tagged() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(Payload::from(3))?;
        assert_eq!(value, serde_json::json!({ "int": 3 }));
        Ok(())
    }
}
