//! Typed property values shared by connection properties and broker
//! message headers.

use bytes::Bytes;
use derive_more::{Display, From};

/// A scalar property value.
///
/// Only the shapes the bridge itself reads or writes are modelled; message
/// transformers are free to carry richer application properties inside the
/// message body.
#[derive(Clone, Debug, PartialEq, Eq, Display, From)]
pub enum PropertyValue {
    /// A boolean flag.
    #[display("{_0}")]
    Bool(bool),
    /// A signed integer.
    #[display("{_0}")]
    Int(i64),
    /// A UTF-8 string.
    #[display("{_0}")]
    String(String),
    /// Opaque binary data.
    #[display("<{} bytes>", _0.len())]
    Binary(Bytes),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self { Self::String(value.to_owned()) }
}

impl PropertyValue {
    /// Return the integer payload, if this is an [`PropertyValue::Int`].
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}
