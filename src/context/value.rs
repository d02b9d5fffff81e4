//! Values exchanged between steps through the context

use super::queue::MessageQueue;

/// A value stored in the context
///
/// Covers the payload kinds steps actually hand to each other. Typed
/// accessors on [`super::Context`] fail with `TypeMismatch` when the stored
/// kind differs from the requested one.
#[derive(Debug, Clone)]
pub enum ContextValue {
    Text(String),
    Bytes(Vec<u8>),
    Integer(i64),
    Boolean(bool),
    Queue(MessageQueue),
}

impl ContextValue {
    /// Name of the stored kind, used in mismatch errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
            Self::Queue(_) => "queue",
        }
    }

    /// Byte representation for payload-like values
    ///
    /// Integers and booleans render as their decimal/textual form; queues
    /// have no payload.
    pub fn to_payload(&self) -> Option<Vec<u8>> {
        match self {
            Self::Text(s) => Some(s.as_bytes().to_vec()),
            Self::Bytes(b) => Some(b.clone()),
            Self::Integer(i) => Some(i.to_string().into_bytes()),
            Self::Boolean(b) => Some(b.to_string().into_bytes()),
            Self::Queue(_) => None,
        }
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for ContextValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<i64> for ContextValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for ContextValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<MessageQueue> for ContextValue {
    fn from(q: MessageQueue) -> Self {
        Self::Queue(q)
    }
}
