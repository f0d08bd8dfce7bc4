//! Event type handed to the bulk publisher.
//!
//! Events are immutable for the duration of a publish attempt. The client
//! derives its own encoded representation and never writes back into the
//! caller's event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::DocshipError;

/// Bulk operation requested for an event.
///
/// The set is fixed by the bulk wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    /// Index the document, replacing any existing document with the same id
    Index,
    /// Create the document, failing with a conflict if the id already exists
    Create,
    /// Delete the document with the given id
    Delete,
}

impl OpType {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Index => "index",
            OpType::Create => "create",
            OpType::Delete => "delete",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpType {
    type Err = DocshipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(OpType::Index),
            "create" => Ok(OpType::Create),
            "delete" => Ok(OpType::Delete),
            other => Err(DocshipError::InvalidInput(format!(
                "unknown op_type: {other}"
            ))),
        }
    }
}

/// Per-event routing metadata.
///
/// All fields are optional; unset fields fall back to the client's
/// configured selectors and defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Custom target index, overriding the index selector
    #[serde(default)]
    pub index: Option<String>,

    /// Ingest pipeline, overriding the pipeline selector
    #[serde(default)]
    pub pipeline: Option<String>,

    /// Document id (`_id`)
    #[serde(default)]
    pub id: Option<String>,

    /// Requested bulk operation
    #[serde(default)]
    pub op_type: Option<OpType>,
}

/// A structured event to be indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event timestamp, written as `@timestamp` in the document
    pub timestamp: DateTime<Utc>,

    /// Document fields
    #[serde(default)]
    pub fields: Map<String, Value>,

    /// Routing metadata
    #[serde(default)]
    pub meta: EventMeta,
}

impl Event {
    /// Create an event with the given fields, stamped with the current time.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            fields,
            meta: EventMeta::default(),
        }
    }

    /// Create an event from a JSON value, which must be an object.
    pub fn from_json(value: Value) -> Result<Self, DocshipError> {
        match value {
            Value::Object(fields) => Ok(Self::new(fields)),
            other => Err(DocshipError::InvalidInput(format!(
                "event fields must be a JSON object, got {other}"
            ))),
        }
    }

    /// Set the event timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replace the routing metadata.
    pub fn with_meta(mut self, meta: EventMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Set the document id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.meta.id = Some(id.into());
        self
    }

    /// Set the requested bulk operation.
    pub fn with_op_type(mut self, op_type: OpType) -> Self {
        self.meta.op_type = Some(op_type);
        self
    }

    /// Set a custom target index.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.meta.index = Some(index.into());
        self
    }

    /// Set the ingest pipeline.
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.meta.pipeline = Some(pipeline.into());
        self
    }

    /// Look up a top-level string field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}
