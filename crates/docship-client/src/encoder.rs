//! Event encoding for the bulk wire format.
//!
//! Turns one [`Event`] into an [`EncodedEvent`]: the rendered action line,
//! the document body and the routing decisions behind them. Encoding never
//! touches the source event.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::Serializer;
use serde_json::{json, Map, Value};

use docship_types::{Event, OpType};

use crate::error::{ClientError, EncodeError};
use crate::selector::Selector;

/// Maximum index name length in bytes accepted by the indexing service.
const MAX_INDEX_NAME_BYTES: usize = 255;

/// Document type written into action metadata for pre-7.0 servers.
const LEGACY_DOC_TYPE: &str = "doc";

/// Major/minor version of the indexing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Whether `create` is accepted without an explicit `_id`.
    pub fn supports_create_without_id(&self) -> bool {
        *self >= ServerVersion::new(7, 5)
    }

    /// Document type required in action metadata, if any.
    pub fn doc_type(&self) -> Option<&'static str> {
        (self.major < 7).then_some(LEGACY_DOC_TYPE)
    }
}

impl Default for ServerVersion {
    fn default() -> Self {
        ServerVersion::new(8, 0)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ServerVersion {
    type Err = ClientError;

    /// Parses `8`, `7.17` or `7.17.3` (patch and suffixes are ignored).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::InvalidVersion(s.to_string());
        let core = s.trim().split(['-', '+']).next().unwrap_or_default();
        let mut parts = core.split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(ServerVersion::new(major, minor))
    }
}

/// An event prepared for one bulk request.
///
/// Owned exclusively by the publish attempt that produced it. A dead-letter
/// rewrite replaces fields wholesale, so the action line and document always
/// describe the same target.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEvent {
    index: String,
    pipeline: Option<String>,
    id: Option<String>,
    op_type: OpType,
    doc_type: Option<&'static str>,
    /// Op used when the document is redirected to the dead-letter index
    dead_letter_op: OpType,
    timestamp: DateTime<Utc>,
    document: Vec<u8>,
    action: Vec<u8>,
    dead_letter: bool,
}

impl EncodedEvent {
    /// Target index.
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Ingest pipeline, if any.
    pub fn pipeline(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }

    /// Document id, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Resolved bulk operation.
    pub fn op_type(&self) -> OpType {
        self.op_type
    }

    /// Serialized document body.
    pub fn document(&self) -> &[u8] {
        &self.document
    }

    /// Serialized action/metadata line.
    pub fn action(&self) -> &[u8] {
        &self.action
    }

    /// Whether this event now targets the dead-letter index.
    pub fn is_dead_letter(&self) -> bool {
        self.dead_letter
    }

    /// Whether a document line follows the action line on the wire.
    pub fn has_document(&self) -> bool {
        self.op_type != OpType::Delete
    }

    /// Redirect this event to the dead-letter index.
    ///
    /// The document is replaced by an error record carrying the original
    /// body as `message`, plus `error.type` and `error.message`. The ingest
    /// pipeline and id are dropped. Cannot fail.
    pub fn set_dead_letter(&mut self, index: &str, error_type: u16, error_message: &str) {
        let body = json!({
            "@timestamp": format_timestamp(&self.timestamp),
            "message": String::from_utf8_lossy(&self.document),
            "error.type": error_type,
            "error.message": error_message,
        });

        self.document = body.to_string().into_bytes();
        self.index = index.to_string();
        self.pipeline = None;
        self.id = None;
        self.op_type = self.dead_letter_op;
        self.action = render_action(
            self.op_type,
            &self.index,
            self.doc_type,
            None,
            None,
        );
        self.dead_letter = true;
    }
}

/// Encodes events using configured index and pipeline selectors.
pub struct EventEncoder {
    index_selector: Arc<dyn Selector>,
    pipeline_selector: Option<Arc<dyn Selector>>,
    version: ServerVersion,
}

impl EventEncoder {
    /// Create an encoder targeting servers of the given version.
    pub fn new(index_selector: Arc<dyn Selector>, version: ServerVersion) -> Self {
        Self {
            index_selector,
            pipeline_selector: None,
            version,
        }
    }

    /// Route events through the pipeline chosen by `selector`.
    pub fn with_pipeline_selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.pipeline_selector = Some(selector);
        self
    }

    /// Server version used for action selection.
    pub fn version(&self) -> ServerVersion {
        self.version
    }

    /// Encode one event.
    pub fn encode(&self, event: &Event) -> Result<EncodedEvent, EncodeError> {
        let pipeline = self.select_pipeline(event)?;
        let index = self.select_index(event)?;
        validate_index_name(&index)?;

        let id = non_empty(event.meta.id.as_deref());
        let op_type = self.resolve_op_type(event.meta.op_type, id)?;
        let doc_type = self.version.doc_type();
        let dead_letter_op = self.resolve_op_type(None, None)?;

        let document = if op_type == OpType::Delete {
            Vec::new()
        } else {
            encode_document(event)?
        };
        let action = render_action(op_type, &index, doc_type, pipeline.as_deref(), id);

        Ok(EncodedEvent {
            index,
            pipeline,
            id: id.map(str::to_string),
            op_type,
            doc_type,
            dead_letter_op,
            timestamp: event.timestamp,
            document,
            action,
            dead_letter: false,
        })
    }

    fn select_index(&self, event: &Event) -> Result<String, EncodeError> {
        if let Some(index) = non_empty(event.meta.index.as_deref()) {
            return Ok(index.to_string());
        }
        self.index_selector
            .select(event)
            .map_err(EncodeError::IndexSelection)?
            .filter(|name| !name.is_empty())
            .ok_or(EncodeError::MissingIndex)
    }

    fn select_pipeline(&self, event: &Event) -> Result<Option<String>, EncodeError> {
        if let Some(pipeline) = non_empty(event.meta.pipeline.as_deref()) {
            return Ok(Some(pipeline.to_string()));
        }
        match &self.pipeline_selector {
            Some(selector) => Ok(selector
                .select(event)
                .map_err(EncodeError::PipelineSelection)?
                .filter(|name| !name.is_empty())),
            None => Ok(None),
        }
    }

    /// Pick the bulk action for an event.
    ///
    /// `create` is the default wherever the server can accept it, so that
    /// re-sent documents with ids surface as conflicts rather than
    /// overwriting.
    fn resolve_op_type(
        &self,
        requested: Option<OpType>,
        id: Option<&str>,
    ) -> Result<OpType, EncodeError> {
        match requested {
            Some(OpType::Delete) => id.map(|_| OpType::Delete).ok_or(EncodeError::DeleteWithoutId),
            Some(OpType::Index) => Ok(OpType::Index),
            _ if id.is_some() || self.version.supports_create_without_id() => Ok(OpType::Create),
            _ => Ok(OpType::Index),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Serialize `@timestamp` followed by the event fields.
fn encode_document(event: &Event) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::new(&mut buf);
    let mut map = serializer.serialize_map(None)?;
    map.serialize_entry("@timestamp", &format_timestamp(&event.timestamp))?;
    for (key, value) in &event.fields {
        if key == "@timestamp" {
            continue;
        }
        map.serialize_entry(key, value)?;
    }
    map.end()?;
    Ok(buf)
}

fn render_action(
    op_type: OpType,
    index: &str,
    doc_type: Option<&str>,
    pipeline: Option<&str>,
    id: Option<&str>,
) -> Vec<u8> {
    let mut meta = Map::new();
    meta.insert("_index".to_string(), Value::from(index));
    if let Some(doc_type) = doc_type {
        meta.insert("_type".to_string(), Value::from(doc_type));
    }
    if let Some(pipeline) = pipeline {
        meta.insert("pipeline".to_string(), Value::from(pipeline));
    }
    if let Some(id) = id {
        meta.insert("_id".to_string(), Value::from(id));
    }

    let mut action = Map::new();
    action.insert(op_type.as_str().to_string(), Value::Object(meta));
    Value::Object(action).to_string().into_bytes()
}

/// Check an index name against the service's naming rules.
pub fn validate_index_name(name: &str) -> Result<(), EncodeError> {
    let invalid = |reason: &str| EncodeError::InvalidIndexName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name == "." || name == ".." {
        return Err(invalid("must not be . or .."));
    }
    if name.len() > MAX_INDEX_NAME_BYTES {
        return Err(invalid("longer than 255 bytes"));
    }
    if name.starts_with(['-', '_', '+']) {
        return Err(invalid("must not start with -, _ or +"));
    }
    if name.chars().any(char::is_uppercase) {
        return Err(invalid("must be lowercase"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| matches!(c, '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | ',' | '#' | ':' | ' '))
    {
        return Err(invalid(&format!("contains forbidden character {c:?}")));
    }
    Ok(())
}
