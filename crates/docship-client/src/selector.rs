//! Index and pipeline selection.
//!
//! Name templating lives outside this crate; the encoder only needs
//! something that maps an event to an optional name.

use docship_types::Event;

use crate::error::SelectError;

/// Maps an event to a target name (index or ingest pipeline).
pub trait Selector: Send + Sync {
    /// Select a name for the event.
    ///
    /// `Ok(None)` means the selector has no opinion for this event.
    fn select(&self, event: &Event) -> Result<Option<String>, SelectError>;
}

/// Always selects the same name.
#[derive(Debug, Clone)]
pub struct ConstSelector {
    name: String,
}

impl ConstSelector {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Selector for ConstSelector {
    fn select(&self, _event: &Event) -> Result<Option<String>, SelectError> {
        Ok(Some(self.name.clone()))
    }
}

/// Selects the value of a top-level string field.
///
/// Falls back to `fallback` when the field is absent. A present field
/// that is not a string is an error.
#[derive(Debug, Clone)]
pub struct FieldSelector {
    field: String,
    fallback: Option<String>,
}

impl FieldSelector {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            fallback: None,
        }
    }

    /// Use `name` when the event lacks the field.
    pub fn with_fallback(mut self, name: impl Into<String>) -> Self {
        self.fallback = Some(name.into());
        self
    }
}

impl Selector for FieldSelector {
    fn select(&self, event: &Event) -> Result<Option<String>, SelectError> {
        match event.fields.get(&self.field) {
            Some(value) => value
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| SelectError::NotAString {
                    field: self.field.clone(),
                    value: value.clone(),
                }),
            None => Ok(self.fallback.clone()),
        }
    }
}
