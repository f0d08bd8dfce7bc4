//! Bulk response interpretation.
//!
//! Maps the per-item results of one bulk exchange back onto the events
//! that were sent, positionally, and decides which of them to retry.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use docship_types::StatusClass;

use crate::batch::PublishEvent;
use crate::metrics::PublishObserver;
use crate::status::StatusPolicy;
use crate::transport::TransportResponse;

/// HTTP status signalling the whole request body was too large.
pub const STATUS_ENTITY_TOO_LARGE: u16 = 413;

/// Per-call outcome counts.
///
/// `too_many` is a subset of `fails`; every other field is disjoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkResultStats {
    pub acked: usize,
    pub duplicates: usize,
    pub fails: usize,
    pub non_indexable: usize,
    pub dead_letter: usize,
    pub too_many: usize,
}

impl BulkResultStats {
    /// Events accounted for.
    pub fn total(&self) -> usize {
        self.acked + self.duplicates + self.fails + self.non_indexable + self.dead_letter
    }

    pub fn merge(&mut self, other: BulkResultStats) {
        self.acked += other.acked;
        self.duplicates += other.duplicates;
        self.fails += other.fails;
        self.non_indexable += other.non_indexable;
        self.dead_letter += other.dead_letter;
        self.too_many += other.too_many;
    }

    /// Push the counts to an observer.
    pub fn report(&self, observer: &dyn PublishObserver) {
        observer.acked(self.acked);
        observer.duplicates(self.duplicates);
        observer.failed(self.fails);
        observer.dropped(self.non_indexable);
        observer.dead_letter(self.dead_letter);
        observer.too_many(self.too_many);
    }
}

/// What to do after one bulk exchange.
#[derive(Debug, Default)]
pub struct Interpretation {
    /// Events to hand back to the batch for another attempt
    pub retry: Vec<PublishEvent>,
    pub stats: BulkResultStats,
    /// The server rejected the whole request as too large
    pub entity_too_large: bool,
}

#[derive(Debug, Deserialize)]
struct BulkResponseBody {
    #[serde(default)]
    errors: Option<bool>,
    #[serde(default)]
    items: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    error: Option<Value>,
}

/// Interprets bulk responses using a status policy.
#[derive(Debug, Clone, Default)]
pub struct ResponseInterpreter {
    policy: StatusPolicy,
    dead_letter_index: Option<String>,
}

impl ResponseInterpreter {
    pub fn new(policy: StatusPolicy, dead_letter_index: Option<String>) -> Self {
        Self {
            policy,
            dead_letter_index: dead_letter_index.filter(|index| !index.is_empty()),
        }
    }

    pub fn dead_letter_index(&self) -> Option<&str> {
        self.dead_letter_index.as_deref()
    }

    /// Classify every event in `events`, which must be in the order sent.
    pub fn interpret(
        &self,
        events: Vec<PublishEvent>,
        response: &TransportResponse,
    ) -> Interpretation {
        if response.status == STATUS_ENTITY_TOO_LARGE {
            return Interpretation {
                stats: BulkResultStats {
                    fails: events.len(),
                    ..Default::default()
                },
                retry: events,
                entity_too_large: true,
            };
        }

        let body: BulkResponseBody = match serde_json::from_slice(&response.body) {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    status = response.status,
                    error = %err,
                    events = events.len(),
                    "Failed to parse bulk response, retrying all events"
                );
                return retry_all(events);
            }
        };

        if body.items.is_empty() {
            if response.status < 300 && body.errors == Some(false) {
                return Interpretation {
                    stats: BulkResultStats {
                        acked: events.len(),
                        ..Default::default()
                    },
                    ..Default::default()
                };
            }
            warn!(
                status = response.status,
                events = events.len(),
                "Bulk response carried no items, retrying all events"
            );
            return retry_all(events);
        }

        let mut out = Interpretation::default();
        let mut items = body.items.into_iter();

        for event in events {
            match items.next() {
                Some(item) => match parse_item(item) {
                    Some(item) => self.classify(&mut out, event, item),
                    None => {
                        warn!("Malformed bulk item, retrying event");
                        out.stats.fails += 1;
                        out.retry.push(event);
                    }
                },
                None => {
                    out.stats.fails += 1;
                    out.retry.push(event);
                }
            }
        }

        if !out.retry.is_empty() {
            debug!(
                retry = out.retry.len(),
                too_many = out.stats.too_many,
                "Bulk items scheduled for retry"
            );
        }

        out
    }

    fn classify(&self, out: &mut Interpretation, mut event: PublishEvent, item: BulkItemResult) {
        let is_dead_letter = event.encoded().map(|e| e.is_dead_letter()).unwrap_or(false);

        // A missing status is a success.
        let status = item.status.unwrap_or(200);
        match self.policy.classify(status) {
            StatusClass::Acked if is_dead_letter => out.stats.dead_letter += 1,
            StatusClass::Acked => out.stats.acked += 1,
            StatusClass::Duplicate => out.stats.duplicates += 1,
            StatusClass::TooMany => {
                out.stats.fails += 1;
                out.stats.too_many += 1;
                out.retry.push(event);
            }
            StatusClass::Retryable => {
                out.stats.fails += 1;
                out.retry.push(event);
            }
            StatusClass::Permanent => {
                let message = error_message(item.error.as_ref());
                if is_dead_letter {
                    error!(
                        status,
                        error = %describe_error(item.error.as_ref()),
                        "Failed to index event into dead letter index, dropping"
                    );
                    out.stats.non_indexable += 1;
                    return;
                }

                match (&self.dead_letter_index, event.encoded_mut()) {
                    (Some(index), Some(encoded)) => {
                        warn!(
                            status,
                            index = encoded.index(),
                            error = %describe_error(item.error.as_ref()),
                            dead_letter_index = %index,
                            "Cannot index event, sending to dead letter index"
                        );
                        encoded.set_dead_letter(index, status, &message);
                        out.stats.fails += 1;
                        out.retry.push(event);
                    }
                    _ => {
                        warn!(
                            status,
                            error = %describe_error(item.error.as_ref()),
                            "Cannot index event, dropping"
                        );
                        out.stats.non_indexable += 1;
                    }
                }
            }
        }
    }
}

fn retry_all(events: Vec<PublishEvent>) -> Interpretation {
    Interpretation {
        stats: BulkResultStats {
            fails: events.len(),
            ..Default::default()
        },
        retry: events,
        entity_too_large: false,
    }
}

/// Unwrap a single-key item such as `{"create": {...}}`.
///
/// `None` when the item body does not have the expected shape; an item
/// that parses but carries no `status` is left for `classify` to treat as
/// a success.
fn parse_item(item: Map<String, Value>) -> Option<BulkItemResult> {
    let (_, value) = item.into_iter().next()?;
    serde_json::from_value(value).ok()
}

/// Error text stored in dead-letter documents.
fn error_message(error: Option<&Value>) -> String {
    match error {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Human-readable `type: reason (caused by type: reason ...)` chain.
pub fn describe_error(error: Option<&Value>) -> String {
    let mut current = match error {
        None => return "unknown error".to_string(),
        Some(Value::String(text)) => return text.clone(),
        Some(value) => value,
    };

    let mut text = String::new();
    let mut depth = 0;
    loop {
        let kind = current.get("type").and_then(Value::as_str);
        let reason = current.get("reason").and_then(Value::as_str);
        match (kind, reason) {
            (Some(kind), Some(reason)) => text.push_str(&format!("{kind}: {reason}")),
            (Some(part), None) | (None, Some(part)) => text.push_str(part),
            (None, None) => text.push_str(&current.to_string()),
        }
        match current.get("caused_by") {
            Some(next) if next.is_object() => {
                text.push_str(" (caused by ");
                depth += 1;
                current = next;
            }
            _ => break,
        }
    }
    text.push_str(&")".repeat(depth));
    text
}
