//! End-to-end test infrastructure for docship.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering full publish cycles against a mock bulk endpoint.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use chrono::{TimeZone, Utc};
use flate2::read::GzDecoder;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use wiremock::{MockServer, Request, ResponseTemplate};

use docship_client::{BulkPublisher, PublishError, PublishMetrics, QueuedBatch};
use docship_types::{BulkSettings, Event};

/// Upper bound on resubmissions drained per publish, so a bug cannot hang
/// the test run.
const MAX_DRAIN: usize = 64;

static TRACING: Once = Once::new();

/// Install a fmt subscriber once, honouring `RUST_LOG` (default `warn`).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Shared test harness for E2E tests.
///
/// Owns a mock bulk endpoint, an isolated metrics instance and the retry
/// queue that [`QueuedBatch`] resubmits through.
pub struct TestHarness {
    /// Mock indexing service
    pub server: MockServer,
    /// Metrics private to this harness
    pub metrics: Arc<PublishMetrics>,
    /// Publisher pointed at `server`
    pub publisher: BulkPublisher,
    retry_tx: UnboundedSender<QueuedBatch>,
    retry_rx: UnboundedReceiver<QueuedBatch>,
}

/// What happened while draining one batch and all its resubmissions.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Batches taken from the retry queue after the first publish
    pub retries: usize,
    /// Errors returned by `publish`, in order
    pub errors: Vec<PublishError>,
    /// Whether the root batch's completion callback fired
    pub done: bool,
}

impl TestHarness {
    /// Harness with default settings.
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    /// Harness whose settings are adjusted by `configure` before the
    /// publisher is built. The URL always points at the mock server.
    pub async fn with_settings(configure: impl FnOnce(&mut BulkSettings)) -> Self {
        init_tracing();
        let server = MockServer::start().await;

        let mut settings = BulkSettings::default();
        configure(&mut settings);
        settings.url = server.uri();

        Self::from_parts(server, &settings)
    }

    /// Harness for already complete settings (the URL is used as given).
    pub fn from_parts(server: MockServer, settings: &BulkSettings) -> Self {
        let metrics = Arc::new(PublishMetrics::new());
        let publisher = BulkPublisher::from_settings(settings, metrics.clone())
            .expect("Failed to build publisher");
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();

        Self {
            server,
            metrics,
            publisher,
            retry_tx,
            retry_rx,
        }
    }

    /// New batch resubmitting through this harness's retry queue.
    pub fn batch(&self, events: Vec<Event>) -> QueuedBatch {
        QueuedBatch::new(events, self.retry_tx.clone())
    }

    /// Publish `events` and keep publishing whatever comes back on the
    /// retry queue until it is empty.
    pub async fn publish_all(&mut self, events: Vec<Event>) -> DrainReport {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let batch = self
            .batch(events)
            .on_done(move || flag.store(true, Ordering::SeqCst));

        let mut report = self.drain(batch).await;
        report.done = done.load(Ordering::SeqCst);
        report
    }

    /// Publish `batch`, then drain the retry queue.
    pub async fn drain(&mut self, mut batch: QueuedBatch) -> DrainReport {
        let cancel = CancellationToken::new();
        let mut report = DrainReport::default();

        if let Err(e) = self.publisher.publish(&mut batch, &cancel).await {
            report.errors.push(e);
        }

        while let Ok(mut retry) = self.retry_rx.try_recv() {
            report.retries += 1;
            assert!(report.retries <= MAX_DRAIN, "retry queue did not drain");
            if let Err(e) = self.publisher.publish(&mut retry, &cancel).await {
                report.errors.push(e);
            }
        }

        report
    }

    /// Take one pending resubmission, if any.
    pub fn next_retry(&mut self) -> Option<QueuedBatch> {
        self.retry_rx.try_recv().ok()
    }

    /// Decoded bodies of every bulk request the server received.
    pub async fn request_bodies(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(decode_body)
            .collect()
    }
}

/// Request body as text, gunzipped when `Content-Encoding: gzip` is set.
pub fn decode_body(request: &Request) -> String {
    let gzip = request
        .headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        == Some("gzip");

    if !gzip {
        return String::from_utf8(request.body.clone()).expect("Request body is not UTF-8");
    }

    let mut decoded = String::new();
    GzDecoder::new(request.body.as_slice())
        .read_to_string(&mut decoded)
        .expect("Failed to gunzip request body");
    decoded
}

/// Number of events announced by the request's event-count header.
pub fn event_count(request: &Request) -> usize {
    request
        .headers
        .get("x-elastic-event-count")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Bulk response with one item per status, in order.
pub fn bulk_response(statuses: &[u16]) -> Value {
    let items: Vec<Value> = statuses
        .iter()
        .map(|status| {
            if *status < 300 {
                json!({ "create": { "status": status } })
            } else {
                json!({ "create": {
                    "status": status,
                    "error": { "type": "test_exception", "reason": format!("status {status}") }
                }})
            }
        })
        .collect();
    let errors = statuses.iter().any(|s| *s >= 300);
    json!({ "errors": errors, "items": items })
}

/// Responder acknowledging every event in the request with 201.
pub fn created_responder() -> impl Fn(&Request) -> ResponseTemplate + Send + Sync {
    |request: &Request| {
        let statuses = vec![201; event_count(request)];
        ResponseTemplate::new(200).set_body_json(bulk_response(&statuses))
    }
}

/// Events `{"field": n}` for each `n` in `values`, with a fixed timestamp.
pub fn numbered_events(values: impl IntoIterator<Item = i64>) -> Vec<Event> {
    let timestamp = Utc
        .with_ymd_and_hms(2024, 1, 29, 12, 0, 0)
        .single()
        .expect("Invalid fixture timestamp");
    values
        .into_iter()
        .map(|n| {
            Event::from_json(json!({ "field": n }))
                .expect("Failed to build event")
                .with_timestamp(timestamp)
        })
        .collect()
}
