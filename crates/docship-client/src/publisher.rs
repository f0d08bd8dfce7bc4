//! Publish orchestration.
//!
//! One [`BulkPublisher::publish`] call runs a batch through
//! encode -> send -> interpret -> decide. Retries and split halves are
//! handed back to the batch; nothing is resent from inside the call.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use docship_types::BulkSettings;

use crate::batch::{Batch, PublishEvent};
use crate::encoder::{EventEncoder, ServerVersion};
use crate::error::{ClientError, PublishError, TransportError};
use crate::metrics::PublishObserver;
use crate::request::BulkRequestBuilder;
use crate::response::{BulkResultStats, ResponseInterpreter};
use crate::selector::ConstSelector;
use crate::status::StatusPolicy;
use crate::transport::{BulkTransport, HttpTransport, HttpTransportConfig};

/// Publishes batches of events through the bulk API.
pub struct BulkPublisher {
    encoder: EventEncoder,
    builder: BulkRequestBuilder,
    transport: Arc<dyn BulkTransport>,
    interpreter: ResponseInterpreter,
    observer: Arc<dyn PublishObserver>,
}

impl BulkPublisher {
    /// Create a publisher with no compression, the default status table and
    /// no dead-letter index.
    pub fn new(
        encoder: EventEncoder,
        transport: Arc<dyn BulkTransport>,
        observer: Arc<dyn PublishObserver>,
    ) -> Self {
        Self {
            encoder,
            builder: BulkRequestBuilder::default(),
            transport,
            interpreter: ResponseInterpreter::default(),
            observer,
        }
    }

    /// Build a publisher talking HTTP, from validated settings.
    pub fn from_settings(
        settings: &BulkSettings,
        observer: Arc<dyn PublishObserver>,
    ) -> Result<Self, ClientError> {
        settings.validate()?;

        let version: ServerVersion = settings.server_version.parse()?;
        let mut encoder = EventEncoder::new(Arc::new(ConstSelector::new(&settings.index)), version);
        if let Some(pipeline) = settings.pipeline.as_deref().filter(|p| !p.is_empty()) {
            encoder = encoder.with_pipeline_selector(Arc::new(ConstSelector::new(pipeline)));
        }

        let transport = HttpTransport::new(HttpTransportConfig::from_settings(settings))?;
        let policy = StatusPolicy::with_overrides(settings.parsed_status_overrides()?);

        debug!(
            url = %settings.url,
            index = %settings.index,
            version = %version,
            compression_level = settings.compression_level,
            dead_letter_index = ?settings.dead_letter_index,
            "Created bulk publisher"
        );

        Ok(Self::new(encoder, Arc::new(transport), observer)
            .with_compression(settings.compression_level)
            .with_interpreter(ResponseInterpreter::new(
                policy,
                settings.dead_letter_index.clone(),
            )))
    }

    /// Gzip request bodies at `level` (0 disables).
    pub fn with_compression(mut self, level: u32) -> Self {
        self.builder = BulkRequestBuilder::new(level);
        self
    }

    /// Use a custom status table and dead-letter destination.
    pub fn with_interpreter(mut self, interpreter: ResponseInterpreter) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Publish one batch.
    ///
    /// Outcomes are reported through the batch (ack, retry, split, drop) and
    /// the observer. The only error is [`PublishError::TooManyRequests`],
    /// returned after the rejected events were handed back for retry.
    pub async fn publish<B: Batch + ?Sized>(
        &self,
        batch: &mut B,
        cancel: &CancellationToken,
    ) -> Result<(), PublishError> {
        if cancel.is_cancelled() {
            debug!("Publish cancelled before start");
            batch.cancelled();
            return Ok(());
        }

        let total = batch.events().len();
        self.observer.new_batch(total);

        let (encoded, dropped) = self.encode_events(batch.events());
        let mut stats = BulkResultStats {
            non_indexable: dropped,
            ..Default::default()
        };

        if encoded.is_empty() {
            stats.report(self.observer.as_ref());
            batch.ack();
            return Ok(());
        }

        let request = match self.builder.build(&encoded) {
            Ok(request) => request,
            Err(e) => {
                let err = TransportError::Build(e);
                error!(error = %err, events = encoded.len(), "Failed to build bulk request");
                stats.fails += encoded.len();
                stats.report(self.observer.as_ref());
                batch.retry_events(encoded);
                return Ok(());
            }
        };

        let bytes = request.uncompressed_len;
        let count = encoded.len();
        self.observer.sending(count);
        let started = Instant::now();
        let sent = tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.transport.send(request) => result,
        };
        let elapsed = started.elapsed();
        self.observer.sent(count);

        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, events = count, "Bulk request failed, retrying batch");
                stats.fails += count;
                stats.report(self.observer.as_ref());
                batch.retry_events(encoded);
                return Ok(());
            }
        };

        self.observer.report_write(bytes, elapsed);
        debug!(
            status = response.status,
            events = count,
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Bulk request completed"
        );

        let outcome = self.interpreter.interpret(encoded, &response);

        if outcome.entity_too_large {
            if batch.split_retry() {
                debug!(events = count, "Request entity too large, batch split");
                self.observer.batch_split();
                stats.fails += count;
            } else {
                error!(events = count, "Request entity too large and batch cannot split, dropping");
                batch.drop_all();
                stats.non_indexable += count;
            }
            stats.report(self.observer.as_ref());
            return Ok(());
        }

        stats.merge(outcome.stats);
        stats.report(self.observer.as_ref());
        debug_assert_eq!(stats.total(), total);

        if outcome.retry.is_empty() {
            batch.ack();
        } else {
            batch.retry_events(outcome.retry);
        }

        if stats.too_many > 0 {
            return Err(PublishError::TooManyRequests {
                count: stats.too_many,
            });
        }
        Ok(())
    }

    /// Encode every event, reusing earlier encodings. Returns the encoded
    /// events and how many failed.
    fn encode_events(&self, events: &[PublishEvent]) -> (Vec<PublishEvent>, usize) {
        let mut encoded = Vec::with_capacity(events.len());
        let mut dropped = 0;

        for event in events {
            if event.encoded().is_some() {
                encoded.push(event.clone());
                continue;
            }
            match self.encoder.encode(event.event()) {
                Ok(enc) => {
                    encoded.push(PublishEvent::new(event.event().clone()).with_encoding(enc))
                }
                Err(e) => {
                    warn!(error = %e, "Failed to encode event, dropping");
                    dropped += 1;
                }
            }
        }

        (encoded, dropped)
    }
}
