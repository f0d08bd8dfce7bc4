//! The batch contract between the delivery pipeline and the publisher.
//!
//! The publisher only ever talks to a batch through [`Batch`]; scheduling
//! of retries and split halves belongs to the batch implementation.
//! [`QueuedBatch`] is a channel-backed implementation that hands every
//! resubmission back to the pipeline loop instead of recursing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use docship_types::Event;

use crate::encoder::EncodedEvent;

/// An event in a batch, plus the encoding carried over from an earlier
/// attempt (set once the publisher has encoded or dead-lettered it).
#[derive(Debug, Clone, PartialEq)]
pub struct PublishEvent {
    event: Event,
    encoded: Option<EncodedEvent>,
}

impl PublishEvent {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            encoded: None,
        }
    }

    /// Attach an encoding.
    pub fn with_encoding(mut self, encoded: EncodedEvent) -> Self {
        self.encoded = Some(encoded);
        self
    }

    /// The caller's event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Encoding from the current or a previous attempt.
    pub fn encoded(&self) -> Option<&EncodedEvent> {
        self.encoded.as_ref()
    }

    pub(crate) fn encoded_mut(&mut self) -> Option<&mut EncodedEvent> {
        self.encoded.as_mut()
    }
}

impl From<Event> for PublishEvent {
    fn from(event: Event) -> Self {
        PublishEvent::new(event)
    }
}

/// A group of events submitted together for one delivery attempt.
pub trait Batch: Send {
    /// Events in submission order.
    fn events(&self) -> &[PublishEvent];

    /// Every event is done; release the batch.
    fn ack(&mut self);

    /// Give up on every event in the batch.
    fn drop_all(&mut self);

    /// Split into smaller batches and resubmit each.
    ///
    /// Returns `false` when the batch cannot be split (e.g. one event).
    fn split_retry(&mut self) -> bool;

    /// Resubmit only `events`; everything else is done.
    fn retry_events(&mut self, events: Vec<PublishEvent>);

    /// Resubmit unchanged, without counting a retry attempt.
    fn cancelled(&mut self);
}

type DoneFn = Arc<dyn Fn() + Send + Sync>;

/// A batch that resubmits itself through an unbounded channel.
///
/// Splits halve the events; the completion callback fires once every
/// descendant batch has been acked or dropped.
pub struct QueuedBatch {
    events: Vec<PublishEvent>,
    retries_left: Option<u32>,
    queue: UnboundedSender<QueuedBatch>,
    on_done: DoneFn,
    finished: bool,
}

impl std::fmt::Debug for QueuedBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedBatch")
            .field("events", &self.events.len())
            .field("retries_left", &self.retries_left)
            .field("finished", &self.finished)
            .finish()
    }
}

impl QueuedBatch {
    /// Create a batch resubmitting through `queue`, with unlimited retries.
    pub fn new(events: Vec<Event>, queue: UnboundedSender<QueuedBatch>) -> Self {
        Self {
            events: events.into_iter().map(PublishEvent::new).collect(),
            retries_left: None,
            queue,
            on_done: Arc::new(|| {}),
            finished: false,
        }
    }

    /// Drop the batch once it has been retried `limit` times.
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retries_left = Some(limit);
        self
    }

    /// Callback run when the batch and all its split descendants complete.
    pub fn on_done(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_done = Arc::new(f);
        self
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn child(
        &self,
        events: Vec<PublishEvent>,
        retries_left: Option<u32>,
        on_done: DoneFn,
    ) -> Self {
        Self {
            events,
            retries_left,
            queue: self.queue.clone(),
            on_done,
            finished: false,
        }
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            (self.on_done)();
        }
    }

    /// Hand `batches` to the pipeline loop; this batch is then inert.
    fn hand_off(&mut self, batches: impl IntoIterator<Item = QueuedBatch>) {
        self.finished = true;
        for batch in batches {
            if let Err(err) = self.queue.send(batch) {
                warn!("Retry queue closed, dropping batch");
                let mut batch = err.0;
                batch.finish();
            }
        }
    }
}

impl Batch for QueuedBatch {
    fn events(&self) -> &[PublishEvent] {
        &self.events
    }

    fn ack(&mut self) {
        self.finish();
    }

    fn drop_all(&mut self) {
        self.finish();
    }

    fn split_retry(&mut self) -> bool {
        if self.finished || self.events.len() < 2 {
            return false;
        }

        let mut first = std::mem::take(&mut self.events);
        let second = first.split_off(first.len() / 2);
        debug!(first = first.len(), second = second.len(), "Splitting batch");

        let remaining = Arc::new(AtomicUsize::new(2));
        let parent_done = Arc::clone(&self.on_done);
        let on_done: DoneFn = Arc::new(move || {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                parent_done();
            }
        });

        let first = self.child(first, self.retries_left, Arc::clone(&on_done));
        let second = self.child(second, self.retries_left, on_done);
        self.hand_off([first, second]);
        true
    }

    fn retry_events(&mut self, events: Vec<PublishEvent>) {
        if self.finished {
            return;
        }
        if events.is_empty() {
            self.finish();
            return;
        }

        let retries_left = match self.retries_left {
            Some(0) => {
                warn!(events = events.len(), "Retry limit reached, dropping events");
                self.finish();
                return;
            }
            Some(n) => Some(n - 1),
            None => None,
        };

        let retry = self.child(events, retries_left, Arc::clone(&self.on_done));
        self.hand_off([retry]);
    }

    fn cancelled(&mut self) {
        if self.finished {
            return;
        }
        let events = std::mem::take(&mut self.events);
        let resend = self.child(events, self.retries_left, Arc::clone(&self.on_done));
        self.hand_off([resend]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

    fn events(n: usize) -> Vec<Event> {
        (0..n)
            .map(|i| Event::from_json(json!({ "field": i })).unwrap())
            .collect()
    }

    fn field_of(event: &PublishEvent) -> i64 {
        event.event().fields["field"].as_i64().unwrap()
    }

    #[test]
    fn test_ack_fires_done_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        let mut batch = QueuedBatch::new(events(2), tx).on_done(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        batch.ack();
        batch.ack();
        batch.drop_all();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_split_halves_and_tracks_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let mut batch = QueuedBatch::new(events(3), tx).on_done(move || {
            flag.store(true, Ordering::SeqCst);
        });

        assert!(batch.split_retry());

        let mut first = rx.try_recv().unwrap();
        let mut second = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(first.events().iter().map(field_of).collect::<Vec<_>>(), vec![0]);
        assert_eq!(
            second.events().iter().map(field_of).collect::<Vec<_>>(),
            vec![1, 2]
        );

        assert!(!first.split_retry(), "single event batch cannot split");
        first.drop_all();
        assert!(!done.load(Ordering::SeqCst));

        second.ack();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_retry_events_resubmits_subset() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut batch = QueuedBatch::new(events(3), tx);

        let subset = vec![batch.events()[1].clone()];
        batch.retry_events(subset);

        let retried = rx.try_recv().unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(field_of(&retried.events()[0]), 1);
    }

    #[test]
    fn test_retry_limit_drops_batch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let mut batch = QueuedBatch::new(events(1), tx)
            .with_retry_limit(1)
            .on_done(move || flag.store(true, Ordering::SeqCst));

        let all = batch.events().to_vec();
        batch.retry_events(all);
        let mut retried = rx.try_recv().unwrap();
        assert!(!done.load(Ordering::SeqCst));

        let all = retried.events().to_vec();
        retried.retry_events(all);
        assert!(rx.try_recv().is_err(), "exhausted batch is not resubmitted");
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancelled_resubmits_without_spending_retry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut batch = QueuedBatch::new(events(2), tx).with_retry_limit(0);

        batch.cancelled();
        let resent = rx.try_recv().unwrap();
        assert_eq!(resent.len(), 2);
        assert_eq!(resent.retries_left, Some(0));
    }

    #[test]
    fn test_closed_queue_finishes_batch() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let mut batch =
            QueuedBatch::new(events(1), tx).on_done(move || flag.store(true, Ordering::SeqCst));

        let all = batch.events().to_vec();
        batch.retry_events(all);
        assert!(done.load(Ordering::SeqCst));
    }
}
