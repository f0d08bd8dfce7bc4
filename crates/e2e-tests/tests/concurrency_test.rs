//! Concurrent publish E2E tests for docship.
//!
//! Several publish calls run at once against one mock endpoint and one
//! shared metrics instance; the counters must still add up exactly.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, Request, ResponseTemplate};

use docship_client::BulkPublisher;
use docship_types::BulkSettings;
use e2e_tests::{bulk_response, decode_body, numbered_events, TestHarness};

const BATCHES: i64 = 8;
const BATCH_SIZE: i64 = 25;

/// Status the mock server returns for the event carrying `field`.
fn status_for(field: i64) -> u16 {
    if field % 5 == 0 {
        400
    } else if field % 7 == 0 {
        409
    } else {
        201
    }
}

/// Responder deciding each item's status from the document's `field`.
fn field_responder() -> impl Fn(&Request) -> ResponseTemplate + Send + Sync {
    |request: &Request| {
        let statuses: Vec<u16> = decode_body(request)
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|doc| doc.get("field").and_then(Value::as_i64))
            .map(status_for)
            .collect();
        ResponseTemplate::new(200).set_body_json(bulk_response(&statuses))
    }
}

fn expected(range: std::ops::Range<i64>) -> (u64, u64, u64) {
    let mut acked = 0;
    let mut dropped = 0;
    let mut duplicates = 0;
    for field in range {
        match status_for(field) {
            400 => dropped += 1,
            409 => duplicates += 1,
            _ => acked += 1,
        }
    }
    (acked, dropped, duplicates)
}

/// Independent batches published at once through one shared publisher.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_batches_share_metrics() {
    let mut harness = TestHarness::new().await;
    Mock::given(method("POST"))
        .respond_with(field_responder())
        .mount(&harness.server)
        .await;

    let publisher = Arc::new(
        BulkPublisher::from_settings(
            &BulkSettings {
                url: harness.server.uri(),
                ..Default::default()
            },
            harness.metrics.clone(),
        )
        .unwrap(),
    );
    let cancel = CancellationToken::new();

    let mut tasks = JoinSet::new();
    for n in 0..BATCHES {
        let mut batch = harness.batch(numbered_events(n * BATCH_SIZE..(n + 1) * BATCH_SIZE));
        let publisher = publisher.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { publisher.publish(&mut batch, &cancel).await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert!(harness.next_retry().is_none());
    assert_eq!(
        harness.server.received_requests().await.unwrap().len(),
        BATCHES as usize
    );

    let (acked, dropped, duplicates) = expected(0..BATCHES * BATCH_SIZE);
    let metrics = harness.metrics.snapshot();
    assert_eq!(metrics.events_total, (BATCHES * BATCH_SIZE) as u64);
    assert_eq!(metrics.total_terminal(), metrics.events_total);
    assert_eq!(metrics.events_acked, acked);
    assert_eq!(metrics.events_dropped, dropped);
    assert_eq!(metrics.events_duplicates, duplicates);
    assert_eq!(metrics.events_failed, 0);
    assert_eq!(metrics.events_active, 0);
    assert_eq!(metrics.batches, BATCHES as u64);
}

/// Separate publishers reporting into one metrics instance, with some
/// calls failing as a whole and others partially.
#[tokio::test]
async fn test_concurrent_publishers_with_mixed_outcomes() {
    let mut harness = TestHarness::new().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .respond_with(field_responder())
        .mount(&harness.server)
        .await;

    let settings = BulkSettings {
        url: harness.server.uri(),
        ..Default::default()
    };
    let other = BulkPublisher::from_settings(&settings, harness.metrics.clone()).unwrap();
    let cancel = CancellationToken::new();

    let mut first = harness.batch(numbered_events(0..10));
    let mut second = harness.batch(numbered_events(10..20));
    let (a, b) = tokio::join!(
        harness.publisher.publish(&mut first, &cancel),
        other.publish(&mut second, &cancel),
    );
    a.unwrap();
    b.unwrap();

    // Exactly one of the two calls hit the 503 and was handed back whole.
    let mut retry = harness.next_retry().expect("one batch should be retried");
    assert_eq!(retry.len(), 10);
    assert!(harness.next_retry().is_none());

    let metrics = harness.metrics.snapshot();
    assert_eq!(metrics.events_total, 20);
    assert_eq!(metrics.events_failed, 10);
    assert_eq!(metrics.total_terminal(), 20);
    assert_eq!(metrics.events_active, 0);

    harness.publisher.publish(&mut retry, &cancel).await.unwrap();

    let (acked, dropped, duplicates) = expected(0..20);
    let metrics = harness.metrics.snapshot();
    assert_eq!(metrics.events_total, 30);
    assert_eq!(metrics.total_terminal(), 30);
    assert_eq!(metrics.events_acked, acked);
    assert_eq!(metrics.events_dropped, dropped);
    assert_eq!(metrics.events_duplicates, duplicates);
    assert_eq!(metrics.events_active, 0);
}
