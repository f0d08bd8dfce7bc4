//! Configuration E2E tests for docship.
//!
//! Loads settings from a config file and publishes with the resulting
//! client.

use std::io::Write;

use pretty_assertions::assert_eq;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer};

use docship_client::{BulkPublisher, ClientError, PublishMetrics};
use docship_types::{BulkSettings, Settings};
use e2e_tests::{created_responder, numbered_events, TestHarness};

#[tokio::test]
async fn test_publish_with_file_settings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param("pipeline", "ingest-main"))
        .respond_with(created_responder())
        .expect(1)
        .mount(&server)
        .await;

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("Failed to create config file");
    write!(
        file,
        r#"
[bulk]
url = "{}"
index = "app-logs"
compression_level = 3

[bulk.parameters]
pipeline = "ingest-main"
"#,
        server.uri()
    )
    .expect("Failed to write config file");

    let settings = Settings::load(Some(file.path().to_str().unwrap())).unwrap();
    assert_eq!(settings.bulk.index, "app-logs");
    assert_eq!(settings.bulk.compression_level, 3);

    let mut harness = TestHarness::from_parts(server, &settings.bulk);
    let report = harness.publish_all(numbered_events(1..=2)).await;
    assert!(report.done);

    let bodies = harness.request_bodies().await;
    assert!(bodies[0].starts_with("{\"create\":{\"_index\":\"app-logs\"}}\n"));
    assert_eq!(harness.metrics.snapshot().events_acked, 2);
}

#[test]
fn test_invalid_settings_rejected() {
    let metrics = std::sync::Arc::new(PublishMetrics::new());

    let settings = BulkSettings {
        compression_level: 12,
        ..Default::default()
    };
    assert!(matches!(
        BulkPublisher::from_settings(&settings, metrics.clone()),
        Err(ClientError::Config(_))
    ));

    let settings = BulkSettings {
        server_version: "eight".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        BulkPublisher::from_settings(&settings, metrics.clone()),
        Err(ClientError::InvalidVersion(_))
    ));

    let settings = BulkSettings {
        url: "localhost:9200/no-scheme".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        BulkPublisher::from_settings(&settings, metrics),
        Err(ClientError::InvalidUrl { .. })
    ));
}
