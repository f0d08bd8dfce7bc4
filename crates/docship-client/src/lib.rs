//! # docship-client
//!
//! Bulk publishing client for document-indexing HTTP services.
//!
//! Provides:
//! - Event encoding into bulk action/document lines
//! - Bulk request assembly with optional gzip
//! - HTTP transport against the `_bulk` endpoint
//! - Per-item response interpretation, dead-letter redirection
//! - The publish orchestrator and the batch contract it drives
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docship_client::{BulkPublisher, PublishMetrics, QueuedBatch};
//! use docship_types::{BulkSettings, Event};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = Arc::new(PublishMetrics::new());
//! let publisher = BulkPublisher::from_settings(&BulkSettings::default(), metrics.clone())?;
//!
//! let (retries, mut queue) = tokio::sync::mpsc::unbounded_channel();
//! let event = Event::from_json(serde_json::json!({"message": "hello"}))?;
//! let mut batch = QueuedBatch::new(vec![event], retries);
//! publisher.publish(&mut batch, &CancellationToken::new()).await?;
//!
//! while let Ok(mut retry) = queue.try_recv() {
//!     publisher.publish(&mut retry, &CancellationToken::new()).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod encoder;
pub mod error;
pub mod metrics;
pub mod publisher;
pub mod request;
pub mod response;
pub mod selector;
pub mod status;
pub mod transport;

pub use batch::{Batch, PublishEvent, QueuedBatch};
pub use encoder::{validate_index_name, EncodedEvent, EventEncoder, ServerVersion};
pub use error::{ClientError, EncodeError, PublishError, SelectError, TransportError};
pub use metrics::{PublishMetrics, PublishMetricsSnapshot, PublishObserver};
pub use publisher::BulkPublisher;
pub use request::{BulkRequest, BulkRequestBuilder};
pub use response::{BulkResultStats, Interpretation, ResponseInterpreter};
pub use selector::{ConstSelector, FieldSelector, Selector};
pub use status::StatusPolicy;
pub use transport::{BulkTransport, HttpTransport, HttpTransportConfig, TransportResponse};
