//! # docship-types
//!
//! Shared domain types for the docship bulk publisher.
//!
//! This crate defines the data handed to the publishing client by the
//! upstream delivery pipeline:
//! - Events: caller-owned records with fields, metadata and a timestamp
//! - Settings: layered configuration for the bulk client
//!
//! ## Usage
//!
//! ```rust
//! use docship_types::{Event, OpType};
//!
//! let event = Event::from_json(serde_json::json!({"message": "hello"}))
//!     .unwrap()
//!     .with_id("doc-1")
//!     .with_op_type(OpType::Index);
//! assert_eq!(event.meta.id.as_deref(), Some("doc-1"));
//! ```

pub mod config;
pub mod error;
pub mod event;

pub use config::{BulkSettings, Settings, StatusClass};
pub use error::DocshipError;
pub use event::{Event, EventMeta, OpType};
