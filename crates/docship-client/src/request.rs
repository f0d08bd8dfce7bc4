//! Bulk request assembly.
//!
//! Concatenates encoded events into the newline-delimited bulk body and
//! optionally gzips it. The uncompressed length always describes the body
//! before compression.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::batch::PublishEvent;

/// Header carrying the body size before compression.
pub const HEADER_UNCOMPRESSED_LENGTH: &str = "X-Elastic-Uncompressed-Request-Length";

/// Header carrying the number of events in the request.
pub const HEADER_EVENT_COUNT: &str = "X-Elastic-Event-Count";

/// Query parameter restricting the response to what the interpreter reads.
pub const FILTER_PATH_PARAM: (&str, &str) = ("filter_path", "errors,items.*.error,items.*.status");

/// A fully assembled bulk request body plus its accounting headers.
#[derive(Debug, Clone)]
pub struct BulkRequest {
    /// Bytes to put on the wire (gzipped when `gzip` is set)
    pub body: Vec<u8>,
    /// Body length before compression
    pub uncompressed_len: usize,
    /// Number of events in the request
    pub event_count: usize,
    /// Whether `body` is gzip-encoded
    pub gzip: bool,
}

impl BulkRequest {
    /// Headers describing this request, in addition to content type.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_UNCOMPRESSED_LENGTH, self.uncompressed_len.to_string()),
            (HEADER_EVENT_COUNT, self.event_count.to_string()),
        ];
        if self.gzip {
            headers.push(("Content-Encoding", "gzip".to_string()));
        }
        headers
    }
}

/// Builds bulk request bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkRequestBuilder {
    compression_level: u32,
}

impl BulkRequestBuilder {
    /// Create a builder; level 0 disables compression, 1-9 selects gzip level.
    pub fn new(compression_level: u32) -> Self {
        Self {
            compression_level: compression_level.min(9),
        }
    }

    /// Whether bodies are gzip-compressed.
    pub fn compresses(&self) -> bool {
        self.compression_level > 0
    }

    /// Assemble the request for `events`, in order.
    ///
    /// Each event contributes its action line and, unless it is a delete,
    /// its document line, each terminated by `\n`.
    pub fn build(&self, events: &[PublishEvent]) -> std::io::Result<BulkRequest> {
        let capacity = events
            .iter()
            .filter_map(|e| e.encoded())
            .map(|e| e.action().len() + e.document().len() + 2)
            .sum();
        let mut body = Vec::with_capacity(capacity);
        let mut event_count = 0;

        for encoded in events.iter().filter_map(|e| e.encoded()) {
            body.extend_from_slice(encoded.action());
            body.push(b'\n');
            if encoded.has_document() {
                body.extend_from_slice(encoded.document());
                body.push(b'\n');
            }
            event_count += 1;
        }

        let uncompressed_len = body.len();
        if !self.compresses() {
            return Ok(BulkRequest {
                body,
                uncompressed_len,
                event_count,
                gzip: false,
            });
        }

        let mut encoder = GzEncoder::new(
            Vec::with_capacity(uncompressed_len / 4),
            Compression::new(self.compression_level),
        );
        encoder.write_all(&body)?;
        let compressed = encoder.finish()?;

        Ok(BulkRequest {
            body: compressed,
            uncompressed_len,
            event_count,
            gzip: true,
        })
    }
}
