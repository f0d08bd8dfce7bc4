//! HTTP transport for bulk requests.
//!
//! One call to [`BulkTransport::send`] is exactly one HTTP exchange. Any
//! completed exchange, whatever its status, comes back as a
//! [`TransportResponse`]; only an exchange that never completed is an error.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use docship_types::BulkSettings;

use crate::error::{ClientError, TransportError};
use crate::request::{BulkRequest, FILTER_PATH_PARAM};

/// Raw outcome of a completed bulk exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Sends bulk requests to the indexing service.
#[async_trait]
pub trait BulkTransport: Send + Sync {
    async fn send(&self, request: BulkRequest) -> Result<TransportResponse, TransportError>;
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Service base URL (e.g., "http://localhost:9200")
    pub url: String,

    /// API key, sent as `Authorization: ApiKey <base64>`
    pub api_key: Option<SecretString>,

    /// Extra headers on every request
    pub headers: HashMap<String, String>,

    /// Extra query parameters on every request
    pub parameters: HashMap<String, String>,

    /// Request timeout
    pub timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            headers: HashMap::new(),
            parameters: HashMap::new(),
            timeout: Duration::from_secs(90),
        }
    }

    pub fn from_settings(settings: &BulkSettings) -> Self {
        Self {
            url: settings.url.clone(),
            api_key: settings.api_key.clone().map(SecretString::from),
            headers: settings.headers.clone(),
            parameters: settings.parameters.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

/// reqwest-backed transport posting to `<url>/_bulk`.
pub struct HttpTransport {
    client: Client,
    bulk_url: Url,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    api_key: Option<SecretString>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, ClientError> {
        let bulk_url = bulk_url(&config.url)?;
        let headers = header_map(&config.headers)?;

        // Configured parameters, sorted for a stable query string, with the
        // response filter always last.
        let mut query: Vec<(String, String)> = config
            .parameters
            .into_iter()
            .filter(|(key, _)| key != FILTER_PATH_PARAM.0)
            .collect();
        query.sort();
        query.push((FILTER_PATH_PARAM.0.to_string(), FILTER_PATH_PARAM.1.to_string()));

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            bulk_url,
            query,
            headers,
            api_key: config.api_key,
        })
    }

    pub fn bulk_url(&self) -> &Url {
        &self.bulk_url
    }
}

fn bulk_url(base: &str) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::InvalidUrl {
        url: base.to_string(),
        reason,
    };

    let url = Url::parse(&format!("{}/_bulk", base.trim_end_matches('/')))
        .map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, ClientError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ClientError::InvalidHeader(name.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| ClientError::InvalidHeader(name.to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl BulkTransport for HttpTransport {
    async fn send(&self, request: BulkRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .post(self.bulk_url.clone())
            .query(&self.query)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/x-ndjson");

        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }

        if let Some(api_key) = &self.api_key {
            builder = builder.header(
                AUTHORIZATION,
                format!("ApiKey {}", STANDARD.encode(api_key.expose_secret())),
            );
        }

        debug!(
            events = request.event_count,
            bytes = request.body.len(),
            gzip = request.gzip,
            "Sending bulk request"
        );

        let response = builder.body(request.body).send().await?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(TransportError::ResponseBody)?;

        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}
