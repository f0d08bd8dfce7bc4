//! Configuration loading for docship.
//!
//! Layered config: defaults -> default config file -> explicit config file
//! -> environment variables (`DOCSHIP__BULK__URL`, ...).

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::DocshipError;

/// How a per-item bulk status is treated by the response interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    /// Document was written
    Acked,
    /// Document already exists; treated as applied
    Duplicate,
    /// Server is shedding load; retry and signal backpressure
    TooMany,
    /// Document can never be indexed as-is; dead-letter or drop
    Permanent,
    /// Transient failure; retry
    Retryable,
}

/// Bulk client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkSettings {
    /// Base URL of the indexing service
    #[serde(default = "default_url")]
    pub url: String,

    /// API key, sent as `Authorization: ApiKey <base64>`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Extra headers sent with every bulk request
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Extra query parameters sent with every bulk request
    #[serde(default)]
    pub parameters: HashMap<String, String>,

    /// Gzip level for request bodies (0 disables compression)
    #[serde(default)]
    pub compression_level: u32,

    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Default target index
    #[serde(default = "default_index")]
    pub index: String,

    /// Default ingest pipeline
    #[serde(default)]
    pub pipeline: Option<String>,

    /// Index receiving documents the primary index permanently rejects.
    /// When unset, such documents are dropped.
    #[serde(default)]
    pub dead_letter_index: Option<String>,

    /// Version of the indexing service, used to pick bulk actions
    #[serde(default = "default_server_version")]
    pub server_version: String,

    /// Per-status overrides of the default status table, keyed by HTTP status
    #[serde(default)]
    pub status_overrides: HashMap<String, StatusClass>,
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_timeout_secs() -> u64 {
    90
}

fn default_index() -> String {
    "docship".to_string()
}

fn default_server_version() -> String {
    "8.0.0".to_string()
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            api_key: None,
            headers: HashMap::new(),
            parameters: HashMap::new(),
            compression_level: 0,
            timeout_secs: default_timeout_secs(),
            index: default_index(),
            pipeline: None,
            dead_letter_index: None,
            server_version: default_server_version(),
            status_overrides: HashMap::new(),
        }
    }
}

impl BulkSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), DocshipError> {
        if self.compression_level > 9 {
            return Err(DocshipError::Config(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if self.timeout_secs == 0 {
            return Err(DocshipError::Config("timeout_secs must be > 0".to_string()));
        }
        if self.index.is_empty() {
            return Err(DocshipError::Config("index must not be empty".to_string()));
        }
        self.parsed_status_overrides()?;
        Ok(())
    }

    /// Status overrides with their keys parsed as HTTP status codes.
    pub fn parsed_status_overrides(&self) -> Result<HashMap<u16, StatusClass>, DocshipError> {
        self.status_overrides
            .iter()
            .map(|(key, class)| {
                let status: u16 = key.trim().parse().map_err(|_| {
                    DocshipError::Config(format!("status override key is not a number: {key}"))
                })?;
                if !(100..=599).contains(&status) {
                    return Err(DocshipError::Config(format!(
                        "status override key out of range: {status}"
                    )));
                }
                Ok((status, *class))
            })
            .collect()
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Bulk client configuration
    #[serde(default)]
    pub bulk: BulkSettings,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bulk: BulkSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/docship/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (DOCSHIP__*)
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, DocshipError> {
        let config_dir = ProjectDirs::from("", "", "docship")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())
            .map_err(|e| DocshipError::Config(e.to_string()))?
            .set_default("bulk.url", default_url())
            .map_err(|e| DocshipError::Config(e.to_string()))?
            .set_default("bulk.timeout_secs", default_timeout_secs() as i64)
            .map_err(|e| DocshipError::Config(e.to_string()))?
            .set_default("bulk.index", default_index())
            .map_err(|e| DocshipError::Config(e.to_string()))?
            .set_default("bulk.server_version", default_server_version())
            .map_err(|e| DocshipError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // DOCSHIP__BULK__DEAD_LETTER_INDEX -> bulk.dead_letter_index
        builder = builder.add_source(
            Environment::with_prefix("DOCSHIP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| DocshipError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| DocshipError::Config(e.to_string()))?;

        settings.bulk.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.bulk.url, "http://localhost:9200");
        assert_eq!(settings.bulk.index, "docship");
        assert_eq!(settings.bulk.compression_level, 0);
        assert!(settings.bulk.dead_letter_index.is_none());
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[bulk]
url = "http://search.internal:9200"
compression_level = 5
dead_letter_index = "dead-letters"

[bulk.status_overrides]
"400" = "retryable"
"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let settings = Settings::load(Some(&path)).unwrap();

        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.bulk.url, "http://search.internal:9200");
        assert_eq!(settings.bulk.compression_level, 5);
        assert_eq!(
            settings.bulk.dead_letter_index.as_deref(),
            Some("dead-letters")
        );
        // Untouched keys keep their defaults
        assert_eq!(settings.bulk.timeout_secs, 90);

        let overrides = settings.bulk.parsed_status_overrides().unwrap();
        assert_eq!(overrides.get(&400), Some(&StatusClass::Retryable));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = Settings::load(Some("/nonexistent/docship/config.toml"));
        assert!(matches!(result, Err(DocshipError::Config(_))));
    }

    #[test]
    fn test_validate() {
        let mut bulk = BulkSettings::default();
        assert!(bulk.validate().is_ok());

        bulk.compression_level = 10;
        assert!(bulk.validate().is_err());

        bulk.compression_level = 9;
        bulk.timeout_secs = 0;
        assert!(bulk.validate().is_err());

        bulk.timeout_secs = 30;
        bulk.status_overrides
            .insert("teapot".to_string(), StatusClass::Permanent);
        assert!(bulk.validate().is_err());

        bulk.status_overrides.clear();
        bulk.status_overrides
            .insert("999".to_string(), StatusClass::Permanent);
        assert!(bulk.validate().is_err());
    }

    #[test]
    fn test_status_class_serialization() {
        let json = serde_json::to_string(&StatusClass::TooMany).unwrap();
        assert_eq!(json, "\"too_many\"");
        let decoded: StatusClass = serde_json::from_str("\"permanent\"").unwrap();
        assert_eq!(decoded, StatusClass::Permanent);
    }
}
