use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;

use super::record::{MetricRecord, TAG_HOST};
use crate::config::SinkConfig;

/// Errors raised by metrics sinks
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink initialization failed: {0}")]
    Initialization(String),

    #[error("sink delivery failed: {0}")]
    Delivery(String),

    #[error("sink used before initialization")]
    NotInitialized,

    #[error("unsupported metrics backend: {0}")]
    UnsupportedBackend(String),
}

/// Backend that stores metric records.
///
/// Exactly one sink is active per process. The pipeline consumer calls
/// `emit` one record at a time; a returned error is logged and the record
/// is dropped.
#[async_trait]
pub trait MetricsSink: Send + Sync + 'static {
    /// Connect the sink to its backend
    async fn initialize(&mut self, address: &str, port: u16, database: &str) -> Result<(), SinkError>;

    /// Forward a single record
    async fn emit(&self, record: &MetricRecord) -> Result<(), SinkError>;

    /// Name of the backend
    fn name(&self) -> &str;
}

/// Resolve the local host name used for the `host` tag
pub fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Return a copy of the record carrying a `host` tag
pub(crate) fn with_host_tag(record: &MetricRecord, host: &str) -> MetricRecord {
    record.clone().with_default_tag(TAG_HOST, host)
}

/// Sink that writes every record to the log
pub struct LogSink {
    host: String,
    target: Option<String>,
}

impl LogSink {
    pub fn new() -> Self {
        Self {
            host: local_hostname(),
            target: None,
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSink for LogSink {
    async fn initialize(&mut self, address: &str, port: u16, database: &str) -> Result<(), SinkError> {
        let target = format!("{}:{}/{}", address, port, database);
        debug!("Log sink standing in for {}", target);
        self.target = Some(target);
        Ok(())
    }

    async fn emit(&self, record: &MetricRecord) -> Result<(), SinkError> {
        if self.target.is_none() {
            return Err(SinkError::NotInitialized);
        }

        let record = with_host_tag(record, &self.host);
        info!(
            "metric {}={} tags={:?} fields={:?}",
            record.name(),
            record.value(),
            record.tags().cloned().unwrap_or_default(),
            record.fields().cloned().unwrap_or_default()
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Build and initialize the sink selected by configuration
pub async fn create_sink(config: &SinkConfig) -> Result<Box<dyn MetricsSink>, SinkError> {
    let mut sink: Box<dyn MetricsSink> = match config.backend.to_lowercase().as_str() {
        "log" => Box::new(LogSink::new()),
        #[cfg(feature = "postgres")]
        "postgres" => Box::new(super::postgres::PostgresSink::new(
            super::postgres::PostgresSettings::from(config),
        )?),
        other => return Err(SinkError::UnsupportedBackend(other.to_string())),
    };

    sink.initialize(&config.address, config.port, &config.database)
        .await?;

    info!(
        "Metrics sink '{}' initialized for {}:{}/{}",
        sink.name(),
        config.address,
        config.port,
        config.database
    );

    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink_config(backend: &str) -> SinkConfig {
        SinkConfig {
            backend: backend.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_log_sink() {
        let sink = create_sink(&sink_config("log")).await.unwrap();
        assert_eq!(sink.name(), "log");
        sink.emit(&MetricRecord::new("status", 200)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_backend_is_rejected() {
        let result = create_sink(&sink_config("influxdb")).await;
        assert!(matches!(result, Err(SinkError::UnsupportedBackend(name)) if name == "influxdb"));
    }

    #[tokio::test]
    async fn test_memory_backend_is_not_selectable() {
        let result = create_sink(&sink_config("memory")).await;
        assert!(matches!(result, Err(SinkError::UnsupportedBackend(name)) if name == "memory"));
    }

    #[tokio::test]
    async fn test_log_sink_requires_initialization() {
        let sink = LogSink::new();
        let result = sink.emit(&MetricRecord::new("status", 200)).await;
        assert!(matches!(result, Err(SinkError::NotInitialized)));
    }

    #[test]
    fn test_host_tag_is_added_once() {
        let record = MetricRecord::new("status", 200);
        let tagged = with_host_tag(&record, "probe-01");
        assert_eq!(tagged.tag(TAG_HOST), Some("probe-01"));

        let retagged = with_host_tag(&tagged, "probe-02");
        assert_eq!(retagged.tag(TAG_HOST), Some("probe-01"));
    }
}
