use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use super::record::MetricRecord;
use super::sink::{MetricsSink, SinkError};

/// In-memory sink for tests; not selectable through configuration.
///
/// Clones share the same storage, so a handle kept outside the pipeline
/// observes everything the pipeline delivered. Records are stored verbatim.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<RwLock<Vec<MetricRecord>>>,
    rejected: Arc<HashSet<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail delivery of every record with the given name
    pub fn rejecting(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            rejected: Arc::new(names.into_iter().map(Into::into).collect()),
        }
    }

    /// Snapshot of the delivered records, in delivery order
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records
            .read()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Number of delivered records
    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MetricsSink for MemorySink {
    async fn initialize(&mut self, _address: &str, _port: u16, _database: &str) -> Result<(), SinkError> {
        Ok(())
    }

    async fn emit(&self, record: &MetricRecord) -> Result<(), SinkError> {
        if self.rejected.contains(record.name()) {
            return Err(SinkError::Delivery(format!(
                "record '{}' rejected",
                record.name()
            )));
        }

        let mut records = self
            .records
            .write()
            .map_err(|_| SinkError::Delivery("Lock poisoned".to_string()))?;
        records.push(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_storage() {
        let sink = MemorySink::new();
        let handle = sink.clone();

        sink.emit(&MetricRecord::new("status", 200)).await.unwrap();

        assert_eq!(handle.len(), 1);
        assert_eq!(handle.records()[0].value(), 200);
    }

    #[tokio::test]
    async fn test_rejected_names_fail_delivery() {
        let sink = MemorySink::rejecting(["status"]);

        let result = sink.emit(&MetricRecord::new("status", 500)).await;
        assert!(matches!(result, Err(SinkError::Delivery(_))));
        assert!(sink.is_empty());
    }
}
