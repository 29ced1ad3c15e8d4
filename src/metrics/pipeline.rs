//! Bounded queue that decouples probe execution from sink delivery.
//!
//! Any number of [`MetricsEmitter`] handles push records into a single
//! bounded channel. One consumer task drains it into the configured
//! [`MetricsSink`], one record at a time.
//!
//! When the queue is full, `emit` waits for capacity. Only probe tasks emit,
//! so back-pressure slows the affected probe runs and never the scan loop.

use log::{debug, info, trace, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::record::MetricRecord;
use super::sink::MetricsSink;
use crate::error::Result;

/// Default number of records the queue holds before producers wait
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Delivery counters reported when the pipeline shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records accepted by the sink
    pub delivered: u64,
    /// Records the sink failed to store
    pub dropped: u64,
}

/// Producer handle for the metrics queue
#[derive(Clone)]
pub struct MetricsEmitter {
    tx: mpsc::Sender<MetricRecord>,
    tags: Arc<BTreeMap<String, String>>,
}

impl MetricsEmitter {
    /// Create an emitter together with the receiving end of its queue
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MetricRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let emitter = Self {
            tx,
            tags: Arc::new(BTreeMap::new()),
        };
        (emitter, rx)
    }

    /// Derive an emitter that adds `name=value` to records lacking that tag
    pub fn with_tag(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut tags = (*self.tags).clone();
        tags.insert(name.into(), value.into());
        Self {
            tx: self.tx.clone(),
            tags: Arc::new(tags),
        }
    }

    /// Queue a record, waiting while the queue is full.
    ///
    /// Delivery is best effort: if the consumer has gone away the record is
    /// discarded with a warning.
    pub async fn emit(&self, record: MetricRecord) {
        let record = self
            .tags
            .iter()
            .fold(record, |record, (name, value)| record.with_default_tag(name, value));

        if let Err(err) = self.tx.send(record).await {
            warn!(
                "Metrics pipeline closed, discarding '{}'",
                err.0.name()
            );
        }
    }

    /// Whether the consumer side is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The metrics queue plus its single consumer task
pub struct MetricsPipeline {
    emitter: MetricsEmitter,
    consumer: JoinHandle<PipelineStats>,
}

impl MetricsPipeline {
    /// Spawn the consumer and return the running pipeline
    pub fn start(sink: Box<dyn MetricsSink>, capacity: usize) -> Self {
        let (emitter, rx) = MetricsEmitter::channel(capacity);
        info!(
            "Starting metrics pipeline (sink: {}, capacity: {})",
            sink.name(),
            capacity.max(1)
        );
        let consumer = tokio::spawn(consume(rx, sink));
        Self { emitter, consumer }
    }

    /// A new producer handle
    pub fn emitter(&self) -> MetricsEmitter {
        self.emitter.clone()
    }

    /// Close the pipeline and wait for the consumer to drain it.
    ///
    /// The consumer finishes once every emitter has been dropped, so callers
    /// release outstanding handles (and finish the probe runs holding them)
    /// before awaiting this.
    pub async fn shutdown(self) -> Result<PipelineStats> {
        let Self { emitter, consumer } = self;
        drop(emitter);
        let stats = consumer.await?;
        Ok(stats)
    }
}

async fn consume(mut rx: mpsc::Receiver<MetricRecord>, sink: Box<dyn MetricsSink>) -> PipelineStats {
    let mut stats = PipelineStats::default();

    while let Some(record) = rx.recv().await {
        match sink.emit(&record).await {
            Ok(()) => {
                stats.delivered += 1;
                trace!("Delivered '{}' to {}", record.name(), sink.name());
            }
            Err(e) => {
                stats.dropped += 1;
                warn!(
                    "Dropping metric '{}' (target={:?} prober={:?}): {}",
                    record.name(),
                    record.tag(super::record::TAG_TARGET),
                    record.tag(super::record::TAG_PROBER),
                    e
                );
            }
        }
    }

    debug!("All metric producers gone, consumer exiting");
    info!(
        "Metrics pipeline closed: {} delivered, {} dropped",
        stats.delivered, stats.dropped
    );
    stats
}
