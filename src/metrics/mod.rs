//! Metric records, sinks and the pipeline between them

mod memory;
mod pipeline;
pub mod record;
mod sink;

/// PostgreSQL sink
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemorySink;
pub use pipeline::{DEFAULT_QUEUE_CAPACITY, MetricsEmitter, MetricsPipeline, PipelineStats};
pub use record::MetricRecord;
pub use sink::{LogSink, MetricsSink, SinkError, create_sink, local_hostname};
