//! A continuous-monitoring agent that drives pluggable probers against
//! configured targets and ships their measurements to a metrics sink

pub mod agent;
pub mod config;
pub mod error;
pub mod metrics;
pub mod prober;
pub mod target;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::agent::{Inspector, ScanSettings, ScanSummary};
    pub use crate::config::{AgentConfig, load_config};
    pub use crate::error::{AgentError, Result};
    pub use crate::metrics::{MetricRecord, MetricsEmitter, MetricsPipeline, MetricsSink, SinkError};
    pub use crate::prober::{Prober, ProberError, ProberFactory, ProberRun};
    pub use crate::target::{ProberDescriptor, Target};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
