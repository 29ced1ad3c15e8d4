//! Probers and their lifecycle
//!
//! A prober executes one probe against one target and is then discarded.
//! Every instance goes through `initialize → connect → run_once → tear_down`
//! exactly once; [`ProberRun`] enforces that order. New kinds plug in through
//! [`ProberFactory::register`] without touching the scan loop.

mod certificate;
mod error;
mod factory;
pub mod http;
mod lifecycle;

#[cfg(test)]
pub(crate) mod testing;

pub use certificate::{days_remaining, days_until, not_after};
pub use error::ProberError;
pub use factory::{ProberConstructor, ProberFactory};
pub use http::{HttpProbeContext, HttpProber};
pub use lifecycle::ProberRun;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::metrics::MetricsEmitter;
use crate::metrics::MetricRecord;
use crate::metrics::record::{TAG_PROBER, TAG_TARGET};

/// Lifecycle states of a prober instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProberState {
    Created,
    Initialized,
    Connected,
    Completed,
    TornDown,
    Errored,
}

impl fmt::Display for ProberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProberState::Created => "created",
            ProberState::Initialized => "initialized",
            ProberState::Connected => "connected",
            ProberState::Completed => "completed",
            ProberState::TornDown => "torn down",
            ProberState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Target and prober identifiers assigned at `initialize`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProberIdentity {
    target_id: String,
    prober_id: String,
}

impl ProberIdentity {
    /// Validate and build an identity; both identifiers must be non-blank
    pub fn new(target_id: &str, prober_id: &str) -> Result<Self, ProberError> {
        if target_id.trim().is_empty() {
            return Err(ProberError::InvalidIdentity("empty target id".to_string()));
        }
        if prober_id.trim().is_empty() {
            return Err(ProberError::InvalidIdentity(format!(
                "empty prober id for target '{}'",
                target_id
            )));
        }
        Ok(Self {
            target_id: target_id.to_string(),
            prober_id: prober_id.to_string(),
        })
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn prober_id(&self) -> &str {
        &self.prober_id
    }

    /// A record tagged with this identity
    pub fn record(&self, name: &str, value: i64) -> MetricRecord {
        MetricRecord::new(name, value)
            .with_tag(TAG_TARGET, self.target_id.as_str())
            .with_tag(TAG_PROBER, self.prober_id.as_str())
    }
}

impl fmt::Display for ProberIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target={} prober={}", self.target_id, self.prober_id)
    }
}

/// A single-use executor of one probe.
///
/// Implementations must not perform I/O before `connect`. `tear_down` must
/// release everything `connect` acquired and is called even when `run_once`
/// fails.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Registered kind tag of this prober
    fn kind(&self) -> &str;

    /// Assign the target and prober identity
    async fn initialize(&mut self, target_id: &str, prober_id: &str) -> Result<(), ProberError>;

    /// Acquire a fresh connection and emit `connect_time`
    async fn connect(&mut self, emitter: &MetricsEmitter) -> Result<(), ProberError>;

    /// Execute the probe operation and emit its measurements
    async fn run_once(&mut self, emitter: &MetricsEmitter) -> Result<(), ProberError>;

    /// Release all connection resources
    async fn tear_down(&mut self) -> Result<(), ProberError>;

    /// Identity assigned by `initialize`, if any
    fn identity(&self) -> Option<&ProberIdentity>;
}

/// Whole milliseconds of a duration, saturating
pub(crate) fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
