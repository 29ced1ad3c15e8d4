use log::{debug, warn};
use uuid::Uuid;

use super::{Prober, ProberError, ProberState};
use crate::metrics::MetricsEmitter;

/// Drives one prober instance through its lifecycle.
///
/// Stages run at most once and only in order. Any failing stage moves the run
/// to `Errored`, which accepts nothing but the mandatory `tear_down` when a
/// connection had been acquired.
pub struct ProberRun {
    prober: Box<dyn Prober>,
    state: ProberState,
    connected: bool,
    run_id: Uuid,
}

impl ProberRun {
    pub fn new(prober: Box<dyn Prober>) -> Self {
        Self {
            prober,
            state: ProberState::Created,
            connected: false,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn state(&self) -> ProberState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn require_state(&self, expected: ProberState, stage: &'static str) -> Result<(), ProberError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProberError::InvalidState {
                stage,
                state: self.state,
            })
        }
    }

    fn settle(&mut self, result: Result<(), ProberError>, next: ProberState) -> Result<(), ProberError> {
        match result {
            Ok(()) => {
                self.state = next;
                Ok(())
            }
            Err(e) => {
                self.state = ProberState::Errored;
                Err(e)
            }
        }
    }

    pub async fn initialize(&mut self, target_id: &str, prober_id: &str) -> Result<(), ProberError> {
        self.require_state(ProberState::Created, "initialize")?;
        let result = self.prober.initialize(target_id, prober_id).await;
        self.settle(result, ProberState::Initialized)
    }

    pub async fn connect(&mut self, emitter: &MetricsEmitter) -> Result<(), ProberError> {
        self.require_state(ProberState::Initialized, "connect")?;
        let result = self.prober.connect(emitter).await;
        self.connected = result.is_ok();
        self.settle(result, ProberState::Connected)
    }

    pub async fn run_once(&mut self, emitter: &MetricsEmitter) -> Result<(), ProberError> {
        self.require_state(ProberState::Connected, "run")?;
        let result = self.prober.run_once(emitter).await;
        self.settle(result, ProberState::Completed)
    }

    pub async fn tear_down(&mut self) -> Result<(), ProberError> {
        let allowed = self.connected
            && matches!(
                self.state,
                ProberState::Connected | ProberState::Completed | ProberState::Errored
            );
        if !allowed {
            return Err(ProberError::InvalidState {
                stage: "tear down",
                state: self.state,
            });
        }

        // Resources are considered released whatever the prober reports.
        self.connected = false;
        let result = self.prober.tear_down().await;
        self.state = ProberState::TornDown;
        result
    }

    /// Run the whole lifecycle and discard the instance.
    ///
    /// `tear_down` runs whenever `connect` succeeded. The first failure is
    /// returned; a tear-down failure after a failed probe is only logged.
    pub async fn execute(
        mut self,
        target_id: &str,
        prober_id: &str,
        emitter: &MetricsEmitter,
    ) -> Result<(), ProberError> {
        debug!(
            "[target={} prober={} run={}] starting {} probe",
            target_id,
            prober_id,
            self.run_id,
            self.prober.kind()
        );

        self.initialize(target_id, prober_id).await?;
        self.connect(emitter).await?;

        let outcome = self.run_once(emitter).await;
        let cleanup = self.tear_down().await;

        match (outcome, cleanup) {
            (Err(e), Err(cleanup_err)) => {
                warn!(
                    "[target={} prober={} run={}] tear down failed after probe error: {}",
                    target_id, prober_id, self.run_id, cleanup_err
                );
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), cleanup) => {
                debug!(
                    "[target={} prober={} run={}] probe completed",
                    target_id, prober_id, self.run_id
                );
                cleanup
            }
        }
    }
}
