//! Test doubles: a scripted prober and self-signed certificates

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509, X509NameBuilder};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::{Prober, ProberError, ProberIdentity};
use crate::metrics::MetricsEmitter;
use crate::metrics::record::{CONNECT_TIME, RESPONSE_TIME, STATUS};

pub(crate) const SCRIPTED_KIND: &str = "scripted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Initialize,
    Connect,
    RunOnce,
    TearDown,
}

/// Shared record of the stages a prober went through
#[derive(Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<Stage>>>);

impl CallLog {
    fn push(&self, stage: Stage) {
        self.0.lock().unwrap().push(stage);
    }

    pub(crate) fn snapshot(&self) -> Vec<Stage> {
        self.0.lock().unwrap().clone()
    }
}

pub(crate) struct ScriptedProber {
    calls: CallLog,
    fail_at: Option<Stage>,
    gate: Option<Arc<Semaphore>>,
    identity: Option<ProberIdentity>,
}

impl ScriptedProber {
    pub(crate) fn new() -> (Self, CallLog) {
        Self::build(None, None, CallLog::default())
    }

    pub(crate) fn failing_at(stage: Stage) -> (Self, CallLog) {
        Self::build(Some(stage), None, CallLog::default())
    }

    /// A prober whose `run_once` waits for a permit from `gate`
    pub(crate) fn gated(gate: Arc<Semaphore>, calls: CallLog) -> Self {
        Self::build(None, Some(gate), calls).0
    }

    fn build(fail_at: Option<Stage>, gate: Option<Arc<Semaphore>>, calls: CallLog) -> (Self, CallLog) {
        let prober = Self {
            calls: calls.clone(),
            fail_at,
            gate,
            identity: None,
        };
        (prober, calls)
    }

    fn identity_or_err(&self) -> Result<&ProberIdentity, ProberError> {
        self.identity
            .as_ref()
            .ok_or_else(|| ProberError::InvalidIdentity("not initialized".to_string()))
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    fn kind(&self) -> &str {
        SCRIPTED_KIND
    }

    async fn initialize(&mut self, target_id: &str, prober_id: &str) -> Result<(), ProberError> {
        self.calls.push(Stage::Initialize);
        self.identity = Some(ProberIdentity::new(target_id, prober_id)?);
        Ok(())
    }

    async fn connect(&mut self, emitter: &MetricsEmitter) -> Result<(), ProberError> {
        self.calls.push(Stage::Connect);
        if self.fail_at == Some(Stage::Connect) {
            return Err(ProberError::ConnectionFailed {
                endpoint: "scripted".to_string(),
                reason: "refused".to_string(),
            });
        }
        emitter.emit(self.identity_or_err()?.record(CONNECT_TIME, 1)).await;
        Ok(())
    }

    async fn run_once(&mut self, emitter: &MetricsEmitter) -> Result<(), ProberError> {
        self.calls.push(Stage::RunOnce);
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| ProberError::ProbeExecutionFailed(e.to_string()))?;
        }
        if self.fail_at == Some(Stage::RunOnce) {
            return Err(ProberError::ProbeExecutionFailed("scripted failure".to_string()));
        }
        let identity = self.identity_or_err()?.clone();
        emitter.emit(identity.record(RESPONSE_TIME, 5)).await;
        emitter.emit(identity.record(STATUS, 200)).await;
        Ok(())
    }

    async fn tear_down(&mut self) -> Result<(), ProberError> {
        self.calls.push(Stage::TearDown);
        Ok(())
    }

    fn identity(&self) -> Option<&ProberIdentity> {
        self.identity.as_ref()
    }
}

/// A self-signed P-256 certificate for `probe.test` expiring at `not_after`
pub(crate) fn self_signed_certificate(not_after: DateTime<Utc>) -> (X509, PKey<Private>) {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "probe.test").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(not_after.timestamp() - 90 * 86_400).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after.timestamp()).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    (builder.build(), key)
}
