//! Scan loop that drives probers against every configured target.
//!
//! Each cycle walks all (target, prober) pairs and spawns one task per pair
//! that runs a fresh prober through its whole lifecycle. Launches are spread
//! out by a random jitter; tasks are never awaited by the cycle itself.
//! At most one run per pair and `max_in_flight` runs overall are alive at
//! any time, launches past either limit are skipped for that cycle.

use log::{debug, error, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::config::InspectorSettings;
use crate::metrics::MetricsEmitter;
use crate::prober::{ProberFactory, ProberRun};
use crate::target::{ProberDescriptor, Target};

/// Timing and concurrency limits of the scan loop
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    /// Pause after each cycle
    pub scan_interval: Duration,
    /// Upper bound of the random pause before each launch
    pub max_jitter: Duration,
    /// Maximum concurrently running probes
    pub max_in_flight: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from(&InspectorSettings::default())
    }
}

impl From<&InspectorSettings> for ScanSettings {
    fn from(settings: &InspectorSettings) -> Self {
        Self {
            scan_interval: Duration::from_secs(settings.scan_interval_secs),
            max_jitter: Duration::from_millis(settings.max_jitter_ms),
            max_in_flight: settings.max_in_flight.max(1),
        }
    }
}

/// Outcome of one scan cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Probe runs spawned
    pub launched: usize,
    /// Launches skipped because a limit was reached
    pub skipped: usize,
}

/// The orchestration loop
pub struct Inspector {
    targets: Vec<Arc<Target>>,
    factory: Arc<ProberFactory>,
    emitter: MetricsEmitter,
    settings: ScanSettings,
    /// One single-permit guard per (target, prober) pair
    guards: HashMap<(String, String), Arc<Semaphore>>,
    capacity: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

impl Inspector {
    pub fn new(
        targets: Vec<Target>,
        factory: ProberFactory,
        emitter: MetricsEmitter,
        settings: ScanSettings,
    ) -> Self {
        let capacity = Arc::new(Semaphore::new(settings.max_in_flight.max(1)));
        Self {
            targets: targets.into_iter().map(Arc::new).collect(),
            factory: Arc::new(factory),
            emitter,
            settings,
            guards: HashMap::new(),
            capacity,
            tasks: JoinSet::new(),
        }
    }

    /// Number of probe runs currently alive.
    ///
    /// Counted from the held global permits, so finished tasks that have not
    /// been reaped yet are excluded.
    pub fn in_flight(&self) -> usize {
        self.settings
            .max_in_flight
            .max(1)
            .saturating_sub(self.capacity.available_permits())
    }

    /// Scan repeatedly until shutdown is requested.
    ///
    /// Shutdown is observed during the jitter and inter-cycle pauses. A
    /// dropped sender counts as a shutdown request.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let probers: usize = self.targets.iter().map(|t| t.probers.len()).sum();
        info!(
            "Inspector started: {} targets, {} probers, interval {:?}",
            self.targets.len(),
            probers,
            self.settings.scan_interval
        );

        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            let Some(summary) = self.scan(&mut shutdown).await else {
                break;
            };
            info!(
                "Scan cycle {} done: {} launched, {} skipped, {} in flight",
                cycle,
                summary.launched,
                summary.skipped,
                self.in_flight()
            );

            if pause(self.settings.scan_interval, &mut shutdown).await {
                break;
            }
        }

        info!("Inspector stopping after {} cycles", cycle);
    }

    /// Run exactly one scan cycle
    pub async fn scan_once(&mut self) -> ScanSummary {
        let (_keep_alive, mut never) = watch::channel(false);
        self.scan(&mut never).await.unwrap_or_default()
    }

    /// Wait for running probes; whatever is still running after `limit` is
    /// aborted. Returns whether every run finished on its own.
    pub async fn wait_in_flight(&mut self, limit: Duration) -> bool {
        if self.tasks.is_empty() {
            return true;
        }
        debug!("Waiting up to {:?} for {} probe runs", limit, self.tasks.len());

        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(limit, async {
            while let Some(result) = tasks.join_next().await {
                log_join_error(result);
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                "{} probe runs still in flight after {:?}, aborting them",
                self.tasks.len(),
                limit
            );
            self.tasks.abort_all();
        }
        drained
    }

    /// One pass over all pairs; `None` when interrupted by shutdown
    async fn scan(&mut self, shutdown: &mut watch::Receiver<bool>) -> Option<ScanSummary> {
        let mut summary = ScanSummary::default();
        let targets = self.targets.clone();
        let mut first = true;

        for target in &targets {
            for descriptor in &target.probers {
                if !first && pause(self.jitter(), shutdown).await {
                    return None;
                }
                first = false;

                self.reap();
                if self.launch(target, descriptor) {
                    summary.launched += 1;
                } else {
                    summary.skipped += 1;
                }
            }
        }
        Some(summary)
    }

    /// Spawn one probe run unless a limit is reached
    fn launch(&mut self, target: &Target, descriptor: &ProberDescriptor) -> bool {
        let guard = self
            .guards
            .entry((target.id.clone(), descriptor.id.clone()))
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();

        let Ok(pair_permit) = guard.try_acquire_owned() else {
            warn!(
                "[target={} prober={}] previous run still in flight, skipping",
                target.id, descriptor.id
            );
            return false;
        };
        let Ok(global_permit) = self.capacity.clone().try_acquire_owned() else {
            warn!(
                "[target={} prober={}] {} probe runs in flight, skipping",
                target.id, descriptor.id, self.settings.max_in_flight
            );
            return false;
        };

        let factory = self.factory.clone();
        let emitter = self.emitter.clone();
        let target_id = target.id.clone();
        let descriptor = descriptor.clone();

        self.tasks.spawn(async move {
            let _permits = (pair_permit, global_permit);
            run_probe(&factory, &target_id, &descriptor, &emitter).await;
        });
        true
    }

    /// Collect finished tasks
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            log_join_error(result);
        }
    }

    fn jitter(&self) -> Duration {
        random_jitter(self.settings.max_jitter)
    }
}

/// A random pause in `[0, max]`, millisecond resolution
fn random_jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Sleep for `duration`; returns true if shutdown was requested meanwhile
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow_and_update() {
        return true;
    }
    tokio::select! {
        _ = sleep(duration) => false,
        _ = shutdown_requested(shutdown) => true,
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if shutdown.changed().await.is_err() || *shutdown.borrow_and_update() {
            return;
        }
    }
}

/// Factory, initialize, connect, run once, tear down. Failures end here.
async fn run_probe(
    factory: &ProberFactory,
    target_id: &str,
    descriptor: &ProberDescriptor,
    emitter: &MetricsEmitter,
) {
    let prober = match factory.create(descriptor) {
        Ok(prober) => prober,
        Err(e) => {
            error!("[target={} prober={}] {}", target_id, descriptor.id, e);
            return;
        }
    };

    let run = ProberRun::new(prober);
    let run_id = run.run_id();
    if let Err(e) = run.execute(target_id, &descriptor.id, emitter).await {
        if e.is_pre_connect() {
            warn!(
                "[target={} prober={} run={}] probe aborted before connecting: {}",
                target_id, descriptor.id, run_id, e
            );
        } else {
            warn!(
                "[target={} prober={} run={}] probe failed: {}",
                target_id, descriptor.id, run_id, e
            );
        }
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Probe task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRecord;
    use crate::prober::testing::{CallLog, SCRIPTED_KIND, ScriptedProber, Stage};
    use crate::prober::Prober;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn settings(max_in_flight: usize) -> ScanSettings {
        ScanSettings {
            scan_interval: Duration::from_secs(3600),
            max_jitter: Duration::ZERO,
            max_in_flight,
        }
    }

    fn scripted_factory() -> ProberFactory {
        let mut factory = ProberFactory::new();
        factory.register(SCRIPTED_KIND, |_| {
            Ok(Box::new(ScriptedProber::new().0) as Box<dyn Prober>)
        });
        factory
    }

    /// A factory whose probers block in `run_once` until `gate` has permits
    fn gated_factory(gate: Arc<Semaphore>, calls: CallLog) -> ProberFactory {
        let mut factory = ProberFactory::new();
        factory.register(SCRIPTED_KIND, move |_| {
            Ok(Box::new(ScriptedProber::gated(gate.clone(), calls.clone())) as Box<dyn Prober>)
        });
        factory
    }

    fn descriptor(id: &str, kind: &str) -> ProberDescriptor {
        ProberDescriptor::new(id, kind, json!(null))
    }

    fn drain(rx: &mut mpsc::Receiver<MetricRecord>) -> Vec<MetricRecord> {
        let mut records = Vec::new();
        while let Ok(record) = rx.try_recv() {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn test_unsupported_kind_does_not_stop_the_cycle() {
        let target = Target::new("site", "Site")
            .with_prober(descriptor("ping", "icmp"))
            .with_prober(descriptor("homepage", SCRIPTED_KIND));
        let (emitter, mut rx) = MetricsEmitter::channel(16);
        let mut inspector = Inspector::new(vec![target], scripted_factory(), emitter, settings(8));

        let summary = inspector.scan_once().await;
        assert_eq!(summary, ScanSummary { launched: 2, skipped: 0 });
        assert!(inspector.wait_in_flight(Duration::from_secs(5)).await);

        let records = drain(&mut rx);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.tag("prober") == Some("homepage")));
    }

    #[tokio::test]
    async fn test_every_pair_gets_its_own_run() {
        let targets = vec![
            Target::new("a", "A")
                .with_prober(descriptor("p1", SCRIPTED_KIND))
                .with_prober(descriptor("p2", SCRIPTED_KIND)),
            Target::new("b", "B").with_prober(descriptor("p1", SCRIPTED_KIND)),
        ];
        let (emitter, mut rx) = MetricsEmitter::channel(64);
        let mut inspector = Inspector::new(targets, scripted_factory(), emitter, settings(8));

        assert_eq!(inspector.scan_once().await.launched, 3);
        assert!(inspector.wait_in_flight(Duration::from_secs(5)).await);
        assert_eq!(inspector.scan_once().await.launched, 3);
        assert!(inspector.wait_in_flight(Duration::from_secs(5)).await);

        let records = drain(&mut rx);
        assert_eq!(records.len(), 18);
        let b_status = records
            .iter()
            .filter(|r| r.tag("target") == Some("b") && r.name() == "status")
            .count();
        assert_eq!(b_status, 2);
    }

    #[tokio::test]
    async fn test_in_flight_pair_is_not_launched_again() {
        let gate = Arc::new(Semaphore::new(0));
        let calls = CallLog::default();
        let target = Target::new("site", "Site").with_prober(descriptor("slow", SCRIPTED_KIND));
        let (emitter, _rx) = MetricsEmitter::channel(16);
        let mut inspector = Inspector::new(
            vec![target],
            gated_factory(gate.clone(), calls.clone()),
            emitter,
            settings(8),
        );

        assert_eq!(inspector.scan_once().await.launched, 1);
        let second = inspector.scan_once().await;
        assert_eq!(second, ScanSummary { launched: 0, skipped: 1 });
        assert_eq!(inspector.in_flight(), 1);

        gate.add_permits(1);
        assert!(inspector.wait_in_flight(Duration::from_secs(5)).await);
        assert_eq!(
            calls.snapshot(),
            vec![Stage::Initialize, Stage::Connect, Stage::RunOnce, Stage::TearDown]
        );

        gate.add_permits(1);
        assert_eq!(inspector.scan_once().await.launched, 1);
        assert!(inspector.wait_in_flight(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_finished_runs_are_not_counted_in_flight() {
        let target = Target::new("site", "Site").with_prober(descriptor("homepage", SCRIPTED_KIND));
        let (emitter, _rx) = MetricsEmitter::channel(16);
        let mut inspector = Inspector::new(vec![target], scripted_factory(), emitter, settings(8));

        assert_eq!(inspector.scan_once().await.launched, 1);
        tokio::time::timeout(Duration::from_secs(5), async {
            while inspector.in_flight() > 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // the finished task is still waiting to be reaped
        assert_eq!(inspector.tasks.len(), 1);
        assert!(inspector.wait_in_flight(Duration::from_secs(5)).await);
        assert!(inspector.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_global_limit_skips_launches() {
        let gate = Arc::new(Semaphore::new(0));
        let target = Target::new("site", "Site")
            .with_prober(descriptor("one", SCRIPTED_KIND))
            .with_prober(descriptor("two", SCRIPTED_KIND));
        let (emitter, _rx) = MetricsEmitter::channel(16);
        let mut inspector = Inspector::new(
            vec![target],
            gated_factory(gate.clone(), CallLog::default()),
            emitter,
            settings(1),
        );

        let summary = inspector.scan_once().await;
        assert_eq!(summary, ScanSummary { launched: 1, skipped: 1 });

        gate.add_permits(1);
        assert!(inspector.wait_in_flight(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_stuck_runs_are_aborted_after_grace() {
        let gate = Arc::new(Semaphore::new(0));
        let target = Target::new("site", "Site").with_prober(descriptor("stuck", SCRIPTED_KIND));
        let (emitter, _rx) = MetricsEmitter::channel(16);
        let mut inspector = Inspector::new(
            vec![target],
            gated_factory(gate, CallLog::default()),
            emitter,
            settings(8),
        );

        inspector.scan_once().await;
        assert!(!inspector.wait_in_flight(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let target = Target::new("site", "Site").with_prober(descriptor("homepage", SCRIPTED_KIND));
        let (emitter, mut rx) = MetricsEmitter::channel(16);
        let mut inspector = Inspector::new(vec![target], scripted_factory(), emitter, settings(8));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            inspector.run(shutdown_rx).await;
            inspector.wait_in_flight(Duration::from_secs(5)).await
        });

        // the first cycle launches immediately; the loop then sits in its pause
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(first.is_some());

        shutdown_tx.send(true).unwrap();
        let drained = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(drained);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_run() {
        let (emitter, _rx) = MetricsEmitter::channel(16);
        let mut inspector = Inspector::new(Vec::new(), scripted_factory(), emitter, settings(8));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(5), inspector.run(shutdown_rx))
            .await
            .unwrap();
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        assert_eq!(random_jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(random_jitter(Duration::from_millis(20)) <= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_settings_from_config() {
        let settings = ScanSettings::from(&InspectorSettings {
            scan_interval_secs: 5,
            max_jitter_ms: 250,
            max_in_flight: 0,
            ..Default::default()
        });
        assert_eq!(settings.scan_interval, Duration::from_secs(5));
        assert_eq!(settings.max_jitter, Duration::from_millis(250));
        assert_eq!(settings.max_in_flight, 1);
    }
}
