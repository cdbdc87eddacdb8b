use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use af_core::config::Config;
use af_core::notify::{LogNotifier, Notifier};
use af_core::store::TaskStore;
use af_evolve::pipeline::ModificationApplier;
use af_evolve::registry::CapabilityRegistry;
use af_intelligence::selection::SelectionPolicy;
use af_intelligence::suggestion::SuggestionSource;

use crate::checkin::CheckinMonitor;
use crate::shutdown::StopSignal;
use crate::units::{
    self, FactCurator, IdleFactCurator, IdleSuggestionSource, NullStepRunner, PlanStepRunner,
};

// ---------------------------------------------------------------------------
// Intervals
// ---------------------------------------------------------------------------

/// Intervals for the four periodic control loops.
#[derive(Debug, Clone)]
pub struct DaemonIntervals {
    pub reflection: Duration,
    pub curation: Duration,
    pub project_scan: Duration,
    pub checkin: Duration,
    /// Upper bound on one loop sleep so a stop request is observed promptly.
    pub max_sleep: Duration,
}

impl DaemonIntervals {
    pub fn from_config(config: &Config) -> Self {
        let s = &config.scheduler;
        Self {
            reflection: Duration::from_secs(s.reflection_secs),
            curation: Duration::from_secs(s.curation_secs),
            project_scan: Duration::from_secs(s.project_scan_secs),
            checkin: Duration::from_secs(s.checkin_secs),
            max_sleep: Duration::from_secs(s.max_sleep_secs),
        }
    }
}

impl Default for DaemonIntervals {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ---------------------------------------------------------------------------
// Timer slots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Reflection,
    Curation,
    ProjectScan,
    CheckIn,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// The background scheduler: a single cooperative run-loop owning the four
/// periodic control loops.
///
/// Due timers fire one at a time in deadline order; each unit of work is
/// delegated to a worker task and awaited to completion, so a timer can never
/// fire again while its previous firing is still running, and no two units
/// run concurrently. Between passes the loop sleeps until the soonest
/// deadline, capped at `max_sleep`.
pub struct Daemon {
    store: Arc<TaskStore>,
    notifier: Arc<dyn Notifier>,
    applier: Arc<dyn ModificationApplier>,
    source: Arc<dyn SuggestionSource>,
    curator: Arc<dyn FactCurator>,
    step_runner: Arc<dyn PlanStepRunner>,
    registry: Arc<Mutex<CapabilityRegistry>>,
    checkin: Arc<CheckinMonitor>,
    policy: SelectionPolicy,
    intervals: DaemonIntervals,
    stop: StopSignal,
}

impl Daemon {
    /// Create a daemon with idle collaborator stubs; wire the real ones with
    /// the `with_*` builders.
    pub fn new(
        store: Arc<TaskStore>,
        applier: Arc<dyn ModificationApplier>,
        intervals: DaemonIntervals,
    ) -> Self {
        let config = Config::default();
        Self {
            store,
            notifier: Arc::new(LogNotifier),
            applier,
            source: Arc::new(IdleSuggestionSource),
            curator: Arc::new(IdleFactCurator),
            step_runner: Arc::new(NullStepRunner),
            registry: Arc::new(Mutex::new(CapabilityRegistry::new())),
            checkin: Arc::new(CheckinMonitor::new(
                Duration::from_secs(config.checkin.threshold_secs),
                Duration::from_secs(config.checkin.cooldown_secs),
            )),
            policy: SelectionPolicy::default(),
            intervals,
            stop: StopSignal::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_suggestion_source(mut self, source: Arc<dyn SuggestionSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_curator(mut self, curator: Arc<dyn FactCurator>) -> Self {
        self.curator = curator;
        self
    }

    pub fn with_step_runner(mut self, runner: Arc<dyn PlanStepRunner>) -> Self {
        self.step_runner = runner;
        self
    }

    pub fn with_registry(mut self, registry: Arc<Mutex<CapabilityRegistry>>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_checkin(mut self, monitor: Arc<CheckinMonitor>) -> Self {
        self.checkin = monitor;
        self
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Handle for triggering stop from another task.
    pub fn stop_handle(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Run the scheduler loop until the stop signal is observed (blocking).
    pub async fn run(&self) {
        info!(
            reflection_secs = self.intervals.reflection.as_secs(),
            curation_secs = self.intervals.curation.as_secs(),
            project_scan_secs = self.intervals.project_scan.as_secs(),
            checkin_secs = self.intervals.checkin.as_secs(),
            "scheduler loop starting"
        );

        let mut slots = [
            (Slot::Reflection, Instant::now() + self.intervals.reflection),
            (Slot::Curation, Instant::now() + self.intervals.curation),
            (Slot::ProjectScan, Instant::now() + self.intervals.project_scan),
            (Slot::CheckIn, Instant::now() + self.intervals.checkin),
        ];
        let mut stop_rx = self.stop.subscribe();

        loop {
            if self.stop.is_stopping() {
                break;
            }

            let now = Instant::now();
            let mut due: Vec<usize> = (0..slots.len()).filter(|&i| slots[i].1 <= now).collect();
            due.sort_by_key(|&i| slots[i].1);

            for i in due {
                let (slot, _) = slots[i];
                debug!(?slot, "timer due, running unit of work");
                // Delegated to a worker and awaited: cooperative, not
                // re-entrant.
                if let Err(e) = self.spawn_unit(slot).await {
                    error!(?slot, error = %e, "unit of work panicked");
                }
                slots[i].1 = Instant::now() + self.interval_for(slot);
                if self.stop.is_stopping() {
                    break;
                }
            }
            if self.stop.is_stopping() {
                break;
            }

            let soonest = slots
                .iter()
                .map(|(_, deadline)| *deadline)
                .min()
                .expect("slots is non-empty");
            let wake = soonest.min(Instant::now() + self.intervals.max_sleep);
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                _ = stop_rx.recv() => break,
            }
        }

        info!("scheduler loop stopped");
    }

    /// Spawn the loop on the runtime; pair with [`Daemon::stop`].
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let daemon = Arc::clone(self);
        tokio::spawn(async move { daemon.run().await })
    }

    /// Trigger stop and await the loop, force-cancelling after `grace`.
    pub async fn stop(&self, mut handle: JoinHandle<()>, grace: Duration) {
        self.stop.trigger();
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!(grace_secs = grace.as_secs(), "grace period elapsed, aborting scheduler loop");
            handle.abort();
        }
    }

    fn interval_for(&self, slot: Slot) -> Duration {
        match slot {
            Slot::Reflection => self.intervals.reflection,
            Slot::Curation => self.intervals.curation,
            Slot::ProjectScan => self.intervals.project_scan,
            Slot::CheckIn => self.intervals.checkin,
        }
    }

    fn spawn_unit(&self, slot: Slot) -> JoinHandle<()> {
        match slot {
            Slot::Reflection => {
                let store = Arc::clone(&self.store);
                let source = Arc::clone(&self.source);
                let applier = Arc::clone(&self.applier);
                let registry = Arc::clone(&self.registry);
                let policy = self.policy.clone();
                tokio::spawn(async move {
                    units::run_reflection_unit(
                        &store,
                        source.as_ref(),
                        applier.as_ref(),
                        &registry,
                        &policy,
                    )
                    .await;
                })
            }
            Slot::Curation => {
                let curator = Arc::clone(&self.curator);
                tokio::spawn(async move {
                    units::run_curation_unit(curator.as_ref()).await;
                })
            }
            Slot::ProjectScan => {
                let store = Arc::clone(&self.store);
                let runner = Arc::clone(&self.step_runner);
                tokio::spawn(async move {
                    units::run_project_scan_unit(&store, runner.as_ref()).await;
                })
            }
            Slot::CheckIn => {
                let store = Arc::clone(&self.store);
                let monitor = Arc::clone(&self.checkin);
                let notifier = Arc::clone(&self.notifier);
                tokio::spawn(async move {
                    units::run_checkin_unit(&store, &monitor, notifier.as_ref()).await;
                })
            }
        }
    }
}
