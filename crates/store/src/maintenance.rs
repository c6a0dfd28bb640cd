// Periodic compaction: purge dead rows and rewrite the snapshot once the
// wiki has been quiet for a while.
//
// Each tick moves Idle -> Checking, then either back to Idle or through
// Purging -> Dumping -> Idle. Failures are logged and the next tick retries.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::MaintenanceConfig;
use crate::error::StoreResult;
use crate::store::{DumpReport, PurgeReport, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceState {
    Idle,
    Checking,
    Purging,
    Dumping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Compact,
    /// A page changed within the quiet period.
    Busy,
    /// The previous dump is too recent.
    TooSoon,
}

/// Whether a tick at `now` should compact. `last_modified` is `None` for an
/// empty wiki.
pub fn decide(
    config: &MaintenanceConfig,
    now: DateTime<Utc>,
    last_modified: Option<DateTime<Utc>>,
    last_dump: DateTime<Utc>,
) -> Decision {
    let elapsed = |since: DateTime<Utc>| (now - since).to_std().unwrap_or(Duration::ZERO);

    if last_modified.is_some_and(|modified| elapsed(modified) <= config.quiet_period()) {
        return Decision::Busy;
    }
    if elapsed(last_dump) <= config.min_dump_interval() {
        return Decision::TooSoon;
    }
    Decision::Compact
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(Decision),
    Compacted { purged: PurgeReport, dumped: Option<DumpReport> },
}

pub struct MaintenanceJob {
    store: Arc<Store>,
    config: MaintenanceConfig,
    state: Arc<Mutex<MaintenanceState>>,
    last_dump: DateTime<Utc>,
}

impl MaintenanceJob {
    /// The dump interval is measured from job creation, so a fresh start
    /// does not dump on its first tick.
    pub fn new(store: Arc<Store>, config: MaintenanceConfig) -> Self {
        let last_dump = store.now();
        Self { store, config, state: Arc::new(Mutex::new(MaintenanceState::Idle)), last_dump }
    }

    pub fn with_last_dump(mut self, last_dump: DateTime<Utc>) -> Self {
        self.last_dump = last_dump;
        self
    }

    /// Shared view of the current state, readable while the job runs.
    pub fn state_handle(&self) -> Arc<Mutex<MaintenanceState>> {
        Arc::clone(&self.state)
    }

    pub fn state(&self) -> MaintenanceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_dump(&self) -> DateTime<Utc> {
        self.last_dump
    }

    fn set_state(&self, state: MaintenanceState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// One blocking tick. The job always ends in `Idle`.
    pub fn tick(&mut self) -> StoreResult<TickOutcome> {
        self.set_state(MaintenanceState::Checking);
        let result = self.check_and_compact();
        self.set_state(MaintenanceState::Idle);
        result
    }

    fn check_and_compact(&mut self) -> StoreResult<TickOutcome> {
        let last_modified = self.store.latest_modified()?;
        let decision = decide(&self.config, self.store.now(), last_modified, self.last_dump);
        if decision != Decision::Compact {
            debug!(?decision, "skipping compaction");
            return Ok(TickOutcome::Skipped(decision));
        }

        self.set_state(MaintenanceState::Purging);
        let purged = self.store.purge()?;
        self.set_state(MaintenanceState::Dumping);
        let dumped = self.store.dump()?;
        self.last_dump = self.store.now();

        Ok(TickOutcome::Compacted { purged, dumped })
    }

    /// Tick every `check_interval` until `shutdown` fires. The first tick is
    /// one full interval after start.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.check_interval();
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_sec = period.as_secs(), "maintenance job started");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("maintenance job shutting down");
                    break;
                }

                _ = interval.tick() => {}
            }

            let joined = tokio::task::spawn_blocking(move || {
                let outcome = self.tick();
                (self, outcome)
            })
            .await;

            let (job, outcome) = match joined {
                Ok(pair) => pair,
                Err(error) => {
                    warn!(?error, "maintenance tick panicked, stopping job");
                    break;
                }
            };
            self = job;
            match outcome {
                Ok(TickOutcome::Compacted { purged, dumped }) => {
                    debug!(?purged, dumped = dumped.is_some(), "compaction finished");
                }
                Ok(TickOutcome::Skipped(_)) => {}
                Err(error) => warn!(?error, "compaction failed"),
            }
        }
    }
}
