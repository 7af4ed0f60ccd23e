//! Health Monitor (spec §4.2): actively probes a dynamic target set and
//! maintains disjoint healthy/unhealthy lists with hysteresis.

use crate::config::HealthMonitorConfig;
use crate::provider::TargetProvider;
use crate::target::{Target, TargetList};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A target's classification. Initial state on first observation is Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Pending,
    Healthy,
    Unhealthy,
}

/// Per-target hysteresis counters. At most one is non-zero at any moment (I3).
#[derive(Debug, Clone, Copy, Default)]
struct ProbeLedger {
    consecutive_successes: u32,
    consecutive_failures: u32,
}

/// One tick's published view: disjoint healthy/unhealthy lists (I1).
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub healthy: TargetList,
    pub unhealthy: TargetList,
}

/// A no-argument change-hint listener, invoked after every publication.
pub type HealthListener = Box<dyn Fn() + Send + Sync>;

struct MonitorState {
    targets_to_monitor: TargetList,
    states: HashMap<Target, HealthState>,
    ledgers: HashMap<Target, ProbeLedger>,
}

/// Maintains `HealthState` for every target in the current target list and
/// publishes `HealthyList`/`UnhealthyList` (spec §4.2).
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    provider: Arc<dyn TargetProvider>,
    client: reqwest::Client,

    state: Mutex<MonitorState>,
    snapshot: RwLock<HealthSnapshot>,
    listeners: RwLock<Vec<HealthListener>>,

    refresh_requested: AtomicBool,
    stopped: AtomicBool,
}

impl HealthMonitor {
    pub fn new(
        provider: Arc<dyn TargetProvider>,
        config: HealthMonitorConfig,
    ) -> crate::error::RoutingResult<Arc<Self>> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .map_err(|e| crate::error::RoutingError::Configuration(e.to_string()))?;

        let monitor = Arc::new(Self {
            config,
            provider,
            client,
            state: Mutex::new(MonitorState {
                targets_to_monitor: Vec::new(),
                states: HashMap::new(),
                ledgers: HashMap::new(),
            }),
            snapshot: RwLock::new(HealthSnapshot::default()),
            listeners: RwLock::new(Vec::new()),
            refresh_requested: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        });

        let weak_for_provider = Arc::downgrade(&monitor);
        monitor.provider.subscribe(Box::new(move || {
            if let Some(monitor) = weak_for_provider.upgrade() {
                monitor.enqueue();
            }
        }));

        Ok(monitor)
    }

    /// Idempotent, non-blocking request to run the refresh pass on the next tick.
    pub fn enqueue(&self) {
        self.refresh_requested.store(true, Ordering::SeqCst);
    }

    /// Registers a listener invoked after every publication (spec §6: even
    /// when the lists are unchanged; callers must be fast and non-blocking).
    pub fn add_listener(&self, listener: HealthListener) {
        self.listeners.write().push(listener);
    }

    /// Snapshot accessor: returns (healthy, unhealthy) with no torn reads (I1).
    pub fn targets(&self) -> (TargetList, TargetList) {
        let snapshot = self.snapshot.read();
        (snapshot.healthy.clone(), snapshot.unhealthy.clone())
    }

    /// Begins ticking until `stop` resolves. Runs on the ambient tokio runtime.
    pub fn start(self: &Arc<Self>, mut stop: tokio::sync::watch::Receiver<bool>) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.probe_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        monitor.tick().await;
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            monitor.stopped.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Runs one refresh+probe+classify+publish cycle. Exposed directly so
    /// tests can drive ticks deterministically instead of racing a timer.
    pub async fn tick(&self) {
        self.refresh_pass().await;
        let outcomes = self.probe_pass().await;
        self.classify_and_publish(outcomes);
    }

    /// Refresh pass (spec §4.2 step 1): serial, under a short lock, never
    /// held across probe I/O.
    async fn refresh_pass(&self) {
        if !self.refresh_requested.swap(false, Ordering::SeqCst) {
            return;
        }

        let fresh = self.provider.current_targets().await;

        let mut state = self.state.lock();
        let previous: std::collections::HashSet<Target> =
            state.targets_to_monitor.iter().cloned().collect();
        let current: std::collections::HashSet<Target> = fresh.iter().cloned().collect();

        let added: Vec<&Target> = current.difference(&previous).collect();
        let removed: Vec<&Target> = previous.difference(&current).collect();

        if !added.is_empty() {
            tracing::info!(?added, "health monitor: targets added");
        }
        if !removed.is_empty() {
            tracing::info!(?removed, "health monitor: targets removed");
        }

        for target in &removed {
            state.ledgers.remove(*target);
            state.states.remove(*target);
        }

        for target in &added {
            state.states.insert((*target).clone(), HealthState::Pending);
            state.ledgers.insert((*target).clone(), ProbeLedger::default());
        }

        state.targets_to_monitor = fresh;

        if !removed.is_empty() {
            drop(state);
            self.publish_removing(&removed);
        }
    }

    /// Removes targets from the published lists immediately on removal,
    /// independent of the next probe wave (spec §4.2 edge case, P3).
    fn publish_removing(&self, removed: &[&Target]) {
        let mut snapshot = self.snapshot.write();
        let before_healthy = snapshot.healthy.len();
        let before_unhealthy = snapshot.unhealthy.len();
        snapshot.healthy.retain(|t| !removed.contains(&t));
        snapshot.unhealthy.retain(|t| !removed.contains(&t));
        let changed =
            snapshot.healthy.len() != before_healthy || snapshot.unhealthy.len() != before_unhealthy;
        drop(snapshot);
        if changed {
            self.notify_listeners();
        }
    }

    /// Probe pass (spec §4.2 step 2): one task per target, joined before
    /// classification. In-flight probes for targets removed mid-wave are
    /// discarded by `classify_and_publish`'s membership check.
    async fn probe_pass(&self) -> Vec<(Target, bool)> {
        let targets = self.state.lock().targets_to_monitor.clone();

        let futures = targets.into_iter().map(|target| {
            let client = self.client.clone();
            let url = self.config.probe_url(&target);
            async move {
                let success = probe_once(&client, &url).await;
                (target, success)
            }
        });

        futures::future::join_all(futures).await
    }

    /// Classify (spec §4.2 steps 4-5): apply the per-target state machine,
    /// then publish if either list changed.
    fn classify_and_publish(&self, outcomes: Vec<(Target, bool)>) {
        let mut state = self.state.lock();
        let still_monitored: std::collections::HashSet<Target> =
            state.targets_to_monitor.iter().cloned().collect();

        let mut newly_healthy = Vec::new();
        let mut newly_unhealthy = Vec::new();

        for (target, success) in outcomes {
            // Discard in-flight results for targets removed between dispatch and join.
            if !still_monitored.contains(&target) {
                continue;
            }

            let ledger = state.ledgers.entry(target.clone()).or_default();

            // Tie-break (spec §4.2): failures win. Only one of success/failure
            // fires per probe today, but failure is applied first if both were
            // ever true for a single outcome.
            if !success {
                ledger.consecutive_successes = 0;
                if ledger.consecutive_failures < self.config.unhealthy_threshold {
                    ledger.consecutive_failures += 1;
                }
                if ledger.consecutive_failures >= self.config.unhealthy_threshold {
                    let current = state.states.get(&target).copied().unwrap_or(HealthState::Pending);
                    if current != HealthState::Unhealthy {
                        newly_unhealthy.push(target.clone());
                    }
                    state.states.insert(target.clone(), HealthState::Unhealthy);
                }
            } else {
                ledger.consecutive_failures = 0;
                if ledger.consecutive_successes < self.config.healthy_threshold {
                    ledger.consecutive_successes += 1;
                }
                if ledger.consecutive_successes >= self.config.healthy_threshold {
                    let current = state.states.get(&target).copied().unwrap_or(HealthState::Pending);
                    if current != HealthState::Healthy {
                        newly_healthy.push(target.clone());
                    }
                    state.states.insert(target.clone(), HealthState::Healthy);
                }
            }
        }
        drop(state);

        if newly_healthy.is_empty() && newly_unhealthy.is_empty() {
            return;
        }

        let mut snapshot = self.snapshot.write();
        for target in &newly_unhealthy {
            snapshot.healthy.retain(|t| t != target);
            if !snapshot.unhealthy.contains(target) {
                snapshot.unhealthy.push(target.clone());
            }
        }
        for target in &newly_healthy {
            snapshot.unhealthy.retain(|t| t != target);
            if !snapshot.healthy.contains(target) {
                snapshot.healthy.push(target.clone());
            }
        }
        drop(snapshot);

        self.notify_listeners();
    }

    fn notify_listeners(&self) {
        for listener in self.listeners.read().iter() {
            listener();
        }
    }
}

async fn probe_once(client: &reqwest::Client, url: &str) -> bool {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(%url, error = %err, "probe failed");
            return false;
        }
    };

    if response.status() != reqwest::StatusCode::OK {
        return false;
    }

    if let Err(err) = response.bytes().await {
        tracing::warn!(%url, error = %err, "probe failed: error closing response body");
        return false;
    }

    true
}
