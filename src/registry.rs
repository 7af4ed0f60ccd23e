//! Breaker Registry (spec §4.4): maps target → breaker, creating breakers
//! lazily and exactly once, and reconciling the Load Balancer strictly
//! after its own inserts (the ordering invariant that closes the race
//! where `next()` could return a target with no breaker yet).

use crate::breaker::{Breaker, BreakerFactory};
use crate::error::{RoutingError, RoutingResult};
use crate::load_balancer::LoadBalancer;
use crate::target::{Target, TargetList};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only source of the monitor's published health snapshot, kept
/// distinct from the full `HealthMonitor` type so the registry and load
/// balancer depend only on the narrow surface they actually need (mirrors
/// the Go original's `ServersHealthMonitorProvider` interface).
pub trait HealthSnapshotSource: Send + Sync {
    fn targets(&self) -> (TargetList, TargetList);
}

impl HealthSnapshotSource for crate::health::HealthMonitor {
    fn targets(&self) -> (TargetList, TargetList) {
        crate::health::HealthMonitor::targets(self)
    }
}

/// Maps each known target to its breaker (spec §4.4, I5).
pub struct BreakerRegistry {
    factory: Box<dyn BreakerFactory>,
    store: RwLock<HashMap<Target, Arc<dyn Breaker>>>,
}

impl BreakerRegistry {
    pub fn new(factory: Box<dyn BreakerFactory>) -> Arc<Self> {
        Arc::new(Self {
            factory,
            store: RwLock::new(HashMap::new()),
        })
    }

    /// Builds a registry and subscribes it to `monitor`'s health
    /// notifications, wiring each notification through to `lb.rebalance`
    /// with the registry's ordering invariant intact. Mirrors the Go
    /// original's `NewOxyCircuitBreakerFactory`, which subscribes itself to
    /// the health monitor at construction time.
    pub fn new_and_subscribe(
        factory: Box<dyn BreakerFactory>,
        monitor: &Arc<crate::health::HealthMonitor>,
        lb: Arc<LoadBalancer>,
    ) -> Arc<Self> {
        let registry = Self::new(factory);

        let registry_for_listener = Arc::clone(&registry);
        let monitor_for_listener = Arc::clone(monitor);
        let lb_for_listener = Arc::clone(&lb);
        monitor.add_listener(Box::new(move || {
            let (healthy, unhealthy) = monitor_for_listener.targets();
            if let Err(err) =
                registry_for_listener.on_health_changed(&healthy, &unhealthy, &lb_for_listener)
            {
                tracing::error!(%err, "breaker registry: failed to process health change");
            }
        }));

        registry
    }

    /// Returns the breaker for `target`. Fails only as a defensive
    /// assertion: in normal operation this is unreachable because breakers
    /// are materialized before the load balancer ever exposes the target
    /// (spec §4.4 ordering invariant).
    pub fn get(&self, target: &Target) -> RoutingResult<Arc<dyn Breaker>> {
        self.store
            .read()
            .get(target)
            .cloned()
            .ok_or_else(|| RoutingError::UnknownTarget(target.to_string()))
    }

    /// Health-monitor listener entry point: materializes breakers for any
    /// newly healthy target without one, evicts breakers for targets that
    /// are neither healthy nor unhealthy (i.e. have left the target list
    /// entirely), then rebalances the load balancer. Insertion strictly
    /// precedes the rebalance call.
    pub fn on_health_changed(
        &self,
        healthy: &[Target],
        unhealthy: &[Target],
        lb: &LoadBalancer,
    ) -> RoutingResult<()> {
        {
            let mut store = self.store.write();
            for target in healthy {
                if !store.contains_key(target) {
                    let breaker = self.factory.new_breaker()?;
                    tracing::info!(%target, "breaker registry: created breaker");
                    store.insert(target.clone(), Arc::from(breaker));
                }
            }

            let known: std::collections::HashSet<Target> =
                healthy.iter().chain(unhealthy.iter()).cloned().collect();
            store.retain(|target, _| {
                let keep = known.contains(target);
                if !keep {
                    tracing::info!(%target, "breaker registry: evicted breaker");
                }
                keep
            });
        }

        // Ordering invariant: breakers above are inserted before this call.
        lb.rebalance(healthy, unhealthy);
        Ok(())
    }
}
