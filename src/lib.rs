//! Client-side resilience layer for a set of HTTP(S) API servers that
//! present as a single logical endpoint.
//!
//! The crate composes four cooperating pieces:
//!
//! - [`health`]: actively probes a dynamic target set and maintains
//!   disjoint healthy/unhealthy lists with hysteresis.
//! - [`load_balancer`]: round-robin selection over the currently
//!   dispatchable set.
//! - [`breaker`] + [`registry`]: a per-target circuit breaker, created
//!   lazily the moment a target first becomes healthy.
//! - [`transport`]: the per-request orchestrator that ties the three
//!   together, retrying across alternates when a breaker is open.
//!
//! [`provider`] supplies the target list the monitor watches;
//! [`config`] and [`error`] are the ambient configuration/error surface.

pub mod breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod load_balancer;
pub mod provider;
pub mod registry;
pub mod target;
pub mod transport;

pub use breaker::{Breaker, BreakerError, BreakerFactory, Delegate, WindowedBreaker, WindowedBreakerFactory, WindowedBreakerPolicy};
pub use config::HealthMonitorConfig;
pub use error::{RoutingError, RoutingResult};
pub use health::{HealthListener, HealthMonitor, HealthSnapshot, HealthState};
pub use load_balancer::{LoadBalancer, Unavailable};
pub use provider::{ChangeListener, DynamicTargetProvider, StaticTargetProvider, TargetProvider};
pub use registry::{BreakerRegistry, HealthSnapshotSource};
pub use target::{Target, TargetList};
pub use transport::{RequestTemplate, RoutingTransport};
