//! Error taxonomy for the routing core.

use thiserror::Error;

/// Errors surfaced by the triad's public operations.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// The load balancer has nothing dispatchable.
    #[error("no healthy target available")]
    NoHealthyTarget,

    /// Every alternate tried during a single request had its breaker open.
    #[error("service unavailable after trying {tried} target(s)")]
    ServiceUnavailable { tried: usize },

    /// The delegate transport returned an error that was not an open-breaker rejection.
    #[error("delivery error: {0}")]
    Delivery(#[from] reqwest::Error),

    /// Invalid configuration supplied at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The breaker registry was asked for a target it has no breaker for.
    ///
    /// Per the registry ordering invariant this should be unreachable in
    /// normal operation; surfacing it as an error (rather than panicking)
    /// lets callers decide how to treat a programming error.
    #[error("no circuit breaker registered for target {0:?}")]
    UnknownTarget(String),
}

pub type RoutingResult<T> = Result<T, RoutingError>;
