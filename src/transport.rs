//! Routing Transport (spec §4.6): serves one outbound request with
//! alternate-target retry bounded by the healthy set's size.

use crate::breaker::{BreakerError, Delegate};
use crate::error::{RoutingError, RoutingResult};
use crate::load_balancer::LoadBalancer;
use crate::registry::BreakerRegistry;
use crate::target::Target;
use std::collections::HashSet;
use std::sync::Arc;

/// Per-request orchestrator: pick a target, hand off to its breaker plus a
/// delegate transport, and retry against an alternate target when (and
/// only when) the breaker short-circuited.
pub struct RoutingTransport {
    load_balancer: Arc<LoadBalancer>,
    registry: Arc<BreakerRegistry>,
    delegate: Arc<dyn Delegate>,
}

impl RoutingTransport {
    pub fn new(
        load_balancer: Arc<LoadBalancer>,
        registry: Arc<BreakerRegistry>,
        delegate: Arc<dyn Delegate>,
    ) -> Self {
        Self {
            load_balancer,
            registry,
            delegate,
        }
    }

    /// Serves `template` against the healthy set, retrying on alternates as
    /// long as the tried target's breaker was open (spec §4.6 algorithm).
    ///
    /// `template` is *not* mutated in place: each attempt is rewritten from
    /// this original template rather than from a previous attempt's
    /// already-rewritten request, closing the sharp edge spec §9 calls out
    /// under "Request mutation".
    pub async fn send(&self, template: &RequestTemplate) -> RoutingResult<reqwest::Response> {
        let first = self.load_balancer.next().map_err(|_| RoutingError::NoHealthyTarget)?;

        let mut target = first.clone();
        let mut seen: HashSet<Target> = HashSet::new();
        seen.insert(first);

        loop {
            let breaker = self.registry.get(&target)?;
            let request = template.rewrite_for(&target)?;

            let err = match breaker.execute_with(request, self.delegate.as_ref()).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !breaker.classify(&err) {
                let BreakerError::Delivery(err) = err else {
                    return Err(RoutingError::ServiceUnavailable { tried: seen.len() });
                };
                return Err(RoutingError::Delivery(err));
            }

            tracing::debug!(%target, "routing transport: breaker open, seeking alternate");

            let candidates = self.load_balancer.members();
            let next_target = candidates.into_iter().find(|t| !seen.contains(t));

            match next_target {
                Some(alternate) => {
                    seen.insert(alternate.clone());
                    target = alternate;
                }
                None => {
                    return Err(RoutingError::ServiceUnavailable { tried: seen.len() });
                }
            }
        }
    }
}

/// An immutable description of the outbound request, rewritten per attempt
/// against the *original* template rather than a previously-rewritten
/// request (spec §9).
///
/// The body, if any, is held as owned bytes rather than a `reqwest::Body`
/// so it can be replayed on every retry attempt. A body sourced from a
/// stream can only be read once and would otherwise go missing (silently,
/// since `reqwest::Body` gives no way to ask whether it is replayable)
/// on the second and later attempts; callers with a streaming body must
/// buffer it before handing it to `with_body`.
pub struct RequestTemplate {
    method: reqwest::Method,
    path_and_query: String,
    headers: reqwest::header::HeaderMap,
    body: Option<Vec<u8>>,
}

impl RequestTemplate {
    pub fn new(method: reqwest::Method, path_and_query: impl Into<String>) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers: reqwest::header::HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Rewrites the request so its authority becomes `target`, always
    /// starting from this template rather than a prior rewrite.
    fn rewrite_for(&self, target: &Target) -> RoutingResult<reqwest::Request> {
        let url_str = format!("https://{}{}", target.as_str(), self.path_and_query);
        let url = url::Url::parse(&url_str)
            .map_err(|e| RoutingError::Configuration(e.to_string()))?;

        let mut request = reqwest::Request::new(self.method.clone(), url);
        *request.headers_mut() = self.headers.clone();
        if let Some(body) = self.body.as_ref() {
            *request.body_mut() = Some(reqwest::Body::from(body.clone()));
        }
        Ok(request)
    }
}
