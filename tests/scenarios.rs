//! End-to-end exercises of the full triad (Health Monitor, Breaker
//! Registry, Load Balancer, Routing Transport) wired together the way an
//! embedding application would, against the literal scenarios from the
//! Health Monitor and Routing Transport component designs (H=3, U=2).

use ha_routing_core::{
    BreakerRegistry, DynamicTargetProvider, HealthMonitorConfig, LoadBalancer, RequestTemplate,
    RoutingError, RoutingTransport, Target, WindowedBreakerFactory, WindowedBreakerPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn target_for(server: &MockServer) -> Target {
    Target::new(
        server
            .uri()
            .strip_prefix("http://")
            .expect("wiremock always serves plain http")
            .to_string(),
    )
}

fn monitor_config() -> HealthMonitorConfig {
    HealthMonitorConfig {
        probe_scheme: "http".to_string(),
        probe_interval: Duration::from_millis(10),
        probe_timeout: Duration::from_secs(1),
        healthy_threshold: 3,
        unhealthy_threshold: 2,
        ..HealthMonitorConfig::default()
    }
}

/// S1/S2/S3/S4 driven against a live monitor probing real (mock) HTTP
/// servers: hysteresis rise on H consecutive successes, a lone failure not
/// demoting, demotion after U consecutive failures, and immediate removal
/// on membership change. All observed through the registry and load
/// balancer a real application would actually consult.
#[tokio::test]
async fn health_state_propagates_through_registry_and_load_balancer() {
    let healthy_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/readyz"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&healthy_server)
        .await;

    let flaky_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/readyz"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&flaky_server)
        .await;

    let a = target_for(&healthy_server);
    let b = target_for(&flaky_server);

    let provider = Arc::new(DynamicTargetProvider::new(vec![a.clone(), b.clone()]));
    let monitor = ha_routing_core::HealthMonitor::new(provider.clone(), monitor_config()).unwrap();
    let lb = Arc::new(LoadBalancer::new());
    let registry = BreakerRegistry::new_and_subscribe(
        Box::new(WindowedBreakerFactory::new(WindowedBreakerPolicy::default())),
        &monitor,
        Arc::clone(&lb),
    );

    // S1: three consecutive successful ticks are required before either
    // target is dispatchable.
    for _ in 0..2 {
        monitor.tick().await;
        assert!(lb.members().is_empty(), "must not rise before the H-th success");
    }
    monitor.tick().await;
    let members: std::collections::HashSet<_> = lb.members().into_iter().collect();
    assert_eq!(members, [a.clone(), b.clone()].into_iter().collect());
    for t in [&a, &b] {
        assert!(registry.get(t).is_ok(), "registry must hold a breaker before the LB exposes it (P4)");
    }

    // S2: make B's server fail once. A single bad tick must not demote it.
    flaky_server.reset().await;
    Mock::given(method("GET"))
        .and(path("/readyz"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&flaky_server)
        .await;
    monitor.tick().await;
    let members: std::collections::HashSet<_> = lb.members().into_iter().collect();
    assert_eq!(members, [a.clone(), b.clone()].into_iter().collect());

    // S3: a second consecutive failure (U=2) demotes B out of the dispatchable set.
    monitor.tick().await;
    let members = lb.members();
    assert_eq!(members, vec![a.clone()]);
    assert!(registry.get(&b).is_ok(), "breaker persists across an unhealthy transition");

    // S4: B leaves the target list entirely; removal is immediate and its
    // breaker is evicted on the very next tick's refresh pass.
    provider.set_targets(vec![a.clone()]);
    monitor.enqueue();
    monitor.tick().await;
    assert_eq!(lb.members(), vec![a.clone()]);
    assert!(registry.get(&b).is_err(), "evicted target has no breaker left");
}

struct ScriptedBreakerFactory {
    open_for: Vec<bool>,
    index: std::sync::atomic::AtomicUsize,
}

struct ScriptedBreaker {
    force_open: bool,
    inner: ha_routing_core::WindowedBreaker,
}

#[async_trait::async_trait]
impl ha_routing_core::Breaker for ScriptedBreaker {
    async fn execute_with(
        &self,
        request: reqwest::Request,
        delegate: &dyn ha_routing_core::Delegate,
    ) -> Result<reqwest::Response, ha_routing_core::BreakerError> {
        if self.force_open {
            return Err(ha_routing_core::BreakerError::Open);
        }
        self.inner.execute_with(request, delegate).await
    }
}

impl ha_routing_core::BreakerFactory for ScriptedBreakerFactory {
    fn new_breaker(&self) -> ha_routing_core::RoutingResult<Box<dyn ha_routing_core::Breaker>> {
        let i = self.index.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Box::new(ScriptedBreaker {
            force_open: self.open_for.get(i).copied().unwrap_or(false),
            inner: ha_routing_core::WindowedBreaker::new(WindowedBreakerPolicy::default()),
        }))
    }
}

struct RecordingDelegate {
    calls: parking_lot::Mutex<Vec<String>>,
}

impl RecordingDelegate {
    fn new() -> Self {
        Self {
            calls: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait::async_trait]
impl ha_routing_core::Delegate for RecordingDelegate {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
        self.calls.lock().push(request.url().to_string());
        let response = http::Response::builder()
            .status(200)
            .body(Vec::<u8>::new())
            .unwrap()
            .map(reqwest::Body::from);
        Ok(response.into())
    }
}

/// S5: the transport retries against an alternate target when the first
/// pick's breaker is open, reaching the next candidate instead.
#[tokio::test]
async fn retries_past_an_open_breaker_to_reach_an_alternate() {
    let a = Target::new("a:1");
    let b = Target::new("b:2");

    let factory = ScriptedBreakerFactory {
        open_for: vec![true, false],
        index: std::sync::atomic::AtomicUsize::new(0),
    };
    let registry = BreakerRegistry::new(Box::new(factory));
    let lb = Arc::new(LoadBalancer::new());
    registry.on_health_changed(&[a, b], &[], &lb).unwrap();

    let delegate = Arc::new(RecordingDelegate::new());
    let transport = RoutingTransport::new(Arc::clone(&lb), registry, delegate.clone());
    let template = RequestTemplate::new(reqwest::Method::GET, "/v1/ping");
    let response = transport.send(&template).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(delegate.call_count(), 1, "only the alternate's delegate is invoked");
}

/// S6: when every candidate's breaker is open, the transport reports
/// exhaustion with the number of targets it tried, never touching a
/// delegate.
#[tokio::test]
async fn exhausts_all_candidates_and_reports_the_tried_count() {
    let factory = ScriptedBreakerFactory {
        open_for: vec![true, true],
        index: std::sync::atomic::AtomicUsize::new(0),
    };
    let registry = BreakerRegistry::new(Box::new(factory));
    let lb = Arc::new(LoadBalancer::new());
    registry
        .on_health_changed(&[Target::new("a:1"), Target::new("b:2")], &[], &lb)
        .unwrap();

    let transport = RoutingTransport::new(Arc::clone(&lb), registry, Arc::new(reqwest::Client::new()));
    let template = RequestTemplate::new(reqwest::Method::GET, "/v1/ping");
    let err = transport.send(&template).await.unwrap_err();
    match err {
        RoutingError::ServiceUnavailable { tried } => assert_eq!(tried, 2),
        other => panic!("expected ServiceUnavailable, got {other:?}"),
    }
}
