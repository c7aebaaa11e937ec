//! Tower middleware that admits or rejects requests.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{OriginalUri, Request};
use axum::response::Response;
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::response::{apply_headers, rejection};
use super::scope::{derive_scope, ScopeMode};
use crate::ratelimit::{normalize, Clock, Decision, Scope, SlidingWindowLimiter, SystemClock};

/// What the gate decided for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The caller could not be identified; not limited
    Bypass,
    /// Within the limit
    Admitted(Decision),
    /// Over the limit
    Rejected(Decision),
    /// The counter store failed; admitted without headers
    FailedOpen,
}

/// Per-request admission logic shared by every clone of the middleware.
pub struct AdmissionGate {
    name: String,
    mode: ScopeMode,
    limiter: SlidingWindowLimiter,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("limiter", &self.limiter)
            .finish()
    }
}

impl AdmissionGate {
    /// Create a gate counting per `mode` with `limiter`.
    pub fn new(name: &str, mode: ScopeMode, limiter: SlidingWindowLimiter) -> Self {
        Self {
            name: name.to_string(),
            mode,
            limiter,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The gate's name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Work out who is calling which endpoint.
    ///
    /// Prefers the path as received over one a nesting router has stripped.
    pub fn identify<B>(&self, request: &Request<B>) -> Option<(Scope, String)> {
        let scope = derive_scope(self.mode, request)?;
        let path = request
            .extensions()
            .get::<OriginalUri>()
            .map(|OriginalUri(uri)| uri.path())
            .unwrap_or_else(|| request.uri().path());
        Some((scope, normalize(path)))
    }

    /// Decide for an identified caller. Never fails.
    pub async fn decide(&self, scope: &Scope, endpoint: &str) -> Verdict {
        match self.limiter.check(scope, endpoint, self.clock.now()).await {
            Ok(decision) if decision.allowed => Verdict::Admitted(decision),
            Ok(decision) => Verdict::Rejected(decision),
            Err(e) => {
                warn!(
                    gate = %self.name,
                    scope = %scope,
                    endpoint = endpoint,
                    error = %e,
                    "Counter store failure, admitting request"
                );
                Verdict::FailedOpen
            }
        }
    }

    /// Identify and decide in one step.
    pub async fn evaluate<B>(&self, request: &Request<B>) -> Verdict {
        match self.identify(request) {
            Some((scope, endpoint)) => self.decide(&scope, &endpoint).await,
            None => Verdict::Bypass,
        }
    }
}

/// Layer applying an [`AdmissionGate`] in front of a service.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    gate: Arc<AdmissionGate>,
}

impl AdmissionLayer {
    pub fn new(gate: AdmissionGate) -> Self {
        Self {
            gate: Arc::new(gate),
        }
    }

    /// The gate this layer applies.
    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            gate: self.gate.clone(),
        }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    gate: Arc<AdmissionGate>,
}

impl<S> Service<Request> for AdmissionService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // The ready service is the one that must handle this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let gate = self.gate.clone();

        // Identify before the first await: the request body is not Sync.
        let subject = gate.identify(&request);

        Box::pin(async move {
            let Some((scope, endpoint)) = subject else {
                debug!(gate = %gate.name(), "Caller not identified, skipping rate limit");
                return inner.call(request).await;
            };

            match gate.decide(&scope, &endpoint).await {
                Verdict::Admitted(decision) => {
                    let mut response = inner.call(request).await?;
                    apply_headers(response.headers_mut(), &decision);
                    Ok(response)
                }
                Verdict::Rejected(decision) => Ok(rejection(&decision)),
                Verdict::Bypass | Verdict::FailedOpen => inner.call(request).await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::response::{
        RejectionBody, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
    };
    use crate::gate::scope::{TenantId, X_FORWARDED_FOR};
    use crate::ratelimit::{ManualClock, Policy};
    use crate::store::{CounterStore, MemoryStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::header::RETRY_AFTER;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::any;
    use axum::Router;
    use std::time::Duration;
    use tower::ServiceExt;

    // 12.345 s into a minute.
    const NOW_MS: i64 = 1_700_000_052_345;
    const NEXT_MINUTE: i64 = 1_700_000_100;

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn batch_get(&self, _keys: &[String]) -> StoreResult<Vec<Option<u64>>> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn increment(&self, _key: &str, _delta: u64) -> StoreResult<u64> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn gate(mode: ScopeMode, policy: Policy, store: Arc<dyn CounterStore>) -> AdmissionGate {
        let clock = Arc::new(ManualClock::at_millis(NOW_MS));
        AdmissionGate::new("test", mode, SlidingWindowLimiter::new(store, policy))
            .with_clock(clock)
    }

    fn app(gate: AdmissionGate) -> Router {
        Router::new()
            .route("/", any(|| async { "ok" }))
            .route("/*rest", any(|| async { "ok" }))
            .layer(AdmissionLayer::new(gate))
    }

    fn tenant_request(tenant: &str, path: &str) -> Request {
        let mut request = HttpRequest::builder().uri(path).body(Body::empty()).unwrap();
        request.extensions_mut().insert(TenantId(tenant.to_string()));
        request
    }

    fn header(response: &Response, name: &axum::http::HeaderName) -> Option<String> {
        response
            .headers()
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_burst_scenario_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        let app = app(gate(
            ScopeMode::Tenant,
            Policy::new(5, "api").with_burst(10),
            store,
        ));

        for expected in (0..10).rev() {
            let response = app
                .clone()
                .oneshot(tenant_request("acme", "/v1/work-orders/456"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header(&response, &X_RATELIMIT_LIMIT).as_deref(), Some("10"));
            assert_eq!(
                header(&response, &X_RATELIMIT_REMAINING),
                Some(expected.to_string())
            );
            assert_eq!(
                header(&response, &X_RATELIMIT_RESET),
                Some(NEXT_MINUTE.to_string())
            );
        }

        // A different work order shares the normalized endpoint.
        let response = app
            .clone()
            .oneshot(tenant_request("acme", "/v1/work-orders/789"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, &RETRY_AFTER).as_deref(), Some("48"));
        assert_eq!(header(&response, &X_RATELIMIT_REMAINING).as_deref(), Some("0"));
        assert_eq!(
            header(&response, &X_RATELIMIT_RESET),
            Some(NEXT_MINUTE.to_string())
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: RejectionBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "rate_limit_exceeded");
        assert_eq!(body.retry_after, 48);
    }

    #[tokio::test]
    async fn test_tenants_do_not_share_counters() {
        let store = Arc::new(MemoryStore::new());
        let app = app(gate(ScopeMode::Tenant, Policy::new(2, "api"), store));

        for _ in 0..2 {
            app.clone()
                .oneshot(tenant_request("a", "/v1/incidents"))
                .await
                .unwrap();
        }
        let blocked = app
            .clone()
            .oneshot(tenant_request("a", "/v1/incidents"))
            .await
            .unwrap();
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = app
            .clone()
            .oneshot(tenant_request("b", "/v1/incidents"))
            .await
            .unwrap();
        assert_eq!(other.status(), StatusCode::OK);
        assert_eq!(header(&other, &X_RATELIMIT_REMAINING).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_unidentified_tenant_bypasses() {
        let store = Arc::new(MemoryStore::new());
        let app = app(gate(ScopeMode::Tenant, Policy::new(1, "api"), store.clone()));

        for _ in 0..5 {
            let request = HttpRequest::builder()
                .uri("/v1/incidents")
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(&X_RATELIMIT_LIMIT).is_none());
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_ip_gate_uses_forwarded_for() {
        let store = Arc::new(MemoryStore::new());
        let app = app(gate(ScopeMode::Ip, Policy::new(1, "public"), store));

        let request = |ip: &str| {
            HttpRequest::builder()
                .uri("/public/status")
                .header(X_FORWARDED_FOR, ip)
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request("203.0.113.7")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .clone()
            .oneshot(request("203.0.113.7, 10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = app.clone().oneshot(request("203.0.113.8")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let app = app(gate(
            ScopeMode::Tenant,
            Policy::new(1, "api"),
            Arc::new(FailingStore),
        ));

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(tenant_request("acme", "/v1/incidents"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(&X_RATELIMIT_LIMIT).is_none());
            assert!(response.headers().get(&X_RATELIMIT_REMAINING).is_none());
            assert!(response.headers().get(&X_RATELIMIT_RESET).is_none());
            assert!(response.headers().get(RETRY_AFTER).is_none());
        }
    }

    #[tokio::test]
    async fn test_evaluate_verdicts() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate(ScopeMode::Tenant, Policy::new(1, "api"), store);

        let anonymous = HttpRequest::builder().uri("/v1/x").body(()).unwrap();
        assert_eq!(gate.evaluate(&anonymous).await, Verdict::Bypass);

        let mut known = HttpRequest::builder().uri("/v1/x").body(()).unwrap();
        known.extensions_mut().insert(TenantId("acme".to_string()));
        assert!(matches!(gate.evaluate(&known).await, Verdict::Admitted(_)));
        assert!(matches!(gate.evaluate(&known).await, Verdict::Rejected(_)));
    }

    #[tokio::test]
    async fn test_evaluate_fail_open() {
        let gate = gate(ScopeMode::Tenant, Policy::new(1, "api"), Arc::new(FailingStore));
        let mut request = HttpRequest::builder().uri("/v1/x").body(()).unwrap();
        request.extensions_mut().insert(TenantId("acme".to_string()));
        assert_eq!(gate.evaluate(&request).await, Verdict::FailedOpen);
    }

    #[test]
    fn test_identify_prefers_original_uri() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate(ScopeMode::Tenant, Policy::new(1, "api"), store);

        let mut request = HttpRequest::builder().uri("/incidents/42").body(()).unwrap();
        request.extensions_mut().insert(TenantId("acme".to_string()));
        assert_eq!(
            gate.identify(&request).map(|(_, endpoint)| endpoint),
            Some("incidents/{id}".to_string())
        );

        let original: axum::http::Uri = "/v1/incidents/42".parse().unwrap();
        request.extensions_mut().insert(OriginalUri(original));
        assert_eq!(
            gate.identify(&request).map(|(_, endpoint)| endpoint),
            Some("v1/incidents/{id}".to_string())
        );
    }
}
