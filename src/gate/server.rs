//! HTTP server hosting gated routes.

use std::net::SocketAddr;

use axum::extract::{OriginalUri, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::layer::AdmissionLayer;
use super::scope::TenantId;
use crate::error::Result;

/// Header a trusted upstream authenticator uses to pass the tenant identity.
pub const X_TENANT_ID: &str = "x-tenant-id";

/// Build the service router.
///
/// `/v1/*` is limited per tenant, `/public/*` per client address and
/// `/health` is never limited.
pub fn router(tenant_gate: AdmissionLayer, ip_gate: AdmissionLayer) -> Router {
    let tenant_routes = Router::new()
        .route("/v1/*rest", any(echo))
        .layer(tenant_gate)
        .layer(middleware::from_fn(tenant_from_header));

    let public_routes = Router::new()
        .route("/public/*rest", any(echo))
        .layer(ip_gate);

    Router::new()
        .route("/health", get(health))
        .merge(tenant_routes)
        .merge(public_routes)
}

/// Move the upstream-supplied tenant header into request extensions.
async fn tenant_from_header(mut request: Request, next: Next) -> Response {
    let tenant = request
        .headers()
        .get(X_TENANT_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| TenantId(value.to_string()));

    if let Some(tenant) = tenant {
        request.extensions_mut().insert(tenant);
    }

    next.run(request).await
}

async fn echo(OriginalUri(uri): OriginalUri) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "path": uri.path() }))
}

async fn health() -> &'static str {
    "ok"
}

/// HTTP server for the gated routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Routes to serve
    router: Router,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
