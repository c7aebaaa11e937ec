//! Caller identification.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use serde::{Deserialize, Serialize};

use crate::ratelimit::Scope;

/// Tenant identity placed in request extensions by upstream authentication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantId(pub String);

/// Which identity a gate counts traffic against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    /// Count per authenticated tenant
    Tenant,
    /// Count per client address
    Ip,
}

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Derive the scope of a request, or `None` if the caller cannot be identified.
pub fn derive_scope<B>(mode: ScopeMode, request: &Request<B>) -> Option<Scope> {
    match mode {
        ScopeMode::Tenant => request
            .extensions()
            .get::<TenantId>()
            .filter(|tenant| !tenant.0.is_empty())
            .map(|tenant| Scope::Tenant(tenant.0.clone())),
        ScopeMode::Ip => client_ip(request).map(Scope::Ip),
    }
}

/// Resolve the client address.
///
/// Order: first `X-Forwarded-For` entry, then `X-Real-IP`, then the transport
/// peer address without its port.
pub fn client_ip<B>(request: &Request<B>) -> Option<String> {
    forwarded_for(request.headers())
        .or_else(|| real_ip(request.headers()))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(peer)| peer.ip().to_string())
        })
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(X_FORWARDED_FOR)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

fn real_ip(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(X_REAL_IP)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}
