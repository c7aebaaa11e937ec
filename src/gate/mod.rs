//! HTTP admission gate: tower middleware, caller identification and the
//! rate limit response surface.

mod layer;
mod response;
mod scope;
mod server;

pub use layer::{AdmissionGate, AdmissionLayer, AdmissionService, Verdict};
pub use response::{
    apply_headers, rejection, RejectionBody, RATE_LIMIT_EXCEEDED, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use scope::{client_ip, derive_scope, ScopeMode, TenantId, X_FORWARDED_FOR, X_REAL_IP};
pub use server::{router, HttpServer, X_TENANT_ID};
