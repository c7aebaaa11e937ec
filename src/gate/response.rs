//! Rate limit headers and the rejection response.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::ratelimit::Decision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Error code carried by every rejection body.
pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
}

impl RejectionBody {
    fn new(retry_after: u64) -> Self {
        Self {
            error: RATE_LIMIT_EXCEEDED.to_string(),
            message: format!(
                "Too many requests. Retry after {} second{}.",
                retry_after,
                if retry_after == 1 { "" } else { "s" }
            ),
            retry_after,
        }
    }
}

/// Write the `X-RateLimit-*` headers for `decision`.
pub fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at));
}

/// Build the 429 response for a rejected decision.
pub fn rejection(decision: &Decision) -> Response {
    let retry_after = decision.retry_after_secs.unwrap_or(1).max(1);

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(RejectionBody::new(retry_after)),
    )
        .into_response();

    let headers = response.headers_mut();
    apply_headers(headers, decision);
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));

    response
}
