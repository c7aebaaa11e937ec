//! Scope and counter key generation.

use std::fmt;

/// The identity traffic is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// An authenticated tenant
    Tenant(String),
    /// A client network address
    Ip(String),
}

impl Scope {
    /// Tag written into counter keys so different scope kinds never collide.
    pub fn kind(&self) -> &'static str {
        match self {
            Scope::Tenant(_) => "tenant",
            Scope::Ip(_) => "ip",
        }
    }

    /// The scope value (tenant id or address).
    pub fn value(&self) -> &str {
        match self {
            Scope::Tenant(value) | Scope::Ip(value) => value,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.value())
    }
}

/// Build a counter-store key.
///
/// Format: `{prefix}:{scope_kind}:{scope_value}:{endpoint}:{window_start}`
///
/// Parts are joined without escaping. The scope kind always separates tenant
/// and IP keys, but within one kind a value containing `:` can produce the
/// same key as a different value/endpoint pair (`a:b` on `c` and `a` on
/// `b:c`). IPv6 scope values contain `:` and are kept as is.
pub fn build(
    prefix: &str,
    scope_kind: &str,
    scope_value: &str,
    endpoint: &str,
    window_start: i64,
) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        prefix, scope_kind, scope_value, endpoint, window_start
    )
}

/// A key that identifies the counters of one scope on one endpoint.
///
/// The window start is supplied separately, so the same `CounterKey` yields
/// both the current and the previous window's store keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Namespace shared by every key of one gate
    pub prefix: String,
    /// Who is being counted
    pub scope: Scope,
    /// Normalized endpoint signature
    pub endpoint: String,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(prefix: &str, scope: Scope, endpoint: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            scope,
            endpoint: endpoint.to_string(),
        }
    }

    /// The store key for the window starting at `window_start`.
    pub fn for_window(&self, window_start: i64) -> String {
        build(
            &self.prefix,
            self.scope.kind(),
            self.scope.value(),
            &self.endpoint,
            window_start,
        )
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.prefix, self.scope, self.endpoint)
    }
}
