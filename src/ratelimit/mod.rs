//! Rate limiting logic: endpoint normalization, counter keys and the
//! sliding-window estimator.

pub mod endpoint;
pub mod key;
mod limiter;
mod policy;
mod window;

pub use endpoint::normalize;
pub use key::{CounterKey, Scope};
pub use limiter::{sliding_count, Decision, SlidingWindowLimiter};
pub use policy::{Policy, DEFAULT_KEY_PREFIX, DEFAULT_REQUESTS_PER_MINUTE};
pub use window::{
    Clock, ManualClock, SystemClock, WindowPosition, COUNTER_TTL, WINDOW, WINDOW_SECS,
};
