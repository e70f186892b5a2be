mod input_builder;
mod memory;

pub use input_builder::{
    client_ip, ClientIp, Error, InputFunctionBuilder, RateLimitInputFuture, RateLimitKey,
};
pub use memory::{InMemoryBackend, InMemoryBackendBuilder, DEFAULT_GC_INTERVAL_SECONDS};

use crate::policy::RateLimitPolicy;
use actix_web::rt::time::Instant;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allowed
        } else {
            Self::Denied
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// Describes an implementation of a rate limiting store and algorithm.
///
/// A Backend is required to implement [Clone], usually this means wrapping your data store within
/// an [Arc](std::sync::Arc). Every clone must observe the same counters.
pub trait Backend: Clone {
    /// Count a request against `key` and decide whether it is admitted.
    ///
    /// This never blocks and never fails; exhausting the quota is reported through
    /// [RateLimitResult::decision].
    fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitResult;
}

/// Input for the [RateLimiter](crate::RateLimiter) middleware, produced per request.
#[derive(Debug, Clone)]
pub struct RateLimitInput {
    /// The rate limit key to be used for this request.
    pub key: String,
    /// The policy to apply to the key.
    pub policy: RateLimitPolicy,
}

/// The outcome of a single [Backend::check].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RateLimitResult {
    pub decision: Decision,
    /// Total number of requests that are permitted within the window.
    pub limit: u64,
    /// Number of requests that will be permitted until the window resets.
    pub remaining: u64,
    /// Time at which the window resets.
    pub reset: Instant,
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }

    /// Seconds until the window resets (rounded upwards, so that it is guaranteed to be reset
    /// after waiting for the duration).
    pub fn seconds_until_reset(&self) -> u64 {
        ceil_secs(self.reset.saturating_duration_since(Instant::now()))
    }

    /// The reset time as seconds since the UNIX epoch, rounded upwards.
    pub fn reset_epoch_seconds(&self) -> u64 {
        let until = self.reset.saturating_duration_since(Instant::now());
        SystemTime::now()
            .checked_add(until)
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(ceil_secs)
            .unwrap_or(0)
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis() as f64;
    (millis / 1000f64).ceil() as u64
}
