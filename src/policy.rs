use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Longest window a policy may use.
pub const MAX_WINDOW: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Key prefix for the email availability check.
pub const CHECK_EMAIL: &str = "check-email";
/// Key prefix for password reset requests.
pub const FORGOT_PASSWORD: &str = "forgot-password";
/// Key prefix for property view counting.
pub const PROPERTY_VIEW: &str = "property-view";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("A rate limit policy must allow at least one request")]
    ZeroRequests,
    #[error("A rate limit policy window must be non-zero")]
    ZeroWindow,
    #[error("A rate limit policy window must not exceed {} seconds", MAX_WINDOW.as_secs())]
    WindowTooLarge,
}

/// How many requests a single key may make within a fixed window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "PolicyConfig")]
pub struct RateLimitPolicy {
    max_requests: u64,
    window: Duration,
}

impl RateLimitPolicy {
    /// # Panics
    ///
    /// If `max_requests` or `window` is zero, or `window` exceeds [MAX_WINDOW]. When used in a
    /// `const` item this is reported at compile time.
    pub const fn new(max_requests: u64, window: Duration) -> Self {
        assert!(max_requests > 0, "max_requests must be non-zero");
        assert!(!window.is_zero(), "window must be non-zero");
        assert!(
            window.as_nanos() <= MAX_WINDOW.as_nanos(),
            "window must not exceed MAX_WINDOW"
        );
        Self {
            max_requests,
            window,
        }
    }

    /// Validating constructor for policies that come from runtime configuration.
    pub fn try_new(max_requests: u64, window: Duration) -> Result<Self, PolicyError> {
        if max_requests == 0 {
            return Err(PolicyError::ZeroRequests);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        if window > MAX_WINDOW {
            return Err(PolicyError::WindowTooLarge);
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    /// The total requests to be allowed within the window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// The length of the window.
    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_ms(&self) -> u128 {
        self.window.as_millis()
    }
}

#[derive(Deserialize)]
struct PolicyConfig {
    max_requests: u64,
    window_ms: u64,
}

impl TryFrom<PolicyConfig> for RateLimitPolicy {
    type Error = PolicyError;

    fn try_from(config: PolicyConfig) -> Result<Self, Self::Error> {
        RateLimitPolicy::try_new(config.max_requests, Duration::from_millis(config.window_ms))
    }
}

/// The policy applied to each rate limited route.
#[derive(Debug, Copy, Clone)]
pub struct RateLimits {
    pub check_email: RateLimitPolicy,
    pub forgot_password: RateLimitPolicy,
    pub property_view: RateLimitPolicy,
}

pub const RATE_LIMITS: RateLimits = RateLimits {
    check_email: RateLimitPolicy::new(5, Duration::from_millis(60_000)),
    forgot_password: RateLimitPolicy::new(3, Duration::from_millis(3_600_000)),
    property_view: RateLimitPolicy::new(1, Duration::from_millis(3_600_000)),
};
