//! Fixed window rate limiting for the marketplace's HTTP handlers.
//!
//! Construct one [InMemoryBackend](backend::InMemoryBackend) at start up and share it, either
//! through the [RateLimiter] middleware or by passing it to handlers as `web::Data` and calling
//! [Backend::check](backend::Backend::check) directly.

pub mod backend;
mod middleware;
pub mod policy;
pub mod response;

pub use middleware::builder::RateLimiterBuilder;
pub use middleware::RateLimiter;
pub use policy::{RateLimitPolicy, RATE_LIMITS};
pub use response::{add_rate_limit_headers, rate_limit_response};
