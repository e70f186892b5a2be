use crate::backend::RateLimitResult;
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use serde::Serialize;

pub static X_RATELIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-limit"));

pub static X_RATELIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-remaining"));

pub static X_RATELIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-reset"));

pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too many requests. Please try again later.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitedBody {
    error: &'static str,
    retry_after: u64,
}

/// Sets the following headers from the result of a check:
///
/// - `x-ratelimit-limit`
/// - `x-ratelimit-remaining`
/// - `x-ratelimit-reset` (UNIX time in seconds at which the window resets)
///
/// The status and body of the response are left alone.
pub fn add_rate_limit_headers(map: &mut HeaderMap, result: &RateLimitResult) {
    map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(result.limit));
    map.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(result.remaining),
    );
    map.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(result.reset_epoch_seconds()),
    );
}

/// The standard `429 Too Many Requests` response for a denied check.
///
/// Carries the rate limit headers, `retry-after` (seconds until the reset) and a JSON body of
/// the form `{"error": "...", "retryAfter": 42}`.
pub fn rate_limit_response(result: &RateLimitResult) -> HttpResponse {
    let retry_after = result.seconds_until_reset();
    let mut response = HttpResponse::TooManyRequests().json(RateLimitedBody {
        error: TOO_MANY_REQUESTS_MESSAGE,
        retry_after,
    });
    let map = response.headers_mut();
    add_rate_limit_headers(map, result);
    map.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(0u64));
    map.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
