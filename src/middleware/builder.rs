use crate::backend::{Backend, RateLimitInput, RateLimitResult};
use crate::middleware::{AllowedTransformation, DeniedResponse, RateLimiter};
use crate::response::{add_rate_limit_headers, rate_limit_response};
use actix_web::dev::ServiceRequest;
use actix_web::http::header::HeaderMap;
use actix_web::HttpResponse;
use std::future::Future;
use std::rc::Rc;

pub struct RateLimiterBuilder<BE, F> {
    backend: BE,
    input_fn: F,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
}

impl<BE, F, O> RateLimiterBuilder<BE, F>
where
    BE: Backend + 'static,
    F: Fn(&ServiceRequest) -> O,
    O: Future<Output = Result<RateLimitInput, actix_web::Error>>,
{
    pub(super) fn new(backend: BE, input_fn: F) -> Self {
        Self {
            backend,
            input_fn,
            allowed_transformation: None,
            denied_response: Rc::new(rate_limit_response) as Rc<DeniedResponse>,
        }
    }

    /// Sets the `x-ratelimit-limit`, `x-ratelimit-remaining` and `x-ratelimit-reset` headers on
    /// allowed responses, see [add_rate_limit_headers].
    ///
    /// Denied responses carry them by default.
    pub fn add_headers(mut self) -> Self {
        self.allowed_transformation =
            Some(Rc::new(add_rate_limit_headers) as Rc<AllowedTransformation>);
        self
    }

    /// In the event that the request is allowed:
    ///
    /// You can optionally mutate the response headers to include the rate limit status.
    ///
    /// By default no changes are made to the response.
    pub fn request_allowed_transformation<M>(mut self, mutation: Option<M>) -> Self
    where
        M: Fn(&mut HeaderMap, &RateLimitResult) + 'static,
    {
        self.allowed_transformation = mutation.map(|m| Rc::new(m) as Rc<AllowedTransformation>);
        self
    }

    /// In the event that the request is denied, configure the [HttpResponse] returned.
    ///
    /// Defaults to [rate_limit_response](crate::rate_limit_response).
    pub fn request_denied_response<R>(mut self, denied_response: R) -> Self
    where
        R: Fn(&RateLimitResult) -> HttpResponse + 'static,
    {
        self.denied_response = Rc::new(denied_response);
        self
    }

    pub fn build(self) -> RateLimiter<BE, F> {
        RateLimiter {
            backend: self.backend,
            input_fn: Rc::new(self.input_fn),
            allowed_transformation: self.allowed_transformation,
            denied_response: self.denied_response,
        }
    }
}
