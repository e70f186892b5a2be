pub mod builder;
#[cfg(test)]
mod tests;

use crate::backend::{Backend, RateLimitInput, RateLimitResult};
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::HeaderMap;
use actix_web::HttpResponse;
use builder::RateLimiterBuilder;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::cell::RefCell;
use std::{future::Future, rc::Rc};

type AllowedTransformation = dyn Fn(&mut HeaderMap, &RateLimitResult);
type DeniedResponse = dyn Fn(&RateLimitResult) -> HttpResponse;

/// Rate limit middleware.
pub struct RateLimiter<BE, F> {
    backend: BE,
    input_fn: Rc<F>,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
}

impl<BE, F, O> Clone for RateLimiter<BE, F>
where
    BE: Backend + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<RateLimitInput, actix_web::Error>>,
{
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            input_fn: self.input_fn.clone(),
            allowed_transformation: self.allowed_transformation.clone(),
            denied_response: self.denied_response.clone(),
        }
    }
}

impl<BE, F, O> RateLimiter<BE, F>
where
    BE: Backend + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<RateLimitInput, actix_web::Error>>,
{
    /// # Arguments
    ///
    /// * `backend`: A rate limiting algorithm and store implementation.
    /// * `input_fn`: A future that produces the key and policy based on the incoming request.
    pub fn builder(backend: BE, input_fn: F) -> RateLimiterBuilder<BE, F> {
        RateLimiterBuilder::new(backend, input_fn)
    }
}

impl<S, B, BE, F, O> Transform<S, ServiceRequest> for RateLimiter<BE, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    BE: Backend + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<RateLimitInput, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = RateLimiterMiddleware<S, BE, F>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimiterMiddleware {
            service: Rc::new(RefCell::new(service)),
            backend: self.backend.clone(),
            input_fn: Rc::clone(&self.input_fn),
            allowed_transformation: self.allowed_transformation.clone(),
            denied_response: self.denied_response.clone(),
        })
    }
}

pub struct RateLimiterMiddleware<S, BE, F> {
    service: Rc<RefCell<S>>,
    backend: BE,
    input_fn: Rc<F>,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
}

impl<S, B, BE, F, O> Service<ServiceRequest> for RateLimiterMiddleware<S, BE, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    BE: Backend + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<RateLimitInput, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let backend = self.backend.clone();
        let input_fn = self.input_fn.clone();
        let allowed_transformation = self.allowed_transformation.clone();
        let denied_response = self.denied_response.clone();

        Box::pin(async move {
            let input = match (input_fn)(&req).await {
                Ok(input) => input,
                Err(e) => {
                    log::error!("Rate limiter input function failed: {e}");
                    return Ok(req.into_response(e.error_response()).map_into_right_body());
                }
            };

            let result = backend.check(&input.key, &input.policy);
            if result.decision.is_denied() {
                log::debug!(
                    "Rate limit exceeded for key {}, resets in {}s",
                    input.key,
                    result.seconds_until_reset()
                );
                let response: HttpResponse = (denied_response)(&result);
                return Ok(req.into_response(response).map_into_right_body());
            }

            let mut service_response = service.call(req).await?;

            if let Some(transformation) = allowed_transformation {
                (transformation)(service_response.headers_mut(), &result);
            }

            Ok(service_response.map_into_left_body())
        })
    }
}
