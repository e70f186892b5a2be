use crate::backend::{Decision, InMemoryBackend, InputFunctionBuilder, RateLimitKey};
use crate::middleware::*;
use crate::policy::{RateLimitPolicy, CHECK_EMAIL, FORGOT_PASSWORD, PROPERTY_VIEW, RATE_LIMITS};
use crate::response::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
use crate::{add_rate_limit_headers, rate_limit_response};
use actix_web::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::rt::time::Instant;
use actix_web::test::{read_body, TestRequest};
use actix_web::{get, post, test, web, App, HttpResponse, Responder};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[get("/check-email")]
async fn check_email() -> impl Responder {
    HttpResponse::Ok().body("available")
}

async fn view_property(path: web::Path<String>) -> impl Responder {
    HttpResponse::Ok().body(path.into_inner())
}

#[derive(Deserialize)]
struct ForgotPassword {
    email: String,
}

#[post("/forgot-password")]
async fn forgot_password(
    limiter: web::Data<InMemoryBackend>,
    body: web::Json<ForgotPassword>,
) -> HttpResponse {
    let key = RateLimitKey::new(FORGOT_PASSWORD)
        .email(&body.email)
        .build();
    let result = limiter.check(&key, &RATE_LIMITS.forgot_password);
    if !result.is_allowed() {
        return rate_limit_response(&result);
    }
    let mut response = HttpResponse::Ok().body("reset link sent");
    add_rate_limit_headers(response.headers_mut(), &result);
    response
}

fn peer(ip: &str) -> SocketAddr {
    format!("{ip}:40000").parse().unwrap()
}

/// Records the keys it is asked about and admits everything.
#[derive(Clone, Default)]
struct RecordingBackend(Arc<Mutex<Vec<String>>>);

impl Backend for RecordingBackend {
    fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitResult {
        self.0.lock().unwrap().push(key.to_owned());
        RateLimitResult {
            decision: Decision::Allowed,
            limit: policy.max_requests(),
            remaining: policy.max_requests(),
            reset: Instant::now() + policy.window(),
        }
    }
}

#[actix_web::test]
async fn test_allow_deny() {
    let backend = InMemoryBackend::builder().build();
    let input_fn = InputFunctionBuilder::new(RATE_LIMITS.check_email)
        .custom_key(CHECK_EMAIL)
        .peer_ip_key()
        .build();
    let limiter = RateLimiter::builder(backend, input_fn).build();
    let app = test::init_service(App::new().service(check_email).wrap(limiter)).await;
    for _ in 0..5 {
        let request = TestRequest::get()
            .uri("/check-email")
            .peer_addr(peer("1.2.3.4"))
            .to_request();
        assert!(test::call_service(&app, request).await.status().is_success());
    }
    let request = TestRequest::get()
        .uri("/check-email")
        .peer_addr(peer("1.2.3.4"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let headers = response.headers();
    assert_eq!(headers.get(&*X_RATELIMIT_LIMIT).unwrap(), "5");
    assert_eq!(headers.get(&*X_RATELIMIT_REMAINING).unwrap(), "0");
    assert!(headers.contains_key(&*X_RATELIMIT_RESET));
    assert!(headers.contains_key(RETRY_AFTER));
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert!(body["error"].is_string());

    // A different client has its own quota
    let request = TestRequest::get()
        .uri("/check-email")
        .peer_addr(peer("5.6.7.8"))
        .to_request();
    assert!(test::call_service(&app, request).await.status().is_success());
}

#[actix_web::test]
async fn test_add_headers() {
    let backend = InMemoryBackend::builder().build();
    let input_fn = InputFunctionBuilder::new(RATE_LIMITS.check_email)
        .custom_key(CHECK_EMAIL)
        .peer_ip_key()
        .build();
    let limiter = RateLimiter::builder(backend, input_fn)
        .add_headers()
        .build();
    let app = test::init_service(App::new().service(check_email).wrap(limiter)).await;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let mut resets = Vec::new();
    for expected in ["4", "3"] {
        let request = TestRequest::get()
            .uri("/check-email")
            .peer_addr(peer("1.2.3.4"))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(&*X_RATELIMIT_LIMIT).unwrap(), "5");
        assert_eq!(
            response.headers().get(&*X_RATELIMIT_REMAINING).unwrap(),
            expected
        );
        assert!(!response.headers().contains_key(RETRY_AFTER));
        let reset: u64 = response
            .headers()
            .get(&*X_RATELIMIT_RESET)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(reset >= now + 59 && reset <= now + 62, "unexpected reset {reset}");
        resets.push(reset);
        assert_eq!(read_body(response).await, "available");
    }
    // Both requests fall into the same window
    assert_eq!(resets[0], resets[1]);
}

#[actix_web::test]
async fn test_custom_deny_response() {
    let backend = InMemoryBackend::builder().build();
    let input_fn = InputFunctionBuilder::new(RateLimitPolicy::new(1, Duration::from_secs(60)))
        .custom_key("custom")
        .build();
    let limiter = RateLimiter::builder(backend, input_fn)
        .request_denied_response(|result| {
            HttpResponse::build(StatusCode::IM_A_TEAPOT).body(format!("limit {}", result.limit))
        })
        .build();
    let app = test::init_service(App::new().service(check_email).wrap(limiter)).await;
    let request = TestRequest::get().uri("/check-email").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let request = TestRequest::get().uri("/check-email").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    let body = String::from_utf8(read_body(response).await.to_vec()).unwrap();
    assert_eq!(body, "limit 1");
}

#[actix_web::test]
async fn test_header_transformation() {
    let backend = RecordingBackend::default();
    let limiter = RateLimiter::builder(backend.clone(), |_req| async {
        Ok(RateLimitInput {
            key: "static".to_string(),
            policy: RateLimitPolicy::new(7, Duration::from_secs(1)),
        })
    })
    .request_allowed_transformation(Some(|headers: &mut HeaderMap, result: &RateLimitResult| {
        headers.insert(
            HeaderName::from_static("test-header"),
            HeaderValue::from(result.limit),
        );
    }))
    .build();
    let app = test::init_service(App::new().service(check_email).wrap(limiter)).await;
    let request = TestRequest::get().uri("/check-email").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("test-header").unwrap(), "7");
    assert_eq!(*backend.0.lock().unwrap(), vec!["static".to_string()]);
}

#[actix_web::test]
async fn test_input_failure() {
    let backend = RecordingBackend::default();
    let input_fn = InputFunctionBuilder::new(RATE_LIMITS.check_email)
        .custom_key(CHECK_EMAIL)
        .peer_ip_key()
        .build();
    let limiter = RateLimiter::builder(backend.clone(), input_fn).build();
    let app = test::init_service(App::new().service(check_email).wrap(limiter)).await;
    // No peer address is available, so no key can be built
    let request = TestRequest::get().uri("/check-email").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(backend.0.lock().unwrap().is_empty());
}

#[actix_web::test]
async fn test_property_view() {
    let backend = InMemoryBackend::builder().build();
    let input_fn = InputFunctionBuilder::new(RATE_LIMITS.property_view)
        .custom_key(PROPERTY_VIEW)
        .real_ip_key()
        .match_info_key("id")
        .build();
    let limiter = RateLimiter::builder(backend.clone(), input_fn).build();
    let app = test::init_service(
        App::new().service(
            web::resource("/properties/{id}/view")
                .wrap(limiter)
                .route(web::post().to(view_property)),
        ),
    )
    .await;
    let view = |id: &str| {
        TestRequest::post()
            .uri(&format!("/properties/{id}/view"))
            .insert_header(("x-forwarded-for", "1.2.3.4"))
            .to_request()
    };
    let response = test::call_service(&app, view("abc")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = test::call_service(&app, view("abc")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    // Another property is counted separately
    let response = test::call_service(&app, view("def")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(backend.len(), 2);
}

#[actix_web::test]
async fn test_forgot_password_handler() {
    let backend = InMemoryBackend::builder().build();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(backend))
            .service(forgot_password),
    )
    .await;
    // Differently cased addresses share one quota
    for (email, remaining) in [
        ("renter@example.com", "2"),
        ("Renter@Example.com", "1"),
        ("RENTER@EXAMPLE.COM", "0"),
    ] {
        let request = TestRequest::post()
            .uri("/forgot-password")
            .set_json(serde_json::json!({ "email": email }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(&*X_RATELIMIT_REMAINING).unwrap(),
            remaining
        );
    }
    let request = TestRequest::post()
        .uri("/forgot-password")
        .set_json(serde_json::json!({ "email": "renter@example.com" }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get(&*X_RATELIMIT_LIMIT).unwrap(), "3");
}
