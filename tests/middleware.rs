use actix_web::{
    App, HttpResponse,
    dev::ServiceResponse,
    http::{StatusCode, header},
    test, web,
};
use ratelimit_guard::{
    RateLimit, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
    config::RateLimitConfig,
    limiter::{Policy, RateLimiter, RateLimiters},
    store::{MemoryStore, Scope},
};
use std::{sync::Arc, time::Duration};

async fn submit() -> HttpResponse {
    HttpResponse::Ok().body("sent")
}

fn header_str<'a, B>(res: &'a ServiceResponse<B>, name: &str) -> Option<&'a str> {
    res.headers().get(name).and_then(|v| v.to_str().ok())
}

#[actix_web::test]
async fn fourth_contact_submission_gets_429() {
    let limiters = RateLimiters::new(None);
    let app = test::init_service(
        App::new()
            .wrap(RateLimit::new(
                RateLimitConfig::default(),
                limiters.get(Scope::Contact),
            ))
            .route("/contact", web::post().to(submit)),
    )
    .await;

    for expected in ["2", "1", "0"] {
        let req = test::TestRequest::post()
            .uri("/contact")
            .peer_addr("203.0.113.5:4000".parse().unwrap())
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(header_str(&res, X_RATELIMIT_LIMIT), Some("3"));
        assert_eq!(header_str(&res, X_RATELIMIT_REMAINING), Some(expected));
        assert!(header_str(&res, X_RATELIMIT_RESET).is_some());
    }

    let req = test::TestRequest::post()
        .uri("/contact")
        .peer_addr("203.0.113.5:4000".parse().unwrap())
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&res, X_RATELIMIT_REMAINING), Some("0"));
    let retry: u64 = header_str(&res, header::RETRY_AFTER.as_str())
        .and_then(|v| v.parse().ok())
        .unwrap();
    assert!((1..=60).contains(&retry));

    let body = test::read_body(res).await;
    assert!(
        std::str::from_utf8(&body)
            .unwrap()
            .starts_with("Too many requests, retry in")
    );

    // Another client is unaffected.
    let req = test::TestRequest::post()
        .uri("/contact")
        .peer_addr("198.51.100.9:4000".parse().unwrap())
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[actix_web::test]
async fn custom_id_and_exceeded_handler() {
    let limiter = Arc::new(RateLimiter::new(
        Scope::Api,
        Policy::new(1, Duration::from_secs(60)),
        Arc::new(MemoryStore::new()),
    ));
    let config = RateLimitConfig::default()
        .id(|req| {
            req.headers()
                .get("X-Client-Id")
                .and_then(|h| h.to_str().ok())
                .unwrap_or("anonymous")
                .to_string()
        })
        .exceeded(|id, result, _req| {
            HttpResponse::TooManyRequests().body(format!("{} over {}", id, result.limit))
        });

    let app = test::init_service(
        App::new()
            .wrap(RateLimit::new(config, limiter))
            .route("/", web::get().to(submit)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/")
        .insert_header(("X-Client-Id", "alice"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/")
        .insert_header(("X-Client-Id", "alice"))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(test::read_body(res).await, "alice over 1");

    let req = test::TestRequest::get()
        .uri("/")
        .insert_header(("X-Client-Id", "bob"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}
