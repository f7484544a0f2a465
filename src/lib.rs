/*!
Per-use-case rate limiting for actix-web 4, backed by Redis with an in-process fallback.

## Features

- **Use-case limiters**: login (5 / 15 min), API (100 / min) and contact form (3 / min)
- **Distributed**: atomic fixed-window counters in Redis, shared by every instance
- **Graceful degradation**: any Redis failure or timeout falls back to a local fixed-window counter
- **Uniform results**: both stores answer with the same [`store::RateLimitResult`]
- **Bounded memory**: the local store sweeps expired records once it grows past a threshold
- **Thread Safe**: local counters are updated under per-shard locks with DashMap


## Quick Start

Add this to your `Cargo.toml`:

```toml
[dependencies]
ratelimit-guard = "0.1"

# Or, without Redis support
ratelimit-guard = { version = "0.1", default-features = false }
```

Set `RATE_LIMIT_BACKEND_URL` and `RATE_LIMIT_BACKEND_TOKEN` to enable the
Redis store. Without them every check runs against the local store.

## Usage

### Checking a login attempt

```rust, no_run
# use ratelimit_guard::limiter::RateLimiters;
#
# #[tokio::main]
# async fn main() {
    // Read once at startup; the limiters are shared for the life of the process.
    let limiters = RateLimiters::from_env();

    let result = limiters.check_login("a@b.com").await;
    if !result.success {
        println!("locked out for {:?}", result.retry_after());
    }

    // After the password checked out, forget the failed attempts.
    limiters.reset_login("a@b.com").await;
# }
```

### Middleware

```rust, no_run
# use actix_web::{App, HttpServer, Responder, web};
# use ratelimit_guard::{RateLimit, config::RateLimitConfig, limiter::RateLimiters, store::Scope};
#
# async fn contact() -> impl Responder {
#     "Thanks!"
# }
#
# #[actix_web::main]
# async fn main() -> std::io::Result<()> {
    let limiters = RateLimiters::from_env();
    let limiter = limiters.get(Scope::Contact);
    // Rejected requests get a 429 with Retry-After by default.
    let config = RateLimitConfig::default();

    HttpServer::new(move || {
        App::new()
            .wrap(RateLimit::new(config.clone(), limiter.clone()))
            .route("/contact", web::post().to(contact))
    })
    .bind(("127.0.0.1", 8080))?
    .run()
    .await
# }
```
 */
pub mod config;
pub mod error;
pub mod limiter;
pub mod store;

use actix_service::{Service, Transform};
use actix_web::{
    Error,
    body::EitherBody,
    dev::{ServiceRequest, ServiceResponse},
    http::header::{HeaderMap, HeaderName, HeaderValue},
};
use futures_util::future::{LocalBoxFuture, Ready, ok};
use std::{
    rc::Rc,
    sync::Arc,
    task::{Context, Poll},
};

use crate::{config::RateLimitConfig, limiter::RateLimiter, store::RateLimitResult};

/// Header carrying the limit the request was checked against.
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
/// Header carrying the requests left in the window.
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Header carrying the end of the window, in epoch milliseconds.
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Middleware factory admitting requests through a [`RateLimiter`].
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
    config: Arc<RateLimitConfig>,
}

impl RateLimit {
    pub fn new(config: RateLimitConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            config: Arc::new(config),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitMiddleware {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            config: self.config.clone(),
        })
    }
}

pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
    limiter: Arc<RateLimiter>,
    config: Arc<RateLimitConfig>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = Arc::clone(&self.limiter);
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            let id = (config.get_id)(&req);
            let result = limiter.check(&id).await;

            if !result.success {
                let mut res = (config.on_exceed)(&id, &result, &req);
                insert_headers(res.headers_mut(), &result);
                return Ok(req.into_response(res).map_into_right_body());
            }

            let mut res = service.call(req).await?;
            insert_headers(res.headers_mut(), &result);
            Ok(res.map_into_left_body())
        })
    }
}

fn insert_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_LIMIT),
        HeaderValue::from(result.limit),
    );
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_REMAINING),
        HeaderValue::from(result.remaining),
    );
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_RESET),
        HeaderValue::from(result.reset),
    );
}
