use actix_web::{App, HttpResponse, HttpServer, Responder, web};
use ratelimit_guard::{
    RateLimit,
    config::{RateLimitConfig, too_many_requests},
    limiter::RateLimiters,
    store::Scope,
};
use std::sync::Arc;

struct Credentials {
    email: String,
    password: String,
}

async fn login(
    limiters: web::Data<Arc<RateLimiters>>,
    form: web::Form<std::collections::HashMap<String, String>>,
) -> impl Responder {
    let credentials = Credentials {
        email: form.get("email").cloned().unwrap_or_default(),
        password: form.get("password").cloned().unwrap_or_default(),
    };

    let result = limiters.check_login(&credentials.email).await;
    if !result.success {
        return too_many_requests(&result);
    }

    // Stand-in for a real password check.
    if credentials.password != "hunter2" {
        return HttpResponse::Unauthorized().body(format!(
            "Wrong password, {} attempts left",
            result.remaining
        ));
    }

    limiters.reset_login(&credentials.email).await;
    HttpResponse::Ok().body("Welcome back!")
}

async fn index() -> impl Responder {
    "Hello world!"
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Picks Redis when RATE_LIMIT_BACKEND_URL and RATE_LIMIT_BACKEND_TOKEN are set.
    let limiters = Arc::new(RateLimiters::from_env());

    println!("🚀 Starting server at http://127.0.0.1:8080");
    println!(
        "📊 Distributed backend: {}",
        if limiters.is_backend_configured() {
            "redis"
        } else {
            "none, local counters only"
        }
    );
    println!("🧪 Test with: curl -d 'email=a@b.com&password=nope' http://localhost:8080/login");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(limiters.clone()))
            // Keyed by email inside the handler.
            .route("/login", web::post().to(login))
            // Keyed by client IP through the middleware.
            .service(
                web::resource("/")
                    .wrap(RateLimit::new(
                        RateLimitConfig::default(),
                        limiters.get(Scope::Api),
                    ))
                    .route(web::get().to(index)),
            )
    })
    .bind(("127.0.0.1", 8080))?
    .run()
    .await
}
