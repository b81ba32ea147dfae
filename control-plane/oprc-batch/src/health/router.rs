use axum::{Router, routing::get};

pub const HEALTHZ_PATH: &str = "/healthz";
pub const PING_PATH: &str = "/healthz/ping";

/// Fixed liveness routes. Any other path is answered with 404.
pub fn health_router() -> Router {
    Router::new()
        .route(HEALTHZ_PATH, get(ok))
        .route(PING_PATH, get(ok))
}

async fn ok() -> &'static str {
    "ok"
}
