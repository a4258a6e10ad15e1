pub mod posts;

use std::sync::Arc;

use axum::Router;
use axum::extract::FromRequestParts;
use axum::http::{StatusCode, request::Parts};
use axum::routing::get;

use crate::AppState;

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .merge(posts::routes())
}

async fn health() -> &'static str {
    "ok"
}

/// Extractor for the requesting user's id.
///
/// Session handling lives in front of this service; by the time a request
/// gets here the gateway has resolved it to an `x-user-id` header.
pub struct AuthUser(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .map(AuthUser)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}
