//! HTTP API routes and handlers.
//!
//! Read-only: the API reports what the supervisor is doing and never
//! controls it.
//!
//! ```text
//! /health          - Liveness, version and uptime
//! /api/status      - Current monitor status snapshot
//! ```

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod health;
pub mod status;

/// Creates the combined API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(status::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = create_router(AppState::new("AA:BB:CC:DD:EE:FF"));
        let response = app
            .oneshot(Request::builder().uri("/api/control").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
