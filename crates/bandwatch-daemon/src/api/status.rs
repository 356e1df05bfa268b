//! Monitor status endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use bandwatch_core::StatusSnapshot;
use serde::Serialize;

use crate::state::AppState;

/// Status response: the monitored device plus the live snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Band address.
    pub device: String,
    /// Live snapshot.
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
}

/// Creates the status router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/status", get(get_status))
}

/// Returns the current status snapshot.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        device: state.device_address().to_string(),
        snapshot: state.status().await,
    })
}
