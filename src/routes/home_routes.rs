use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::models::AppState;

#[derive(Serialize)]
pub struct HomeResponse {
    pub success: bool,
    pub message: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(home))
}

/// Liveness probe; no auth, no database.
pub async fn home() -> Json<HomeResponse> {
    Json(HomeResponse {
        success: true,
        message: "API is working",
    })
}
