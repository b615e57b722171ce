//! HTTP handlers for reviewq-api.

pub mod events;
pub mod qa;
pub mod reviews;
pub mod tasks;

use axum::Json;

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
