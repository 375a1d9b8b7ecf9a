use axum::Json;

/// GET /health: liveness probe, no auth and no maintenance gate.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "confab-gateway",
    }))
}
