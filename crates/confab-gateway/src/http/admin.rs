//! Root-only system operations.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use confab_core::policy;
use confab_core::ApiError;

use crate::app::AppState;
use crate::error::{HttpError, HttpResult};
use crate::extract::Auth;

#[derive(Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

#[derive(Serialize)]
pub struct MaintenanceResponse {
    pub maintenance_mode: bool,
    pub message: String,
}

/// POST /admin/maintenance: while enabled, every non-root request is
/// rejected at admission with 503.
pub async fn toggle_maintenance(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Json(req): Json<MaintenanceRequest>,
) -> HttpResult<Json<MaintenanceResponse>> {
    if !policy::can_toggle_maintenance(&principal) {
        return Err(HttpError(ApiError::Forbidden(
            "root permission required".to_string(),
        )));
    }
    state.maintenance.set(req.enabled);
    info!(enabled = req.enabled, by = %principal.id, "maintenance mode toggled");
    Ok(Json(MaintenanceResponse {
        maintenance_mode: req.enabled,
        message: state.config.maintenance.message.clone(),
    }))
}
