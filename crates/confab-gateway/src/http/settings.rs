//! Per-user settings endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use confab_users::settings::SettingsService;
use confab_users::types::{SettingsPatch, UserSettings};

use crate::app::AppState;
use crate::error::HttpResult;
use crate::extract::Auth;

/// GET /settings: stored values merged over defaults.
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
) -> HttpResult<Json<UserSettings>> {
    let settings = SettingsService::new(state.store.clone());
    Ok(Json(settings.get(&principal.id).await?))
}

/// PUT /settings: partial update; omitted fields are preserved.
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Json(patch): Json<SettingsPatch>,
) -> HttpResult<Json<UserSettings>> {
    let settings = SettingsService::new(state.store.clone());
    Ok(Json(settings.update(&principal.id, patch).await?))
}
