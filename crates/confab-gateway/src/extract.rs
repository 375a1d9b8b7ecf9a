//! Request authentication extractor + maintenance admission.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use confab_core::config::AuthMode;
use confab_core::types::Principal;
use confab_core::ApiError;

use crate::app::AppState;
use crate::error::HttpError;

/// Authenticated principal for the request. Extraction runs the configured
/// auth mode and then the maintenance gate: when the flag is up, everyone
/// but root is turned away with the configured message.
pub struct Auth(pub Principal);

impl FromRequestParts<Arc<AppState>> for Auth {
    type Rejection = HttpError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let principal = resolve_principal(&parts.headers, state).await?;

        if state.maintenance.is_enabled() && !principal.role.is_root() {
            return Err(HttpError(ApiError::ServiceUnavailable(
                state.config.maintenance.message.clone(),
            )));
        }

        Ok(Auth(principal))
    }
}

async fn resolve_principal(
    headers: &HeaderMap,
    state: &Arc<AppState>,
) -> Result<Principal, ApiError> {
    match state.config.auth.mode {
        AuthMode::Local => {
            let bearer = extract_bearer(headers).ok_or_else(|| {
                ApiError::Unauthorized(
                    "missing bearer token; set 'Authorization: Bearer <token>'".to_string(),
                )
            })?;
            state.resolver.resolve_bearer(bearer).await
        }
        AuthMode::Sso => {
            let get = |name: &str| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_string())
            };
            let email = get(&state.config.auth.sso_email_header);
            let name = get(&state.config.auth.sso_name_header);
            let token = get(&state.config.auth.sso_token_header);
            state
                .resolver
                .resolve_sso(email.as_deref(), name.as_deref(), token.as_deref())
                .await
        }
        // Open instance: every request acts as the bootstrap root. Only
        // meant for single-user development setups.
        AuthMode::None => {
            let users = confab_users::users::UserService::new(state.store.clone());
            let root = users
                .find_by_email(&state.config.bootstrap.root_email)
                .await?
                .ok_or_else(|| {
                    ApiError::Unauthorized("bootstrap root user missing".to_string())
                })?;
            Ok(Principal::new(root.id, root.role, root.group_ids))
        }
    }
}

pub(crate) fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
