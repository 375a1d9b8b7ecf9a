//! Authentication endpoints. Local and SSO endpoints are mutually
//! exclusive: calling one in the other mode is a policy denial, not a 404.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use confab_core::config::AuthMode;
use confab_core::ApiError;
use confab_users::users::UserService;
use confab_users::PublicUser;

use crate::app::AppState;
use crate::error::{HttpError, HttpResult};
use crate::extract::Auth;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    /// SHA-256 hex digest of the plaintext password.
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: PublicUser,
}

#[derive(Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct AuthConfigResponse {
    pub auth_mode: AuthMode,
    pub allow_registration: bool,
    pub sso_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sso_token_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sso_name_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sso_email_header: Option<String>,
}

fn require_local(state: &AppState) -> Result<(), HttpError> {
    if state.config.auth.mode != AuthMode::Local {
        return Err(HttpError(ApiError::Forbidden(
            "endpoint is only available in local auth mode".to_string(),
        )));
    }
    Ok(())
}

/// POST /auth/register: create an account (local mode only).
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> HttpResult<Json<PublicUser>> {
    require_local(&state)?;
    let users = UserService::new(state.store.clone());
    let user = users.register(&req.name, &req.email, &req.password).await?;
    Ok(Json(user))
}

/// POST /auth/login: verify credentials, issue a bearer token.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> HttpResult<Json<TokenResponse>> {
    require_local(&state)?;
    let users = UserService::new(state.store.clone());
    let (access_token, user) = users
        .login(
            &req.email,
            &req.password,
            &state.config.auth.token_secret,
            state.config.auth.token_expiry_hours,
        )
        .await?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
        user,
    }))
}

/// GET /auth/me: the caller's profile, fetched fresh.
pub async fn me(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
) -> HttpResult<Json<PublicUser>> {
    let users = UserService::new(state.store.clone());
    Ok(Json(users.profile(&principal).await?))
}

/// POST /auth/change-password (local mode only).
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Json(req): Json<PasswordChange>,
) -> HttpResult<Json<serde_json::Value>> {
    require_local(&state)?;
    let users = UserService::new(state.store.clone());
    users
        .change_password(&principal, &req.current_password, &req.new_password)
        .await?;
    Ok(Json(serde_json::json!({"message": "password changed"})))
}

/// GET /auth/config: public auth-mode discovery for clients.
pub async fn auth_config(State(state): State<Arc<AppState>>) -> Json<AuthConfigResponse> {
    let auth = &state.config.auth;
    let sso = auth.mode == AuthMode::Sso;
    Json(AuthConfigResponse {
        auth_mode: auth.mode,
        allow_registration: auth.mode == AuthMode::Local,
        sso_enabled: sso,
        sso_token_header: sso.then(|| auth.sso_token_header.clone()),
        sso_name_header: sso.then(|| auth.sso_name_header.clone()),
        sso_email_header: sso.then(|| auth.sso_email_header.clone()),
    })
}
