use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use confab_chat::{ChatEngine, ConfigProviderFactory};
use confab_core::config::ConfabConfig;
use confab_core::maintenance::MaintenanceFlag;
use confab_objstore::ObjectStore;
use confab_store::DocumentStore;
use confab_users::PrincipalResolver;

/// Central shared state, passed as Arc<AppState> to all handlers.
/// Domain services are constructed per request from the store handles;
/// only the long-lived pieces live here.
pub struct AppState {
    pub config: ConfabConfig,
    pub store: Arc<dyn DocumentStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub maintenance: MaintenanceFlag,
    pub resolver: PrincipalResolver,
    pub engine: ChatEngine,
}

impl AppState {
    pub fn new(
        config: ConfabConfig,
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStore>,
    ) -> Self {
        let resolver = PrincipalResolver::new(store.clone(), config.auth.clone());
        let factory = Arc::new(ConfigProviderFactory::new(config.llm.clone()));
        let engine = ChatEngine::new(store.clone(), factory);
        let maintenance = MaintenanceFlag::new(config.maintenance.enabled);
        Self {
            config,
            store,
            storage,
            maintenance,
            resolver,
            engine,
        }
    }
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.uploads.max_file_size + 1024 * 1024;
    Router::new()
        .route("/health", get(crate::http::health::health))
        // auth
        .route("/auth/register", post(crate::http::auth::register))
        .route("/auth/login", post(crate::http::auth::login))
        .route("/auth/me", get(crate::http::auth::me))
        .route(
            "/auth/change-password",
            post(crate::http::auth::change_password),
        )
        .route("/auth/config", get(crate::http::auth::auth_config))
        // users
        .route(
            "/users",
            get(crate::http::users::list).post(crate::http::users::create),
        )
        .route(
            "/users/{id}",
            get(crate::http::users::get_one)
                .put(crate::http::users::update)
                .delete(crate::http::users::remove),
        )
        // user groups
        .route(
            "/user-groups",
            get(crate::http::user_groups::list).post(crate::http::user_groups::create),
        )
        .route(
            "/user-groups/{id}",
            get(crate::http::user_groups::get_one)
                .put(crate::http::user_groups::rename)
                .delete(crate::http::user_groups::remove),
        )
        .route(
            "/user-groups/{id}/status",
            put(crate::http::user_groups::toggle_status),
        )
        .route(
            "/user-groups/{id}/members/{user_id}",
            post(crate::http::user_groups::add_member)
                .delete(crate::http::user_groups::remove_member),
        )
        .route(
            "/user-groups/{id}/managers/{user_id}",
            post(crate::http::user_groups::assign_manager)
                .delete(crate::http::user_groups::remove_manager),
        )
        // conversations
        .route(
            "/conversations",
            get(crate::http::conversations::list).post(crate::http::conversations::create),
        )
        .route(
            "/conversations/shared",
            get(crate::http::conversations::list_shared),
        )
        .route(
            "/conversations/{id}",
            get(crate::http::conversations::get_one)
                .put(crate::http::conversations::update)
                .delete(crate::http::conversations::remove),
        )
        .route(
            "/conversations/{id}/share",
            post(crate::http::conversations::share),
        )
        .route(
            "/conversations/{id}/unshare",
            post(crate::http::conversations::unshare),
        )
        .route(
            "/conversations/{id}/messages",
            get(crate::http::conversations::messages),
        )
        // sidebar folders
        .route(
            "/groups",
            get(crate::http::groups::list).post(crate::http::groups::create),
        )
        .route(
            "/groups/{id}",
            get(crate::http::groups::get_one)
                .put(crate::http::groups::rename)
                .delete(crate::http::groups::remove),
        )
        .route(
            "/groups/{id}/conversations",
            post(crate::http::groups::add_conversation),
        )
        .route(
            "/groups/{id}/conversations/{conversation_id}",
            delete(crate::http::groups::remove_conversation),
        )
        // chat
        .route("/chat/stream", post(crate::http::chat::stream_chat))
        // files
        .route("/files/upload", post(crate::http::files::upload))
        .route("/files", get(crate::http::files::list))
        .route("/files/search", get(crate::http::files::search))
        .route(
            "/files/{id}",
            get(crate::http::files::get_one).delete(crate::http::files::remove),
        )
        .route(
            "/files/{id}/download-url",
            get(crate::http::files::download_url),
        )
        // settings + admin
        .route(
            "/settings",
            get(crate::http::settings::get_settings).put(crate::http::settings::update_settings),
        )
        .route(
            "/admin/maintenance",
            post(crate::http::admin::toggle_maintenance),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_objstore::MemoryObjectStore;
    use confab_store::MemoryStore;

    #[tokio::test]
    async fn router_assembles_with_in_memory_backends() {
        let state = Arc::new(AppState::new(
            ConfabConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryObjectStore::new()),
        ));
        let _router = build_router(state);
    }
}
