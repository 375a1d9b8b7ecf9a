//! Principal resolution for the two auth modes.
//!
//! Local mode verifies a signed bearer token; SSO mode trusts identity
//! headers asserted by the upstream gateway. In both modes the user row is
//! re-read so group membership and status are fresh for the request.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use confab_core::config::AuthConfig;
use confab_core::types::{AccountStatus, Principal, UserRole};
use confab_core::{ApiError, Result};
use confab_store::DocumentStore;

use crate::token;
use crate::types::User;
use crate::users::UserService;

pub struct PrincipalResolver {
    users: UserService,
    auth: AuthConfig,
}

impl PrincipalResolver {
    pub fn new(store: Arc<dyn DocumentStore>, auth: AuthConfig) -> Self {
        Self {
            users: UserService::new(store),
            auth,
        }
    }

    /// Resolve a local-mode bearer token into a principal.
    pub async fn resolve_bearer(&self, bearer: &str) -> Result<Principal> {
        let claims = token::verify(&self.auth.token_secret, bearer)?;
        let user = self
            .users
            .get(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("user no longer exists".to_string()))?;
        principal_from(user)
    }

    /// Resolve SSO trust headers into a principal, provisioning a user
    /// record on first contact.
    ///
    /// The token header is recorded for audit but never validated here;
    /// the trust boundary is the upstream gateway. A concurrent first
    /// contact for the same email is resolved by re-reading the user.
    pub async fn resolve_sso(
        &self,
        email: Option<&str>,
        name: Option<&str>,
        sso_token: Option<&str>,
    ) -> Result<Principal> {
        let email = email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("missing SSO email header".to_string()))?;
        debug!(email, has_token = sso_token.is_some(), "SSO request");

        if let Some(user) = self.users.find_by_email(email).await? {
            return principal_from(user);
        }

        // First contact: provision a standard user. The insert races with
        // concurrent requests for the same identity; losing the race means
        // the user now exists, so fall back to reading it.
        let display_name = name
            .filter(|n| !n.is_empty())
            .map(|n| n.to_string())
            .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string());
        let now = Utc::now();
        let candidate = User {
            id: String::new(),
            name: display_name,
            email: email.to_string(),
            password_hash: None,
            role: UserRole::User,
            status: AccountStatus::Active,
            group_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        match self.users.insert(&candidate).await {
            Ok(user) => {
                info!(user_id = %user.id, email, "SSO user provisioned");
                principal_from(user)
            }
            Err(ApiError::Conflict(_)) => {
                let user = self.users.find_by_email(email).await?.ok_or_else(|| {
                    ApiError::Internal("SSO provisioning race left no user".to_string())
                })?;
                principal_from(user)
            }
            Err(e) => Err(e),
        }
    }
}

fn principal_from(user: User) -> Result<Principal> {
    if user.status == AccountStatus::Disabled {
        return Err(ApiError::Forbidden("account is disabled".to_string()));
    }
    Ok(Principal {
        id: user.id,
        role: user.role,
        group_ids: user.group_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::sha256_hex;
    use crate::users::{UpdateUserRequest, USERS};
    use confab_store::{DocumentStore, IndexSpec, MemoryStore};

    async fn setup() -> (PrincipalResolver, UserService) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        store.create_collection(USERS).await.unwrap();
        store
            .create_index(USERS, IndexSpec::unique(&["email"]))
            .await
            .unwrap();
        (
            PrincipalResolver::new(store.clone(), AuthConfig::default()),
            UserService::new(store),
        )
    }

    #[tokio::test]
    async fn bearer_resolves_fresh_group_membership() {
        let (resolver, users) = setup().await;
        let created = users
            .register("Ada", "ada@example.com", &sha256_hex("pw"))
            .await
            .unwrap();
        let (bearer, _) = users
            .login("ada@example.com", &sha256_hex("pw"), "change-me", 12)
            .await
            .unwrap();

        let principal = resolver.resolve_bearer(&bearer).await.unwrap();
        assert_eq!(principal.id, created.id);
        assert!(principal.group_ids.is_empty());
    }

    #[tokio::test]
    async fn garbage_bearer_is_unauthorized() {
        let (resolver, _) = setup().await;
        let err = resolver.resolve_bearer("not-a-token").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn disabled_user_is_forbidden() {
        let (resolver, users) = setup().await;
        let created = users
            .register("Ada", "ada@example.com", &sha256_hex("pw"))
            .await
            .unwrap();
        let (bearer, _) = users
            .login("ada@example.com", &sha256_hex("pw"), "change-me", 12)
            .await
            .unwrap();
        let root = Principal::new("r", UserRole::Root, vec![]);
        users
            .update_user(
                &root,
                &created.id,
                UpdateUserRequest {
                    status: Some(AccountStatus::Disabled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = resolver.resolve_bearer(&bearer).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn sso_provisions_on_first_contact_then_reuses() {
        let (resolver, users) = setup().await;
        let p1 = resolver
            .resolve_sso(Some("jane@example.com"), Some("Jane"), Some("opaque"))
            .await
            .unwrap();
        let p2 = resolver
            .resolve_sso(Some("jane@example.com"), Some("Jane"), None)
            .await
            .unwrap();
        assert_eq!(p1.id, p2.id);
        let user = users.find_by_email("jane@example.com").await.unwrap().unwrap();
        assert_eq!(user.name, "Jane");
        assert!(user.password_hash.is_none());
    }

    #[tokio::test]
    async fn sso_without_email_header_is_unauthorized() {
        let (resolver, _) = setup().await;
        let err = resolver.resolve_sso(None, Some("x"), None).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        let err = resolver
            .resolve_sso(Some(""), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn sso_name_falls_back_to_email_prefix() {
        let (resolver, users) = setup().await;
        resolver
            .resolve_sso(Some("noname@example.com"), None, None)
            .await
            .unwrap();
        let user = users
            .find_by_email("noname@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.name, "noname");
    }
}
