//! User repository + service over the document store.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use confab_core::policy;
use confab_core::types::{AccountStatus, Principal, UserRole};
use confab_core::{ApiError, Result};
use confab_store::{DocumentStore, Filter, Page, SortKey};

use crate::password;
use crate::token;
use crate::types::{PublicUser, User};

pub const USERS: &str = "users";

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    /// 64-hex SHA-256 digest of the plaintext.
    pub password: String,
    pub role: Option<UserRole>,
    pub status: Option<AccountStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    /// 64-hex SHA-256 digest of the new plaintext.
    pub password: Option<String>,
    pub role: Option<UserRole>,
    pub status: Option<AccountStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct UserListFilter {
    pub role: Option<UserRole>,
    pub status: Option<AccountStatus>,
    pub skip: u64,
    pub limit: u64,
}

pub struct UserService {
    store: Arc<dyn DocumentStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // ── repository ────────────────────────────────────────────────────────────

    pub async fn get(&self, id: &str) -> Result<Option<User>> {
        match self.store.get_by_id(USERS, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        match self
            .store
            .find_one(USERS, &[Filter::eq("email", email)])
            .await?
        {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn insert(&self, user: &User) -> Result<User> {
        let doc = self
            .store
            .create(USERS, serde_json::to_value(user)?)
            .await
            .map_err(|e| match e {
                confab_store::StoreError::DuplicateKey(_) => {
                    ApiError::Conflict(format!("email already registered: {}", user.email))
                }
                other => other.into(),
            })?;
        Ok(serde_json::from_value(doc)?)
    }

    async fn require(&self, id: &str) -> Result<User> {
        self.get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("user not found".to_string()))
    }

    // ── operations ────────────────────────────────────────────────────────────

    /// Self-service registration (local auth mode only; the mode gate sits
    /// at the HTTP boundary). New accounts always start as active users.
    pub async fn register(&self, name: &str, email: &str, password_digest: &str) -> Result<PublicUser> {
        validate_profile(name, email)?;
        let password_hash = password::hash_digest(password_digest)?;
        let user = new_user(name, email, Some(password_hash), UserRole::User);
        let created = self.insert(&user).await?;
        info!(user_id = %created.id, "user registered");
        Ok(created.into())
    }

    /// Verify credentials and issue a bearer token.
    pub async fn login(
        &self,
        email: &str,
        password_digest: &str,
        secret: &str,
        expiry_hours: u64,
    ) -> Result<(String, PublicUser)> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("invalid credentials".to_string()))?;
        let stored = user
            .password_hash
            .as_deref()
            .ok_or_else(|| ApiError::Unauthorized("invalid credentials".to_string()))?;
        if !password::verify_digest(password_digest, stored) {
            return Err(ApiError::Unauthorized("invalid credentials".to_string()));
        }
        if user.status == AccountStatus::Disabled {
            return Err(ApiError::Forbidden("account is disabled".to_string()));
        }
        let token = token::issue(secret, &user.id, user.role, expiry_hours)?;
        Ok((token, user.into()))
    }

    pub async fn create_user(
        &self,
        caller: &Principal,
        req: CreateUserRequest,
    ) -> Result<PublicUser> {
        if !policy::can_create_user(caller) {
            return Err(ApiError::Forbidden(
                "only root can create users".to_string(),
            ));
        }
        validate_profile(&req.name, &req.email)?;
        let password_hash = password::hash_digest(&req.password)?;
        let mut user = new_user(
            &req.name,
            &req.email,
            Some(password_hash),
            req.role.unwrap_or(UserRole::User),
        );
        if let Some(status) = req.status {
            user.status = status;
        }
        let created = self.insert(&user).await?;
        info!(user_id = %created.id, role = %created.role, "user created");
        Ok(created.into())
    }

    pub async fn get_user(&self, caller: &Principal, id: &str) -> Result<PublicUser> {
        if !policy::can_read_user(caller, id) {
            return Err(ApiError::Forbidden(
                "not authorized to view this user".to_string(),
            ));
        }
        Ok(self.require(id).await?.into())
    }

    /// The caller's own profile, fetched fresh from the store.
    pub async fn profile(&self, caller: &Principal) -> Result<PublicUser> {
        Ok(self.require(&caller.id).await?.into())
    }

    pub async fn list_users(
        &self,
        caller: &Principal,
        filter: UserListFilter,
    ) -> Result<Vec<PublicUser>> {
        if !policy::can_list_users(caller) {
            return Err(ApiError::Forbidden("only managers can list users".to_string()));
        }
        let mut filters = Vec::new();
        if let Some(role) = filter.role {
            filters.push(Filter::eq("role", role.to_string()));
        }
        if let Some(status) = filter.status {
            filters.push(Filter::eq("status", status.to_string()));
        }
        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        let docs = self
            .store
            .query(
                USERS,
                &filters,
                Page::new(filter.skip, limit),
                &[SortKey::asc("created_at")],
            )
            .await?;
        docs.into_iter()
            .map(|doc| Ok(serde_json::from_value::<User>(doc)?.into()))
            .collect()
    }

    pub async fn update_user(
        &self,
        caller: &Principal,
        id: &str,
        req: UpdateUserRequest,
    ) -> Result<PublicUser> {
        let _existing = self.require(id).await?;

        let updating_privileged = req.role.is_some() || req.status.is_some();
        if updating_privileged && !policy::can_update_user_privileged(caller) {
            return Err(ApiError::Forbidden(
                "only managers can update role and status".to_string(),
            ));
        }
        if !policy::can_update_user_basic(caller, id) {
            return Err(ApiError::Forbidden(
                "not authorized to update this user".to_string(),
            ));
        }

        let mut patch = serde_json::Map::new();
        if let Some(name) = req.name {
            if name.trim().is_empty() {
                return Err(ApiError::BadRequest("name must not be empty".to_string()));
            }
            patch.insert("name".into(), name.into());
        }
        if let Some(email) = req.email {
            if !email.contains('@') {
                return Err(ApiError::BadRequest(format!("invalid email: {}", email)));
            }
            patch.insert("email".into(), email.into());
        }
        if let Some(digest) = req.password {
            patch.insert("password_hash".into(), password::hash_digest(&digest)?.into());
        }
        if let Some(role) = req.role {
            patch.insert("role".into(), serde_json::to_value(role)?);
        }
        if let Some(status) = req.status {
            patch.insert("status".into(), serde_json::to_value(status)?);
        }
        patch.insert("updated_at".into(), serde_json::to_value(Utc::now())?);

        let updated = self
            .store
            .update(USERS, id, patch.into())
            .await
            .map_err(|e| match e {
                confab_store::StoreError::DuplicateKey(_) => {
                    ApiError::Conflict("email already registered".to_string())
                }
                other => other.into(),
            })?;
        Ok(serde_json::from_value::<User>(updated)?.into())
    }

    pub async fn delete_user(&self, caller: &Principal, id: &str) -> Result<()> {
        if !caller.role.is_root() {
            return Err(ApiError::Forbidden("only root can delete users".to_string()));
        }
        if !policy::can_delete_user(caller, id) {
            return Err(ApiError::Forbidden("cannot delete yourself".to_string()));
        }
        // Owned conversations and files are intentionally left in place.
        if !self.store.delete(USERS, id).await? {
            return Err(ApiError::NotFound("user not found".to_string()));
        }
        info!(user_id = id, "user deleted");
        Ok(())
    }

    pub async fn change_password(
        &self,
        caller: &Principal,
        current_digest: &str,
        new_digest: &str,
    ) -> Result<()> {
        let user = self.require(&caller.id).await?;
        let stored = user
            .password_hash
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("account has no password".to_string()))?;
        if !password::verify_digest(current_digest, stored) {
            return Err(ApiError::Unauthorized("current password is wrong".to_string()));
        }
        let patch = serde_json::json!({
            "password_hash": password::hash_digest(new_digest)?,
            "updated_at": Utc::now(),
        });
        self.store.update(USERS, &caller.id, patch).await?;
        Ok(())
    }

    /// Create the initial root principal when absent. The configured
    /// password is plaintext, so it goes through the same client-digest
    /// construction a browser would apply.
    pub async fn ensure_root(&self, email: &str, name: &str, password_plain: &str) -> Result<()> {
        if self.find_by_email(email).await?.is_some() {
            return Ok(());
        }
        let digest = password::sha256_hex(password_plain);
        let password_hash = password::hash_digest(&digest)?;
        let user = new_user(name, email, Some(password_hash), UserRole::Root);
        match self.insert(&user).await {
            Ok(created) => {
                info!(user_id = %created.id, email, "root user bootstrapped");
                Ok(())
            }
            // Concurrent instance won the bootstrap race.
            Err(ApiError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn new_user(name: &str, email: &str, password_hash: Option<String>, role: UserRole) -> User {
    let now = Utc::now();
    User {
        id: String::new(),
        name: name.to_string(),
        email: email.to_string(),
        password_hash,
        role,
        status: AccountStatus::Active,
        group_ids: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

fn validate_profile(name: &str, email: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }
    if !email.contains('@') {
        return Err(ApiError::BadRequest(format!("invalid email: {}", email)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_store::{IndexSpec, MemoryStore};

    async fn service() -> UserService {
        let store = Arc::new(MemoryStore::new());
        store.create_collection(USERS).await.unwrap();
        store
            .create_index(USERS, IndexSpec::unique(&["email"]))
            .await
            .unwrap();
        UserService::new(store)
    }

    fn digest(plain: &str) -> String {
        password::sha256_hex(plain)
    }

    fn root() -> Principal {
        Principal::new("root-id", UserRole::Root, vec![])
    }

    #[tokio::test]
    async fn register_then_login_round_trips() {
        let svc = service().await;
        let created = svc
            .register("Ada", "ada@example.com", &digest("StrongPass123"))
            .await
            .unwrap();
        assert_eq!(created.role, UserRole::User);

        let (token, user) = svc
            .login("ada@example.com", &digest("StrongPass123"), "secret", 12)
            .await
            .unwrap();
        assert_eq!(user.id, created.id);
        let claims = token::verify("secret", &token).unwrap();
        assert_eq!(claims.sub, created.id);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let svc = service().await;
        svc.register("Ada", "ada@example.com", &digest("p1"))
            .await
            .unwrap();
        let err = svc
            .register("Eve", "ada@example.com", &digest("p2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() {
        let svc = service().await;
        svc.register("Ada", "ada@example.com", &digest("right"))
            .await
            .unwrap();
        let err = svc
            .login("ada@example.com", &digest("wrong"), "s", 12)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn disabled_user_cannot_login() {
        let svc = service().await;
        let created = svc
            .register("Ada", "ada@example.com", &digest("p"))
            .await
            .unwrap();
        svc.update_user(
            &root(),
            &created.id,
            UpdateUserRequest {
                status: Some(AccountStatus::Disabled),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let err = svc
            .login("ada@example.com", &digest("p"), "s", 12)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn plain_user_cannot_change_role() {
        let svc = service().await;
        let created = svc
            .register("Ada", "ada@example.com", &digest("p"))
            .await
            .unwrap();
        let me = Principal::new(created.id.clone(), UserRole::User, vec![]);
        let err = svc
            .update_user(
                &me,
                &created.id,
                UpdateUserRequest {
                    role: Some(UserRole::Root),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn delete_rules() {
        let svc = service().await;
        let a = svc.register("A", "a@example.com", &digest("p")).await.unwrap();
        let r = root();
        // root cannot delete self
        let self_root = Principal::new(a.id.clone(), UserRole::Root, vec![]);
        assert!(matches!(
            svc.delete_user(&self_root, &a.id).await.unwrap_err(),
            ApiError::Forbidden(_)
        ));
        svc.delete_user(&r, &a.id).await.unwrap();
        assert!(svc.get(&a.id).await.unwrap().is_none());
        assert!(matches!(
            svc.delete_user(&r, &a.id).await.unwrap_err(),
            ApiError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn ensure_root_is_idempotent() {
        let svc = service().await;
        svc.ensure_root("root@example.com", "Root", "changeme123")
            .await
            .unwrap();
        svc.ensure_root("root@example.com", "Root", "changeme123")
            .await
            .unwrap();
        let user = svc.find_by_email("root@example.com").await.unwrap().unwrap();
        assert_eq!(user.role, UserRole::Root);

        // login works through the digest construction
        let (token, _) = svc
            .login(
                "root@example.com",
                &digest("changeme123"),
                "secret",
                12,
            )
            .await
            .unwrap();
        assert!(!token.is_empty());
    }

    #[tokio::test]
    async fn list_users_filters_by_role() {
        let svc = service().await;
        svc.register("A", "a@example.com", &digest("p")).await.unwrap();
        svc.ensure_root("r@example.com", "R", "pw").await.unwrap();

        let all = svc
            .list_users(&root(), UserListFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let roots = svc
            .list_users(
                &root(),
                UserListFilter {
                    role: Some(UserRole::Root),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(roots.len(), 1);

        let user = Principal::new("x", UserRole::User, vec![]);
        assert!(matches!(
            svc.list_users(&user, UserListFilter::default())
                .await
                .unwrap_err(),
            ApiError::Forbidden(_)
        ));
    }
}
