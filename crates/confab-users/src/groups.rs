//! User-group service: membership, managers, status.
//!
//! Membership is denormalized in both directions (`UserGroup.member_ids`
//! and `User.group_ids`). There is no multi-document transaction; both
//! sides are written sequentially in the same request and read paths
//! tolerate a dangling id as absence.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use confab_core::policy;
use confab_core::types::{AccountStatus, Principal, UserRole};
use confab_core::{ApiError, Result};
use confab_store::{DocumentStore, Page, SortKey};

use crate::types::{User, UserGroup};
use crate::users::USERS;

pub const USER_GROUPS: &str = "user_groups";

pub struct UserGroupService {
    store: Arc<dyn DocumentStore>,
}

impl UserGroupService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // ── repository ────────────────────────────────────────────────────────────

    pub async fn get(&self, id: &str) -> Result<Option<UserGroup>> {
        match self.store.get_by_id(USER_GROUPS, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    async fn require(&self, id: &str) -> Result<UserGroup> {
        self.get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("user group not found".to_string()))
    }

    async fn all_groups(&self) -> Result<Vec<UserGroup>> {
        let docs = self
            .store
            .query(
                USER_GROUPS,
                &[],
                Page::new(0, 1000),
                &[SortKey::asc("name")],
            )
            .await?;
        docs.into_iter()
            .map(|doc| Ok(serde_json::from_value(doc)?))
            .collect()
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        match self.store.get_by_id(USERS, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    // ── operations ────────────────────────────────────────────────────────────

    /// Root sees every group; a manager sees the groups they manage; a user
    /// sees the active groups they belong to. A group id on the user that no
    /// longer resolves is treated as not-a-member.
    pub async fn list_groups(&self, caller: &Principal) -> Result<Vec<UserGroup>> {
        if caller.role.is_root() {
            return self.all_groups().await;
        }
        if caller.role.meets(UserRole::Manager) {
            let groups = self.all_groups().await?;
            return Ok(groups
                .into_iter()
                .filter(|g| g.manager_ids.iter().any(|m| m == &caller.id))
                .collect());
        }

        let Some(user) = self.get_user(&caller.id).await? else {
            return Ok(Vec::new());
        };
        let mut groups = Vec::new();
        for group_id in &user.group_ids {
            if let Some(group) = self.get(group_id).await? {
                if group.status == AccountStatus::Active {
                    groups.push(group);
                }
            }
        }
        Ok(groups)
    }

    pub async fn get_group(&self, caller: &Principal, id: &str) -> Result<UserGroup> {
        let group = self.require(id).await?;
        if !policy::can_manage_group_members(caller, &group.manager_ids) {
            return Err(ApiError::Forbidden("not a manager of this group".to_string()));
        }
        Ok(group)
    }

    pub async fn create_group(&self, caller: &Principal, name: &str) -> Result<UserGroup> {
        if !policy::can_create_user_group(caller) {
            return Err(ApiError::Forbidden(
                "only root can create user groups".to_string(),
            ));
        }
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("group name must not be empty".to_string()));
        }
        let now = Utc::now();
        let group = UserGroup {
            id: String::new(),
            name: name.to_string(),
            status: AccountStatus::Active,
            manager_ids: Vec::new(),
            member_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let doc = self
            .store
            .create(USER_GROUPS, serde_json::to_value(&group)?)
            .await
            .map_err(|e| match e {
                confab_store::StoreError::DuplicateKey(_) => {
                    ApiError::Conflict(format!("group name '{}' already exists", name))
                }
                other => other.into(),
            })?;
        let created: UserGroup = serde_json::from_value(doc)?;
        info!(group_id = %created.id, name, "user group created");
        Ok(created)
    }

    pub async fn rename_group(
        &self,
        caller: &Principal,
        id: &str,
        name: &str,
    ) -> Result<UserGroup> {
        if !policy::can_update_user_group(caller) {
            return Err(ApiError::Forbidden(
                "only root can update user groups".to_string(),
            ));
        }
        self.require(id).await?;
        let patch = serde_json::json!({"name": name, "updated_at": Utc::now()});
        let doc = self
            .store
            .update(USER_GROUPS, id, patch)
            .await
            .map_err(|e| match e {
                confab_store::StoreError::DuplicateKey(_) => {
                    ApiError::Conflict(format!("group name '{}' already exists", name))
                }
                other => other.into(),
            })?;
        Ok(serde_json::from_value(doc)?)
    }

    pub async fn toggle_status(
        &self,
        caller: &Principal,
        id: &str,
        status: AccountStatus,
    ) -> Result<UserGroup> {
        let group = self.require(id).await?;
        if !policy::can_toggle_group_status(caller, &group.manager_ids) {
            return Err(ApiError::Forbidden("not a manager of this group".to_string()));
        }
        let patch = serde_json::json!({
            "status": status,
            "updated_at": Utc::now(),
        });
        let doc = self.store.update(USER_GROUPS, id, patch).await?;
        Ok(serde_json::from_value(doc)?)
    }

    pub async fn delete_group(&self, caller: &Principal, id: &str) -> Result<()> {
        if !policy::can_delete_user_group(caller) {
            return Err(ApiError::Forbidden(
                "only root can delete user groups".to_string(),
            ));
        }
        let group = self.require(id).await?;

        // Drop the reverse index on every member first. A failure midway
        // leaves a stale group id on some users, which read paths already
        // treat as membership-absent.
        for member_id in &group.member_ids {
            if let Some(user) = self.get_user(member_id).await? {
                let group_ids: Vec<String> =
                    user.group_ids.into_iter().filter(|g| g != id).collect();
                self.store
                    .update(USERS, member_id, serde_json::json!({"group_ids": group_ids}))
                    .await?;
            }
        }
        self.store.delete(USER_GROUPS, id).await?;
        info!(group_id = id, "user group deleted");
        Ok(())
    }

    /// Add a member, updating both sides of the denormalization.
    pub async fn add_member(
        &self,
        caller: &Principal,
        group_id: &str,
        user_id: &str,
    ) -> Result<UserGroup> {
        let group = self.require(group_id).await?;
        if !policy::can_manage_group_members(caller, &group.manager_ids) {
            return Err(ApiError::Forbidden("not a manager of this group".to_string()));
        }
        let user = self
            .get_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

        let mut member_ids = group.member_ids.clone();
        if !member_ids.iter().any(|m| m == user_id) {
            member_ids.push(user_id.to_string());
        }
        let doc = self
            .store
            .update(
                USER_GROUPS,
                group_id,
                serde_json::json!({"member_ids": member_ids, "updated_at": Utc::now()}),
            )
            .await?;

        let mut group_ids = user.group_ids;
        if !group_ids.iter().any(|g| g == group_id) {
            group_ids.push(group_id.to_string());
            self.store
                .update(USERS, user_id, serde_json::json!({"group_ids": group_ids}))
                .await?;
        }

        Ok(serde_json::from_value(doc)?)
    }

    /// Remove a member, updating both sides of the denormalization.
    pub async fn remove_member(
        &self,
        caller: &Principal,
        group_id: &str,
        user_id: &str,
    ) -> Result<UserGroup> {
        let group = self.require(group_id).await?;
        if !policy::can_manage_group_members(caller, &group.manager_ids) {
            return Err(ApiError::Forbidden("not a manager of this group".to_string()));
        }

        let member_ids: Vec<String> = group
            .member_ids
            .iter()
            .filter(|m| m.as_str() != user_id)
            .cloned()
            .collect();
        let doc = self
            .store
            .update(
                USER_GROUPS,
                group_id,
                serde_json::json!({"member_ids": member_ids, "updated_at": Utc::now()}),
            )
            .await?;

        if let Some(user) = self.get_user(user_id).await? {
            let group_ids: Vec<String> = user
                .group_ids
                .into_iter()
                .filter(|g| g != group_id)
                .collect();
            self.store
                .update(USERS, user_id, serde_json::json!({"group_ids": group_ids}))
                .await?;
        }

        Ok(serde_json::from_value(doc)?)
    }

    /// Root-only; the assignee must already hold manager or root role.
    pub async fn assign_manager(
        &self,
        caller: &Principal,
        group_id: &str,
        user_id: &str,
    ) -> Result<UserGroup> {
        if !policy::can_assign_group_manager(caller) {
            return Err(ApiError::Forbidden("only root can assign managers".to_string()));
        }
        let group = self.require(group_id).await?;
        let user = self
            .get_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;
        if !policy::eligible_group_manager(user.role) {
            return Err(ApiError::BadRequest(
                "user must have manager or root role".to_string(),
            ));
        }

        let mut manager_ids = group.manager_ids;
        if !manager_ids.iter().any(|m| m == user_id) {
            manager_ids.push(user_id.to_string());
        }
        let doc = self
            .store
            .update(
                USER_GROUPS,
                group_id,
                serde_json::json!({"manager_ids": manager_ids, "updated_at": Utc::now()}),
            )
            .await?;
        Ok(serde_json::from_value(doc)?)
    }

    pub async fn remove_manager(
        &self,
        caller: &Principal,
        group_id: &str,
        user_id: &str,
    ) -> Result<UserGroup> {
        if !policy::can_assign_group_manager(caller) {
            return Err(ApiError::Forbidden("only root can remove managers".to_string()));
        }
        let group = self.require(group_id).await?;
        let manager_ids: Vec<String> = group
            .manager_ids
            .iter()
            .filter(|m| m.as_str() != user_id)
            .cloned()
            .collect();
        let doc = self
            .store
            .update(
                USER_GROUPS,
                group_id,
                serde_json::json!({"manager_ids": manager_ids, "updated_at": Utc::now()}),
            )
            .await?;
        Ok(serde_json::from_value(doc)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserService;
    use confab_store::{IndexSpec, MemoryStore};

    async fn setup() -> (UserGroupService, UserService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.create_collection(USERS).await.unwrap();
        store.create_collection(USER_GROUPS).await.unwrap();
        store
            .create_index(USERS, IndexSpec::unique(&["email"]))
            .await
            .unwrap();
        store
            .create_index(USER_GROUPS, IndexSpec::unique(&["name"]))
            .await
            .unwrap();
        (
            UserGroupService::new(store.clone()),
            UserService::new(store.clone()),
            store,
        )
    }

    fn root() -> Principal {
        Principal::new("root-id", UserRole::Root, vec![])
    }

    async fn make_user(users: &UserService, email: &str) -> String {
        users
            .register("U", email, &crate::password::sha256_hex("pw"))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn membership_is_bidirectional() {
        let (groups, users, _) = setup().await;
        let group = groups.create_group(&root(), "team-a").await.unwrap();
        let uid = make_user(&users, "a@example.com").await;

        let updated = groups.add_member(&root(), &group.id, &uid).await.unwrap();
        assert!(updated.member_ids.contains(&uid));
        let user = users.get(&uid).await.unwrap().unwrap();
        assert!(user.group_ids.contains(&group.id));

        let updated = groups
            .remove_member(&root(), &group.id, &uid)
            .await
            .unwrap();
        assert!(!updated.member_ids.contains(&uid));
        let user = users.get(&uid).await.unwrap().unwrap();
        assert!(!user.group_ids.contains(&group.id));
    }

    #[tokio::test]
    async fn add_member_is_idempotent() {
        let (groups, users, _) = setup().await;
        let group = groups.create_group(&root(), "team-a").await.unwrap();
        let uid = make_user(&users, "a@example.com").await;
        groups.add_member(&root(), &group.id, &uid).await.unwrap();
        let updated = groups.add_member(&root(), &group.id, &uid).await.unwrap();
        assert_eq!(updated.member_ids.iter().filter(|m| **m == uid).count(), 1);
    }

    #[tokio::test]
    async fn duplicate_group_name_conflicts() {
        let (groups, _, _) = setup().await;
        groups.create_group(&root(), "team-a").await.unwrap();
        let err = groups.create_group(&root(), "team-a").await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn manager_assignment_requires_manager_role() {
        let (groups, users, _) = setup().await;
        let group = groups.create_group(&root(), "team-a").await.unwrap();
        let uid = make_user(&users, "plain@example.com").await;
        let err = groups
            .assign_manager(&root(), &group.id, &uid)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn group_manager_can_manage_members_but_not_create() {
        let (groups, users, _) = setup().await;
        let group = groups.create_group(&root(), "team-a").await.unwrap();
        let manager_id = make_user(&users, "m@example.com").await;
        users
            .update_user(
                &root(),
                &manager_id,
                crate::users::UpdateUserRequest {
                    role: Some(UserRole::Manager),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        groups
            .assign_manager(&root(), &group.id, &manager_id)
            .await
            .unwrap();

        let manager = Principal::new(manager_id, UserRole::Manager, vec![]);
        let uid = make_user(&users, "u@example.com").await;
        groups.add_member(&manager, &group.id, &uid).await.unwrap();

        assert!(matches!(
            groups.create_group(&manager, "team-b").await.unwrap_err(),
            ApiError::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn user_listing_shows_only_active_memberships() {
        let (groups, users, _) = setup().await;
        let g1 = groups.create_group(&root(), "g1").await.unwrap();
        let g2 = groups.create_group(&root(), "g2").await.unwrap();
        let uid = make_user(&users, "a@example.com").await;
        groups.add_member(&root(), &g1.id, &uid).await.unwrap();
        groups.add_member(&root(), &g2.id, &uid).await.unwrap();
        groups
            .toggle_status(&root(), &g2.id, AccountStatus::Disabled)
            .await
            .unwrap();

        let me = Principal::new(uid, UserRole::User, vec![g1.id.clone(), g2.id.clone()]);
        let visible = groups.list_groups(&me).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, g1.id);
    }

    #[tokio::test]
    async fn deleting_group_clears_reverse_index() {
        let (groups, users, _) = setup().await;
        let group = groups.create_group(&root(), "g1").await.unwrap();
        let uid = make_user(&users, "a@example.com").await;
        groups.add_member(&root(), &group.id, &uid).await.unwrap();

        groups.delete_group(&root(), &group.id).await.unwrap();
        let user = users.get(&uid).await.unwrap().unwrap();
        assert!(user.group_ids.is_empty());
    }
}
