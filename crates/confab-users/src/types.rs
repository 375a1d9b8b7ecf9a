use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use confab_core::types::{AccountStatus, UserRole};

/// User document.
///
/// `password_hash` is only meaningful in local-auth mode: it holds a salted
/// adaptive hash of the SHA-256 digest the client transmits, never of the
/// plaintext itself. `group_ids` is the reverse index of user-group
/// membership and is kept consistent with `UserGroup.member_ids` by the
/// group service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub role: UserRole,
    pub status: AccountStatus,
    #[serde(default)]
    pub group_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// API-safe projection of a user, with no credential material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub status: AccountStatus,
    pub group_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            status: user.status,
            group_ids: user.group_ids,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// User-group document. `manager_ids` may only reference users whose role
/// is manager or root; the service enforces this on assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGroup {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub manager_ids: Vec<String>,
    #[serde(default)]
    pub member_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
    Es,
    De,
}

/// Per-user preferences, merged over defaults on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub prompt_customization: String,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub language: Language,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            prompt_customization: String::new(),
            theme: Theme::Light,
            language: Language::En,
        }
    }
}

/// Partial settings update; unspecified fields are preserved.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub prompt_customization: Option<String>,
    pub theme: Option<Theme>,
    pub language: Option<Language>,
}
