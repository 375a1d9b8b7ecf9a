use serde::{Deserialize, Serialize};
use std::fmt;

/// Role hierarchy: root > manager > user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Manager,
    Root,
}

impl UserRole {
    /// True when this role sits at or above `required` in the hierarchy.
    pub fn meets(&self, required: UserRole) -> bool {
        self.rank() >= required.rank()
    }

    pub fn is_root(&self) -> bool {
        matches!(self, UserRole::Root)
    }

    fn rank(&self) -> u8 {
        match self {
            UserRole::User => 0,
            UserRole::Manager => 1,
            UserRole::Root => 2,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::User => write!(f, "user"),
            UserRole::Manager => write!(f, "manager"),
            UserRole::Root => write!(f, "root"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(UserRole::User),
            "manager" => Ok(UserRole::Manager),
            "root" => Ok(UserRole::Root),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Account and user-group status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Disabled,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Active => write!(f, "active"),
            AccountStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// File visibility scope. Determines both the object-store layout and the
/// access rules applied by the policy module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileScope {
    System,
    UserGlobal,
    UserProject,
}

impl fmt::Display for FileScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileScope::System => write!(f, "system"),
            FileScope::UserGlobal => write!(f, "user_global"),
            FileScope::UserProject => write!(f, "user_project"),
        }
    }
}

impl std::str::FromStr for FileScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(FileScope::System),
            "user_global" => Ok(FileScope::UserGlobal),
            "user_project" => Ok(FileScope::UserProject),
            other => Err(format!("unknown file scope: {}", other)),
        }
    }
}

/// The authenticated actor of a request.
///
/// Group membership is looked up fresh at authentication time and is
/// authoritative for the whole request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: UserRole,
    pub group_ids: Vec<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: UserRole, group_ids: Vec<String>) -> Self {
        Self {
            id: id.into(),
            role,
            group_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_hierarchy() {
        assert!(UserRole::Root.meets(UserRole::Manager));
        assert!(UserRole::Manager.meets(UserRole::User));
        assert!(!UserRole::User.meets(UserRole::Manager));
        assert!(UserRole::Manager.meets(UserRole::Manager));
    }

    #[test]
    fn role_round_trip() {
        for s in ["user", "manager", "root"] {
            let role: UserRole = s.parse().unwrap();
            assert_eq!(role.to_string(), s);
        }
        assert!("admin".parse::<UserRole>().is_err());
    }

    #[test]
    fn scope_serde_uses_snake_case() {
        let json = serde_json::to_string(&FileScope::UserProject).unwrap();
        assert_eq!(json, r#""user_project""#);
    }
}
