//! Stateless authorization predicates.
//!
//! Every rule combines role, ownership, group membership, and resource scope
//! over plain data; no store access happens here. Services load the
//! documents they need and ask the predicate.

use crate::types::{FileScope, Principal, UserRole};

// ── users ─────────────────────────────────────────────────────────────────────

pub fn can_create_user(caller: &Principal) -> bool {
    caller.role.is_root()
}

/// Root only, and never the caller's own account.
pub fn can_delete_user(caller: &Principal, target_id: &str) -> bool {
    caller.role.is_root() && caller.id != target_id
}

/// role/status changes require manager or above.
pub fn can_update_user_privileged(caller: &Principal) -> bool {
    caller.role.meets(UserRole::Manager)
}

/// name/email/password: self-service or manager+.
pub fn can_update_user_basic(caller: &Principal, target_id: &str) -> bool {
    caller.id == target_id || caller.role.meets(UserRole::Manager)
}

pub fn can_list_users(caller: &Principal) -> bool {
    caller.role.meets(UserRole::Manager)
}

pub fn can_read_user(caller: &Principal, target_id: &str) -> bool {
    caller.id == target_id || caller.role.meets(UserRole::Manager)
}

// ── user groups ───────────────────────────────────────────────────────────────

pub fn can_create_user_group(caller: &Principal) -> bool {
    caller.role.is_root()
}

pub fn can_update_user_group(caller: &Principal) -> bool {
    caller.role.is_root()
}

pub fn can_delete_user_group(caller: &Principal) -> bool {
    caller.role.is_root()
}

/// Root, or a manager assigned to this specific group.
pub fn can_toggle_group_status(caller: &Principal, manager_ids: &[String]) -> bool {
    caller.role.is_root() || manager_ids.iter().any(|m| m == &caller.id)
}

pub fn can_manage_group_members(caller: &Principal, manager_ids: &[String]) -> bool {
    caller.role.is_root() || manager_ids.iter().any(|m| m == &caller.id)
}

pub fn can_assign_group_manager(caller: &Principal) -> bool {
    caller.role.is_root()
}

/// A group manager must themselves hold at least the manager role.
pub fn eligible_group_manager(candidate_role: UserRole) -> bool {
    candidate_role.meets(UserRole::Manager)
}

// ── conversations ─────────────────────────────────────────────────────────────

/// Owner, or any group intersection with the share list. Read-only access for
/// shared members; mutations go through `can_modify_conversation`.
pub fn can_read_conversation(
    caller: &Principal,
    owner_id: &str,
    shared_with_group_ids: &[String],
) -> bool {
    if caller.id == owner_id {
        return true;
    }
    caller
        .group_ids
        .iter()
        .any(|g| shared_with_group_ids.iter().any(|s| s == g))
}

pub fn can_modify_conversation(caller: &Principal, owner_id: &str) -> bool {
    caller.id == owner_id
}

// ── files ─────────────────────────────────────────────────────────────────────

pub fn can_upload_file(caller: &Principal, scope: FileScope) -> bool {
    match scope {
        FileScope::System => caller.role.meets(UserRole::Manager),
        FileScope::UserGlobal | FileScope::UserProject => true,
    }
}

pub fn can_read_file(caller: &Principal, scope: FileScope, uploaded_by: Option<&str>) -> bool {
    match scope {
        FileScope::System => true,
        FileScope::UserGlobal => uploaded_by == Some(caller.id.as_str()),
        FileScope::UserProject => {
            uploaded_by == Some(caller.id.as_str()) || caller.role.meets(UserRole::Manager)
        }
    }
}

pub fn can_delete_file(caller: &Principal, uploaded_by: Option<&str>) -> bool {
    uploaded_by == Some(caller.id.as_str()) || caller.role.meets(UserRole::Manager)
}

// ── admin ─────────────────────────────────────────────────────────────────────

pub fn can_toggle_maintenance(caller: &Principal) -> bool {
    caller.role.is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(id: &str, role: UserRole, groups: &[&str]) -> Principal {
        Principal::new(id, role, groups.iter().map(|g| g.to_string()).collect())
    }

    #[test]
    fn root_cannot_delete_self() {
        let root = principal("u1", UserRole::Root, &[]);
        assert!(!can_delete_user(&root, "u1"));
        assert!(can_delete_user(&root, "u2"));
    }

    #[test]
    fn manager_cannot_delete_users() {
        let mgr = principal("u1", UserRole::Manager, &[]);
        assert!(!can_delete_user(&mgr, "u2"));
    }

    #[test]
    fn self_update_allowed_for_basic_fields_only() {
        let user = principal("u1", UserRole::User, &[]);
        assert!(can_update_user_basic(&user, "u1"));
        assert!(!can_update_user_basic(&user, "u2"));
        assert!(!can_update_user_privileged(&user));
    }

    #[test]
    fn shared_group_grants_read_not_write() {
        let member = principal("u2", UserRole::User, &["g1"]);
        let shared = vec!["g1".to_string()];
        assert!(can_read_conversation(&member, "u1", &shared));
        assert!(!can_modify_conversation(&member, "u1"));
    }

    #[test]
    fn no_group_intersection_denies_read() {
        let outsider = principal("u3", UserRole::User, &["g9"]);
        let shared = vec!["g1".to_string()];
        assert!(!can_read_conversation(&outsider, "u1", &shared));
    }

    #[test]
    fn group_manager_controls_membership() {
        let mgr = principal("m1", UserRole::Manager, &[]);
        let managers = vec!["m1".to_string()];
        assert!(can_manage_group_members(&mgr, &managers));
        assert!(can_toggle_group_status(&mgr, &managers));

        let other = principal("m2", UserRole::Manager, &[]);
        assert!(!can_manage_group_members(&other, &managers));
        // root bypasses the assignment check
        let root = principal("r1", UserRole::Root, &[]);
        assert!(can_manage_group_members(&root, &managers));
    }

    #[test]
    fn system_upload_needs_manager() {
        let user = principal("u1", UserRole::User, &[]);
        let mgr = principal("m1", UserRole::Manager, &[]);
        assert!(!can_upload_file(&user, FileScope::System));
        assert!(can_upload_file(&mgr, FileScope::System));
        assert!(can_upload_file(&user, FileScope::UserGlobal));
    }

    #[test]
    fn file_read_scope_rules() {
        let uploader = principal("u1", UserRole::User, &[]);
        let other = principal("u2", UserRole::User, &[]);
        let mgr = principal("m1", UserRole::Manager, &[]);

        // system: any authenticated user
        assert!(can_read_file(&other, FileScope::System, None));
        // user_global: uploader only, even for managers
        assert!(can_read_file(&uploader, FileScope::UserGlobal, Some("u1")));
        assert!(!can_read_file(&mgr, FileScope::UserGlobal, Some("u1")));
        // user_project: uploader or manager+
        assert!(can_read_file(&mgr, FileScope::UserProject, Some("u1")));
        assert!(!can_read_file(&other, FileScope::UserProject, Some("u1")));
    }

    #[test]
    fn maintenance_toggle_is_root_only() {
        assert!(can_toggle_maintenance(&principal("r", UserRole::Root, &[])));
        assert!(!can_toggle_maintenance(&principal(
            "m",
            UserRole::Manager,
            &[]
        )));
    }
}
