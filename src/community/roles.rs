use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::state::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Guest,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Guest => "guest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "member" => Some(Role::Member),
            "guest" => Some(Role::Guest),
            _ => None,
        }
    }

    /// Manage members, edit the community, broadcast.
    pub fn can_manage(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }

    /// Create posts and see private content.
    pub fn is_member(&self) -> bool {
        !matches!(self, Role::Guest)
    }
}

/// Owner if the community names the user as owner, else the stored
/// membership role, else guest. Unknown communities resolve to guest.
pub fn get_user_role_in_community(
    pool: &DbPool,
    user_id: &str,
    community_id: &str,
) -> AppResult<Role> {
    let conn = pool.get()?;

    let owner_id: Option<String> = conn
        .query_row(
            "SELECT owner_id FROM communities WHERE id = ?1",
            params![community_id],
            |row| row.get(0),
        )
        .optional()?;
    match owner_id {
        None => return Ok(Role::Guest),
        Some(owner) if owner == user_id => return Ok(Role::Owner),
        Some(_) => {}
    }

    let stored: Option<String> = conn
        .query_row(
            "SELECT role FROM community_members WHERE user_id = ?1 AND community_id = ?2",
            params![user_id, community_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(match stored.as_deref().and_then(Role::parse) {
        // A stale owner row for someone who no longer owns the community.
        Some(Role::Owner) => Role::Admin,
        Some(role) => role,
        None => Role::Guest,
    })
}

/// Role for an optional caller; anonymous callers are guests.
pub fn role_for(pool: &DbPool, user_id: Option<&str>, community_id: &str) -> AppResult<Role> {
    match user_id {
        Some(id) => get_user_role_in_community(pool, id, community_id),
        None => Ok(Role::Guest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::test_support::{pool, seed_community, seed_user};
    use crate::community::members::join_community;

    #[test]
    fn owner_member_and_guest() {
        let (_tmp, pool) = pool();
        let u1 = seed_user(&pool, "u1@example.com");
        let u2 = seed_user(&pool, "u2@example.com");
        let u3 = seed_user(&pool, "u3@example.com");
        let community = seed_community(&pool, &u1, "kyozo-demo");
        join_community(&pool, &u2, &community.id, Role::Member).unwrap();

        assert_eq!(get_user_role_in_community(&pool, &u1, &community.id).unwrap(), Role::Owner);
        assert_eq!(get_user_role_in_community(&pool, &u2, &community.id).unwrap(), Role::Member);
        assert_eq!(get_user_role_in_community(&pool, &u3, &community.id).unwrap(), Role::Guest);
    }

    #[test]
    fn unknown_community_is_guest() {
        let (_tmp, pool) = pool();
        let u1 = seed_user(&pool, "u1@example.com");
        assert_eq!(get_user_role_in_community(&pool, &u1, "nope").unwrap(), Role::Guest);
        assert_eq!(role_for(&pool, None, "nope").unwrap(), Role::Guest);
    }

    #[test]
    fn stored_admin_role_is_returned() {
        let (_tmp, pool) = pool();
        let u1 = seed_user(&pool, "u1@example.com");
        let u2 = seed_user(&pool, "u2@example.com");
        let community = seed_community(&pool, &u1, "admins");
        join_community(&pool, &u2, &community.id, Role::Admin).unwrap();
        let role = get_user_role_in_community(&pool, &u2, &community.id).unwrap();
        assert!(role.can_manage());
        assert!(role.is_member());
    }
}
