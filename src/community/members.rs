use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde::Deserialize;

use super::Role;
use crate::db::{self, models::CommunityMember, models::MemberView};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;
use crate::users;

const MEMBER_COLUMNS: &str = "id, user_id, community_id, role, joined_at, tags";

fn map_member(row: &Row<'_>) -> rusqlite::Result<CommunityMember> {
    let tags: String = row.get(5)?;
    Ok(CommunityMember {
        id: row.get(0)?,
        user_id: row.get(1)?,
        community_id: row.get(2)?,
        role: row.get(3)?,
        joined_at: row.get(4)?,
        tags: db::decode_list(&tags),
    })
}

pub fn get_membership(
    pool: &DbPool,
    user_id: &str,
    community_id: &str,
) -> AppResult<Option<CommunityMember>> {
    let conn = pool.get()?;
    let member = conn
        .query_row(
            &format!(
                "SELECT {} FROM community_members WHERE user_id = ?1 AND community_id = ?2",
                MEMBER_COLUMNS
            ),
            params![user_id, community_id],
            map_member,
        )
        .optional()?;
    Ok(member)
}

/// Add a user to a community. Joining twice is a no-op that returns the
/// existing membership; the boolean reports whether a row was created.
pub fn join_community(
    pool: &DbPool,
    user_id: &str,
    community_id: &str,
    role: Role,
) -> AppResult<(CommunityMember, bool)> {
    if role == Role::Owner {
        return Err(AppError::BadRequest(
            "Ownership cannot be granted through membership".into(),
        ));
    }

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let exists: bool = tx.query_row(
        "SELECT COUNT(*) > 0 FROM communities WHERE id = ?1",
        params![community_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(AppError::NotFound);
    }

    let inserted = tx.execute(
        "INSERT OR IGNORE INTO community_members (id, user_id, community_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            db::new_id(),
            user_id,
            community_id,
            role.as_str(),
            db::now_timestamp()
        ],
    )?;
    let member = tx.query_row(
        &format!(
            "SELECT {} FROM community_members WHERE user_id = ?1 AND community_id = ?2",
            MEMBER_COLUMNS
        ),
        params![user_id, community_id],
        map_member,
    )?;
    tx.commit()?;

    if inserted == 1 {
        tracing::info!(user_id, community_id, role = role.as_str(), "Member joined");
    }
    Ok((member, inserted == 1))
}

pub fn remove_member(pool: &DbPool, community_id: &str, user_id: &str) -> AppResult<bool> {
    let conn = pool.get()?;
    let removed = conn.execute(
        "DELETE FROM community_members WHERE community_id = ?1 AND user_id = ?2",
        params![community_id, user_id],
    )?;
    Ok(removed > 0)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberUpdate {
    pub role: Option<Role>,
    pub tags: Option<Vec<String>>,
}

pub fn update_member(
    pool: &DbPool,
    community_id: &str,
    user_id: &str,
    update: &MemberUpdate,
) -> AppResult<Option<CommunityMember>> {
    if update.role == Some(Role::Owner) {
        return Err(AppError::BadRequest(
            "Ownership cannot be granted through membership".into(),
        ));
    }

    let changed = {
        let conn = pool.get()?;
        conn.execute(
            "UPDATE community_members SET
                role = COALESCE(?1, role),
                tags = COALESCE(?2, tags)
             WHERE community_id = ?3 AND user_id = ?4",
            params![
                update.role.map(|r| r.as_str()),
                update.tags.as_deref().map(db::encode_list),
                community_id,
                user_id
            ],
        )?
    };
    if changed == 0 {
        return Ok(None);
    }
    get_membership(pool, user_id, community_id)
}

/// Memberships of a community, most recently joined first.
pub fn list_members(pool: &DbPool, community_id: &str) -> AppResult<Vec<CommunityMember>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM community_members WHERE community_id = ?1
         ORDER BY joined_at DESC, rowid DESC",
        MEMBER_COLUMNS
    ))?;
    let members = stmt
        .query_map(params![community_id], map_member)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

/// Memberships joined with user details. Users are fetched in one batch.
pub fn list_members_enriched(pool: &DbPool, community_id: &str) -> AppResult<Vec<MemberView>> {
    let members = list_members(pool, community_id)?;
    let ids: Vec<String> = members.iter().map(|m| m.user_id.clone()).collect();
    let users = users::get_users_by_ids(pool, &ids)?;

    Ok(members
        .into_iter()
        .map(|member| {
            let user = users.get(&member.user_id);
            MemberView {
                display_name: user.and_then(|u| u.display_name.clone()),
                email: user.map(|u| u.email.clone()),
                phone: user.and_then(|u| u.phone.clone()),
                avatar_url: user.and_then(|u| u.avatar_url.clone()),
                member,
            }
        })
        .collect())
}
