//! Communities, their memberships, posts and the interactions recorded on them.

pub mod interactions;
pub mod members;
pub mod posts;
pub mod roles;

use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde::Deserialize;

use crate::db::{self, models::Community, models::Visibility};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

pub use self::roles::{get_user_role_in_community, Role};

const COMMUNITY_COLUMNS: &str = "c.id, c.handle, c.name, c.tagline, c.owner_id, c.profile_image,
     c.background_image, c.tags, c.visibility, c.created_at, c.updated_at,
     (SELECT COUNT(*) FROM community_members m WHERE m.community_id = c.id)";

fn map_community(row: &Row<'_>) -> rusqlite::Result<Community> {
    let tags: String = row.get(7)?;
    let visibility: String = row.get(8)?;
    Ok(Community {
        id: row.get(0)?,
        handle: row.get(1)?,
        name: row.get(2)?,
        tagline: row.get(3)?,
        owner_id: row.get(4)?,
        community_profile_image: row.get(5)?,
        community_background_image: row.get(6)?,
        tags: db::decode_list(&tags),
        visibility: Visibility::parse(&visibility).unwrap_or(Visibility::Public),
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        member_count: row.get(11)?,
    })
}

/// The one lookup every handle-addressed path goes through. A missing handle
/// is `None`, never an error.
pub fn get_community_by_handle(pool: &DbPool, handle: &str) -> AppResult<Option<Community>> {
    let conn = pool.get()?;
    let community = conn
        .query_row(
            &format!(
                "SELECT {} FROM communities c WHERE c.handle = ?1",
                COMMUNITY_COLUMNS
            ),
            params![handle],
            map_community,
        )
        .optional()?;
    Ok(community)
}

pub fn get_community_by_id(pool: &DbPool, id: &str) -> AppResult<Option<Community>> {
    let conn = pool.get()?;
    let community = conn
        .query_row(
            &format!("SELECT {} FROM communities c WHERE c.id = ?1", COMMUNITY_COLUMNS),
            params![id],
            map_community,
        )
        .optional()?;
    Ok(community)
}

/// Like [`get_community_by_handle`], for write paths that need the target.
pub fn require_community(pool: &DbPool, handle: &str) -> AppResult<Community> {
    get_community_by_handle(pool, handle)?.ok_or(AppError::NotFound)
}

/// Communities the user owns, newest first.
pub fn list_owned_communities(pool: &DbPool, owner_id: &str) -> AppResult<Vec<Community>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM communities c WHERE c.owner_id = ?1 ORDER BY c.created_at DESC",
        COMMUNITY_COLUMNS
    ))?;
    let communities = stmt
        .query_map(params![owner_id], map_community)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(communities)
}

/// Communities the user belongs to in any role, most recently joined first.
pub fn list_joined_communities(pool: &DbPool, user_id: &str) -> AppResult<Vec<Community>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM communities c
         JOIN community_members jm ON jm.community_id = c.id
         WHERE jm.user_id = ?1 ORDER BY jm.joined_at DESC",
        COMMUNITY_COLUMNS
    ))?;
    let communities = stmt
        .query_map(params![user_id], map_community)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(communities)
}

/// Lower-case and check a handle: 3-64 characters of `a-z`, `0-9` and `-`.
pub fn normalize_handle(raw: &str) -> AppResult<String> {
    let handle = raw.trim().to_ascii_lowercase();
    let valid_chars = handle
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !(3..=64).contains(&handle.len()) || !valid_chars {
        return Err(AppError::BadRequest(
            "Handle must be 3-64 characters of lowercase letters, digits and dashes".into(),
        ));
    }
    Ok(handle)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommunity {
    pub handle: String,
    pub name: String,
    pub tagline: Option<String>,
    pub community_profile_image: Option<String>,
    pub community_background_image: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub visibility: Option<Visibility>,
}

/// Create a community and its owner membership in one transaction.
pub fn create_community(pool: &DbPool, owner_id: &str, new: NewCommunity) -> AppResult<Community> {
    let handle = normalize_handle(&new.handle)?;
    let name = new.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("Missing required field: name".into()));
    }

    let id = db::new_id();
    let now = db::now_timestamp();
    let visibility = new.visibility.unwrap_or(Visibility::Public);

    {
        let mut conn = pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let taken: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM communities WHERE handle = ?1",
            params![handle],
            |row| row.get(0),
        )?;
        if taken {
            return Err(AppError::Conflict(format!(
                "The handle '{}' is already taken",
                handle
            )));
        }

        tx.execute(
            "INSERT INTO communities (id, handle, name, tagline, owner_id, profile_image,
                background_image, tags, visibility, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                id,
                handle,
                name,
                new.tagline,
                owner_id,
                new.community_profile_image,
                new.community_background_image,
                db::encode_list(&new.tags),
                visibility.as_str(),
                now
            ],
        )?;
        tx.execute(
            "INSERT INTO community_members (id, user_id, community_id, role, joined_at)
             VALUES (?1, ?2, ?3, 'owner', ?4)",
            params![db::new_id(), owner_id, id, now],
        )?;
        tx.commit()?;
    }

    tracing::info!(community_id = %id, handle = %handle, owner_id, "Community created");
    get_community_by_id(pool, &id)?
        .ok_or_else(|| AppError::Internal(format!("community {} vanished after insert", id)))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityUpdate {
    pub name: Option<String>,
    pub tagline: Option<String>,
    pub community_profile_image: Option<String>,
    pub community_background_image: Option<String>,
    pub tags: Option<Vec<String>>,
    pub visibility: Option<Visibility>,
}

/// Apply the fields present in `update`. Returns the refreshed community, or
/// `None` when it does not exist.
pub fn update_community(
    pool: &DbPool,
    id: &str,
    update: &CommunityUpdate,
) -> AppResult<Option<Community>> {
    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("Community name cannot be empty".into()));
        }
    }

    let changed = {
        let conn = pool.get()?;
        conn.execute(
            "UPDATE communities SET
                name = COALESCE(?1, name),
                tagline = COALESCE(?2, tagline),
                profile_image = COALESCE(?3, profile_image),
                background_image = COALESCE(?4, background_image),
                tags = COALESCE(?5, tags),
                visibility = COALESCE(?6, visibility),
                updated_at = ?7
             WHERE id = ?8",
            params![
                update.name.as_deref().map(str::trim),
                update.tagline,
                update.community_profile_image,
                update.community_background_image,
                update.tags.as_deref().map(db::encode_list),
                update.visibility.map(|v| v.as_str()),
                db::now_timestamp(),
                id
            ],
        )?
    };

    if changed == 0 {
        return Ok(None);
    }
    get_community_by_id(pool, id)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::users::{self, NewUser};

    pub fn pool() -> (tempfile::TempDir, DbPool) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        (tmp, pool)
    }

    pub fn seed_user(pool: &DbPool, email: &str) -> String {
        users::create_user(
            pool,
            NewUser {
                email: email.into(),
                display_name: email.split('@').next().map(str::to_string),
                ..Default::default()
            },
        )
        .unwrap()
        .id
    }

    pub fn seed_community(pool: &DbPool, owner_id: &str, handle: &str) -> Community {
        create_community(
            pool,
            owner_id,
            NewCommunity {
                handle: handle.into(),
                name: format!("{} community", handle),
                tagline: None,
                community_profile_image: None,
                community_background_image: None,
                tags: vec![],
                visibility: None,
            },
        )
        .unwrap()
    }
}
