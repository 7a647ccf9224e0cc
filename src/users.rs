use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::collections::HashMap;

use crate::db::{self, models::User};
use crate::error::AppResult;
use crate::state::DbPool;

const USER_COLUMNS: &str =
    "id, email, display_name, phone, avatar_url, password_hash, is_admin, created_at";

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        phone: row.get(3)?,
        avatar_url: row.get(4)?,
        password_hash: row.get(5)?,
        is_admin: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
}

pub fn get_user(pool: &DbPool, id: &str) -> AppResult<Option<User>> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id],
            map_user,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user_by_email(pool: &DbPool, email: &str) -> AppResult<Option<User>> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            params![email],
            map_user,
        )
        .optional()?;
    Ok(user)
}

/// Fetch many users in one query. Unknown ids are simply absent from the map.
pub fn get_users_by_ids(pool: &DbPool, ids: &[String]) -> AppResult<HashMap<String, User>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut unique: Vec<&String> = ids.iter().collect();
    unique.sort();
    unique.dedup();

    let conn = pool.get()?;
    let placeholders = vec!["?"; unique.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE id IN ({})",
        USER_COLUMNS, placeholders
    ))?;
    let users = stmt
        .query_map(params_from_iter(unique), map_user)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(users.into_iter().map(|u| (u.id.clone(), u)).collect())
}

pub fn create_user(pool: &DbPool, new: NewUser) -> AppResult<User> {
    let conn = pool.get()?;
    let user = User {
        id: db::new_id(),
        email: new.email,
        display_name: new.display_name,
        phone: new.phone,
        avatar_url: None,
        password_hash: new.password_hash,
        is_admin: false,
        created_at: db::now_timestamp(),
    };
    conn.execute(
        "INSERT INTO users (id, email, display_name, phone, password_hash, is_admin, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            user.id,
            user.email,
            user.display_name,
            user.phone,
            user.password_hash,
            user.created_at
        ],
    )?;
    Ok(user)
}

/// Return the user for `email`, creating a password-less one if needed.
pub fn find_or_create_by_email(pool: &DbPool, email: &str) -> AppResult<User> {
    {
        let conn = pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO users (id, email, created_at) VALUES (?1, ?2, ?3)",
            params![db::new_id(), email, db::now_timestamp()],
        )?;
    }
    get_user_by_email(pool, email)?
        .ok_or_else(|| crate::error::AppError::Internal(format!("user {} vanished after insert", email)))
}

pub fn set_password_hash(pool: &DbPool, user_id: &str, hash: &str) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![hash, user_id],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
}

pub fn update_profile(pool: &DbPool, user_id: &str, update: &ProfileUpdate) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE users SET
            display_name = COALESCE(?1, display_name),
            phone = COALESCE(?2, phone),
            avatar_url = COALESCE(?3, avatar_url)
         WHERE id = ?4",
        params![update.display_name, update.phone, update.avatar_url, user_id],
    )?;
    Ok(())
}
