use rand::Rng;
use rusqlite::{params, OptionalExtension};

use super::Realm;
use crate::error::AppResult;
use crate::state::DbPool;

/// The identity attached to a valid session.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub realm: Realm,
}

/// Create a new session for a user in one realm. Returns the session token.
pub fn create_session(pool: &DbPool, user_id: &str, realm: Realm, hours: u64) -> AppResult<String> {
    let conn = pool.get()?;

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, realm, expires_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now', ?5))",
        params![id, user_id, token, realm.as_str(), format!("+{} hours", hours)],
    )?;

    tracing::info!(user_id, realm = realm.as_str(), "Session created");
    Ok(token)
}

/// Resolve a token to its user, restricted to one realm.
pub fn lookup_session(pool: &DbPool, token: &str, realm: Realm) -> AppResult<Option<SessionUser>> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            "SELECT u.id, u.email, u.display_name, u.is_admin FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1 AND s.realm = ?2 AND s.expires_at > datetime('now')",
            params![token, realm.as_str()],
            |row| {
                Ok(SessionUser {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    display_name: row.get(2)?,
                    is_admin: row.get(3)?,
                    realm,
                })
            },
        )
        .optional()?;
    Ok(user)
}

/// Delete a session by token.
pub fn delete_session(pool: &DbPool, token: &str) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Drop every session a user holds, e.g. after a password reset.
pub fn delete_user_sessions(pool: &DbPool, user_id: &str) -> AppResult<usize> {
    let conn = pool.get()?;
    Ok(conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?)
}

/// Remove sessions past their expiry; returns how many were deleted.
pub fn purge_expired(pool: &DbPool) -> AppResult<usize> {
    let conn = pool.get()?;
    Ok(conn.execute(
        "DELETE FROM sessions WHERE expires_at <= datetime('now')",
        [],
    )?)
}

pub fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        name,
        token,
        max_age_hours * 3600
    )
}

pub fn clear_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", name)
}

/// Generate a cryptographically random 32-byte hex token.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn pool_with_user() -> (tempfile::TempDir, DbPool) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        pool.get()
            .unwrap()
            .execute(
                "INSERT INTO users (id, email, display_name, created_at) VALUES ('u1', 'a@example.com', 'Ana', 'now')",
                [],
            )
            .unwrap();
        (tmp, pool)
    }

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn sessions_do_not_cross_realms() {
        let (_tmp, pool) = pool_with_user();
        let token = create_session(&pool, "u1", Realm::Community, 1).unwrap();

        let user = lookup_session(&pool, &token, Realm::Community).unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.realm, Realm::Community);
        assert!(lookup_session(&pool, &token, Realm::Main).unwrap().is_none());
    }

    #[test]
    fn deleted_session_no_longer_resolves() {
        let (_tmp, pool) = pool_with_user();
        let token = create_session(&pool, "u1", Realm::Main, 1).unwrap();
        delete_session(&pool, &token).unwrap();
        assert!(lookup_session(&pool, &token, Realm::Main).unwrap().is_none());
    }

    #[test]
    fn expired_session_is_ignored() {
        let (_tmp, pool) = pool_with_user();
        let token = create_session(&pool, "u1", Realm::Main, 1).unwrap();
        pool.get()
            .unwrap()
            .execute(
                "UPDATE sessions SET expires_at = datetime('now', '-1 minute') WHERE token = ?1",
                params![token],
            )
            .unwrap();
        assert!(lookup_session(&pool, &token, Realm::Main).unwrap().is_none());
        assert_eq!(purge_expired(&pool).unwrap(), 1);
    }

    #[test]
    fn cookie_helpers() {
        assert_eq!(
            session_cookie("kyozo_session", "abc", 2),
            "kyozo_session=abc; HttpOnly; SameSite=Lax; Path=/; Max-Age=7200"
        );
        assert!(clear_cookie("kyozo_session").contains("Max-Age=0"));
    }
}
