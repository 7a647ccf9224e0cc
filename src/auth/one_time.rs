use chrono::{Duration, Utc};
use rusqlite::{params, OptionalExtension};

use super::session::generate_token;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

/// What a one-time token may be redeemed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    MagicLink,
    PasswordReset,
}

impl Purpose {
    fn as_str(&self) -> &'static str {
        match self {
            Purpose::MagicLink => "magic_link",
            Purpose::PasswordReset => "password_reset",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Redeemed {
    pub email: String,
    pub community_handle: Option<String>,
}

pub fn issue(
    pool: &DbPool,
    email: &str,
    purpose: Purpose,
    community_handle: Option<&str>,
    ttl_minutes: i64,
) -> AppResult<String> {
    let conn = pool.get()?;
    let token = generate_token();
    let expires_at = (Utc::now() + Duration::minutes(ttl_minutes)).to_rfc3339();

    conn.execute(
        "INSERT INTO one_time_tokens (token, email, purpose, community_handle, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![token, email, purpose.as_str(), community_handle, expires_at],
    )?;
    Ok(token)
}

/// Consume a token. Unknown, expired, already-used and wrong-purpose tokens
/// all fail the same way.
pub fn redeem(pool: &DbPool, token: &str, purpose: Purpose) -> AppResult<Redeemed> {
    consume(pool, token, purpose, None)
}

/// Consume a token only if it was issued to `email`. A mismatch leaves the
/// token usable so the right address can still be entered.
pub fn redeem_for_email(
    pool: &DbPool,
    token: &str,
    purpose: Purpose,
    email: &str,
) -> AppResult<Redeemed> {
    consume(pool, token, purpose, Some(email))
}

fn consume(
    pool: &DbPool,
    token: &str,
    purpose: Purpose,
    expected_email: Option<&str>,
) -> AppResult<Redeemed> {
    let invalid = || AppError::BadRequest("This link is invalid or has expired".into());
    let conn = pool.get()?;

    let row: Option<(String, Option<String>, String)> = conn
        .query_row(
            "SELECT email, community_handle, expires_at FROM one_time_tokens
             WHERE token = ?1 AND purpose = ?2 AND consumed_at IS NULL",
            params![token, purpose.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let (email, community_handle, expires_at) = row.ok_or_else(invalid)?;

    let expires_at = chrono::DateTime::parse_from_rfc3339(&expires_at)
        .map_err(|e| AppError::Internal(format!("bad token expiry: {}", e)))?;
    if expires_at < Utc::now() {
        return Err(invalid());
    }

    if let Some(expected) = expected_email {
        if !expected.trim().eq_ignore_ascii_case(&email) {
            return Err(AppError::BadRequest(
                "This link was sent to a different email address".into(),
            ));
        }
    }

    // Guarded update so two concurrent redemptions cannot both succeed.
    let consumed = conn.execute(
        "UPDATE one_time_tokens SET consumed_at = datetime('now')
         WHERE token = ?1 AND consumed_at IS NULL",
        params![token],
    )?;
    if consumed == 0 {
        return Err(invalid());
    }

    Ok(Redeemed {
        email,
        community_handle,
    })
}

/// Remove expired and consumed tokens; returns how many were deleted.
pub fn purge(pool: &DbPool) -> AppResult<usize> {
    let conn = pool.get()?;
    let cutoff = Utc::now().to_rfc3339();
    Ok(conn.execute(
        "DELETE FROM one_time_tokens WHERE consumed_at IS NOT NULL OR expires_at < ?1",
        params![cutoff],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn pool() -> (tempfile::TempDir, DbPool) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        (tmp, pool)
    }

    #[test]
    fn token_is_single_use() {
        let (_tmp, pool) = pool();
        let token = issue(&pool, "m@example.com", Purpose::MagicLink, Some("kyozo-demo"), 15).unwrap();

        let redeemed = redeem(&pool, &token, Purpose::MagicLink).unwrap();
        assert_eq!(redeemed.email, "m@example.com");
        assert_eq!(redeemed.community_handle.as_deref(), Some("kyozo-demo"));
        assert!(redeem(&pool, &token, Purpose::MagicLink).is_err());
    }

    #[test]
    fn email_mismatch_keeps_token_alive() {
        let (_tmp, pool) = pool();
        let token = issue(&pool, "m@example.com", Purpose::MagicLink, None, 15).unwrap();
        assert!(redeem_for_email(&pool, &token, Purpose::MagicLink, "other@example.com").is_err());
        let redeemed = redeem_for_email(&pool, &token, Purpose::MagicLink, "M@Example.com").unwrap();
        assert_eq!(redeemed.email, "m@example.com");
    }

    #[test]
    fn purpose_must_match() {
        let (_tmp, pool) = pool();
        let token = issue(&pool, "m@example.com", Purpose::PasswordReset, None, 15).unwrap();
        assert!(redeem(&pool, &token, Purpose::MagicLink).is_err());
        assert!(redeem(&pool, &token, Purpose::PasswordReset).is_ok());
    }

    #[test]
    fn expired_tokens_are_rejected_and_purged() {
        let (_tmp, pool) = pool();
        let token = issue(&pool, "m@example.com", Purpose::MagicLink, None, -1).unwrap();
        assert!(redeem(&pool, &token, Purpose::MagicLink).is_err());
        assert_eq!(purge(&pool).unwrap(), 1);
    }
}
