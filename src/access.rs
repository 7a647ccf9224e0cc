//! Invite requests and the waitlist. Both feed one table; at most one pending
//! request exists per email.

use rusqlite::{params, OptionalExtension, Row};
use serde::Deserialize;

use crate::auth::{looks_like_email, normalize_email};
use crate::db::{self, models::AccessRequest};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

const REQUEST_COLUMNS: &str =
    "id, email, first_name, last_name, phone, source, status, created_at, updated_at";

fn map_request(row: &Row<'_>) -> rusqlite::Result<AccessRequest> {
    Ok(AccessRequest {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        phone: row.get(4)?,
        source: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSource {
    Invite,
    Waitlist,
}

impl AccessSource {
    fn as_str(&self) -> &'static str {
        match self {
            AccessSource::Invite => "invite",
            AccessSource::Waitlist => "waitlist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequestInput {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

/// Identifies the pending request a decision applies to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecisionTarget {
    pub id: Option<String>,
    pub email: Option<String>,
}

fn find_pending(pool: &DbPool, email: &str) -> AppResult<Option<AccessRequest>> {
    let conn = pool.get()?;
    let request = conn
        .query_row(
            &format!(
                "SELECT {} FROM access_requests WHERE email = ?1 AND status = 'pending'",
                REQUEST_COLUMNS
            ),
            params![email],
            map_request,
        )
        .optional()?;
    Ok(request)
}

/// Record a request. When the email already has a pending request, that one
/// is returned and the boolean is `false`.
pub fn request_access(
    pool: &DbPool,
    source: AccessSource,
    input: AccessRequestInput,
) -> AppResult<(AccessRequest, bool)> {
    let email = normalize_email(input.email.as_deref().unwrap_or(""));
    if email.is_empty() {
        return Err(AppError::BadRequest("Missing required field: email".into()));
    }
    if !looks_like_email(&email) {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }

    if let Some(existing) = find_pending(pool, &email)? {
        return Ok((existing, false));
    }

    let now = db::now_timestamp();
    let request = AccessRequest {
        id: db::new_id(),
        email,
        first_name: input.first_name.filter(|v| !v.trim().is_empty()),
        last_name: input.last_name.filter(|v| !v.trim().is_empty()),
        phone: input.phone.filter(|v| !v.trim().is_empty()),
        source: source.as_str().to_string(),
        status: "pending".to_string(),
        created_at: now.clone(),
        updated_at: now,
    };

    let inserted = {
        let conn = pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO access_requests (id, email, first_name, last_name, phone,
                source, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8)",
            params![
                request.id,
                request.email,
                request.first_name,
                request.last_name,
                request.phone,
                request.source,
                request.created_at,
                request.updated_at
            ],
        )?
    };

    if inserted == 0 {
        // Lost a race with a concurrent request for the same email.
        let existing = find_pending(pool, &request.email)?.ok_or_else(|| {
            AppError::Internal(format!("pending request for {} vanished", request.email))
        })?;
        return Ok((existing, false));
    }

    tracing::info!(email = %request.email, source = source.as_str(), "Access requested");
    Ok((request, true))
}

/// Move a pending request to approved or rejected. `None` when nothing
/// pending matches.
pub fn decide(
    pool: &DbPool,
    target: &DecisionTarget,
    decision: Decision,
) -> AppResult<Option<AccessRequest>> {
    let (column, value) = match (&target.id, &target.email) {
        (Some(id), _) if !id.trim().is_empty() => ("id", id.trim().to_string()),
        (_, Some(email)) if !email.trim().is_empty() => ("email", normalize_email(email)),
        _ => {
            return Err(AppError::BadRequest(
                "Missing required field: email or id".into(),
            ))
        }
    };

    let conn = pool.get()?;
    let request = conn
        .query_row(
            &format!(
                "UPDATE access_requests SET status = ?1, updated_at = ?2
                 WHERE {} = ?3 AND status = 'pending'
                 RETURNING {}",
                column, REQUEST_COLUMNS
            ),
            params![decision.as_str(), db::now_timestamp(), value],
            map_request,
        )
        .optional()?;

    if let Some(r) = &request {
        tracing::info!(email = %r.email, status = decision.as_str(), "Access request decided");
    }
    Ok(request)
}

/// Requests newest first, optionally filtered by status.
pub fn list_requests(pool: &DbPool, status: Option<&str>) -> AppResult<Vec<AccessRequest>> {
    if let Some(s) = status {
        if !matches!(s, "pending" | "approved" | "rejected") {
            return Err(AppError::BadRequest(format!("Unknown status: {}", s)));
        }
    }
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM access_requests WHERE (?1 IS NULL OR status = ?1)
         ORDER BY created_at DESC, rowid DESC",
        REQUEST_COLUMNS
    ))?;
    let requests = stmt
        .query_map(params![status], map_request)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> (tempfile::TempDir, DbPool) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        (tmp, pool)
    }

    fn input(email: &str) -> AccessRequestInput {
        AccessRequestInput {
            email: Some(email.into()),
            first_name: Some("Ana".into()),
            ..Default::default()
        }
    }

    #[test]
    fn pending_requests_are_deduplicated_across_sources() {
        let (_tmp, pool) = pool();
        let (first, created) = request_access(&pool, AccessSource::Invite, input("Ana@Example.com")).unwrap();
        assert!(created);
        assert_eq!(first.email, "ana@example.com");

        let (again, created_again) =
            request_access(&pool, AccessSource::Waitlist, input("ana@example.com")).unwrap();
        assert!(!created_again);
        assert_eq!(again.id, first.id);
    }

    #[test]
    fn decided_requests_allow_a_new_one() {
        let (_tmp, pool) = pool();
        let (first, _) = request_access(&pool, AccessSource::Waitlist, input("b@example.com")).unwrap();
        let rejected = decide(
            &pool,
            &DecisionTarget {
                email: Some("B@example.com".into()),
                id: None,
            },
            Decision::Rejected,
        )
        .unwrap()
        .unwrap();
        assert_eq!(rejected.id, first.id);
        assert_eq!(rejected.status, "rejected");

        // Nothing pending any more.
        let target = DecisionTarget {
            id: Some(first.id.clone()),
            email: None,
        };
        assert!(decide(&pool, &target, Decision::Approved).unwrap().is_none());

        let (second, created) = request_access(&pool, AccessSource::Waitlist, input("b@example.com")).unwrap();
        assert!(created);
        assert_ne!(second.id, first.id);
        assert_eq!(list_requests(&pool, Some("pending")).unwrap().len(), 1);
        assert_eq!(list_requests(&pool, None).unwrap().len(), 2);
    }

    #[test]
    fn bad_input_is_rejected() {
        let (_tmp, pool) = pool();
        assert!(request_access(&pool, AccessSource::Invite, AccessRequestInput::default()).is_err());
        assert!(request_access(&pool, AccessSource::Invite, input("not-an-email")).is_err());
        assert!(decide(&pool, &DecisionTarget::default(), Decision::Approved).is_err());
        assert!(list_requests(&pool, Some("lost")).is_err());
    }
}
