use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};

use crate::auth::session::{lookup_session, SessionUser};
use crate::auth::Realm;
use crate::error::AppError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// A signed-in dashboard (main realm) user. 401 otherwise.
#[derive(Debug, Clone)]
pub struct DashboardUser(pub SessionUser);

/// A signed-in community member (community realm). 401 otherwise.
#[derive(Debug, Clone)]
pub struct MemberUser(pub SessionUser);

/// A user signed in to either realm; the community session wins when both
/// are present. 401 otherwise.
#[derive(Debug, Clone)]
pub struct AnyUser(pub SessionUser);

/// Like [`AnyUser`] but never rejects.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<SessionUser>);

pub fn cookie_name(state: &AppState, realm: Realm) -> &str {
    match realm {
        Realm::Main => &state.config.auth.cookie_name,
        Realm::Community => &state.config.auth.community_cookie_name,
    }
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        })
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The session token a request carries for `realm`: its cookie, else a bearer token.
pub fn realm_token<'a>(state: &AppState, headers: &'a HeaderMap, realm: Realm) -> Option<&'a str> {
    cookie_value(headers, cookie_name(state, realm)).or_else(|| bearer_token(headers))
}

fn resolve(state: &AppState, headers: &HeaderMap, realm: Realm) -> Result<Option<SessionUser>, AppError> {
    match realm_token(state, headers, realm) {
        Some(token) => lookup_session(&state.db, token, realm),
        None => Ok(None),
    }
}

fn resolve_any(state: &AppState, headers: &HeaderMap) -> Result<Option<SessionUser>, AppError> {
    if let Some(user) = resolve(state, headers, Realm::Community)? {
        return Ok(Some(user));
    }
    resolve(state, headers, Realm::Main)
}

impl FromRequestParts<AppState> for DashboardUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve(state, &parts.headers, Realm::Main)?
            .map(DashboardUser)
            .ok_or(AppError::Unauthorized)
    }
}

impl FromRequestParts<AppState> for MemberUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve(state, &parts.headers, Realm::Community)?
            .map(MemberUser)
            .ok_or(AppError::Unauthorized)
    }
}

impl FromRequestParts<AppState> for AnyUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve_any(state, &parts.headers)?
            .map(AnyUser)
            .ok_or(AppError::Unauthorized)
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve_any(state, &parts.headers)?))
    }
}

fn keys_match(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn presented_key(parts: &Parts) -> Option<&str> {
    parts.headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

/// Guard for the public v1 API. When `KYOZO_API_KEY` is configured the
/// `x-api-key` header must match it; when it is not, every caller passes.
#[derive(Debug, Clone, Copy)]
pub struct ApiKey;

impl FromRequestParts<AppState> for ApiKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match state.config.providers.kyozo_api_key.as_deref() {
            None => Ok(ApiKey),
            Some(expected) => match presented_key(parts) {
                Some(given) if keys_match(given, expected) => Ok(ApiKey),
                _ => {
                    tracing::warn!(path = %parts.uri.path(), "Rejected request with missing or wrong API key");
                    Err(AppError::Unauthorized)
                }
            },
        }
    }
}

/// Guard for operator endpoints: a matching API key, or a dashboard session
/// belonging to an admin. Unlike [`ApiKey`] this never opens up when no key
/// is configured.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let (Some(expected), Some(given)) = (
            state.config.providers.kyozo_api_key.as_deref(),
            presented_key(parts),
        ) {
            if keys_match(given, expected) {
                return Ok(AdminAccess);
            }
        }
        match resolve(state, &parts.headers, Realm::Main)? {
            Some(user) if user.is_admin => Ok(AdminAccess),
            Some(_) => Err(AppError::Forbidden),
            None => Err(AppError::Unauthorized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_parsing_finds_named_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; kyozo_session=abc123; other=1"),
        );
        assert_eq!(cookie_value(&headers, "kyozo_session"), Some("abc123"));
        assert_eq!(cookie_value(&headers, "kyozo_community_session"), None);
    }

    #[test]
    fn empty_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("kyozo_session="));
        assert_eq!(cookie_value(&headers, "kyozo_session"), None);
    }

    #[test]
    fn bearer_tokens_are_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(bearer_token(&headers), Some("tok"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn key_comparison() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secret", "secreT"));
        assert!(!keys_match("short", "longer"));
    }
}
