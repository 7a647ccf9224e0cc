use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::{Bytes, BytesMut};

use crate::auth::session::SessionUser;
use crate::community::{self, get_user_role_in_community};
use crate::config::UploadLimits;
use crate::error::{AppError, AppResult};
use crate::extractors::AnyUser;
use crate::state::{AppState, DbPool};
use crate::storage::{blob_path, BlobStore, MediaKind};

/// Room for multipart framing and the small text fields around the file.
const MULTIPART_SLACK: u64 = 1024 * 1024;

const CORS_HEADERS: [(header::HeaderName, &str); 3] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
];

pub fn router(limits: &UploadLimits) -> Router<AppState> {
    let body_limit = limits.max_bytes(limits.largest()) + MULTIPART_SLACK;
    Router::new()
        .route("/api/upload", post(upload).options(preflight))
        .route("/api/upload-simple", post(upload_simple).options(preflight))
        .layer(DefaultBodyLimit::max(body_limit as usize))
}

async fn preflight() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, CORS_HEADERS)
}

/// Authenticated upload into the configured store. The caller must belong to
/// the community the file is for; that is settled as soon as the
/// `communityId` field arrives, before any file bytes are read.
async fn upload(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    headers: HeaderMap,
    multipart: Multipart,
) -> AppResult<Response> {
    let store = state.blobs.clone();
    let gate = MemberGate { db: &state.db, user: &user };
    let form = read_form(&state.config.uploads, &headers, multipart, Some(gate)).await?;
    store_file(store, form).await
}

/// Credential-free variant: always the mock store.
async fn upload_simple(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> AppResult<Response> {
    let store = state.mock_blobs.clone();
    let form = read_form(&state.config.uploads, &headers, multipart, None).await?;
    store_file(store, form).await
}

/// Who is uploading, checked against form fields as they are parsed.
struct MemberGate<'a> {
    db: &'a DbPool,
    user: &'a SessionUser,
}

impl MemberGate<'_> {
    fn check_user(&self, claimed: &str) -> AppResult<()> {
        if !claimed.is_empty() && claimed != self.user.id {
            tracing::warn!(session_user = %self.user.id, claimed = %claimed, "Upload userId does not match session");
            return Err(AppError::Unauthorized);
        }
        Ok(())
    }

    fn check_community(&self, community_id: &str) -> AppResult<()> {
        if community_id.is_empty() {
            return Ok(());
        }
        let community = community::get_community_by_id(self.db, community_id)?
            .ok_or(AppError::NotFound)?;
        if !get_user_role_in_community(self.db, &self.user.id, &community.id)?.is_member() {
            tracing::warn!(user_id = %self.user.id, community_id, "Upload from non-member refused");
            return Err(AppError::Forbidden);
        }
        Ok(())
    }
}

struct UploadForm {
    community_id: String,
    filename: String,
    content_type: String,
    data: Bytes,
}

fn bad_multipart(e: MultipartError) -> AppError {
    AppError::BadRequest(format!("Invalid upload: {}", e.body_text()))
}

async fn text_field(field: Field<'_>) -> AppResult<String> {
    Ok(field.text().await.map_err(bad_multipart)?.trim().to_string())
}

/// Parse the form, enforcing the per-type size limit before any byte is
/// stored: first from the declared sizes, then while the file streams in.
/// With a gate, identity and membership are checked field by field.
async fn read_form(
    limits: &UploadLimits,
    headers: &HeaderMap,
    mut multipart: Multipart,
    gate: Option<MemberGate<'_>>,
) -> AppResult<UploadForm> {
    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(length) = declared_length {
        limits.check_request(length.saturating_sub(MULTIPART_SLACK))?;
    }

    let mut community_id = None;
    let mut declared_size: Option<u64> = None;
    let mut file: Option<(String, String, MediaKind, Bytes)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "communityId" => {
                let value = text_field(field).await?;
                if let Some(gate) = &gate {
                    gate.check_community(&value)?;
                }
                community_id = Some(value);
            }
            "userId" => {
                let value = text_field(field).await?;
                if let Some(gate) = &gate {
                    gate.check_user(&value)?;
                }
            }
            "fileSize" => declared_size = text_field(field).await?.parse().ok(),
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        mime_guess::from_path(&filename)
                            .first_or_octet_stream()
                            .to_string()
                    });
                let kind = MediaKind::from_content_type(&content_type);
                if let Some(size) = declared_size {
                    limits.check(kind, size)?;
                }

                let max = limits.max_bytes(kind);
                let mut buf = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
                    let received = (buf.len() + chunk.len()) as u64;
                    if received > max {
                        tracing::warn!(filename = %filename, received, max, "Upload over limit, aborting");
                        limits.check(kind, received)?;
                    }
                    buf.extend_from_slice(&chunk);
                }
                file = Some((filename, content_type, kind, buf.freeze()));
            }
            other => tracing::debug!(field = other, "Ignoring unknown upload field"),
        }
    }

    let (filename, content_type, kind, data) =
        file.ok_or_else(|| AppError::BadRequest("Missing required field: file".into()))?;
    // A size declared after the file part still has to agree with the limit.
    if let Some(size) = declared_size {
        limits.check(kind, size)?;
    }
    let community_id = community_id
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing required field: communityId".into()))?;

    Ok(UploadForm {
        community_id,
        filename,
        content_type,
        data,
    })
}

async fn store_file(store: Arc<dyn BlobStore>, form: UploadForm) -> AppResult<Response> {
    let path = blob_path(
        &form.community_id,
        &form.filename,
        chrono::Utc::now().timestamp_millis(),
    );
    let blob = store.put(&path, &form.content_type, form.data).await?;
    tracing::info!(store = store.name(), path = %blob.path, size = blob.size, "Upload stored");
    Ok((CORS_HEADERS, Json(blob)).into_response())
}
