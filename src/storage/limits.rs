use crate::config::UploadLimits;
use crate::error::{AppError, AppResult};

const MB: u64 = 1024 * 1024;
const MAX_FILENAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Other,
}

impl MediaKind {
    pub fn from_content_type(content_type: &str) -> Self {
        match content_type.split('/').next().unwrap_or("") {
            "image" => MediaKind::Image,
            "audio" => MediaKind::Audio,
            "video" => MediaKind::Video,
            _ => MediaKind::Other,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Other => "other",
        }
    }
}

impl UploadLimits {
    pub fn max_bytes(&self, kind: MediaKind) -> u64 {
        let mb = match kind {
            MediaKind::Image => self.image_mb,
            MediaKind::Audio => self.audio_mb,
            MediaKind::Video => self.video_mb,
            MediaKind::Other => self.other_mb,
        };
        mb * MB
    }

    /// The kind with the most generous limit. Used to reject oversized
    /// requests before the file's own type is known.
    pub fn largest(&self) -> MediaKind {
        [MediaKind::Image, MediaKind::Audio, MediaKind::Video, MediaKind::Other]
            .into_iter()
            .max_by_key(|kind| self.max_bytes(*kind))
            .unwrap_or(MediaKind::Other)
    }

    /// Whole-request check for when the file's type is not known yet.
    pub fn check_request(&self, size: u64) -> AppResult<()> {
        let max = self.max_bytes(self.largest());
        if size > max {
            return Err(AppError::BadRequest(format!(
                "uploads must be {}MB or smaller",
                max / MB
            )));
        }
        Ok(())
    }

    pub fn check(&self, kind: MediaKind, size: u64) -> AppResult<()> {
        let max = self.max_bytes(kind);
        if size > max {
            return Err(AppError::BadRequest(format!(
                "{} files must be {}MB or smaller",
                kind.label(),
                max / MB
            )));
        }
        Ok(())
    }
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`, and never return
/// a hidden or empty name.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let mut cleaned = String::with_capacity(base.len());
    for c in base.chars() {
        let keep = c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_');
        let next = if keep { c } else { '_' };
        if next == '_' && cleaned.ends_with('_') {
            continue;
        }
        cleaned.push(next);
    }

    let trimmed = cleaned.trim_start_matches('.');
    let mut result: String = trimmed.chars().take(MAX_FILENAME_LEN).collect();
    if result.is_empty() || result.chars().all(|c| c == '_') {
        result = "file".to_string();
    }
    result
}

/// `community-posts/{communityId}/{timestampMillis}-{sanitizedFilename}`
pub fn blob_path(community_id: &str, filename: &str, timestamp_millis: i64) -> String {
    format!(
        "community-posts/{}/{}-{}",
        sanitize_filename(community_id),
        timestamp_millis,
        sanitize_filename(filename)
    )
}
