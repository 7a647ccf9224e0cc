use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    Like,
    Play,
    View,
    Finish,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::Like => "like",
            InteractionType::Play => "play",
            InteractionType::View => "view",
            InteractionType::Finish => "finish",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    /// Overwritten with the session user when received over HTTP.
    #[serde(default)]
    pub user_id: String,
    pub post_id: String,
    pub community_id: String,
    pub interaction_type: InteractionType,
    pub media_type: Option<String>,
    pub play_duration_seconds: Option<f64>,
}

impl InteractionEvent {
    pub fn validate(&self) -> AppResult<()> {
        for (name, value) in [
            ("userId", &self.user_id),
            ("postId", &self.post_id),
            ("communityId", &self.community_id),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::BadRequest(format!("Missing required field: {}", name)));
            }
        }
        if matches!(self.play_duration_seconds, Some(d) if !d.is_finite() || d < 0.0) {
            return Err(AppError::BadRequest(
                "playDurationSeconds must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}

pub fn insert_interaction(pool: &DbPool, event: &InteractionEvent) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO content_interactions (id, user_id, post_id, community_id, interaction_type,
            media_type, play_duration_seconds, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            db::new_id(),
            event.user_id,
            event.post_id,
            event.community_id,
            event.interaction_type.as_str(),
            event.media_type,
            event.play_duration_seconds,
            db::now_timestamp()
        ],
    )?;
    Ok(())
}

/// Fire-and-forget analytics writer. Events are queued and persisted by a
/// background worker; failures are logged and never reach the caller.
#[derive(Clone)]
pub struct InteractionRecorder {
    tx: mpsc::UnboundedSender<InteractionEvent>,
}

impl InteractionRecorder {
    pub fn spawn(pool: DbPool) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<InteractionEvent>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let pool = pool.clone();
                let outcome =
                    tokio::task::spawn_blocking(move || insert_interaction(&pool, &event)).await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("Failed to record interaction: {}", e),
                    Err(e) => tracing::warn!("Interaction writer task failed: {}", e),
                }
            }
            tracing::debug!("Interaction recorder stopped");
        });

        Self { tx }
    }

    pub fn record(&self, event: InteractionEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::warn!(post_id = %e.0.post_id, "Interaction dropped, recorder is gone");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub liked: bool,
    pub likes_count: i64,
}

/// Flip the caller's like on a post. The keyed like row and the counter move
/// together in one immediate transaction, so concurrent toggles converge.
pub fn toggle_like(pool: &DbPool, post_id: &str, user_id: &str) -> AppResult<LikeOutcome> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let exists: Option<i64> = tx
        .query_row(
            "SELECT likes FROM posts WHERE id = ?1",
            params![post_id],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(AppError::NotFound);
    }

    let unliked = tx.execute(
        "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
        params![post_id, user_id],
    )?;
    let liked = if unliked > 0 {
        tx.execute(
            "UPDATE posts SET likes = MAX(likes - 1, 0) WHERE id = ?1",
            params![post_id],
        )?;
        false
    } else {
        tx.execute(
            "INSERT INTO post_likes (post_id, user_id) VALUES (?1, ?2)",
            params![post_id, user_id],
        )?;
        tx.execute(
            "UPDATE posts SET likes = likes + 1 WHERE id = ?1",
            params![post_id],
        )?;
        true
    };

    let likes_count: i64 = tx.query_row(
        "SELECT likes FROM posts WHERE id = ?1",
        params![post_id],
        |row| row.get(0),
    )?;
    tx.commit()?;

    Ok(LikeOutcome { liked, likes_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::posts::{create_post, NewPost};
    use crate::community::test_support::{pool, seed_community, seed_user};
    use crate::db::models::{PostContent, PostType};
    use std::sync::Arc;
    use std::time::Duration;

    fn seed_post(pool: &DbPool) -> (String, String) {
        let owner = seed_user(pool, "owner@example.com");
        let community = seed_community(pool, &owner, "likes");
        let post = create_post(
            pool,
            &community,
            &owner,
            NewPost {
                post_type: PostType::Text,
                title: Some("Hello".into()),
                content: PostContent::default(),
                visibility: None,
            },
        )
        .unwrap();
        (post.id, community.id)
    }

    #[test]
    fn toggling_twice_restores_count() {
        let (_tmp, pool) = pool();
        let (post_id, _) = seed_post(&pool);

        let first = toggle_like(&pool, &post_id, "u2").unwrap();
        assert_eq!(first, LikeOutcome { liked: true, likes_count: 1 });
        let second = toggle_like(&pool, &post_id, "u2").unwrap();
        assert_eq!(second, LikeOutcome { liked: false, likes_count: 0 });
    }

    #[test]
    fn unknown_post_is_not_found() {
        let (_tmp, pool) = pool();
        assert!(matches!(toggle_like(&pool, "missing", "u1"), Err(AppError::NotFound)));
    }

    #[test]
    fn concurrent_toggles_from_distinct_users_converge() {
        let (_tmp, pool) = pool();
        let (post_id, _) = seed_post(&pool);
        let post_id = Arc::new(post_id);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let pool = pool.clone();
                let post_id = Arc::clone(&post_id);
                std::thread::spawn(move || toggle_like(&pool, &post_id, &format!("user-{}", i)))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().unwrap().liked);
        }

        let count = toggle_like(&pool, &post_id, "late").unwrap().likes_count;
        assert_eq!(count, 17);
    }

    #[tokio::test]
    async fn recorder_persists_in_background() {
        let (_tmp, pool) = pool();
        let (post_id, community_id) = seed_post(&pool);
        let recorder = InteractionRecorder::spawn(pool.clone());

        recorder.record(InteractionEvent {
            user_id: "u2".into(),
            post_id,
            community_id,
            interaction_type: InteractionType::Play,
            media_type: Some("audio".into()),
            play_duration_seconds: Some(12.5),
        });

        let mut stored = 0;
        for _ in 0..50 {
            stored = pool
                .get()
                .unwrap()
                .query_row("SELECT COUNT(*) FROM content_interactions", [], |r| {
                    r.get::<_, i64>(0)
                })
                .unwrap();
            if stored == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(stored, 1);
    }

    #[test]
    fn validation_names_missing_field() {
        let event = InteractionEvent {
            user_id: "u1".into(),
            post_id: "".into(),
            community_id: "c1".into(),
            interaction_type: InteractionType::View,
            media_type: None,
            play_duration_seconds: None,
        };
        let err = event.validate().unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("postId")));
    }
}
