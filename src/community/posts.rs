use rusqlite::{params, OptionalExtension, Row};
use serde::Deserialize;

use crate::db::{
    self,
    models::{Community, Post, PostContent, PostType, Visibility},
};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

const POST_COLUMNS: &str = "id, community_id, community_handle, author_id, type, title,
     content_text, media_urls, visibility, likes, comments, created_at, updated_at";

fn map_post(row: &Row<'_>) -> rusqlite::Result<Post> {
    let post_type: String = row.get(4)?;
    let media_urls: String = row.get(7)?;
    let visibility: String = row.get(8)?;
    Ok(Post {
        id: row.get(0)?,
        community_id: row.get(1)?,
        community_handle: row.get(2)?,
        author_id: row.get(3)?,
        post_type: PostType::parse(&post_type).unwrap_or(PostType::Text),
        title: row.get(5)?,
        content: PostContent {
            text: row.get(6)?,
            media_urls: db::decode_list(&media_urls),
        },
        visibility: Visibility::parse(&visibility).unwrap_or(Visibility::Public),
        likes: row.get(9)?,
        comments: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub title: Option<String>,
    #[serde(default)]
    pub content: PostContent,
    pub visibility: Option<Visibility>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_shape(post_type: PostType, title: &Option<String>, content: &PostContent) -> AppResult<()> {
    if post_type != PostType::Text && content.media_urls.is_empty() {
        return Err(AppError::BadRequest(format!(
            "{} posts need at least one media URL",
            post_type.as_str()
        )));
    }
    if title.is_none() && content.text.is_none() && content.media_urls.is_empty() {
        return Err(AppError::BadRequest(
            "A post needs a title, text or media".into(),
        ));
    }
    Ok(())
}

pub fn create_post(
    pool: &DbPool,
    community: &Community,
    author_id: &str,
    new: NewPost,
) -> AppResult<Post> {
    let title = non_empty(new.title);
    let content = PostContent {
        text: non_empty(new.content.text),
        media_urls: new.content.media_urls,
    };
    check_shape(new.post_type, &title, &content)?;

    let id = db::new_id();
    let now = db::now_timestamp();
    let visibility = new.visibility.unwrap_or(Visibility::Public);

    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO posts (id, community_id, community_handle, author_id, type, title,
            content_text, media_urls, visibility, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            id,
            community.id,
            community.handle,
            author_id,
            new.post_type.as_str(),
            title,
            content.text,
            db::encode_list(&content.media_urls),
            visibility.as_str(),
            now
        ],
    )?;

    tracing::info!(post_id = %id, community_id = %community.id, "Post created");
    Ok(Post {
        id,
        community_id: community.id.clone(),
        community_handle: community.handle.clone(),
        author_id: author_id.to_string(),
        post_type: new.post_type,
        title,
        content,
        visibility,
        likes: 0,
        comments: 0,
        created_at: now.clone(),
        updated_at: now,
    })
}

pub fn get_post(pool: &DbPool, id: &str) -> AppResult<Option<Post>> {
    let conn = pool.get()?;
    let post = conn
        .query_row(
            &format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS),
            params![id],
            map_post,
        )
        .optional()?;
    Ok(post)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostUpdate {
    pub title: Option<String>,
    pub text: Option<String>,
    pub media_urls: Option<Vec<String>>,
    pub visibility: Option<Visibility>,
}

/// Edit a post in place. The merged result must still be a valid post.
pub fn update_post(pool: &DbPool, id: &str, update: PostUpdate) -> AppResult<Option<Post>> {
    let Some(current) = get_post(pool, id)? else {
        return Ok(None);
    };

    let title = match update.title {
        Some(t) => non_empty(Some(t)),
        None => current.title,
    };
    let content = PostContent {
        text: match update.text {
            Some(t) => non_empty(Some(t)),
            None => current.content.text,
        },
        media_urls: update.media_urls.unwrap_or(current.content.media_urls),
    };
    check_shape(current.post_type, &title, &content)?;
    let visibility = update.visibility.unwrap_or(current.visibility);
    let now = db::now_timestamp();

    let conn = pool.get()?;
    conn.execute(
        "UPDATE posts SET title = ?1, content_text = ?2, media_urls = ?3, visibility = ?4,
            updated_at = ?5
         WHERE id = ?6",
        params![
            title,
            content.text,
            db::encode_list(&content.media_urls),
            visibility.as_str(),
            now,
            id
        ],
    )?;

    Ok(Some(Post {
        title,
        content,
        visibility,
        updated_at: now,
        ..current
    }))
}

/// Delete a post, returning it so the caller can clean up its media.
pub fn delete_post(pool: &DbPool, id: &str) -> AppResult<Option<Post>> {
    let Some(post) = get_post(pool, id)? else {
        return Ok(None);
    };
    let conn = pool.get()?;
    conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
    tracing::info!(post_id = id, community_id = %post.community_id, "Post deleted");
    Ok(Some(post))
}

/// A community's feed, newest first. Private posts are only included for
/// members.
pub fn list_posts(pool: &DbPool, community_id: &str, include_private: bool) -> AppResult<Vec<Post>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM posts
         WHERE community_id = ?1 AND (?2 OR visibility = 'public')
         ORDER BY created_at DESC, rowid DESC",
        POST_COLUMNS
    ))?;
    let posts = stmt
        .query_map(params![community_id, include_private], map_post)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::test_support::{pool, seed_community, seed_user};

    fn text_post(text: &str, visibility: Visibility) -> NewPost {
        NewPost {
            post_type: PostType::Text,
            title: None,
            content: PostContent {
                text: Some(text.into()),
                media_urls: vec![],
            },
            visibility: Some(visibility),
        }
    }

    #[test]
    fn feed_is_newest_first_and_filters_private() {
        let (_tmp, pool) = pool();
        let owner = seed_user(&pool, "owner@example.com");
        let community = seed_community(&pool, &owner, "feed");

        create_post(&pool, &community, &owner, text_post("first", Visibility::Public)).unwrap();
        create_post(&pool, &community, &owner, text_post("second", Visibility::Private)).unwrap();
        create_post(&pool, &community, &owner, text_post("third", Visibility::Public)).unwrap();

        let all: Vec<_> = list_posts(&pool, &community.id, true)
            .unwrap()
            .into_iter()
            .filter_map(|p| p.content.text)
            .collect();
        assert_eq!(all, vec!["third", "second", "first"]);

        let public = list_posts(&pool, &community.id, false).unwrap();
        assert_eq!(public.len(), 2);
        assert!(public.iter().all(|p| p.visibility == Visibility::Public));
    }

    #[test]
    fn media_posts_need_media() {
        let (_tmp, pool) = pool();
        let owner = seed_user(&pool, "owner@example.com");
        let community = seed_community(&pool, &owner, "media");

        let err = create_post(
            &pool,
            &community,
            &owner,
            NewPost {
                post_type: PostType::Video,
                title: Some("Clip".into()),
                content: PostContent::default(),
                visibility: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("video")));

        let empty = create_post(&pool, &community, &owner, text_post("   ", Visibility::Public));
        assert!(empty.is_err());
    }

    #[test]
    fn edit_merges_and_delete_returns_post() {
        let (_tmp, pool) = pool();
        let owner = seed_user(&pool, "owner@example.com");
        let community = seed_community(&pool, &owner, "edits");
        let post =
            create_post(&pool, &community, &owner, text_post("draft", Visibility::Public)).unwrap();

        let edited = update_post(
            &pool,
            &post.id,
            PostUpdate {
                title: Some("Final".into()),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(edited.title.as_deref(), Some("Final"));
        assert_eq!(edited.content.text.as_deref(), Some("draft"));

        let deleted = delete_post(&pool, &post.id).unwrap().unwrap();
        assert_eq!(deleted.id, post.id);
        assert!(get_post(&pool, &post.id).unwrap().is_none());
        assert!(update_post(&pool, &post.id, PostUpdate::default()).unwrap().is_none());
    }
}
