use rusqlite::{params, OptionalExtension, Row};
use serde::Deserialize;

use crate::db::{self, models::BroadcastTemplate};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

fn map_template(row: &Row<'_>) -> rusqlite::Result<BroadcastTemplate> {
    Ok(BroadcastTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        subject: row.get(2)?,
        message: row.get(3)?,
        template_type: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTemplate {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub template_type: Option<String>,
}

pub fn create_template(pool: &DbPool, new: NewTemplate) -> AppResult<BroadcastTemplate> {
    let required = |value: Option<String>, field: &str| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::BadRequest(format!("Missing required field: {}", field)))
    };
    let name = required(new.name, "name")?;
    let message = required(new.message, "message")?;
    let template_type = new.template_type.unwrap_or_else(|| "email".to_string());
    if !matches!(template_type.as_str(), "email" | "whatsapp") {
        return Err(AppError::BadRequest(format!(
            "Unknown template type: {}",
            template_type
        )));
    }

    let template = BroadcastTemplate {
        id: db::new_id(),
        name,
        subject: new.subject.filter(|s| !s.trim().is_empty()),
        message,
        template_type,
        created_at: db::now_timestamp(),
    };
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO broadcast_templates (id, name, subject, message, type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            template.id,
            template.name,
            template.subject,
            template.message,
            template.template_type,
            template.created_at
        ],
    )?;
    Ok(template)
}

pub fn get_template(pool: &DbPool, id: &str) -> AppResult<Option<BroadcastTemplate>> {
    let conn = pool.get()?;
    let template = conn
        .query_row(
            "SELECT id, name, subject, message, type, created_at
             FROM broadcast_templates WHERE id = ?1",
            params![id],
            map_template,
        )
        .optional()?;
    Ok(template)
}

pub fn list_templates(pool: &DbPool) -> AppResult<Vec<BroadcastTemplate>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, name, subject, message, type, created_at
         FROM broadcast_templates ORDER BY created_at DESC, rowid DESC",
    )?;
    let templates = stmt
        .query_map([], map_template)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(templates)
}

pub fn delete_template(pool: &DbPool, id: &str) -> AppResult<bool> {
    let conn = pool.get()?;
    Ok(conn.execute("DELETE FROM broadcast_templates WHERE id = ?1", params![id])? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_crud() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();

        let missing = create_template(
            &pool,
            NewTemplate {
                name: Some("Welcome".into()),
                ..Default::default()
            },
        );
        assert!(matches!(missing, Err(AppError::BadRequest(msg)) if msg.contains("message")));

        let first = create_template(
            &pool,
            NewTemplate {
                name: Some("Welcome".into()),
                subject: Some("Hi {{name}}".into()),
                message: Some("Glad you're here, {{name}}".into()),
                template_type: None,
            },
        )
        .unwrap();
        let second = create_template(
            &pool,
            NewTemplate {
                name: Some("Ping".into()),
                message: Some("Event tonight".into()),
                template_type: Some("whatsapp".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let listed = list_templates(&pool).unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].template_type, "email");
        assert_eq!(get_template(&pool, &first.id).unwrap().unwrap().name, "Welcome");

        assert!(delete_template(&pool, &first.id).unwrap());
        assert!(!delete_template(&pool, &first.id).unwrap());
    }
}
