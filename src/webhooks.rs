//! Append-only log of inbound provider webhooks.

use rusqlite::params;
use serde_json::Value;

use crate::db::{self, models::WebhookEvent};
use crate::error::AppResult;
use crate::state::DbPool;

pub const MAX_LIST: usize = 200;

pub fn record_event(
    pool: &DbPool,
    source: &str,
    event_type: Option<&str>,
    payload: &Value,
) -> AppResult<WebhookEvent> {
    let event = WebhookEvent {
        id: db::new_id(),
        source: source.to_string(),
        event_type: event_type.map(str::to_string),
        payload: payload.clone(),
        received_at: db::now_timestamp(),
    };
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO webhook_events (id, source, event_type, payload, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.id,
            event.source,
            event.event_type,
            serde_json::to_string(payload)?,
            event.received_at
        ],
    )?;
    tracing::info!(source, event_type = ?event.event_type, "Webhook received");
    Ok(event)
}

/// Most recent events for a source, newest first.
pub fn list_recent(pool: &DbPool, source: &str, limit: usize) -> AppResult<Vec<WebhookEvent>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, source, event_type, payload, received_at FROM webhook_events
         WHERE source = ?1 ORDER BY received_at DESC, rowid DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![source, limit.min(MAX_LIST) as i64], |row| {
            let payload: String = row.get(3)?;
            Ok(WebhookEvent {
                id: row.get(0)?,
                source: row.get(1)?,
                event_type: row.get(2)?,
                payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
                received_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Resend posts `{type, data}`.
pub fn resend_event_type(payload: &Value) -> Option<&str> {
    payload.get("type").and_then(Value::as_str)
}

/// WhatsApp Business posts `{entry: [{changes: [{field, value}]}]}`; a status
/// update and an inbound message are told apart by the keys under `value`.
pub fn whatsapp_event_type(payload: &Value) -> Option<&str> {
    let value = payload.pointer("/entry/0/changes/0/value")?;
    if value.get("messages").is_some() {
        Some("message")
    } else if value.get("statuses").is_some() {
        Some("status")
    } else {
        payload
            .pointer("/entry/0/changes/0/field")
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_are_listed_newest_first_per_source() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();

        record_event(&pool, "resend", Some("email.sent"), &json!({"n": 1})).unwrap();
        record_event(&pool, "resend", Some("email.delivered"), &json!({"n": 2})).unwrap();
        record_event(&pool, "whatsapp", None, &json!({})).unwrap();

        let events = list_recent(&pool, "resend", 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload["n"], 2);
        assert_eq!(list_recent(&pool, "resend", 1).unwrap().len(), 1);
    }

    #[test]
    fn event_types_are_extracted() {
        assert_eq!(resend_event_type(&json!({"type": "email.bounced"})), Some("email.bounced"));
        let inbound = json!({"entry": [{"changes": [{"field": "messages", "value": {"messages": []}}]}]});
        assert_eq!(whatsapp_event_type(&inbound), Some("message"));
        let status = json!({"entry": [{"changes": [{"field": "messages", "value": {"statuses": []}}]}]});
        assert_eq!(whatsapp_event_type(&status), Some("status"));
        assert_eq!(whatsapp_event_type(&json!({})), None);
    }
}
