//! Owner broadcasts to community members over email or WhatsApp.

pub mod templates;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::db::models::MemberView;
use crate::error::{AppError, AppResult};
use crate::providers::{EmailProvider, OutboundEmail, WhatsAppProvider};

/// How many provider calls a broadcast keeps in flight.
const SEND_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Whatsapp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub channel: Channel,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub template_id: Option<String>,
    /// Restrict to these user ids; everyone when absent.
    pub member_ids: Option<Vec<String>>,
}

/// What to send once templates are resolved.
#[derive(Debug, Clone)]
pub struct Message {
    pub subject: Option<String>,
    pub body: String,
}

impl Message {
    pub fn new(channel: Channel, subject: Option<String>, body: Option<String>) -> AppResult<Self> {
        let body = body
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing required field: message".into()))?;
        let subject = subject.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        if channel == Channel::Email && subject.is_none() {
            return Err(AppError::BadRequest("Missing required field: subject".into()));
        }
        Ok(Self { subject, body })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Substitute `{{name}}` with the recipient's display name.
pub fn render(template: &str, name: &str) -> String {
    template.replace("{{name}}", name).replace("{{ name }}", name)
}

fn display_name(member: &MemberView) -> String {
    member
        .display_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "there".to_string())
}

enum Outcome {
    Sent,
    Failed,
    Skipped,
}

/// Deliver `message` to each recipient. Individual failures are logged and
/// counted; they never abort the rest of the broadcast.
pub async fn send_broadcast(
    email: &dyn EmailProvider,
    whatsapp: &dyn WhatsAppProvider,
    channel: Channel,
    message: &Message,
    recipients: Vec<MemberView>,
) -> BroadcastReport {
    let outcomes: Vec<Outcome> = stream::iter(recipients)
        .map(|member| async move {
            let name = display_name(&member);
            let body = render(&message.body, &name);
            let result = match channel {
                Channel::Email => {
                    let Some(address) = member.email.clone() else {
                        return Outcome::Skipped;
                    };
                    let subject = render(message.subject.as_deref().unwrap_or(""), &name);
                    email.send(&OutboundEmail::new(address, subject, body)).await
                }
                Channel::Whatsapp => {
                    let Some(phone) = member.phone.clone().filter(|p| !p.trim().is_empty()) else {
                        return Outcome::Skipped;
                    };
                    whatsapp.send_text(&phone, &body).await
                }
            };
            match result {
                Ok(_) => Outcome::Sent,
                Err(e) => {
                    tracing::warn!(user_id = %member.member.user_id, ?channel, "Broadcast send failed: {}", e);
                    Outcome::Failed
                }
            }
        })
        .buffer_unordered(SEND_CONCURRENCY)
        .collect()
        .await;

    let mut report = BroadcastReport::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Sent => report.sent += 1,
            Outcome::Failed => report.failed += 1,
            Outcome::Skipped => report.skipped += 1,
        }
    }
    tracing::info!(?channel, sent = report.sent, failed = report.failed, skipped = report.skipped, "Broadcast finished");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::CommunityMember;
    use crate::providers::{LogWhatsAppProvider, ProviderError, SentMessage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FlakyEmail {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl EmailProvider for FlakyEmail {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn send(&self, email: &OutboundEmail) -> Result<SentMessage, ProviderError> {
            let to = email.recipients().join(",");
            if to.starts_with("bounce") {
                return Err(ProviderError::Api {
                    status: 422,
                    message: "bad address".into(),
                    details: serde_json::Value::Null,
                });
            }
            self.seen
                .lock()
                .unwrap()
                .push((to, email.text.clone().unwrap_or_default()));
            Ok(SentMessage {
                id: "ok".into(),
                provider: "flaky".into(),
            })
        }
    }

    fn member(user_id: &str, name: Option<&str>, email: Option<&str>, phone: Option<&str>) -> MemberView {
        MemberView {
            member: CommunityMember {
                id: format!("m-{}", user_id),
                user_id: user_id.into(),
                community_id: "c1".into(),
                role: "member".into(),
                joined_at: "2024-01-01T00:00:00.000Z".into(),
                tags: vec![],
            },
            display_name: name.map(str::to_string),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            avatar_url: None,
        }
    }

    #[test]
    fn render_substitutes_name() {
        assert_eq!(render("Hi {{name}}!", "Ana"), "Hi Ana!");
        assert_eq!(render("Hi {{ name }}", "Ana"), "Hi Ana");
        assert_eq!(render("No placeholder", "Ana"), "No placeholder");
    }

    #[test]
    fn email_broadcast_needs_subject() {
        assert!(Message::new(Channel::Email, None, Some("Body".into())).is_err());
        assert!(Message::new(Channel::Whatsapp, None, Some("Body".into())).is_ok());
        assert!(Message::new(Channel::Whatsapp, None, Some("  ".into())).is_err());
    }

    #[tokio::test]
    async fn email_broadcast_counts_outcomes() {
        let email = FlakyEmail::default();
        let message = Message::new(Channel::Email, Some("News".into()), Some("Hello {{name}}".into())).unwrap();
        let recipients = vec![
            member("u1", Some("Ana"), Some("ana@example.com"), None),
            member("u2", None, Some("bounce@example.com"), None),
            member("u3", Some("Cy"), None, Some("+15550100")),
        ];

        let report = send_broadcast(&email, &LogWhatsAppProvider, Channel::Email, &message, recipients).await;
        assert_eq!(report, BroadcastReport { sent: 1, failed: 1, skipped: 1 });
        let seen = email.seen.lock().unwrap();
        assert_eq!(seen[0], ("ana@example.com".to_string(), "Hello Ana".to_string()));
    }

    #[tokio::test]
    async fn whatsapp_broadcast_skips_members_without_phone() {
        let message = Message::new(Channel::Whatsapp, None, Some("Tonight!".into())).unwrap();
        let recipients = vec![
            member("u1", Some("Ana"), Some("ana@example.com"), Some("+15550100")),
            member("u2", Some("Bo"), Some("bo@example.com"), None),
        ];
        let report = send_broadcast(
            &FlakyEmail::default(),
            &LogWhatsAppProvider,
            Channel::Whatsapp,
            &message,
            recipients,
        )
        .await;
        assert_eq!(report, BroadcastReport { sent: 1, failed: 0, skipped: 1 });
    }
}
