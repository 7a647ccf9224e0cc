use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{json_or_error, HttpClient, ProviderError};
use crate::error::AppError;

/// `to` accepts either a single address or a list, as the public API always has.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    pub fn addresses(&self) -> Vec<String> {
        match self {
            Recipients::One(addr) => vec![addr.clone()],
            Recipients::Many(addrs) => addrs.clone(),
        }
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEmail {
    pub to: Option<Recipients>,
    pub subject: Option<String>,
    pub html: Option<String>,
    pub text: Option<String>,
    pub from: Option<String>,
    pub reply_to: Option<String>,
}

impl OutboundEmail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: Some(Recipients::One(to.into())),
            subject: Some(subject.into()),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn recipients(&self) -> Vec<String> {
        self.to.as_ref().map(Recipients::addresses).unwrap_or_default()
    }

    /// Checked before any provider is contacted.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.recipients().is_empty() {
            return Err(AppError::BadRequest("Missing required field: to".into()));
        }
        if self.subject.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(AppError::BadRequest("Missing required field: subject".into()));
        }
        let has_body = [&self.html, &self.text]
            .iter()
            .any(|b| b.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false));
        if !has_body {
            return Err(AppError::BadRequest(
                "Missing required field: html or text".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: String,
    pub provider: String,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, email: &OutboundEmail) -> Result<SentMessage, ProviderError>;
}

/// Resend (https://resend.com) adapter.
pub struct ResendEmailProvider {
    http: HttpClient,
    api_key: String,
    base_url: String,
    default_from: String,
}

impl ResendEmailProvider {
    pub fn new(http: HttpClient, api_key: String, base_url: String, default_from: String) -> Self {
        Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_from,
        }
    }
}

#[derive(Deserialize)]
struct ResendResponse {
    id: String,
}

#[async_trait]
impl EmailProvider for ResendEmailProvider {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SentMessage, ProviderError> {
        let payload = json!({
            "from": email.from.clone().unwrap_or_else(|| self.default_from.clone()),
            "to": email.recipients(),
            "subject": email.subject,
            "html": email.html,
            "text": email.text,
            "reply_to": email.reply_to,
        });

        // The idempotency key makes the POST safe to retry.
        let request = self
            .http
            .post(&format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", uuid::Uuid::now_v7().to_string())
            .json(&payload);

        let response = self.http.execute(request, true).await?;
        let body: ResendResponse = json_or_error(response).await?;

        tracing::info!(id = %body.id, recipients = email.recipients().len(), "Email sent via Resend");
        Ok(SentMessage {
            id: body.id,
            provider: self.name().to_string(),
        })
    }
}

/// Used when no email provider is configured: logs instead of sending.
#[derive(Default)]
pub struct LogEmailProvider {
    sent: AtomicU64,
}

#[async_trait]
impl EmailProvider for LogEmailProvider {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SentMessage, ProviderError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            to = ?email.recipients(),
            subject = email.subject.as_deref().unwrap_or(""),
            "Email provider not configured; logging message instead of sending"
        );
        tracing::debug!(body = email.text.as_deref().or(email.html.as_deref()).unwrap_or(""));
        Ok(SentMessage {
            id: format!("log-{}", n),
            provider: self.name().to_string(),
        })
    }
}
