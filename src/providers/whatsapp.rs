use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use super::{api_error, json_or_error, HttpClient, ProviderError, SentMessage};

const META_MEDIA_HOST: &str = "https://lookaside.fbsbx.com";

#[derive(Debug, Clone)]
pub struct MediaBlob {
    pub content_type: String,
    pub data: Bytes,
}

#[async_trait]
pub trait WhatsAppProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_text(&self, to: &str, body: &str) -> Result<SentMessage, ProviderError>;

    async fn fetch_media(&self, media_id: &str) -> Result<MediaBlob, ProviderError>;
}

/// 360dialog WhatsApp Business API adapter.
pub struct DialogWhatsAppProvider {
    http: HttpClient,
    api_key: String,
    base_url: String,
}

impl DialogWhatsAppProvider {
    pub fn new(http: HttpClient, api_key: String, base_url: String) -> Self {
        Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Media URLs point at Meta's CDN; 360dialog proxies them under its own host.
    fn proxied_media_url(&self, url: &str) -> String {
        match url.strip_prefix(META_MEDIA_HOST) {
            Some(rest) => format!("{}{}", self.base_url, rest),
            None => url.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct SendResponse {
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
struct MediaInfo {
    url: String,
    mime_type: Option<String>,
}

#[async_trait]
impl WhatsAppProvider for DialogWhatsAppProvider {
    fn name(&self) -> &'static str {
        "360dialog"
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<SentMessage, ProviderError> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "body": body },
        });
        let request = self
            .http
            .post(&format!("{}/messages", self.base_url))
            .header("D360-API-KEY", &self.api_key)
            .json(&payload);

        let response = self.http.execute(request, false).await?;
        let sent: SendResponse = json_or_error(response).await?;
        let id = sent
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| ProviderError::Parse("no message id in response".into()))?;

        Ok(SentMessage {
            id,
            provider: self.name().to_string(),
        })
    }

    async fn fetch_media(&self, media_id: &str) -> Result<MediaBlob, ProviderError> {
        let request = self
            .http
            .get(&format!("{}/{}", self.base_url, media_id))
            .header("D360-API-KEY", &self.api_key);
        let info: MediaInfo = json_or_error(self.http.execute(request, true).await?).await?;

        let download = self
            .http
            .get(&self.proxied_media_url(&info.url))
            .header("D360-API-KEY", &self.api_key);
        let response = self.http.execute(download, true).await?;
        let status = response.status();
        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response.bytes().await?;
        if !status.is_success() {
            return Err(api_error(status, &data));
        }

        Ok(MediaBlob {
            content_type: info
                .mime_type
                .or(header_type)
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            data,
        })
    }
}

/// Used when WhatsApp is not configured: sends are logged, media is unavailable.
pub struct LogWhatsAppProvider;

#[async_trait]
impl WhatsAppProvider for LogWhatsAppProvider {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<SentMessage, ProviderError> {
        tracing::info!(to, len = body.len(), "WhatsApp not configured; logging message");
        Ok(SentMessage {
            id: format!("log-{}", uuid::Uuid::now_v7()),
            provider: self.name().to_string(),
        })
    }

    async fn fetch_media(&self, _media_id: &str) -> Result<MediaBlob, ProviderError> {
        Err(ProviderError::NotConfigured("WhatsApp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::RetryPolicy;
    use std::time::Duration;

    fn provider() -> DialogWhatsAppProvider {
        let http = HttpClient::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            RetryPolicy::none(),
        )
        .unwrap();
        DialogWhatsAppProvider::new(http, "key".into(), "https://waba.example/".into())
    }

    #[test]
    fn media_urls_are_rewritten_to_the_proxy_host() {
        let p = provider();
        assert_eq!(
            p.proxied_media_url("https://lookaside.fbsbx.com/whatsapp_business/attachments/?mid=1"),
            "https://waba.example/whatsapp_business/attachments/?mid=1"
        );
        assert_eq!(
            p.proxied_media_url("https://cdn.other/x"),
            "https://cdn.other/x"
        );
    }

    #[tokio::test]
    async fn log_provider_has_no_media() {
        let result = LogWhatsAppProvider.fetch_media("123").await;
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }
}
