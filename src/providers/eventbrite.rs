use serde_json::Value;

use super::{json_or_error, HttpClient, ProviderError};

/// Eventbrite passthrough. The caller supplies its own OAuth token per request.
#[derive(Clone)]
pub struct EventbriteClient {
    http: HttpClient,
    base_url: String,
}

impl EventbriteClient {
    pub fn new(http: HttpClient, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn events_url(&self, organization_id: Option<&str>) -> String {
        match organization_id {
            Some(org) => format!("{}/organizations/{}/events/", self.base_url, org),
            None => format!("{}/users/me/events/", self.base_url),
        }
    }

    pub async fn list_events(
        &self,
        token: &str,
        organization_id: Option<&str>,
    ) -> Result<Value, ProviderError> {
        let request = self
            .http
            .get(&self.events_url(organization_id))
            .bearer_auth(token)
            .query(&[("status", "live,started,ended"), ("order_by", "start_desc")]);
        json_or_error(self.http.execute(request, true).await?).await
    }

    pub async fn list_attendees(&self, token: &str, event_id: &str) -> Result<Value, ProviderError> {
        let request = self
            .http
            .get(&format!("{}/events/{}/attendees/", self.base_url, event_id))
            .bearer_auth(token);
        json_or_error(self.http.execute(request, true).await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::RetryPolicy;
    use std::time::Duration;

    #[test]
    fn events_url_prefers_organization() {
        let http = HttpClient::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            RetryPolicy::none(),
        )
        .unwrap();
        let client = EventbriteClient::new(http, "https://eb.example/v3/".into());
        assert_eq!(
            client.events_url(Some("42")),
            "https://eb.example/v3/organizations/42/events/"
        );
        assert_eq!(client.events_url(None), "https://eb.example/v3/users/me/events/");
    }
}
