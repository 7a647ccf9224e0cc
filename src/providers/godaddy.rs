use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{api_error, HttpClient, ProviderError};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecord {
    pub domain: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub data: String,
    pub ttl: Option<u32>,
}

const ALLOWED_TYPES: &[&str] = &["A", "AAAA", "CNAME", "TXT", "MX"];

impl DnsRecord {
    pub fn validate(&self) -> Result<(), String> {
        if self.domain.trim().is_empty() {
            return Err("Missing required field: domain".into());
        }
        if self.name.trim().is_empty() {
            return Err("Missing required field: name".into());
        }
        if self.data.trim().is_empty() {
            return Err("Missing required field: data".into());
        }
        if !ALLOWED_TYPES.contains(&self.record_type.to_ascii_uppercase().as_str()) {
            return Err(format!("Unsupported record type: {}", self.record_type));
        }
        Ok(())
    }
}

/// GoDaddy DNS record management for community custom domains.
#[derive(Clone)]
pub struct GoDaddyClient {
    http: HttpClient,
    api_key: String,
    api_secret: String,
    base_url: String,
}

impl GoDaddyClient {
    pub fn new(http: HttpClient, api_key: String, api_secret: String, base_url: String) -> Self {
        Self {
            http,
            api_key,
            api_secret,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Replace the records for (type, name). PUT is idempotent, so it is retried.
    pub async fn upsert_record(&self, record: &DnsRecord) -> Result<(), ProviderError> {
        let record_type = record.record_type.to_ascii_uppercase();
        let url = format!(
            "{}/v1/domains/{}/records/{}/{}",
            self.base_url, record.domain, record_type, record.name
        );
        let request = self
            .http
            .put(&url)
            .header(
                "Authorization",
                format!("sso-key {}:{}", self.api_key, self.api_secret),
            )
            .json(&json!([{ "data": record.data, "ttl": record.ttl.unwrap_or(600) }]));

        let response = self.http.execute(request, true).await?;
        let status = response.status();
        if status.is_success() {
            tracing::info!(domain = %record.domain, name = %record.name, "DNS record updated");
            return Ok(());
        }
        let body = response.bytes().await?;
        Err(api_error(status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(record_type: &str) -> DnsRecord {
        DnsRecord {
            domain: "example.com".into(),
            record_type: record_type.into(),
            name: "community".into(),
            data: "kyozo.app".into(),
            ttl: None,
        }
    }

    #[test]
    fn accepts_known_types_case_insensitively() {
        assert!(record("cname").validate().is_ok());
        assert!(record("TXT").validate().is_ok());
    }

    #[test]
    fn rejects_unknown_types_and_blanks() {
        assert!(record("SRV").validate().is_err());
        let mut blank = record("A");
        blank.data = " ".into();
        assert_eq!(blank.validate().unwrap_err(), "Missing required field: data");
    }
}
