//! HTTP client for the upstream pharmacy record service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::RecordApiConfig;
use crate::error::RecordError;
use crate::phone::CanonicalPhone;
use crate::records::{Record, RecordSource, find_by_phone};

/// Record service reached over HTTP.
///
/// The service only exposes a full listing, so a phone lookup lists and
/// filters by canonical phone.
pub struct HttpRecordClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRecordClient {
    /// Create a new client from configuration.
    pub fn new(config: &RecordApiConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(
                    "Failed to build record client with {:?} timeout, using defaults: {}",
                    config.timeout,
                    e
                );
                Client::new()
            });

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn classify(&self, err: reqwest::Error) -> RecordError {
        if err.is_timeout() {
            RecordError::Timeout(self.timeout)
        } else if err.is_decode() {
            RecordError::Decode {
                reason: err.to_string(),
            }
        } else {
            RecordError::Transport {
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl RecordSource for HttpRecordClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, phone: &CanonicalPhone) -> Result<Option<Record>, RecordError> {
        let records = self.list_all().await?;
        Ok(find_by_phone(records, phone))
    }

    async fn list_all(&self) -> Result<Vec<Record>, RecordError> {
        let url = self.api_url("pharmacies");

        tracing::debug!("Fetching pharmacies from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;

        tracing::debug!("Record service response status: {}", status);

        if status.is_server_error() {
            return Err(RecordError::Server {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(RecordError::Client {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| RecordError::Decode {
            reason: format!("JSON parse error: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> RecordApiConfig {
        RecordApiConfig {
            base_url: base_url.to_string(),
            timeout: Duration::from_millis(200),
            retry_count: 1,
            retry_delay: Duration::from_millis(1),
            fixtures_path: None,
        }
    }

    #[test]
    fn test_api_url_joins_cleanly() {
        let client = HttpRecordClient::new(&config("https://api.example.com/"));
        assert_eq!(
            client.api_url("/pharmacies"),
            "https://api.example.com/pharmacies"
        );
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        // Port 9 (discard) on loopback is closed in test environments.
        let client = HttpRecordClient::new(&config("http://127.0.0.1:9"));
        let err = client.list_all().await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }
}
