use super::Detector;
use crate::error::Result;
use crate::http::HttpClient;
use serde_json::{Value, json};
use std::time::Duration;

/// Detector served over HTTP: `POST {"source": ...}`, JSON findings back.
pub struct RemoteDetector {
    name: String,
    url: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl RemoteDetector {
    pub fn new(
        name: &str,
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let url = url.into();
        Ok(Self {
            name: if name.is_empty() { url.clone() } else { name.to_string() },
            url,
            api_key,
            http: HttpClient::new(concat!("cwe-score/", env!("CARGO_PKG_VERSION")), timeout)?,
        })
    }
}

impl Detector for RemoteDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect(&self, source: &str) -> Result<Value> {
        self.http
            .post_json(&self.url, &json!({ "source": source }), self.api_key.as_deref())
            .await
    }
}
