use crate::error::{Error, Result};
use reqwest::{Client, StatusCode, Url, header};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Thin JSON-over-HTTP client for detector services. Retries belong to the
/// detector adapter, so every call here is a single attempt.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::http(e.to_string()))?;

        Ok(Self { client })
    }

    pub async fn post_json(&self, url: &str, body: &Value, bearer: Option<&str>) -> Result<Value> {
        let mut req = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string());
        if let Some(token) = bearer {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let resp = req.send().await.map_err(|e| Error::http(e.to_string()))?;
        let service = service_label(resp.url());
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimit {
                endpoint: service,
                retry_after_secs: retry_after(resp.headers()),
            });
        }
        let text = resp.text().await.map_err(|e| Error::http(e.to_string()))?;
        if !status.is_success() {
            // Error bodies can be whole tracebacks.
            let detail: String = text.trim().chars().take(500).collect();
            return Err(Error::api_with_status(
                service,
                format!("detector service answered {status}: {detail}"),
                status.as_u16(),
            ));
        }
        debug!(url, bytes = text.len(), "detector response received");
        parse_body(&text)
    }
}

/// Some inference servers return their JSON payload encoded as a JSON string;
/// unwrap one level of that.
fn parse_body(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::parse(format!("JSON parse: {e}")))?;
    if let Value::String(inner) = &value {
        if let Ok(decoded) = serde_json::from_str::<Value>(inner) {
            if decoded.is_array() || decoded.is_object() {
                return Ok(decoded);
            }
        }
    }
    Ok(value)
}

/// `host:port` of the detector service, used to label errors.
fn service_label(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => url.as_str().to_string(),
    }
}

/// `Retry-After` in seconds; the HTTP-date form is ignored.
fn retry_after(headers: &header::HeaderMap) -> Option<u64> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
