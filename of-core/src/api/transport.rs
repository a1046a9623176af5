//! HTTP transport for device requests
//!
//! The client only needs "GET a path, give me status and body text", so the
//! transport is a small trait. [`HttpTransport`] is the reqwest-backed
//! implementation used against real boards.

use async_trait::async_trait;
use serde_json::Value;

use crate::constants::timing;
use crate::error::{OpenFanError, Result};

/// Status code and body of one device response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub text: String,
}

impl RawResponse {
    pub fn new(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
        }
    }

    /// Body parsed as JSON, if it is JSON
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.text).ok()
    }

    pub fn is_http_error(&self) -> bool {
        self.status >= 400
    }
}

/// Issues GET requests against one device
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `path` (which includes any query string)
    ///
    /// HTTP error statuses are returned as responses, not errors; only
    /// connection failures and timeouts are `Err`.
    async fn get(&self, path: &str) -> Result<RawResponse>;

    /// Base URL requests are sent to, used in logs and diagnostics
    fn base_url(&self) -> &str;
}

/// Normalize a configured host into a base URL
///
/// Adds `http://` when no scheme is given and strips trailing slashes.
pub fn normalize_base_url(host: &str) -> String {
    let host = host.trim();
    let url = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };
    url.trim_end_matches('/').to_string()
}

/// Normalize a configured host and check it can be reached
///
/// Boards serve plain HTTP only; other schemes are rejected.
pub fn parse_base_url(host: &str) -> Result<String> {
    if host.trim().is_empty() {
        return Err(OpenFanError::invalid_config("host", "must not be empty"));
    }
    let url = normalize_base_url(host);
    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(OpenFanError::invalid_config("host", format!("no address in {host:?}")));
    };
    if !scheme.eq_ignore_ascii_case("http") {
        return Err(OpenFanError::invalid_config(
            "host",
            format!("unsupported scheme {scheme:?}, boards speak plain http"),
        ));
    }
    if rest.is_empty() {
        return Err(OpenFanError::invalid_config("host", format!("no address in {host:?}")));
    }
    Ok(url)
}

/// reqwest-backed transport with a per-request timeout
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(host: &str) -> Result<Self> {
        let base_url = parse_base_url(host)?;
        let http = reqwest::Client::builder()
            .timeout(timing::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| OpenFanError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str) -> Result<RawResponse> {
        let url = format!("{}{}", self.base_url, path);
        let map_err = |e: reqwest::Error| {
            if e.is_builder() {
                OpenFanError::config(format!("cannot build request for {path}: {e}"))
            } else if e.is_timeout() {
                OpenFanError::Timeout {
                    path: path.to_string(),
                }
            } else {
                OpenFanError::Network {
                    path: path.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let resp = self.http.get(&url).send().await.map_err(map_err)?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(map_err)?;
        Ok(RawResponse { status, text })
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("192.168.1.50"), "http://192.168.1.50");
        assert_eq!(normalize_base_url("http://fan.local/"), "http://fan.local");
        assert_eq!(normalize_base_url(" https://fan.local// "), "https://fan.local");
        assert_eq!(normalize_base_url("fan.local:8080"), "http://fan.local:8080");
    }

    #[test]
    fn test_raw_response_json() {
        let resp = RawResponse::new(200, r#"{"status":"ok"}"#);
        assert_eq!(resp.json().unwrap()["status"], "ok");
        assert!(RawResponse::new(200, "OK").json().is_none());
        assert!(RawResponse::new(404, "").is_http_error());
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(HttpTransport::new("  ").is_err());
    }

    #[test]
    fn test_only_plain_http_accepted() {
        assert_eq!(parse_base_url("fan.local/").unwrap(), "http://fan.local");
        assert_eq!(parse_base_url("HTTP://fan.local").unwrap(), "HTTP://fan.local");
        assert!(matches!(
            parse_base_url("https://fan.local"),
            Err(OpenFanError::InvalidConfig { ref field, .. }) if field == "host"
        ));
        assert!(parse_base_url("http://").is_err());
        assert!(HttpTransport::new("https://10.0.0.5").is_err());
        assert_eq!(
            HttpTransport::new("10.0.0.5").unwrap().base_url(),
            "http://10.0.0.5"
        );
    }
}
