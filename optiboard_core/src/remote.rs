//! Client for the remote optimization service's result endpoints.
//!
//! The service's response shapes are treated as untrusted and variable: list
//! responses may be a bare array or an object wrapping an `operations` or
//! `results` array. All shape detection happens here; nothing loosely typed
//! leaks past the transformer downstream.

use crate::config::RemoteConfig;
use crate::models::ListWindow;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;

/// Read access to the remote service's result, status, and list endpoints.
///
/// A remote 404 is a valid `None` outcome, never an error.
#[async_trait]
pub trait RemoteResults: Send + Sync {
    async fn fetch_result(
        &self,
        api_key: &str,
        operation_id: &str,
    ) -> Result<Option<serde_json::Value>>;

    /// In-progress operation status; used as a fallback when the result
    /// endpoint has nothing yet.
    async fn fetch_status(
        &self,
        api_key: &str,
        operation_id: &str,
    ) -> Result<Option<serde_json::Value>>;

    async fn list_recent(
        &self,
        api_key: &str,
        window: ListWindow,
    ) -> Result<Vec<serde_json::Value>>;
}

#[derive(Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemoteClient {
    pub fn new(cfg: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::backend("build remote http client", e))?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn headers(api_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| Error::InvalidInput(format!("invalid api key: {e}")))?,
        );
        Ok(headers)
    }

    #[tracing::instrument(level = "debug", skip(self, api_key))]
    async fn get(&self, api_key: &str, endpoint: &str) -> Result<Option<serde_json::Value>> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let resp = self
            .client
            .get(url)
            .headers(Self::headers(api_key)?)
            .send()
            .await
            .map_err(|e| Error::backend("remote request", e))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let value = resp
            .json()
            .await
            .map_err(|e| Error::backend("parse remote json", e))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl RemoteResults for HttpRemoteClient {
    async fn fetch_result(
        &self,
        api_key: &str,
        operation_id: &str,
    ) -> Result<Option<serde_json::Value>> {
        self.get(api_key, &format!("result/{operation_id}")).await
    }

    async fn fetch_status(
        &self,
        api_key: &str,
        operation_id: &str,
    ) -> Result<Option<serde_json::Value>> {
        self.get(api_key, &format!("status/{operation_id}")).await
    }

    async fn list_recent(
        &self,
        api_key: &str,
        window: ListWindow,
    ) -> Result<Vec<serde_json::Value>> {
        let endpoint = format!("list?limit={}&offset={}", window.limit, window.offset);
        let Some(body) = self.get(api_key, &endpoint).await? else {
            return Ok(Vec::new());
        };

        let items = normalize_operations(body);
        if items.is_empty() {
            // Not fatal: individual operations may still be fetchable by id.
            tracing::warn!("remote list returned no recognizable operations");
        }
        Ok(items)
    }
}

/// Normalize the three observed list shapes into a single array.
pub fn normalize_operations(body: serde_json::Value) -> Vec<serde_json::Value> {
    match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => {
            for key in ["operations", "results"] {
                if let Some(serde_json::Value::Array(items)) = obj.remove(key) {
                    return items;
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_bare_arrays() {
        let items = normalize_operations(json!([{"operation_id": "op_1"}]));
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn normalizes_wrapped_operations_and_results() {
        let items = normalize_operations(json!({"operations": [{"operation_id": "op_1"}]}));
        assert_eq!(items.len(), 1);

        let items = normalize_operations(json!({"results": [{}, {}]}));
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn malformed_bodies_degrade_to_empty() {
        assert!(normalize_operations(json!("nope")).is_empty());
        assert!(normalize_operations(json!({"items": [1, 2]})).is_empty());
        assert!(normalize_operations(json!(null)).is_empty());
    }
}
