//! HTTP forwarder: sends a tool call to its service and relays the JSON reply.

use crate::{ProxyError, ServiceConfig, ToolCall, ToolRequest};
use reqwest::Url;
use serde_json::Value;

pub struct ToolProxy {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl ToolProxy {
    pub fn new(config: ServiceConfig) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProxyError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ProxyError> {
        Self::new(ServiceConfig::from_env())
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Parse, validate and forward a call by tool name.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, ProxyError> {
        let call = ToolCall::parse(name, arguments)?;
        self.execute(&call).await
    }

    pub async fn execute(&self, call: &ToolCall) -> Result<Value, ProxyError> {
        let req = call.request();
        let url = self.url_for(&req)?;
        tracing::info!(tool = call.name(), method = %req.method, url = %url, "forwarding tool call");

        let mut builder = self.client.request(req.method.clone(), url);
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }
        let res = builder
            .send()
            .await
            .map_err(|e| ProxyError::Request(e.to_string()))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| ProxyError::Request(e.to_string()))?;
        if !status.is_success() {
            tracing::warn!(tool = call.name(), status = status.as_u16(), "service returned an error");
            return Err(ProxyError::Http {
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(tool = call.name(), status = status.as_u16(), "tool call complete");
        serde_json::from_str(&body).map_err(|e| ProxyError::Decode(e.to_string()))
    }

    /// Full URL for a request: service base, escaped path segments, query.
    pub fn url_for(&self, req: &ToolRequest) -> Result<Url, ProxyError> {
        let base = self.config.base_url(req.service);
        let config_err = |reason: String| ProxyError::Config {
            url: base.to_string(),
            reason,
        };
        let mut url = Url::parse(base).map_err(|e| config_err(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| config_err("cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(&req.path);
        if !req.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&req.query);
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls_join_base_path_and_query() {
        let proxy = ToolProxy::new(ServiceConfig::default()).unwrap();
        let call = ToolCall::parse("monitor_failures", json!({ "limit": 5, "service": "overlay" }))
            .unwrap();
        let url = proxy.url_for(&call.request()).unwrap();
        assert_eq!(url.as_str(), "http://monitor:8000/failures?limit=5&service=overlay");

        let call = ToolCall::parse("dispatcher_queue_status", json!({})).unwrap();
        let url = proxy.url_for(&call.request()).unwrap();
        assert_eq!(url.as_str(), "http://dispatcher:8000/queue/status");
    }

    #[test]
    fn path_segments_are_escaped() {
        let proxy = ToolProxy::new(ServiceConfig::default()).unwrap();
        let call = ToolCall::parse("audio_status", json!({ "job_id": "a/b c" })).unwrap();
        let url = proxy.url_for(&call.request()).unwrap();
        assert_eq!(url.as_str(), "http://audio-id:8000/status/a%2Fb%20c");
    }

    #[test]
    fn base_with_prefix_keeps_it() {
        let proxy = ToolProxy::new(ServiceConfig::all_at("http://gateway:8080/api/")).unwrap();
        let call = ToolCall::parse("image_info", json!({ "source": "a.png" })).unwrap();
        let url = proxy.url_for(&call.request()).unwrap();
        assert_eq!(url.as_str(), "http://gateway:8080/api/info");
    }

    #[test]
    fn bad_base_url_is_config_error() {
        let proxy = ToolProxy::new(ServiceConfig::all_at("not a url")).unwrap();
        let call = ToolCall::parse("monitor_health", json!({})).unwrap();
        assert!(matches!(
            proxy.url_for(&call.request()),
            Err(ProxyError::Config { .. })
        ));
    }
}
