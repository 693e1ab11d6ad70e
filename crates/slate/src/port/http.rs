// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::port::ReasoningPort;
use async_trait::async_trait;
use port_contracts::{PortConfig, PortError, PortReply, PortRequest, PortResult, Usage};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

/// Messages-API adapter for the reasoning port. Single-shot: the retry policy
/// lives with the pipeline controllers, not in the transport.
#[derive(Debug, Clone)]
pub struct HttpPort {
    client: Client,
    config: PortConfig,
    api_key: String,
    endpoint: String,
}

impl HttpPort {
    pub fn new(config: PortConfig) -> PortResult<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            PortError::Authentication(format!("{} is not set", config.api_key_env))
        })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: PortConfig, api_key: String) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| PortError::Configuration(e.to_string()))?;
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Ok(Self {
            client,
            config,
            api_key,
            endpoint,
        })
    }

    fn build_payload(&self, request: &PortRequest) -> Value {
        let mut payload = json!({
            "model": self.config.model,
            "max_tokens": request.generation.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(system) = &request.system_prompt {
            payload["system"] = json!(system);
        }
        let temperature = request
            .generation
            .temperature
            .unwrap_or(self.config.temperature);
        payload["temperature"] = json!(temperature);
        if let Some(top_p) = request.generation.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.generation.stop_sequences {
            payload["stop_sequences"] = json!(stop);
        }
        payload
    }

    fn parse_reply(
        &self,
        request_id: Uuid,
        data: Value,
        latency_ms: u64,
    ) -> PortResult<PortReply> {
        let content = data["content"][0]["text"].as_str().ok_or_else(|| {
            PortError::Malformed("no text content in provider response".to_string())
        })?;
        let usage = data.get("usage").map_or_else(Usage::default, |u| Usage {
            prompt_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32
                + u["output_tokens"].as_u64().unwrap_or(0) as u32,
        });
        let mut reply = PortReply::new(request_id, content, self.config.model.clone());
        reply.usage = usage;
        reply.latency_ms = latency_ms;
        Ok(reply)
    }
}

#[async_trait]
impl ReasoningPort for HttpPort {
    async fn respond(&self, request: PortRequest) -> PortResult<PortReply> {
        let started = Instant::now();
        debug!(role = %request.role, "Sending port request");
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header("content-type", "application/json")
            .json(&self.build_payload(&request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PortError::Timeout
                } else {
                    PortError::Transient(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(PortError::RateLimited);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(PortError::Authentication(format!(
                "provider rejected credentials ({status})"
            )));
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Transient(format!(
                "provider error {status}: {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Internal(format!(
                "provider error {status}: {body}"
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| PortError::Malformed(format!("invalid provider JSON: {e}")))?;
        let latency_ms = started.elapsed().as_millis() as u64;
        info!(role = %request.role, latency_ms, "Port reply received");
        self.parse_reply(request.id, data, latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use port_contracts::Role;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> PortConfig {
        PortConfig {
            endpoint: Some(format!("{}/v1/messages", server.uri())),
            ..PortConfig::default()
        }
    }

    #[tokio::test]
    async fn parses_successful_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "handoff: N\nreply: hello"}],
                "usage": {"input_tokens": 12, "output_tokens": 7}
            })))
            .mount(&server)
            .await;

        let port = HttpPort::with_api_key(config_for(&server), "test-key".to_string()).unwrap();
        let reply = port
            .respond(PortRequest::new(Role::Clarifier, "hi"))
            .await
            .unwrap();
        assert!(reply.content.contains("hello"));
        assert_eq!(reply.usage.total_tokens, 19);
    }

    #[tokio::test]
    async fn rate_limit_maps_to_typed_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let port = HttpPort::with_api_key(config_for(&server), "test-key".to_string()).unwrap();
        let error = port
            .respond(PortRequest::new(Role::Planner, "plan"))
            .await
            .unwrap_err();
        assert!(matches!(error, PortError::RateLimited));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let port = HttpPort::with_api_key(config_for(&server), "test-key".to_string()).unwrap();
        let error = port
            .respond(PortRequest::new(Role::Synthesis, "go"))
            .await
            .unwrap_err();
        assert!(matches!(error, PortError::Transient(_)));
    }
}
