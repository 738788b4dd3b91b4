// SPDX-License-Identifier: MIT

//! Generic JSON-over-HTTP provider adapter

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::env;
use std::time::Duration;

use crate::engine::error::{PlannerError, ProviderError};
use crate::engine::tool::Tool;
use crate::trip::capability::Capability;
use crate::trip::config::ProviderConfig;

/// POSTs the capability parameters to a configured endpoint and returns
/// the JSON body as the payload
pub struct HttpCapabilityTool {
    name: String,
    description: String,
    capability: Capability,
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpCapabilityTool {
    pub fn new(capability: Capability, config: &ProviderConfig) -> Result<Self, PlannerError> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(env::var(var).map_err(|_| {
                PlannerError::config(format!("{} must be set for {}", var, capability))
            })?),
            None => None,
        };

        Ok(Self {
            name: format!("http_{}", capability.name()),
            description: format!("Calls {} for {} data", config.endpoint, capability),
            capability,
            endpoint: config.endpoint.clone(),
            api_key,
            client: Client::new(),
        })
    }
}

/// Request timeouts and throttling are worth retrying; other client
/// errors are not.
pub fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let code = status.as_u16().to_string();
    let message = if body.is_empty() {
        status.to_string()
    } else {
        body.chars().take(200).collect()
    };

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        ProviderError::transient(code, message)
    } else {
        ProviderError::permanent(code, message)
    }
}

#[async_trait]
impl Tool for HttpCapabilityTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &Value {
        super::schema_for(self.capability)
    }

    async fn invoke(&self, params: Value, timeout: Duration) -> Result<Value, ProviderError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .timeout(timeout)
            .json(&params);

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let body: Value = resp.json().await?;
        Ok(body)
    }
}
