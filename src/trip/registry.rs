// SPDX-License-Identifier: MIT

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::capability::Capability;
use crate::engine::error::ProviderError;
use crate::engine::tool::{invoke_with_deadline, Tool};

/// Explicit capability -> adapter table, filled once at process start
#[derive(Clone)]
pub struct CapabilityRegistry {
    tools: Arc<RwLock<HashMap<Capability, Arc<dyn Tool>>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, capability: Capability, tool: Arc<dyn Tool>) {
        log::debug!("Registering {} for capability {}", tool.name(), capability);
        let mut tools = self.tools.write().await;
        tools.insert(capability, tool);
    }

    pub async fn get(&self, capability: Capability) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(&capability).cloned()
    }

    pub async fn contains(&self, capability: Capability) -> bool {
        self.tools.read().await.contains_key(&capability)
    }

    /// Registered capabilities in declaration order
    pub async fn capabilities(&self) -> Vec<Capability> {
        let tools = self.tools.read().await;
        let mut caps: Vec<Capability> = tools.keys().copied().collect();
        caps.sort();
        caps
    }

    /// Invoke the adapter registered for `capability` under `timeout`.
    ///
    /// An unregistered capability is a permanent error so the step takes the
    /// degrade-or-fail branch without retrying.
    pub async fn invoke(
        &self,
        capability: Capability,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let tool = self.get(capability).await.ok_or_else(|| {
            ProviderError::permanent(
                "unregistered",
                format!("No provider registered for capability {}", capability),
            )
        })?;
        invoke_with_deadline(tool.as_ref(), params, timeout).await
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
