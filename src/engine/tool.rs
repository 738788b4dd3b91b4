use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::engine::error::ProviderError;

/// Uniform contract implemented by every external provider adapter.
///
/// One call to [`Tool::invoke`] is one external request. Adapters classify
/// their failures as transient (retryable) or permanent; the executor never
/// looks past that classification.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool name (unique within a registry)
    fn name(&self) -> &str;

    /// Returns a human-readable description of what the tool does
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's input parameters
    fn schema(&self) -> &Value;

    /// Perform the external call. `timeout` is the budget the adapter may
    /// pass on to its transport; [`invoke_with_deadline`] enforces it anyway.
    async fn invoke(&self, params: Value, timeout: Duration) -> Result<Value, ProviderError>;
}

/// Invoke a tool and convert deadline expiry into a transient provider error.
pub async fn invoke_with_deadline(
    tool: &dyn Tool,
    params: Value,
    timeout: Duration,
) -> Result<Value, ProviderError> {
    match tokio::time::timeout(timeout, tool.invoke(params, timeout)).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("Tool {} exceeded deadline of {:?}", tool.name(), timeout);
            Err(ProviderError::timeout(timeout))
        }
    }
}
