use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::capability::{
    CapabilitySet, PromptDescriptor, ResourceDescriptor, ToolDescriptor,
};

/// One capability call against the server failed.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("failed to spawn MCP server process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("MCP transport failure: {0}")]
    Transport(String),
    #[error("MCP server rejected the call (code {code}): {message}")]
    Rpc { code: i64, message: String },
    #[error("tool reported an error: {0}")]
    ToolFailure(String),
    #[error("failed to encode MCP message: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("MCP server terminated before responding")]
    Terminated,
}

/// Narrow boundary over the MCP connection. The production implementation is
/// [`crate::infrastructure::mcp::McpProcess`]; tests substitute stubs.
/// Connection lifecycle belongs to the implementation, not to callers.
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, CapabilityError>;
    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, CapabilityError>;
    async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>, CapabilityError>;
    async fn call_tool(&self, name: &str, parameters: Value) -> Result<Value, CapabilityError>;
    async fn read_resource(&self, uri: &str) -> Result<Value, CapabilityError>;
    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, CapabilityError>;
}

#[derive(Debug, Error)]
#[error("tool discovery failed: {source}")]
pub struct DiscoveryError {
    #[from]
    source: CapabilityError,
}

/// Discover what the server offers.
///
/// Tool listing is mandatory and fails hard. Resource and prompt listings
/// degrade to empty: many servers simply do not implement them, and the
/// session treats that as "capability absent" rather than an error.
pub async fn discover(client: &dyn CapabilityClient) -> Result<CapabilitySet, DiscoveryError> {
    let tools = client.list_tools().await?;
    info!(count = tools.len(), "Discovered tools");

    let resources = match client.list_resources().await {
        Ok(resources) => {
            info!(count = resources.len(), "Discovered resources");
            resources
        }
        Err(err) => {
            debug!(%err, "Resource discovery failed; treating resources as absent");
            Vec::new()
        }
    };

    let prompts = match client.list_prompts().await {
        Ok(prompts) => {
            info!(count = prompts.len(), "Discovered prompts");
            prompts
        }
        Err(err) => {
            debug!(%err, "Prompt discovery failed; treating prompts as absent");
            Vec::new()
        }
    };

    Ok(CapabilitySet {
        tools,
        resources,
        prompts,
    })
}
