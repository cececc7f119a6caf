use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, info, warn};

use crate::application::capability::{CapabilityClient, CapabilityError};
use crate::config::ServerConfig;
use crate::domain::capability::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};

const PROTOCOL_VERSION: &str = "2025-06-18";

/// MCP server subprocess speaking line-delimited JSON-RPC 2.0 over stdio.
///
/// The child is spawned lazily on the first capability call; a background
/// task owns stdout and routes responses to pending requests by id. One
/// process serves one session; there is no reconnect logic beyond respawning
/// on the next call after the child dies.
#[derive(Clone)]
pub struct McpProcess {
    inner: Arc<McpProcessInner>,
}

struct McpProcessInner {
    config: ServerConfig,
    state: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    pending: AsyncMutex<HashMap<u64, oneshot::Sender<Result<Value, CapabilityError>>>>,
    id_counter: AtomicU64,
}

impl McpProcess {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(McpProcessInner {
                config,
                state: AsyncMutex::new(None),
                writer: AsyncMutex::new(None),
                pending: AsyncMutex::new(HashMap::new()),
                id_counter: AtomicU64::new(1),
            }),
        }
    }

    /// Kill the child and fail everything still pending. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.reset().await;
        info!(command = %self.inner.config.command, "MCP server process shut down");
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, CapabilityError> {
        self.inner.ensure_running().await?;
        self.inner.send_request(method, params).await
    }

    async fn request_list<T: DeserializeOwned>(
        &self,
        method: &str,
        key: &str,
    ) -> Result<Vec<T>, CapabilityError> {
        let result = self.request(method, json!({})).await?;
        Ok(parse_descriptor_list(&result, key))
    }
}

impl McpProcessInner {
    async fn ensure_running(self: &Arc<Self>) -> Result<(), CapabilityError> {
        {
            let state = self.state.lock().await;
            if state.is_some() {
                return Ok(());
            }
        }

        let mut command = Command::new(&self.config.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.workdir {
            command.current_dir(dir);
        }
        if !self.config.args.is_empty() {
            command.args(&self.config.args);
        }
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        debug!(command = %self.config.command, "Spawning MCP server process");
        let mut child = command.spawn().map_err(CapabilityError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CapabilityError::Transport("failed to capture server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CapabilityError::Transport("failed to capture server stdout".into()))?;

        {
            let mut writer = self.writer.lock().await;
            *writer = Some(BufWriter::new(stdin));
        }
        {
            let mut state = self.state.lock().await;
            *state = Some(child);
        }

        let reader_self = Arc::clone(self);
        tokio::spawn(async move {
            reader_self.reader_loop(stdout).await;
        });

        match self.initialize_sequence().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.reset().await;
                Err(err)
            }
        }
    }

    async fn initialize_sequence(&self) -> Result<(), CapabilityError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {}
        });
        self.send_request("initialize", params).await?;
        self.send_notification("notifications/initialized", json!({}))
            .await?;
        info!(command = %self.config.command, "MCP server initialized");
        Ok(())
    }

    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(item) = lines.next_line().await {
            let Some(raw) = item else { break };
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => self.process_inbound_message(value).await,
                Err(source) => {
                    warn!(line = trimmed, %source, "Received invalid JSON from MCP server");
                }
            }
        }
        self.reset().await;
    }

    async fn process_inbound_message(&self, value: Value) {
        if let Some(id) = value.get("id").cloned() {
            if value.get("method").is_some() {
                self.handle_server_request(id, value).await;
            } else {
                self.handle_response(id, value).await;
            }
        } else if let Some(method) = value.get("method").and_then(Value::as_str) {
            debug!(method, "Ignoring notification from MCP server");
        }
    }

    async fn handle_response(&self, id: Value, value: Value) {
        let Some(key) = id.as_u64() else {
            debug!(?id, "Response id is not numeric; dropping");
            return;
        };

        let responder = {
            let mut pending = self.pending.lock().await;
            pending.remove(&key)
        };
        let Some(sender) = responder else {
            debug!(response_id = key, "Received response for unknown request");
            return;
        };

        let outcome = match value.get("error") {
            Some(error) => Err(rpc_error(error)),
            None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = sender.send(outcome);
    }

    async fn handle_server_request(&self, id: Value, value: Value) {
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let outcome = if method == "ping" {
            self.send_response(id, json!({})).await
        } else {
            warn!(method = %method, "MCP server sent unsupported request");
            self.send_error(
                id,
                json!({
                    "code": -32601,
                    "message": format!("client does not implement method '{method}'"),
                }),
            )
            .await
        };
        if let Err(err) = outcome {
            warn!(method = %method, %err, "Failed to answer server request");
        }
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, CapabilityError> {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        if let Err(err) = self.write_message(&payload).await {
            let mut pending = self.pending.lock().await;
            pending.remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CapabilityError::Terminated),
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<(), CapabilityError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        self.write_message(&payload).await
    }

    async fn send_response(&self, id: Value, result: Value) -> Result<(), CapabilityError> {
        self.write_message(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result
        }))
        .await
    }

    async fn send_error(&self, id: Value, error: Value) -> Result<(), CapabilityError> {
        self.write_message(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": error
        }))
        .await
    }

    async fn write_message(&self, message: &Value) -> Result<(), CapabilityError> {
        let mut encoded = serde_json::to_vec(message).map_err(CapabilityError::InvalidJson)?;
        encoded.push(b'\n');

        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| CapabilityError::Transport("writer not initialised".into()))?;
        stream
            .write_all(&encoded)
            .await
            .map_err(|source| CapabilityError::Transport(source.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|source| CapabilityError::Transport(source.to_string()))?;
        Ok(())
    }

    async fn reset(&self) {
        {
            let mut writer = self.writer.lock().await;
            *writer = None;
        }

        {
            let mut state = self.state.lock().await;
            if let Some(mut child) = state.take() {
                if let Err(err) = child.kill().await {
                    debug!(%err, "Failed to kill MCP server process (may have already exited)");
                }
                let _ = child.wait().await;
            }
        }

        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(CapabilityError::Terminated));
        }
    }
}

#[async_trait]
impl CapabilityClient for McpProcess {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, CapabilityError> {
        self.request_list("tools/list", "tools").await
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, CapabilityError> {
        self.request_list("resources/list", "resources").await
    }

    async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>, CapabilityError> {
        self.request_list("prompts/list", "prompts").await
    }

    async fn call_tool(&self, name: &str, parameters: Value) -> Result<Value, CapabilityError> {
        let params = json!({
            "name": name,
            "arguments": match parameters {
                Value::Null => Value::Object(Default::default()),
                other => other,
            }
        });
        let result = self.request("tools/call", params).await?;
        if let Some(message) = tool_failure_message(&result) {
            return Err(CapabilityError::ToolFailure(message));
        }
        Ok(result)
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, CapabilityError> {
        self.request("resources/read", json!({ "uri": uri })).await
    }

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, CapabilityError> {
        self.request(
            "prompts/get",
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }
}

fn rpc_error(error: &Value) -> CapabilityError {
    CapabilityError::Rpc {
        code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    }
}

/// Parse a `*/list` result array, skipping entries that do not deserialize
/// rather than failing the whole listing.
fn parse_descriptor_list<T: DeserializeOwned>(result: &Value, key: &str) -> Vec<T> {
    result
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match serde_json::from_value(item.clone()) {
                    Ok(parsed) => Some(parsed),
                    Err(err) => {
                        warn!(key, %err, "Skipping malformed descriptor from MCP server");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// A `tools/call` result with `isError: true` is a tool-level failure even
/// though the RPC itself succeeded.
fn tool_failure_message(result: &Value) -> Option<String> {
    if !result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return None;
    }

    let message = result
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find_map(|block| {
            (block.get("type").and_then(Value::as_str) == Some("text"))
                .then(|| block.get("text").and_then(Value::as_str))
                .flatten()
        })
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    Some(message.unwrap_or_else(|| "tool reported an unspecified error".to_string()))
}
