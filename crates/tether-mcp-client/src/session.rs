//! Low-level MCP session: request/response correlation over a transport
//! plus the initialize handshake and typed wrappers for the standard
//! listing and invocation methods.

use crate::config::ClientIdentity;
use crate::error::{ClientError, ClientResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_mcp_core::protocol::lifecycle::ClientCapabilities;
use tether_mcp_core::protocol::PROTOCOL_VERSION;
use tether_mcp_core::types::{
    GetPromptRequest, GetPromptResponse, ListPromptsResponse, ListResourceTemplatesResponse,
    ListResourcesResponse, ListToolsResponse, ReadResourceRequest, ReadResourceResponse,
    ToolCallRequest, ToolCallResponse,
};
use tether_mcp_core::{
    ClientInfo, InitializeRequest, InitializeResponse, JsonRpcError, JsonRpcMessage,
    JsonRpcRequest, JsonRpcResponse, RequestId, ServerInfo,
};
use tether_mcp_transport::{Transport, TransportError};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

type Pending = Arc<tokio::sync::Mutex<HashMap<RequestId, oneshot::Sender<ClientResult<Value>>>>>;

/// One live MCP session over one transport.
pub struct McpSession {
    transport: Arc<dyn Transport>,
    pending: Pending,
    request_timeout: Duration,
    closed_rx: watch::Receiver<bool>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    server_info: Mutex<Option<ServerInfo>>,
}

impl McpSession {
    /// Wrap a transport and start the reader task. The session is inert
    /// until [`initialize`](Self::initialize) completes the handshake.
    pub fn start(transport: Arc<dyn Transport>, request_timeout: Duration) -> Arc<Self> {
        let pending: Pending = Arc::new(tokio::sync::Mutex::new(HashMap::new()));
        let (closed_tx, closed_rx) = watch::channel(false);

        let reader = tokio::spawn(Self::read_loop(
            Arc::clone(&transport),
            Arc::clone(&pending),
            closed_tx,
        ));

        Arc::new(Self {
            transport,
            pending,
            request_timeout,
            closed_rx,
            reader: Mutex::new(Some(reader)),
            server_info: Mutex::new(None),
        })
    }

    async fn read_loop(
        transport: Arc<dyn Transport>,
        pending: Pending,
        closed_tx: watch::Sender<bool>,
    ) {
        loop {
            match transport.receive().await {
                Ok(JsonRpcMessage::Response(response)) => {
                    Self::deliver(&pending, response).await;
                }
                Ok(JsonRpcMessage::Request(request)) if request.is_notification() => {
                    debug!(method = %request.method, "server notification");
                }
                Ok(JsonRpcMessage::Request(request)) => {
                    // No server-initiated requests are supported; answer so
                    // the server is not left waiting.
                    debug!(method = %request.method, "declining server request");
                    let response = JsonRpcResponse::error(
                        JsonRpcError::method_not_found(&request.method),
                        request.id,
                    );
                    if let Err(e) = transport.send(JsonRpcMessage::Response(response)).await {
                        debug!(error = %e, "failed to answer server request");
                    }
                }
                Err(TransportError::ConnectionClosed) => {
                    debug!("transport closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "transport receive failed");
                    break;
                }
            }
        }

        // Nothing further will arrive: fail whatever is still in flight and
        // let the owner observe the closure.
        let mut pending = pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(ClientError::Transport(TransportError::ConnectionClosed)));
        }
        let _ = closed_tx.send(true);
    }

    async fn deliver(pending: &Pending, response: JsonRpcResponse) {
        let Some(id) = response.id.clone() else {
            warn!("discarding response without id");
            return;
        };
        let Some(sender) = pending.lock().await.remove(&id) else {
            warn!(id = %id, "response for unknown request id");
            return;
        };
        let result = match response.error {
            Some(error) => Err(ClientError::Rpc(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        if sender.send(result).is_err() {
            debug!(id = %id, "requester gave up before the response arrived");
        }
    }

    /// Signals `true` once the transport stops delivering messages.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    /// Perform the initialize handshake.
    pub async fn initialize(&self, identity: &ClientIdentity) -> ClientResult<InitializeResponse> {
        let request = InitializeRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo::new(&identity.name, &identity.version),
        };

        let result = self
            .request("initialize", Some(serde_json::to_value(&request)?))
            .await?;
        let response: InitializeResponse = serde_json::from_value(result)?;

        *self
            .server_info
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) =
            Some(response.server_info.clone());

        self.notify("notifications/initialized", None).await?;
        debug!(server = %response.server_info.name, "session initialized");
        Ok(response)
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    async fn request(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        let id = RequestId::String(Uuid::new_v4().to_string());
        let request = JsonRpcRequest::new(method, params, id.clone());

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), sender);

        if let Err(e) = self.transport.send(JsonRpcMessage::Request(request)).await {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.request_timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Transport(TransportError::ConnectionClosed)),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ClientError::Timeout)
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> ClientResult<()> {
        let notification = JsonRpcRequest::notification(method, params);
        self.transport
            .send(JsonRpcMessage::Request(notification))
            .await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> ClientResult<ListToolsResponse> {
        let result = self.request("tools/list", None).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> ClientResult<ToolCallResponse> {
        let params = serde_json::to_value(ToolCallRequest {
            name: name.to_string(),
            arguments,
        })?;
        let result = self.request("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_resources(&self) -> ClientResult<ListResourcesResponse> {
        let result = self.request("resources/list", None).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_resource_templates(&self) -> ClientResult<ListResourceTemplatesResponse> {
        let result = self.request("resources/templates/list", None).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn read_resource(&self, uri: &str) -> ClientResult<ReadResourceResponse> {
        let params = serde_json::to_value(ReadResourceRequest {
            uri: uri.to_string(),
        })?;
        let result = self.request("resources/read", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_prompts(&self) -> ClientResult<ListPromptsResponse> {
        let result = self.request("prompts/list", None).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> ClientResult<GetPromptResponse> {
        let params = serde_json::to_value(GetPromptRequest {
            name: name.to_string(),
            arguments,
        })?;
        let result = self.request("prompts/get", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Stop the reader and close the transport. Idempotent.
    pub async fn close(&self) {
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "transport close reported an error");
        }
    }
}
