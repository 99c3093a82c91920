//! Streamable HTTP client transport.
//!
//! Every outbound message is POSTed to the MCP endpoint. The server answers
//! with `application/json` (one message, or a batch array) or with
//! `text/event-stream`, in which case the stream is drained into the
//! incoming queue as events arrive.

use crate::{auth_headers, Result, Transport, TransportError, TransportOptions};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use std::sync::Mutex;
use tether_mcp_core::protocol::PROTOCOL_VERSION;
use tether_mcp_core::JsonRpcMessage;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Decode a response payload (single message or batch) into the queue.
pub(crate) fn enqueue_payload(
    tx: &mpsc::UnboundedSender<JsonRpcMessage>,
    payload: &str,
) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| TransportError::SerializationError {
            message: format!("unparseable server payload: {e}"),
        })?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    for item in items {
        let message: JsonRpcMessage =
            serde_json::from_value(item).map_err(|e| TransportError::SerializationError {
                message: format!("invalid JSON-RPC message: {e}"),
            })?;
        // A closed queue just means the consumer went away first.
        let _ = tx.send(message);
    }
    Ok(())
}

/// MCP Streamable HTTP client.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    options: TransportOptions,
    session_id: Mutex<Option<String>>,
    incoming_tx: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    stream_tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl StreamableHttpTransport {
    pub fn new(url: &str, options: TransportOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.timeout.unwrap_or(std::time::Duration::from_secs(10)))
            .build()
            .map_err(|e| TransportError::InitializationError {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Ok(Self {
            client,
            url: url.to_string(),
            options,
            session_id: Mutex::new(None),
            incoming_tx: Mutex::new(Some(incoming_tx)),
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            stream_tasks: Mutex::new(Vec::new()),
        })
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<JsonRpcMessage>> {
        self.incoming_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn remember_session(&self, response: &reqwest::Response) {
        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            let mut slot = self
                .session_id
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if slot.as_deref() != Some(session) {
                debug!(session_id = %session, "adopted server session");
                *slot = Some(session.to_string());
            }
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let Some(tx) = self.sender() else {
            return Err(TransportError::ConnectionClosed);
        };

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("mcp-protocol-version", PROTOCOL_VERSION)
            .json(&message);

        if let Some(session) = self
            .session_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
        {
            request = request.header("mcp-session-id", session);
        }
        for (name, value) in auth_headers(&self.options).await {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::ConnectionError {
                message: format!("POST failed: {e}"),
            })?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(TransportError::Unauthorized);
        }
        if matches!(status.as_u16(), 404 | 405 | 406) {
            return Err(TransportError::ProtocolMismatch {
                message: format!("endpoint rejected streamable HTTP with {status}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::ConnectionError {
                message: format!("server returned {status}: {body}"),
            });
        }

        self.remember_session(&response);

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("text/event-stream") {
            // Drain the stream in the background; responses surface through
            // the incoming queue as they arrive.
            let mut events = response.bytes_stream().eventsource();
            let handle = tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    match event {
                        Ok(event) => {
                            if let Err(e) = enqueue_payload(&tx, &event.data) {
                                warn!(error = %e, "dropping malformed stream event");
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "response stream ended");
                            break;
                        }
                    }
                }
            });
            let mut tasks = self
                .stream_tasks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle);
            return Ok(());
        }

        // Notifications are typically answered with 202 and an empty body.
        let body = response.text().await.unwrap_or_default();
        if body.trim().is_empty() {
            return Ok(());
        }
        enqueue_payload(&tx, &body)
    }

    async fn receive(&self) -> Result<JsonRpcMessage> {
        let mut rx = self.incoming_rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<()> {
        self.incoming_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        for handle in self
            .stream_tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
        Ok(())
    }
}
