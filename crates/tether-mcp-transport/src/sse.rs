//! Legacy HTTP+SSE client transport.
//!
//! One long-lived GET event stream carries server-to-client messages. The
//! first `endpoint` event names the URL client-to-server messages are
//! POSTed to. When the event stream ends, the incoming queue drains and then
//! reports closure, which is what lets the connection layer notice a dropped
//! server and schedule a reconnect.

use crate::streamable::enqueue_payload;
use crate::{auth_headers, Result, Transport, TransportError, TransportOptions};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tether_mcp_core::JsonRpcMessage;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

/// How long to wait for the server to announce its message endpoint.
const ENDPOINT_WAIT: std::time::Duration = std::time::Duration::from_secs(15);

/// HTTP+SSE client.
pub struct SseTransport {
    client: reqwest::Client,
    options: TransportOptions,
    endpoint: String,
    closed: AtomicBool,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` announcement.
    pub async fn connect(url: &str, options: TransportOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.timeout.unwrap_or(std::time::Duration::from_secs(10)))
            .build()
            .map_err(|e| TransportError::InitializationError {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let mut request = client.get(url).header("Accept", "text/event-stream");
        for (name, value) in auth_headers(&options).await {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::ConnectionError {
                message: format!("SSE connect failed: {e}"),
            })?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(TransportError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::ConnectionError {
                message: format!("SSE endpoint returned {status}: {body}"),
            });
        }
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with("text/event-stream") {
            return Err(TransportError::ProtocolMismatch {
                message: format!("expected an event stream, got {content_type}"),
            });
        }

        let base = Url::parse(url).map_err(|e| TransportError::InitializationError {
            message: format!("invalid SSE URL: {e}"),
        })?;

        let mut events = response.bytes_stream().eventsource();

        // The server announces where to POST before anything else.
        let endpoint = tokio::time::timeout(ENDPOINT_WAIT, async {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.event == "endpoint" => {
                        return Some(event.data);
                    }
                    Ok(other) => {
                        debug!(event = %other.event, "ignoring pre-endpoint event");
                    }
                    Err(e) => {
                        warn!(error = %e, "SSE stream failed before endpoint event");
                        return None;
                    }
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
        .ok_or_else(|| TransportError::ConnectionError {
            message: "server never announced a message endpoint".to_string(),
        })?;

        let endpoint = base
            .join(endpoint.trim())
            .map_err(|e| TransportError::ConnectionError {
                message: format!("invalid message endpoint: {e}"),
            })?
            .to_string();
        debug!(endpoint = %endpoint, "SSE message endpoint announced");

        // The reader task owns the only sender: when the stream ends (or the
        // task is aborted on close), the queue drains and receive() observes
        // the closure.
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.event == "message" || event.event.is_empty() => {
                        if let Err(e) = enqueue_payload(&incoming_tx, &event.data) {
                            warn!(error = %e, "dropping malformed SSE message");
                        }
                    }
                    Ok(other) => {
                        debug!(event = %other.event, "ignoring SSE event");
                    }
                    Err(e) => {
                        debug!(error = %e, "SSE stream closed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            client,
            options,
            endpoint,
            closed: AtomicBool::new(false),
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            reader_task: Mutex::new(Some(reader_task)),
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&message);
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
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::ConnectionError {
                message: format!("server returned {status}: {body}"),
            });
        }
        // Responses come back over the event stream; the POST only acks.
        Ok(())
    }

    async fn receive(&self) -> Result<JsonRpcMessage> {
        let mut rx = self.incoming_rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self
            .reader_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        Ok(())
    }
}
