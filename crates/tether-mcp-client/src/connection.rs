//! Connection state machine and the subscribable public handle.
//!
//! One [`McpConnection`] owns one MCP session against one server URL and
//! drives it through `discovering → connecting → loading → ready`, detouring
//! through `authenticating` whenever the server demands authorization and
//! into `failed` when nothing else can be done. Every state change publishes
//! a consistent [`ConnectionSnapshot`] to subscribers.

use crate::config::ConnectionConfig;
use crate::error::{ClientError, ClientResult};
use crate::log::{LogLevel, RingLog};
use crate::session::McpSession;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_mcp_auth::{
    authorize, AuthEventBus, AuthFlowOutcome, OAuthProvider, ProviderOptions, TokenSource,
};
use tether_mcp_core::types::{
    GetPromptResponse, Prompt, ReadResourceResponse, Resource, ResourceTemplate, Tool,
    ToolCallResponse,
};
use tether_mcp_transport::{
    SseTransport, StreamableHttpTransport, TransportError, TransportKind, TransportOptions,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

pub use crate::log::LogEntry;

/// Authorization must complete within five minutes of entering the
/// authenticating phase.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(300);

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Discovering,
    Connecting,
    Loading,
    Authenticating,
    Ready,
    Failed,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discovering => "discovering",
            Self::Connecting => "connecting",
            Self::Loading => "loading",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Consistent view of the connection, published on every mutation.
///
/// A snapshot with `phase == Ready` always carries the discovery results:
/// the lists are populated in the same mutation that flips the phase.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub phase: ConnectionPhase,
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub resource_templates: Vec<ResourceTemplate>,
    pub prompts: Vec<Prompt>,
    pub error: Option<String>,
    /// Authorize URL for a manual link, populated when the popup was
    /// blocked or suppressed.
    pub auth_url: Option<String>,
    pub log: Vec<LogEntry>,
}

struct ConnectionState {
    phase: ConnectionPhase,
    tools: Vec<Tool>,
    resources: Vec<Resource>,
    resource_templates: Vec<ResourceTemplate>,
    prompts: Vec<Prompt>,
    error: Option<String>,
    auth_url: Option<String>,
    log: RingLog,
}

impl ConnectionState {
    fn initial() -> Self {
        Self {
            phase: ConnectionPhase::Discovering,
            tools: Vec::new(),
            resources: Vec::new(),
            resource_templates: Vec::new(),
            prompts: Vec::new(),
            error: None,
            auth_url: None,
            log: RingLog::default(),
        }
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            phase: self.phase,
            tools: self.tools.clone(),
            resources: self.resources.clone(),
            resource_templates: self.resource_templates.clone(),
            prompts: self.prompts.clone(),
            error: self.error.clone(),
            auth_url: self.auth_url.clone(),
            log: self.log.to_vec(),
        }
    }
}

enum ConnectOutcome {
    Ready,
    AuthRequired,
    Failed(String),
    Canceled,
}

struct ConnectionInner {
    config: ConnectionConfig,
    provider: Arc<OAuthProvider>,
    bus: AuthEventBus,
    /// Origin of the callback URL; bus messages from any other origin are
    /// discarded unread.
    origin: String,

    state: Mutex<ConnectionState>,
    watch_tx: tokio::sync::watch::Sender<ConnectionSnapshot>,
    session: tokio::sync::Mutex<Option<Arc<McpSession>>>,

    /// Re-entrancy guard for the connect procedure.
    connecting: AtomicBool,
    /// Set on teardown; no state mutation may happen afterwards.
    closed: AtomicBool,
    /// Bumped on disconnect to cancel in-flight work.
    generation: AtomicU64,
    attempt: AtomicU32,

    auth_timer: Mutex<Option<JoinHandle<()>>>,
    /// Retry or reconnect timer. One slot: the two never stack.
    pending_timer: Mutex<Option<JoinHandle<()>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionInner {
    fn current_gen(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn stale(&self, gen: u64) -> bool {
        self.closed.load(Ordering::SeqCst) || self.current_gen() != gen
    }

    fn phase(&self) -> ConnectionPhase {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .phase
    }

    /// Guarded state mutation: a stale or torn-down connection mutates
    /// nothing, and every applied mutation publishes a fresh snapshot.
    fn update<F: FnOnce(&mut ConnectionState)>(&self, gen: u64, mutate: F) {
        if self.stale(gen) {
            return;
        }
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mutate(&mut state);
        let _ = self.watch_tx.send(state.snapshot());
    }

    fn log(&self, gen: u64, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(server = %self.config.url, "{message}"),
            LogLevel::Info => info!(server = %self.config.url, "{message}"),
            LogLevel::Warn => warn!(server = %self.config.url, "{message}"),
            LogLevel::Error => error!(server = %self.config.url, "{message}"),
        }
        if level == LogLevel::Debug && !self.config.debug {
            return;
        }
        self.update(gen, |state| state.log.push(level, message));
    }

    fn spawn_connect(self: &Arc<Self>, gen: u64) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_connect(gen).await;
        });
    }

    async fn run_connect(self: Arc<Self>, gen: u64) {
        if self.stale(gen) {
            return;
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!(server = %self.config.url, "connect already in progress");
            return;
        }
        let outcome = self.connect_once(gen).await;
        self.connecting.store(false, Ordering::SeqCst);

        match outcome {
            ConnectOutcome::Ready | ConnectOutcome::Canceled => {}
            ConnectOutcome::AuthRequired => self.begin_authentication(gen).await,
            ConnectOutcome::Failed(message) => self.fail_connection(gen, message),
        }
    }

    async fn connect_once(self: &Arc<Self>, gen: u64) -> ConnectOutcome {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        if self.stale(gen) {
            return ConnectOutcome::Canceled;
        }

        self.update(gen, |state| {
            state.phase = ConnectionPhase::Discovering;
            state.error = None;
        });
        self.log(
            gen,
            LogLevel::Info,
            format!("connecting to {} (attempt {attempt})", self.config.url),
        );

        self.teardown_session().await;
        self.update(gen, |state| state.phase = ConnectionPhase::Connecting);

        let session = match self.open_session(gen).await {
            Ok(session) => session,
            Err(ClientError::Unauthorized) => return ConnectOutcome::AuthRequired,
            Err(e) => return ConnectOutcome::Failed(format!("connection failed: {e}")),
        };
        if self.stale(gen) {
            session.close().await;
            return ConnectOutcome::Canceled;
        }
        *self.session.lock().await = Some(Arc::clone(&session));
        self.spawn_monitor(gen, &session);

        self.update(gen, |state| state.phase = ConnectionPhase::Loading);

        let tools = match session.list_tools().await {
            Ok(response) => response.tools,
            Err(ClientError::Unauthorized) => return ConnectOutcome::AuthRequired,
            Err(e) => return ConnectOutcome::Failed(format!("failed to list tools: {e}")),
        };

        // Resources, templates and prompts are best effort: not every server
        // implements them.
        let resources = match session.list_resources().await {
            Ok(response) => response.resources,
            Err(e) => {
                self.log(gen, LogLevel::Warn, format!("resource listing failed: {e}"));
                Vec::new()
            }
        };
        let resource_templates = match session.list_resource_templates().await {
            Ok(response) => response.resource_templates,
            Err(e) => {
                self.log(gen, LogLevel::Warn, format!("template listing failed: {e}"));
                Vec::new()
            }
        };
        let prompts = match session.list_prompts().await {
            Ok(response) => response.prompts,
            Err(e) => {
                self.log(gen, LogLevel::Warn, format!("prompt listing failed: {e}"));
                Vec::new()
            }
        };

        if self.stale(gen) {
            return ConnectOutcome::Canceled;
        }
        let tool_count = tools.len();
        // One mutation: observers seeing `ready` always see the collections.
        self.update(gen, |state| {
            state.tools = tools;
            state.resources = resources;
            state.resource_templates = resource_templates;
            state.prompts = prompts;
            state.error = None;
            state.auth_url = None;
            state.phase = ConnectionPhase::Ready;
        });
        self.log(gen, LogLevel::Info, format!("ready ({tool_count} tools)"));
        ConnectOutcome::Ready
    }

    async fn open_session(&self, gen: u64) -> ClientResult<Arc<McpSession>> {
        let options = TransportOptions {
            token_source: Some(Arc::clone(&self.provider) as Arc<dyn TokenSource>),
            custom_headers: self.config.custom_headers.clone(),
            timeout: None,
        };

        match self.config.transport_type {
            TransportKind::Http => self.open_streamable(options).await,
            TransportKind::Sse => self.open_sse(options).await,
            TransportKind::Auto => match self.open_streamable(options.clone()).await {
                Err(ClientError::Transport(TransportError::ProtocolMismatch { message })) => {
                    self.log(
                        gen,
                        LogLevel::Debug,
                        format!("streamable HTTP unavailable ({message}); falling back to SSE"),
                    );
                    self.open_sse(options).await
                }
                other => other,
            },
        }
    }

    async fn open_streamable(&self, options: TransportOptions) -> ClientResult<Arc<McpSession>> {
        let transport = StreamableHttpTransport::new(&self.config.url, options)
            .map_err(ClientError::from)?;
        self.handshake(Arc::new(transport)).await
    }

    async fn open_sse(&self, options: TransportOptions) -> ClientResult<Arc<McpSession>> {
        let transport = SseTransport::connect(&self.config.url, options)
            .await
            .map_err(ClientError::from)?;
        self.handshake(Arc::new(transport)).await
    }

    async fn handshake(
        &self,
        transport: Arc<dyn tether_mcp_transport::Transport>,
    ) -> ClientResult<Arc<McpSession>> {
        let session = McpSession::start(transport, self.config.request_timeout);
        match session.initialize(&self.config.client_config).await {
            Ok(_) => Ok(session),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn begin_authentication(self: &Arc<Self>, gen: u64) {
        if self.stale(gen) {
            return;
        }
        self.update(gen, |state| state.phase = ConnectionPhase::Authenticating);
        self.log(gen, LogLevel::Info, "server requires authorization");
        // A 401 despite locally valid-looking tokens means the server no
        // longer honors them; stop the flow from short-circuiting on the
        // dead access token (the refresh token stays usable).
        if self.provider.tokens().is_some() {
            self.log(
                gen,
                LogLevel::Debug,
                "server rejected current tokens; invalidating access token",
            );
            self.provider.invalidate_access_token();
        }
        self.start_auth_timer(gen);

        match authorize(self.provider.as_ref()).await {
            Ok(AuthFlowOutcome::Authorized) => {
                if self.stale(gen) {
                    return;
                }
                self.cancel_auth_timer();
                self.log(
                    gen,
                    LogLevel::Info,
                    "authorized from stored credentials",
                );
                self.spawn_connect(gen);
            }
            Ok(AuthFlowOutcome::Redirect { url, popup_blocked }) => {
                if self.stale(gen) {
                    return;
                }
                self.update(gen, |state| state.auth_url = Some(url));
                if popup_blocked {
                    self.log(
                        gen,
                        LogLevel::Warn,
                        "authorization popup blocked; open the authorization URL manually",
                    );
                } else {
                    self.log(gen, LogLevel::Info, "waiting for user authorization");
                }
                // Remain authenticating until the callback reports back,
                // the user disconnects, or the timer fires.
            }
            Err(e) => {
                if self.stale(gen) {
                    return;
                }
                self.cancel_auth_timer();
                self.fail_connection(gen, format!("authorization failed: {e}"));
            }
        }
    }

    fn start_auth_timer(self: &Arc<Self>, gen: u64) {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(AUTH_TIMEOUT).await;
            if inner.stale(gen) || inner.phase() != ConnectionPhase::Authenticating {
                return;
            }
            let manual = inner.provider.last_attempted_auth_url();
            inner.update(gen, |state| state.auth_url = manual.clone());
            inner.fail_connection(gen, "authentication timed out".to_string());
        });
        self.replace_auth_timer(Some(handle));
    }

    fn cancel_auth_timer(&self) {
        self.replace_auth_timer(None);
    }

    fn replace_auth_timer(&self, handle: Option<JoinHandle<()>>) {
        let mut slot = self
            .auth_timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(old) = std::mem::replace(&mut *slot, handle) {
            old.abort();
        }
    }

    fn fail_connection(self: &Arc<Self>, gen: u64, message: String) {
        if self.stale(gen) {
            return;
        }
        if self.phase() == ConnectionPhase::Failed {
            debug!(server = %self.config.url, "already failed: {message}");
            return;
        }
        self.cancel_auth_timer();
        self.update(gen, |state| {
            state.phase = ConnectionPhase::Failed;
            state.error = Some(message.clone());
        });
        self.log(gen, LogLevel::Error, message);

        if let Some(delay) = self.config.auto_retry.delay() {
            self.schedule(gen, delay, Some(ConnectionPhase::Failed), "retrying");
        }
    }

    /// Arm the single retry/reconnect timer, replacing whatever was armed.
    fn schedule(
        self: &Arc<Self>,
        gen: u64,
        delay: Duration,
        expected_phase: Option<ConnectionPhase>,
        what: &'static str,
    ) {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.stale(gen) {
                return;
            }
            if let Some(expected) = expected_phase {
                if inner.phase() != expected {
                    return;
                }
            }
            inner.log(gen, LogLevel::Info, format!("{what} now"));
            inner.spawn_connect(gen);
        });
        let mut slot = self
            .pending_timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Watch the session for an unexpected close. A deliberate close aborts
    /// this task first, so anything observed here is the server's doing.
    fn spawn_monitor(self: &Arc<Self>, gen: u64, session: &Arc<McpSession>) {
        let mut closed = session.closed();
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if closed.wait_for(|closed| *closed).await.is_err() {
                return;
            }
            if inner.stale(gen) {
                return;
            }
            if inner.phase() == ConnectionPhase::Ready {
                if let Some(delay) = inner.config.auto_reconnect.delay() {
                    inner.log(
                        gen,
                        LogLevel::Warn,
                        format!("connection closed; reconnecting in {delay:?}"),
                    );
                    inner.update(gen, |state| state.phase = ConnectionPhase::Connecting);
                    inner.schedule(gen, delay, None, "reconnecting");
                    return;
                }
            }
            inner.fail_connection(gen, "connection closed".to_string());
        });
        let mut slot = self
            .monitor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    fn spawn_bus_listener(self: &Arc<Self>) {
        let mut receiver = self.bus.subscribe();
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let message = match receiver.recv().await {
                    Ok(message) => message,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth event bus lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                };
                if inner.closed.load(Ordering::SeqCst) {
                    return;
                }
                if message.origin != inner.origin {
                    debug!(origin = %message.origin, "dropping auth message from foreign origin");
                    continue;
                }
                if let Some(hash) = &message.server_url_hash {
                    if hash != inner.provider.server_url_hash() {
                        continue;
                    }
                }
                if inner.phase() != ConnectionPhase::Authenticating {
                    debug!("auth message while not authenticating; ignoring");
                    continue;
                }

                let gen = inner.current_gen();
                inner.cancel_auth_timer();
                if message.success {
                    inner.log(gen, LogLevel::Info, "authorization completed");
                    inner.update(gen, |state| state.auth_url = None);
                    inner.spawn_connect(gen);
                } else {
                    let detail = message
                        .error
                        .as_deref()
                        .unwrap_or("no detail provided")
                        .to_string();
                    inner.fail_connection(gen, format!("authorization failed: {detail}"));
                }
            }
        });
        let mut slot = self
            .listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    async fn teardown_session(&self) {
        {
            let mut slot = self
                .monitor
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(old) = slot.take() {
                old.abort();
            }
        }
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
    }

    fn abort_timers(&self) {
        self.cancel_auth_timer();
        let mut slot = self
            .pending_timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(old) = slot.take() {
            old.abort();
        }
    }

    /// Quiet reset: close the transport, clear timers, go back to the
    /// initial phase. In-flight work is cancelled by the generation bump.
    async fn disconnect(self: &Arc<Self>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let gen = self.current_gen();
        self.abort_timers();
        self.connecting.store(false, Ordering::SeqCst);
        self.teardown_session().await;
        self.update(gen, |state| {
            state.phase = ConnectionPhase::Discovering;
            state.error = None;
            state.auth_url = None;
            state.tools.clear();
            state.resources.clear();
            state.resource_templates.clear();
            state.prompts.clear();
        });
        debug!(server = %self.config.url, "disconnected");
    }

    fn shutdown(self: &Arc<Self>) {
        self.closed.store(true, Ordering::SeqCst);
        self.abort_timers();
        for slot in [&self.monitor, &self.listener] {
            let mut slot = slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(old) = slot.take() {
                old.abort();
            }
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(self);
            handle.spawn(async move {
                if let Some(session) = inner.session.lock().await.take() {
                    session.close().await;
                }
            });
        }
    }
}

/// A live, self-healing connection to one remote MCP server.
///
/// Dropping the handle tears the connection down: pending timers are
/// cancelled and no further state is published.
pub struct McpConnection {
    inner: Arc<ConnectionInner>,
    watch_rx: tokio::sync::watch::Receiver<ConnectionSnapshot>,
}

impl McpConnection {
    /// Validate the configuration and start connecting in the background.
    /// Subscribe to observe progress; the returned handle is usable
    /// immediately.
    pub async fn connect(config: ConnectionConfig) -> ClientResult<Self> {
        Url::parse(&config.url)
            .map_err(|e| ClientError::Config(format!("invalid server URL: {e}")))?;
        let callback = Url::parse(&config.callback_url)
            .map_err(|e| ClientError::Config(format!("invalid callback URL: {e}")))?;
        let origin = callback.origin().ascii_serialization();

        let provider_options = ProviderOptions {
            storage_key_prefix: config.storage_key_prefix.clone(),
            client_name: config.client_name.clone(),
            client_uri: config.client_uri.clone(),
            callback_url: config.callback_url.clone(),
            scopes: config.scopes.clone(),
            popup_features: config.popup_features.clone(),
            prevent_auto_auth: config.prevent_auto_auth,
            token_body_format: config.token_body_format,
        };
        let provider = Arc::new(OAuthProvider::new(
            &config.url,
            provider_options,
            config.storage(),
            config.popup_launcher(),
        ));
        let bus = config.bus();

        let state = ConnectionState::initial();
        let (watch_tx, watch_rx) = tokio::sync::watch::channel(state.snapshot());

        let inner = Arc::new(ConnectionInner {
            config,
            provider,
            bus,
            origin,
            state: Mutex::new(state),
            watch_tx,
            session: tokio::sync::Mutex::new(None),
            connecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            attempt: AtomicU32::new(0),
            auth_timer: Mutex::new(None),
            pending_timer: Mutex::new(None),
            monitor: Mutex::new(None),
            listener: Mutex::new(None),
        });

        inner.spawn_bus_listener();
        inner.spawn_connect(inner.current_gen());

        Ok(Self { inner, watch_rx })
    }

    /// Subscribe to state changes. Each received value is a complete,
    /// consistent snapshot.
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<ConnectionSnapshot> {
        self.watch_rx.clone()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.watch_rx.borrow().clone()
    }

    async fn require_session(&self) -> ClientResult<Arc<McpSession>> {
        if self.inner.phase() != ConnectionPhase::Ready {
            return Err(ClientError::NotReady);
        }
        self.inner
            .session
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotReady)
    }

    /// A 401 mid-operation turns into a state transition rather than an
    /// error: the operation resolves `None` and the caller reacts to the
    /// authenticating phase.
    fn reauthorize(&self, context: &str) {
        let inner = Arc::clone(&self.inner);
        let gen = inner.current_gen();
        inner.log(
            gen,
            LogLevel::Warn,
            format!("authorization expired during {context}"),
        );
        tokio::spawn(async move {
            inner.begin_authentication(gen).await;
        });
    }

    /// Invoke a tool. Resolves `None` when the call ran into expired
    /// authorization; the connection is re-authenticating and the call can
    /// be retried once it is ready again.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> ClientResult<Option<ToolCallResponse>> {
        let session = self.require_session().await?;
        match session.call_tool(name, arguments).await {
            Ok(response) => Ok(Some(response)),
            Err(ClientError::Unauthorized) => {
                self.reauthorize(&format!("tools/call {name}"));
                Ok(None)
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "tool call failed");
                Err(e)
            }
        }
    }

    /// Refresh and return the resource list.
    pub async fn list_resources(&self) -> ClientResult<Vec<Resource>> {
        let session = self.require_session().await?;
        let response = session.list_resources().await?;
        let resources = response.resources.clone();
        self.inner
            .update(self.inner.current_gen(), |state| state.resources = response.resources);
        Ok(resources)
    }

    /// Read one resource. Resolves `None` on expired authorization, like
    /// [`call_tool`](Self::call_tool).
    pub async fn read_resource(
        &self,
        uri: &str,
    ) -> ClientResult<Option<ReadResourceResponse>> {
        let session = self.require_session().await?;
        match session.read_resource(uri).await {
            Ok(response) => Ok(Some(response)),
            Err(ClientError::Unauthorized) => {
                self.reauthorize(&format!("resources/read {uri}"));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Refresh and return the prompt list.
    pub async fn list_prompts(&self) -> ClientResult<Vec<Prompt>> {
        let session = self.require_session().await?;
        let response = session.list_prompts().await?;
        let prompts = response.prompts.clone();
        self.inner
            .update(self.inner.current_gen(), |state| state.prompts = response.prompts);
        Ok(prompts)
    }

    /// Render one prompt. Resolves `None` on expired authorization.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> ClientResult<Option<GetPromptResponse>> {
        let session = self.require_session().await?;
        match session.get_prompt(name, arguments).await {
            Ok(response) => Ok(Some(response)),
            Err(ClientError::Unauthorized) => {
                self.reauthorize(&format!("prompts/get {name}"));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Kick a failed connection back into the connect procedure. Ignored
    /// with a warning in any other phase.
    pub async fn retry(&self) {
        let gen = self.inner.current_gen();
        if self.inner.phase() == ConnectionPhase::Failed {
            self.inner.log(gen, LogLevel::Info, "retrying connection");
            self.inner.spawn_connect(gen);
        } else {
            self.inner.log(
                gen,
                LogLevel::Warn,
                "retry ignored: connection has not failed",
            );
        }
    }

    /// From `failed`, behaves like [`retry`](Self::retry). While
    /// authenticating, re-surfaces the stored manual authorization URL.
    pub async fn authenticate(&self) -> Option<String> {
        let gen = self.inner.current_gen();
        match self.inner.phase() {
            ConnectionPhase::Failed => {
                self.inner.log(gen, LogLevel::Info, "re-authenticating");
                self.inner.spawn_connect(gen);
                None
            }
            ConnectionPhase::Authenticating => {
                let url = self.inner.provider.last_attempted_auth_url();
                if let Some(url) = url.clone() {
                    self.inner.update(gen, |state| state.auth_url = Some(url));
                }
                url
            }
            _ => None,
        }
    }

    /// Close the transport, clear timers, and return quietly to the initial
    /// phase. Persisted credentials are untouched.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Wipe all persisted state for this server, then disconnect. Returns
    /// the number of removed storage keys.
    pub async fn clear_storage(&self) -> usize {
        let removed = self.inner.provider.clear_storage();
        let gen = self.inner.current_gen();
        self.inner.log(
            gen,
            LogLevel::Info,
            format!("cleared {removed} stored keys"),
        );
        self.inner.disconnect().await;
        removed
    }
}

impl Drop for McpConnection {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}
