//! Connection supervisor
//!
//! One supervisor owns exactly one MCP server's lifecycle: the state
//! machine over {disabled, disconnected, connecting, unauthorized,
//! connected}, transport selection with the streamable→SSE fallback,
//! capability discovery, guarded dispatch, dev-mode restarts, and
//! teardown. State-changing operations are serialized through one
//! operation lock; the protocol client is recreated on every entry to
//! `connecting`.

mod capabilities;
mod dev_watch;

pub use capabilities::{template_matches, Capabilities};
pub use dev_watch::DevWatcher;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rmcp::model::{CallToolRequestParams, GetPromptRequestParams, ReadResourceRequestParams};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::{debug, info, warn};

use mcphub_core::{
    CapabilityKind, ConnectionState, HubError, HubResult, PlaceholderResolver, ResolveMode,
    ResolvedServerConfig, ServerConfig, ServerKind, SupervisorEvent,
};

use crate::client::McpClient;
use crate::marketplace::Marketplace;
use crate::oauth::OAuthProvider;
use crate::transport::{ConnectOutcome, RemoteTransport, StdioTransport};

/// Shared wiring every supervisor needs.
#[derive(Clone)]
pub struct SupervisorContext {
    pub resolver: Arc<PlaceholderResolver>,
    pub marketplace: Arc<dyn Marketplace>,
    pub event_tx: broadcast::Sender<SupervisorEvent>,
    pub connect_timeout: Duration,
    pub oauth_redirect_base: String,
    pub oauth_base_dir: std::path::PathBuf,
}

/// Snapshot returned by `get_server_info`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub state: ConnectionState,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "authorizationUrl", skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    /// Seconds since the state entered `connected` or `disabled`.
    #[serde(rename = "uptime")]
    pub uptime_seconds: Option<u64>,
    pub capabilities: Capabilities,
}

struct RuntimeState {
    state: ConnectionState,
    error: Option<String>,
    start_time: Option<Instant>,
    /// Set once `connect()` has been attempted at least once.
    initialized: bool,
    authorization_url: Option<String>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            error: None,
            start_time: None,
            initialized: false,
            authorization_url: None,
        }
    }
}


/// Supervisor for one configured MCP server.
pub struct ServerSupervisor {
    name: String,
    ctx: SupervisorContext,
    config: parking_lot::RwLock<ServerConfig>,
    runtime: parking_lot::Mutex<RuntimeState>,
    capabilities: parking_lot::RwLock<Capabilities>,
    /// Per-kind generation counters; a refresh writes back only if no
    /// newer refresh for the same kind started in the meantime.
    generations: parking_lot::Mutex<[u64; 4]>,
    client: AsyncRwLock<Option<McpClient>>,
    oauth: parking_lot::RwLock<Option<Arc<OAuthProvider>>>,
    dev: parking_lot::Mutex<Option<DevWatcher>>,
    /// Serializes connect/disconnect/start/stop.
    op_lock: AsyncMutex<()>,
}

impl ServerSupervisor {
    pub fn new(config: ServerConfig, ctx: SupervisorContext) -> Arc<Self> {
        let initial_state = if config.disabled {
            ConnectionState::Disabled
        } else {
            ConnectionState::Disconnected
        };
        Arc::new(Self {
            name: config.name.clone(),
            ctx,
            config: parking_lot::RwLock::new(config),
            runtime: parking_lot::Mutex::new(RuntimeState {
                state: initial_state,
                start_time: initial_state.tracks_uptime().then(Instant::now),
                ..Default::default()
            }),
            capabilities: parking_lot::RwLock::new(Capabilities::default()),
            generations: parking_lot::Mutex::new([0; 4]),
            client: AsyncRwLock::new(None),
            oauth: parking_lot::RwLock::new(None),
            dev: parking_lot::Mutex::new(None),
            op_lock: AsyncMutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.runtime.lock().state
    }

    pub fn config_snapshot(&self) -> ServerConfig {
        self.config.read().clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Clear the disabled flag and connect.
    pub async fn start(self: &Arc<Self>) -> HubResult<ServerInfo> {
        self.config.write().disabled = false;
        self.connect(None).await?;
        Ok(self.get_server_info())
    }

    /// Best-effort teardown; never fails. With `disable`, the server
    /// parks in the `disabled` state and its config flag is set.
    pub async fn stop(&self, disable: bool) -> ServerInfo {
        let _op = self.op_lock.lock().await;
        self.teardown().await;
        if disable {
            self.config.write().disabled = true;
            self.set_state(ConnectionState::Disabled, None);
        } else {
            self.set_state(ConnectionState::Disconnected, None);
        }
        self.get_server_info()
    }

    /// Connect, optionally swapping in a new configuration first.
    pub async fn connect(self: &Arc<Self>, new_config: Option<ServerConfig>) -> HubResult<()> {
        let _op = self.op_lock.lock().await;
        if let Some(config) = new_config {
            *self.config.write() = config;
        }
        self.connect_locked().await
    }

    /// Tear down the connection and leave the server disconnected.
    pub async fn disconnect(&self) {
        let _op = self.op_lock.lock().await;
        self.teardown().await;
        self.set_state(ConnectionState::Disconnected, None);
    }

    /// Disconnect then reconnect (dev-mode restarts, config reloads).
    pub async fn restart(self: &Arc<Self>) -> HubResult<()> {
        let _op = self.op_lock.lock().await;
        self.teardown().await;
        self.set_state(ConnectionState::Disconnected, None);
        self.connect_locked().await
    }

    /// The connect algorithm. Caller holds the operation lock.
    async fn connect_locked(self: &Arc<Self>) -> HubResult<()> {
        let config = self.config_snapshot();
        self.runtime.lock().initialized = true;

        if config.disabled {
            debug!(server = %self.name, "Connect skipped, server is disabled");
            self.teardown().await;
            self.set_state(ConnectionState::Disabled, None);
            return Ok(());
        }

        // Any previous transport goes first; the client is recreated on
        // every entry to `connecting`.
        self.teardown().await;
        self.set_state(ConnectionState::Connecting, None);

        // Step 1: strict placeholder resolution, fresh per attempt.
        let resolved = match self.resolve_config(&config).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected, Some(e.to_string()));
                return Err(e);
            }
        };

        // Steps 2-3: transport selection and protocol client.
        let client = match resolved.kind() {
            ServerKind::Stdio => {
                let transport = StdioTransport::new(
                    &resolved,
                    self.ctx.connect_timeout,
                    self.ctx.event_tx.clone(),
                );
                match transport.connect().await {
                    ConnectOutcome::Connected(client) => client,
                    ConnectOutcome::Unauthorized => {
                        return self.fail_connect("stdio transport reported 401".into()).await;
                    }
                    ConnectOutcome::Failed(e) => return self.fail_connect(e).await,
                }
            }
            ServerKind::Remote => match self.connect_remote(&config, resolved).await? {
                Some(client) => client,
                // Unauthorized: parked waiting for the callback.
                None => return Ok(()),
            },
        };

        *self.client.write().await = Some(client);

        // Step 4: capability discovery, method-not-found tolerant.
        if let Err(e) = self.refresh_capabilities(None).await {
            self.teardown().await;
            let msg = e.to_string();
            self.set_state(ConnectionState::Disconnected, Some(msg.clone()));
            return Err(HubError::ConnectionFailed {
                server: self.name.clone(),
                reason: msg,
            });
        }

        // Step 5 happened at serve() time: the client handler carries
        // the notification hooks.

        // Dev-mode watcher for stdio servers that ask for it.
        if config.dev_watch_enabled() {
            if let Some(dev) = &config.dev {
                self.spawn_dev_watch(dev.clone());
            }
        }

        self.set_state(ConnectionState::Connected, None);
        info!(server = %self.name, "Server connected");
        Ok(())
    }

    /// Remote connect: streamable HTTP first, SSE on non-authorization
    /// failure, 401 parks in `unauthorized`. Returns `Ok(None)` for the
    /// unauthorized wait.
    async fn connect_remote(
        self: &Arc<Self>,
        config: &ServerConfig,
        resolved: ResolvedServerConfig,
    ) -> HubResult<Option<McpClient>> {
        let provider = self.fresh_provider(&resolved);
        let transport = RemoteTransport::new(
            &resolved,
            provider.clone(),
            self.ctx.connect_timeout,
            self.ctx.event_tx.clone(),
        );

        let first_error = match transport.connect_streamable().await {
            ConnectOutcome::Connected(client) => return Ok(Some(client)),
            ConnectOutcome::Unauthorized => {
                self.enter_unauthorized(provider).await?;
                return Ok(None);
            }
            ConnectOutcome::Failed(e) => e,
        };

        warn!(
            server = %self.name,
            error = %first_error,
            "Streamable HTTP failed, retrying with SSE fallback"
        );

        // Fresh resolution and a fresh provider for the fallback.
        let resolved = match self.resolve_config(config).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected, Some(e.to_string()));
                return Err(e);
            }
        };
        let provider = self.fresh_provider(&resolved);
        let transport = RemoteTransport::new(
            &resolved,
            provider.clone(),
            self.ctx.connect_timeout,
            self.ctx.event_tx.clone(),
        );

        match transport.connect_sse().await {
            ConnectOutcome::Connected(client) => Ok(Some(client)),
            ConnectOutcome::Unauthorized => {
                self.enter_unauthorized(provider).await?;
                Ok(None)
            }
            ConnectOutcome::Failed(e) => {
                self.fail_connect(format!("{} (streamable HTTP: {})", e, first_error))
                    .await?;
                Ok(None)
            }
        }
    }

    async fn resolve_config(&self, config: &ServerConfig) -> HubResult<ResolvedServerConfig> {
        self.ctx.resolver.resolve(config, ResolveMode::Strict).await
    }

    fn fresh_provider(&self, resolved: &ResolvedServerConfig) -> Arc<OAuthProvider> {
        let provider = Arc::new(OAuthProvider::new(
            &self.name,
            resolved.url.as_deref().unwrap_or_default(),
            &self.ctx.oauth_redirect_base,
            &self.ctx.oauth_base_dir,
        ));
        *self.oauth.write() = Some(provider.clone());
        provider
    }

    /// 401 is a successful wait for human action, not a failure.
    async fn enter_unauthorized(&self, provider: Arc<OAuthProvider>) -> HubResult<()> {
        match provider.prepare_authorization().await {
            Ok(url) => {
                info!(server = %self.name, "Authorization required, URL generated");
                {
                    let mut rt = self.runtime.lock();
                    rt.authorization_url = Some(url);
                }
                self.set_state(ConnectionState::Unauthorized, None);
                Ok(())
            }
            Err(e) => {
                let reason = format!("authorization setup failed: {}", e);
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected, Some(reason.clone()));
                Err(HubError::ConnectionFailed {
                    server: self.name.clone(),
                    reason,
                })
            }
        }
    }

    /// Teardown + disconnected + wrapped `ConnectionFailed`.
    async fn fail_connect(&self, reason: String) -> HubResult<()> {
        self.teardown().await;
        self.set_state(ConnectionState::Disconnected, Some(reason.clone()));
        Err(HubError::ConnectionFailed {
            server: self.name.clone(),
            reason,
        })
    }

    /// Idempotent best-effort teardown: cancel the protocol client
    /// (which also terminates any transport session) and stop the dev
    /// watcher. In-flight capability refreshes are discarded by the
    /// generation counters.
    async fn teardown(&self) {
        self.dev.lock().take();

        if let Some(client) = self.client.write().await.take() {
            match client.cancel().await {
                Ok(reason) => debug!(server = %self.name, reason = ?reason, "Client closed"),
                Err(e) => debug!(server = %self.name, error = %e, "Client close error (ignored)"),
            }
        }

        // Invalidate any refresh that has not written back yet.
        let mut generations = self.generations.lock();
        for generation in generations.iter_mut() {
            *generation += 1;
        }
    }

    fn set_state(&self, state: ConnectionState, error: Option<String>) {
        {
            let mut rt = self.runtime.lock();
            rt.state = state;
            rt.error = error.clone();
            rt.start_time = state.tracks_uptime().then(Instant::now);
            if state != ConnectionState::Unauthorized {
                rt.authorization_url = None;
            }
        }
        let _ = self.ctx.event_tx.send(SupervisorEvent::StateChanged {
            server: self.name.clone(),
            state,
            error,
        });
    }

    fn spawn_dev_watch(self: &Arc<Self>, dev: mcphub_core::DevConfig) {
        let (restart_tx, mut restart_rx) = mpsc::channel(4);
        let watcher = match DevWatcher::spawn(&self.name, &dev, restart_tx) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(server = %self.name, error = %e, "Dev watcher failed to start");
                return;
            }
        };

        // The loop ends on its own once the watcher (and with it the
        // restart sender) is dropped; a restart in flight is never cut
        // short by its own teardown.
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while restart_rx.recv().await.is_some() {
                let Some(supervisor) = weak.upgrade() else { return };
                if let Err(e) = supervisor.restart().await {
                    warn!(
                        server = %supervisor.name,
                        error = %e,
                        "Dev-mode restart failed"
                    );
                }
            }
        });

        *self.dev.lock() = Some(watcher);
    }

    // ------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------

    /// The URL the user must visit; available in `unauthorized`.
    pub fn authorize(&self) -> HubResult<String> {
        let rt = self.runtime.lock();
        rt.authorization_url
            .clone()
            .ok_or_else(|| HubError::ConnectionFailed {
                server: self.name.clone(),
                reason: "no authorization URL available; server is not awaiting authorization"
                    .into(),
            })
    }

    /// Complete the OAuth flow with the callback code, then connect.
    pub async fn handle_auth_callback(self: &Arc<Self>, code: &str) -> HubResult<()> {
        let provider = self
            .oauth
            .read()
            .clone()
            .ok_or_else(|| HubError::ConnectionFailed {
                server: self.name.clone(),
                reason: "no authorization flow in progress".into(),
            })?;

        provider
            .handle_callback(code)
            .await
            .map_err(|e| HubError::ConnectionFailed {
                server: self.name.clone(),
                reason: format!("authorization callback failed: {}", e),
            })?;

        self.connect(None).await
    }

    // ------------------------------------------------------------------
    // Capabilities
    // ------------------------------------------------------------------

    /// Re-fetch capability lists; `kinds = None` means all four. Each
    /// fetch is best-effort on "method not found" (treated as empty);
    /// a stale fetch loses to a newer one via generation counters.
    pub async fn update_capabilities(&self, kinds: Option<&[CapabilityKind]>) -> HubResult<()> {
        self.refresh_capabilities(kinds).await.map_err(|reason| {
            HubError::ConnectionFailed {
                server: self.name.clone(),
                reason,
            }
        })
    }

    async fn refresh_capabilities(&self, kinds: Option<&[CapabilityKind]>) -> Result<(), String> {
        let kinds: Vec<CapabilityKind> = match kinds {
            Some(kinds) => kinds.to_vec(),
            None => CapabilityKind::ALL.to_vec(),
        };

        for kind in kinds {
            let generation = {
                let mut generations = self.generations.lock();
                let slot = kind_index(kind);
                generations[slot] += 1;
                generations[slot]
            };

            let fetched = self.fetch_capability_list(kind).await;

            let records = match fetched {
                Ok(records) => records,
                Err(e) if is_method_not_found(&e) => {
                    debug!(
                        server = %self.name,
                        kind = kind.as_str(),
                        "Server does not implement list method, treating as empty"
                    );
                    Vec::new()
                }
                Err(e) => return Err(format!("failed to list {}: {}", kind.as_str(), e)),
            };

            let mut generations = self.generations.lock();
            if generations[kind_index(kind)] == generation {
                self.capabilities.write().set(kind, records);
            } else {
                debug!(
                    server = %self.name,
                    kind = kind.as_str(),
                    "Discarding stale capability refresh"
                );
            }
            drop(generations);
        }
        Ok(())
    }

    async fn fetch_capability_list(
        &self,
        kind: CapabilityKind,
    ) -> Result<Vec<Value>, rmcp::ServiceError> {
        let client = self.client.read().await;
        let Some(client) = client.as_ref() else {
            // No client (torn down mid-refresh): nothing to list.
            return Ok(Vec::new());
        };

        let records = match kind {
            CapabilityKind::Tools => to_values(client.list_all_tools().await?),
            CapabilityKind::Resources => to_values(client.list_all_resources().await?),
            CapabilityKind::ResourceTemplates => {
                to_values(client.list_all_resource_templates().await?)
            }
            CapabilityKind::Prompts => to_values(client.list_all_prompts().await?),
        };
        Ok(records)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities.read().clone()
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Connected-state guard shared by the dispatch operations.
    fn ensure_dispatchable(&self) -> HubResult<()> {
        let rt = self.runtime.lock();
        if rt.state == ConnectionState::Connected {
            return Ok(());
        }
        if !rt.initialized {
            return Err(HubError::NotInitialized {
                server: self.name.clone(),
            });
        }
        Err(HubError::NotConnected {
            server: self.name.clone(),
            state: rt.state.as_str().to_string(),
        })
    }

    /// Arguments must be null, a mapping, or a sequence. Mappings pass
    /// through; anything else reaches the server without arguments.
    fn validate_args(
        &self,
        operation: &str,
        args: Option<Value>,
    ) -> HubResult<Option<serde_json::Map<String, Value>>> {
        match args {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(Value::Array(_)) => Ok(None),
            Some(other) => Err(HubError::InvalidArguments {
                server: self.name.clone(),
                operation: operation.to_string(),
                reason: format!(
                    "arguments must be null, a mapping, or a sequence (got {})",
                    value_type_name(&other)
                ),
            }),
        }
    }

    pub async fn call_tool(&self, tool: &str, args: Option<Value>) -> HubResult<Value> {
        self.ensure_dispatchable()?;

        {
            let caps = self.capabilities.read();
            if !caps.has_tool(tool) {
                return Err(HubError::ToolNotFound {
                    server: self.name.clone(),
                    tool: tool.to_string(),
                    available: caps.tool_names(),
                });
            }
        }

        let arguments = self.validate_args("tools/call", args)?;

        let client = self.client.read().await;
        let client = client.as_ref().ok_or_else(|| HubError::NotConnected {
            server: self.name.clone(),
            state: self.state().as_str().to_string(),
        })?;

        let result = client
            .peer()
            .call_tool(CallToolRequestParams {
                name: tool.to_string().into(),
                arguments,
                task: None,
                meta: None,
            })
            .await
            .map_err(|e| HubError::ToolExecutionFailed {
                server: self.name.clone(),
                tool: tool.to_string(),
                reason: e.to_string(),
            })?;

        serde_json::to_value(result).map_err(|e| HubError::ToolExecutionFailed {
            server: self.name.clone(),
            tool: tool.to_string(),
            reason: format!("unserializable tool result: {}", e),
        })
    }

    pub async fn read_resource(&self, uri: &str) -> HubResult<Value> {
        self.ensure_dispatchable()?;

        {
            let caps = self.capabilities.read();
            if !caps.matches_resource(uri) {
                return Err(HubError::ResourceNotFound {
                    server: self.name.clone(),
                    uri: uri.to_string(),
                    available: caps.resource_uris(),
                });
            }
        }

        let client = self.client.read().await;
        let client = client.as_ref().ok_or_else(|| HubError::NotConnected {
            server: self.name.clone(),
            state: self.state().as_str().to_string(),
        })?;

        let result = client
            .peer()
            .read_resource(ReadResourceRequestParams {
                uri: uri.to_string().into(),
                meta: None,
            })
            .await
            .map_err(|e| HubError::ResourceReadFailed {
                server: self.name.clone(),
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        serde_json::to_value(result).map_err(|e| HubError::ResourceReadFailed {
            server: self.name.clone(),
            uri: uri.to_string(),
            reason: format!("unserializable resource payload: {}", e),
        })
    }

    pub async fn get_prompt(&self, prompt: &str, args: Option<Value>) -> HubResult<Value> {
        self.ensure_dispatchable()?;

        {
            let caps = self.capabilities.read();
            if !caps.has_prompt(prompt) {
                return Err(HubError::PromptNotFound {
                    server: self.name.clone(),
                    prompt: prompt.to_string(),
                    available: caps.prompt_names(),
                });
            }
        }

        let arguments = self.validate_args("prompts/get", args)?;

        let client = self.client.read().await;
        let client = client.as_ref().ok_or_else(|| HubError::NotConnected {
            server: self.name.clone(),
            state: self.state().as_str().to_string(),
        })?;

        let result = client
            .peer()
            .get_prompt(GetPromptRequestParams {
                name: prompt.to_string().into(),
                arguments,
                meta: None,
            })
            .await
            .map_err(|e| HubError::PromptExecutionFailed {
                server: self.name.clone(),
                prompt: prompt.to_string(),
                reason: e.to_string(),
            })?;

        serde_json::to_value(result).map_err(|e| HubError::PromptExecutionFailed {
            server: self.name.clone(),
            prompt: prompt.to_string(),
            reason: format!("unserializable prompt payload: {}", e),
        })
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn get_server_info(&self) -> ServerInfo {
        let rt = self.runtime.lock();
        let config = self.config.read();
        ServerInfo {
            name: self.name.clone(),
            display_name: self.ctx.marketplace.display_name(&self.name),
            state: rt.state,
            disabled: config.disabled,
            error: rt.error.clone(),
            authorization_url: rt.authorization_url.clone(),
            uptime_seconds: rt.start_time.map(|t| t.elapsed().as_secs()),
            capabilities: self.capabilities.read().clone(),
        }
    }
}

fn kind_index(kind: CapabilityKind) -> usize {
    match kind {
        CapabilityKind::Tools => 0,
        CapabilityKind::Resources => 1,
        CapabilityKind::ResourceTemplates => 2,
        CapabilityKind::Prompts => 3,
    }
}

fn to_values<T: serde::Serialize>(items: Vec<T>) -> Vec<Value> {
    items
        .into_iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect()
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether a request failed because the server lacks the method.
fn is_method_not_found(error: &rmcp::ServiceError) -> bool {
    if let rmcp::ServiceError::McpError(data) = error {
        if data.code == rmcp::model::ErrorCode::METHOD_NOT_FOUND {
            return true;
        }
    }
    let message = error.to_string().to_lowercase();
    message.contains("method not found") || message.contains("-32601")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::StaticMarketplace;
    use mcphub_core::HubConfig;

    fn context() -> (SupervisorContext, broadcast::Receiver<SupervisorEvent>) {
        let (event_tx, event_rx) = broadcast::channel(64);
        let ctx = SupervisorContext {
            resolver: Arc::new(PlaceholderResolver::new()),
            marketplace: Arc::new(StaticMarketplace::default()),
            event_tx,
            connect_timeout: Duration::from_secs(5),
            oauth_redirect_base: "http://127.0.0.1:37650".into(),
            oauth_base_dir: std::env::temp_dir(),
        };
        (ctx, event_rx)
    }

    fn server_config(json: serde_json::Value) -> ServerConfig {
        let config = HubConfig::from_value(serde_json::json!({ "mcpServers": { "test": json } }))
            .unwrap();
        config.servers["test"].clone()
    }

    fn supervisor(json: serde_json::Value) -> (Arc<ServerSupervisor>, broadcast::Receiver<SupervisorEvent>) {
        let (ctx, rx) = context();
        (ServerSupervisor::new(server_config(json), ctx), rx)
    }

    #[tokio::test]
    async fn dispatch_before_any_connect_is_not_initialized() {
        let (sup, _rx) = supervisor(serde_json::json!({ "command": "true" }));
        let err = sup.call_tool("anything", None).await.unwrap_err();
        assert_eq!(err.code(), "NOT_INITIALIZED");
    }

    #[tokio::test]
    async fn dispatch_after_failed_connect_is_not_connected() {
        let (sup, _rx) = supervisor(serde_json::json!({
            "command": "definitely-not-a-real-binary-xyz"
        }));
        let err = sup.connect(None).await.unwrap_err();
        assert_eq!(err.code(), "CONNECTION_FAILED");
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        let err = sup.call_tool("anything", None).await.unwrap_err();
        assert_eq!(err.code(), "NOT_CONNECTED");
    }

    #[tokio::test]
    async fn resolver_failure_surfaces_with_disconnected_state() {
        let (sup, _rx) = supervisor(serde_json::json!({
            "command": "${NO_SUCH_VARIABLE_FOR_SURE}/bin"
        }));
        let err = sup.connect(None).await.unwrap_err();
        assert_eq!(err.code(), "VARIABLE_NOT_FOUND");
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert!(sup.get_server_info().error.is_some());
    }

    #[tokio::test]
    async fn disabled_server_parks_in_disabled_state() {
        let (sup, _rx) = supervisor(serde_json::json!({
            "command": "true",
            "disabled": true
        }));
        sup.connect(None).await.unwrap();
        assert_eq!(sup.state(), ConnectionState::Disabled);

        let info = sup.get_server_info();
        assert!(info.disabled);
        assert!(info.uptime_seconds.is_some());
    }

    #[tokio::test]
    async fn stop_with_disable_flags_config() {
        let (sup, _rx) = supervisor(serde_json::json!({ "command": "true" }));
        let info = sup.stop(true).await;
        assert_eq!(info.state, ConnectionState::Disabled);
        assert!(info.disabled);

        // stop(false) leaves the flag alone.
        let info = sup.stop(false).await;
        assert_eq!(info.state, ConnectionState::Disconnected);
        assert!(info.disabled);
    }

    #[tokio::test]
    async fn authorize_without_pending_flow_errors() {
        let (sup, _rx) = supervisor(serde_json::json!({ "command": "true" }));
        assert!(sup.authorize().is_err());
    }

    #[tokio::test]
    async fn state_events_are_emitted() {
        let (sup, mut rx) = supervisor(serde_json::json!({
            "command": "definitely-not-a-real-binary-xyz"
        }));
        let _ = sup.connect(None).await;

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SupervisorEvent::StateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );
    }

    #[test]
    fn info_snapshot_matches_name() {
        let (ctx, _rx) = context();
        let sup = ServerSupervisor::new(server_config(serde_json::json!({ "command": "true" })), ctx);
        assert_eq!(sup.get_server_info().name, "test");
    }
}
