//! Hub core
//!
//! Owns the supervisor map, applies configuration diffs as the minimum
//! set of start/stop/reconnect operations, forwards dispatch calls,
//! and translates supervisor events onto the subscription bus. The
//! `connections` map is mutated only here; supervisors fire events
//! back through the broadcast channel rather than holding the hub.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mcphub_core::{
    ConfigChange, ConfigStore, EventBus, EventFilter, HubError, HubEvent, HubResult, HubState,
    LogRecord, PlaceholderResolver, SubscriptionEventType, Subscription, SupervisorEvent,
    WatchHandle,
};

use crate::marketplace::{Marketplace, StaticMarketplace};
use crate::oauth::default_base_dir;
use crate::shutdown::{ClientRegistry, ShutdownReason};
use crate::supervisor::{ServerInfo, ServerSupervisor, SupervisorContext};
use crate::transport::DEFAULT_CONNECT_TIMEOUT;

/// Hub-level tunables.
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Budget for one transport connect attempt.
    pub connect_timeout: Duration,
    /// Watch a file-backed config source for changes.
    pub watch_config: bool,
    /// Idle grace period before auto-shutdown; `None` disables it.
    pub auto_shutdown_delay: Option<Duration>,
    /// Origin serving the OAuth redirect endpoint.
    pub oauth_redirect_base: String,
    /// Directory holding per-server OAuth state.
    pub oauth_base_dir: PathBuf,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            watch_config: true,
            auto_shutdown_delay: None,
            oauth_redirect_base: "http://127.0.0.1:37650".to_string(),
            oauth_base_dir: default_base_dir(),
        }
    }
}

/// A client's live subscription plus its accounting registration.
pub struct HubSubscription {
    inner: Subscription,
    registry: Arc<ClientRegistry>,
}

impl HubSubscription {
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.inner.recv().await
    }
}

impl Drop for HubSubscription {
    fn drop(&mut self) {
        self.registry.unregister(&self.inner.id);
    }
}

/// The long-lived hub: one per process.
pub struct McpHub {
    options: HubOptions,
    config_store: Arc<ConfigStore>,
    connections: DashMap<String, Arc<ServerSupervisor>>,
    bus: EventBus,
    registry: Arc<ClientRegistry>,
    state: parking_lot::Mutex<HubState>,
    supervisor_ctx: SupervisorContext,
    event_tx: broadcast::Sender<SupervisorEvent>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    watch_handle: parking_lot::Mutex<Option<WatchHandle>>,
}

impl McpHub {
    pub fn new(config_store: ConfigStore, options: HubOptions) -> Arc<Self> {
        Self::with_collaborators(
            config_store,
            options,
            Arc::new(PlaceholderResolver::new()),
            Arc::new(StaticMarketplace::default()),
        )
    }

    pub fn with_collaborators(
        config_store: ConfigStore,
        options: HubOptions,
        resolver: Arc<PlaceholderResolver>,
        marketplace: Arc<dyn Marketplace>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(1024);
        let supervisor_ctx = SupervisorContext {
            resolver,
            marketplace,
            event_tx: event_tx.clone(),
            connect_timeout: options.connect_timeout,
            oauth_redirect_base: options.oauth_redirect_base.clone(),
            oauth_base_dir: options.oauth_base_dir.clone(),
        };
        Arc::new(Self {
            registry: Arc::new(ClientRegistry::new(options.auto_shutdown_delay)),
            options,
            config_store: Arc::new(config_store),
            connections: DashMap::new(),
            bus: EventBus::new(),
            state: parking_lot::Mutex::new(HubState::Starting),
            supervisor_ctx,
            event_tx,
            tasks: parking_lot::Mutex::new(Vec::new()),
            watch_handle: parking_lot::Mutex::new(None),
        })
    }

    pub fn state(&self) -> HubState {
        *self.state.lock()
    }

    fn set_state(&self, state: HubState) {
        *self.state.lock() = state;
        self.bus.emit(HubEvent::hub_state(state));
    }

    // ------------------------------------------------------------------
    // Startup / shutdown
    // ------------------------------------------------------------------

    /// Load the configuration, start watching it (file sources), and
    /// bring up every enabled server in parallel. An individual server
    /// failure never aborts the batch.
    pub async fn initialize(self: &Arc<Self>) -> HubResult<()> {
        self.set_state(HubState::Starting);

        let (config, _diff) = self.config_store.load().await?;

        self.spawn_event_pump();
        self.spawn_shutdown_listener();

        if self.options.watch_config && self.config_store.file_path().is_some() {
            let (tx, rx) = mpsc::channel::<ConfigChange>(16);
            let handle = self.config_store.watch(tx)?;
            *self.watch_handle.lock() = Some(handle);
            self.spawn_config_change_loop(rx);
        }

        for (name, server_config) in &config.servers {
            let supervisor =
                ServerSupervisor::new(server_config.clone(), self.supervisor_ctx.clone());
            self.connections.insert(name.clone(), supervisor);
        }

        let startups: Vec<_> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().config_snapshot().disabled)
            .map(|entry| {
                let supervisor = entry.value().clone();
                async move {
                    let name = supervisor.name().to_string();
                    (name, supervisor.start().await)
                }
            })
            .collect();

        let results = join_all(startups).await;
        let mut connected = 0usize;
        for (name, result) in results {
            match result {
                Ok(_) => connected += 1,
                Err(e) => warn!(server = %name, error = %e, "Server failed to start"),
            }
        }
        info!(
            total = self.connections.len(),
            connected, "Hub initialized"
        );

        self.set_state(HubState::Ready);
        Ok(())
    }

    /// Stop every supervisor concurrently; one slow server cannot
    /// block the others.
    pub async fn shutdown(self: &Arc<Self>) {
        self.set_state(HubState::Stopping);

        let supervisors: Vec<_> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        join_all(
            supervisors
                .iter()
                .map(|supervisor| supervisor.stop(false)),
        )
        .await;

        self.connections.clear();
        *self.watch_handle.lock() = None;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        self.set_state(HubState::Stopped);
    }

    /// Full restart: stop everything, reload the config, start again.
    pub async fn restart(self: &Arc<Self>) -> HubResult<()> {
        self.set_state(HubState::Restarting);

        let supervisors: Vec<_> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        join_all(
            supervisors
                .iter()
                .map(|supervisor| supervisor.stop(false)),
        )
        .await;
        self.connections.clear();

        let (config, _diff) = self.config_store.load().await?;
        for (name, server_config) in &config.servers {
            let supervisor =
                ServerSupervisor::new(server_config.clone(), self.supervisor_ctx.clone());
            self.connections.insert(name.clone(), supervisor);
        }
        let startups: Vec<_> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().config_snapshot().disabled)
            .map(|entry| entry.value().clone())
            .collect();
        let results = join_all(startups.iter().map(|s| s.start())).await;
        for (supervisor, result) in startups.iter().zip(results) {
            if let Err(e) = result {
                warn!(server = %supervisor.name(), error = %e, "Server failed to restart");
            }
        }

        self.set_state(HubState::Restarted);
        self.set_state(HubState::Ready);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Configuration changes
    // ------------------------------------------------------------------

    fn spawn_config_change_loop(self: &Arc<Self>, mut rx: mpsc::Receiver<ConfigChange>) {
        let hub = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                let Some(hub) = hub.upgrade() else { return };
                hub.handle_config_change(change).await;
            }
        });
        self.tasks.lock().push(task);
    }

    /// Apply a loaded diff: added are created and connected, removed
    /// are torn down and dropped, modified are restarted (a pure
    /// `disabled` flip maps to start/stop). Per-name application runs
    /// concurrently; within one name, disconnect strictly precedes
    /// reconnect.
    pub async fn handle_config_change(self: &Arc<Self>, change: ConfigChange) {
        let ConfigChange { config, diff } = change;

        // Always announced, significant or not.
        self.bus.emit(HubEvent::config_changed(&diff));

        if !diff.is_significant() {
            debug!("Configuration change is insignificant, nothing to apply");
            return;
        }

        info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            modified = diff.modified.len(),
            "Applying configuration change"
        );
        self.bus.emit(HubEvent::subscription(
            SubscriptionEventType::ServersUpdating,
            serde_json::to_value(&diff).ok(),
        ));

        let mut work: Vec<futures::future::BoxFuture<'static, ()>> = Vec::new();

        for name in &diff.added {
            let Some(server_config) = config.servers.get(name) else { continue };
            let supervisor =
                ServerSupervisor::new(server_config.clone(), self.supervisor_ctx.clone());
            self.connections.insert(name.clone(), supervisor.clone());
            let name = name.clone();
            work.push(Box::pin(async move {
                if let Err(e) = supervisor.connect(None).await {
                    warn!(server = %name, error = %e, "Added server failed to connect");
                }
            }));
        }

        for name in &diff.removed {
            let Some((_, supervisor)) = self.connections.remove(name) else { continue };
            let name = name.clone();
            work.push(Box::pin(async move {
                supervisor.stop(false).await;
                debug!(server = %name, "Removed server stopped");
            }));
        }

        for name in &diff.modified {
            let Some(supervisor) = self.connections.get(name).map(|e| e.value().clone()) else {
                continue;
            };
            let Some(server_config) = config.servers.get(name) else { continue };
            let server_config = server_config.clone();
            let only_disabled = diff.only_disabled_changed(name);
            let name = name.clone();
            work.push(Box::pin(async move {
                let result: HubResult<()> = if only_disabled {
                    if server_config.disabled {
                        supervisor.stop(true).await;
                        Ok(())
                    } else {
                        supervisor.start().await.map(|_| ())
                    }
                } else {
                    // Full reconnect with the new config; connect tears
                    // the old transport down first.
                    supervisor.connect(Some(server_config)).await
                };
                if let Err(e) = result {
                    warn!(server = %name, error = %e, "Modified server failed to apply");
                }
            }));
        }

        join_all(work).await;

        self.bus.emit(HubEvent::subscription(
            SubscriptionEventType::ServersUpdated,
            serde_json::to_value(&diff).ok(),
        ));
    }

    // ------------------------------------------------------------------
    // Supervisor event translation
    // ------------------------------------------------------------------

    fn spawn_event_pump(self: &Arc<Self>) {
        let mut rx = self.event_tx.subscribe();
        let hub = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Supervisor event pump lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                let Some(hub) = hub.upgrade() else { return };
                hub.handle_supervisor_event(event).await;
            }
        });
        self.tasks.lock().push(task);
    }

    async fn handle_supervisor_event(self: &Arc<Self>, event: SupervisorEvent) {
        match event {
            SupervisorEvent::CapabilitiesChanged { server, kind } => {
                // Partial re-discovery for the changed kind, then the
                // client-facing list-changed event.
                if let Some(supervisor) =
                    self.connections.get(&server).map(|e| e.value().clone())
                {
                    if let Err(e) = supervisor.update_capabilities(Some(&[kind])).await {
                        debug!(server = %server, error = %e, "Capability refresh failed");
                    }
                }
                if let Some(subtype) = HubEvent::capability_subtype(kind) {
                    self.bus.emit(HubEvent::subscription(
                        subtype,
                        Some(serde_json::json!({ "server": server })),
                    ));
                }
            }
            SupervisorEvent::StateChanged {
                server,
                state,
                error,
            } => {
                self.bus.emit(HubEvent::log(LogRecord {
                    level: mcphub_core::LogLevel::Info,
                    message: format!("server '{}' is now {}", server, state),
                    server: Some(server),
                    data: error.map(|e| serde_json::json!({ "error": e })),
                }));
            }
            SupervisorEvent::Log {
                server,
                level,
                message,
            } => {
                self.bus.emit(HubEvent::log(LogRecord {
                    level,
                    message,
                    server: Some(server),
                    data: None,
                }));
            }
        }
    }

    fn spawn_shutdown_listener(self: &Arc<Self>) {
        let mut shutdown_rx = self.registry.subscribe_shutdown();
        let hub = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while shutdown_rx.changed().await.is_ok() {
                let reason = *shutdown_rx.borrow();
                if let Some(reason) = reason {
                    let Some(hub) = hub.upgrade() else { return };
                    info!(?reason, "Shutdown requested, stopping hub");
                    hub.shutdown().await;
                    return;
                }
            }
        });
        self.tasks.lock().push(task);
    }

    // ------------------------------------------------------------------
    // Client subscriptions
    // ------------------------------------------------------------------

    /// Register a client on the bus; dropping the subscription updates
    /// the accounting (and may arm the auto-shutdown timer).
    pub fn subscribe(&self, filter: EventFilter) -> HubSubscription {
        let inner = self.bus.subscribe(filter);
        self.registry.register(inner.id);
        HubSubscription {
            inner,
            registry: self.registry.clone(),
        }
    }

    /// Observe the graceful-termination signal.
    pub fn subscribe_shutdown(&self) -> tokio::sync::watch::Receiver<Option<ShutdownReason>> {
        self.registry.subscribe_shutdown()
    }

    pub fn client_count(&self) -> usize {
        self.registry.active_count()
    }

    // ------------------------------------------------------------------
    // Forwarders
    // ------------------------------------------------------------------

    fn supervisor(&self, name: &str) -> HubResult<Arc<ServerSupervisor>> {
        self.connections
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HubError::ServerNotFound {
                server: name.to_string(),
            })
    }

    pub async fn start_server(&self, name: &str) -> HubResult<ServerInfo> {
        self.supervisor(name)?.start().await
    }

    pub async fn stop_server(&self, name: &str, disable: bool) -> HubResult<ServerInfo> {
        Ok(self.supervisor(name)?.stop(disable).await)
    }

    /// Re-discover a server's capabilities.
    pub async fn refresh_server(&self, name: &str) -> HubResult<ServerInfo> {
        let supervisor = self.supervisor(name)?;
        supervisor.update_capabilities(None).await?;
        Ok(supervisor.get_server_info())
    }

    /// Refresh the whole fleet; failures are reported per server.
    pub async fn refresh_all_servers(&self) -> Vec<(String, HubResult<ServerInfo>)> {
        let supervisors: Vec<_> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        join_all(supervisors.into_iter().map(|supervisor| async move {
            let name = supervisor.name().to_string();
            let result = match supervisor.update_capabilities(None).await {
                Ok(()) => Ok(supervisor.get_server_info()),
                Err(e) => Err(e),
            };
            (name, result)
        }))
        .await
    }

    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: Option<Value>,
    ) -> HubResult<Value> {
        self.supervisor(server)?.call_tool(tool, args).await
    }

    pub async fn read_resource(&self, server: &str, uri: &str) -> HubResult<Value> {
        self.supervisor(server)?.read_resource(uri).await
    }

    pub async fn get_prompt(
        &self,
        server: &str,
        prompt: &str,
        args: Option<Value>,
    ) -> HubResult<Value> {
        self.supervisor(server)?.get_prompt(prompt, args).await
    }

    pub async fn authorize_server(&self, name: &str) -> HubResult<String> {
        self.supervisor(name)?.authorize()
    }

    pub async fn handle_auth_callback(&self, name: &str, code: &str) -> HubResult<()> {
        self.supervisor(name)?.handle_auth_callback(code).await
    }

    pub fn get_server_info(&self, name: &str) -> HubResult<ServerInfo> {
        Ok(self.supervisor(name)?.get_server_info())
    }

    pub fn get_all_server_statuses(&self) -> Vec<ServerInfo> {
        self.connections
            .iter()
            .map(|entry| entry.value().get_server_info())
            .collect()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Drop for McpHub {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcphub_core::{ConfigDiff, HubConfig};

    fn inline_hub(config: serde_json::Value) -> Arc<McpHub> {
        McpHub::new(
            ConfigStore::from_value(config),
            HubOptions {
                watch_config: false,
                connect_timeout: Duration::from_secs(2),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn unknown_server_is_server_not_found() {
        let hub = inline_hub(serde_json::json!({ "mcpServers": {} }));
        hub.initialize().await.unwrap();

        let err = hub.call_tool("ghost", "t", None).await.unwrap_err();
        assert_eq!(err.code(), "SERVER_NOT_FOUND");
        let err = hub.start_server("ghost").await.unwrap_err();
        assert_eq!(err.code(), "SERVER_NOT_FOUND");
    }

    #[tokio::test]
    async fn initialize_creates_supervisors_and_reaches_ready() {
        // A disabled server and a missing binary: neither may abort
        // initialization.
        let hub = inline_hub(serde_json::json!({ "mcpServers": {
            "off": { "command": "true", "disabled": true },
            "broken": { "command": "definitely-not-a-real-binary-xyz" }
        } }));
        hub.initialize().await.unwrap();

        assert_eq!(hub.state(), HubState::Ready);
        let mut names = hub.server_names();
        names.sort();
        assert_eq!(names, vec!["broken", "off"]);

        let off = hub.get_server_info("off").unwrap();
        assert_eq!(off.state, mcphub_core::ConnectionState::Disabled);
        let broken = hub.get_server_info("broken").unwrap();
        assert_eq!(broken.state, mcphub_core::ConnectionState::Disconnected);
        assert!(broken.error.is_some());
    }

    #[tokio::test]
    async fn map_keys_match_supervisor_names() {
        let hub = inline_hub(serde_json::json!({ "mcpServers": {
            "alpha": { "command": "true", "disabled": true },
            "beta": { "url": "https://example.invalid/mcp", "disabled": true }
        } }));
        hub.initialize().await.unwrap();

        for name in hub.server_names() {
            assert_eq!(hub.get_server_info(&name).unwrap().name, name);
        }
    }

    #[tokio::test]
    async fn config_change_events_are_ordered() {
        let hub = inline_hub(serde_json::json!({ "mcpServers": {
            "a": { "command": "true", "disabled": true },
            "b": { "command": "true", "disabled": true }
        } }));
        hub.initialize().await.unwrap();
        let mut sub = hub.subscribe(EventFilter::all());

        // New config: a removed, b enabled (still a stub binary), c added.
        let new_config = HubConfig::from_value(serde_json::json!({ "mcpServers": {
            "b": { "command": "definitely-not-a-real-binary-xyz", "disabled": false },
            "c": { "command": "definitely-not-a-real-binary-xyz" }
        } }))
        .unwrap();
        let old_config = HubConfig::from_value(serde_json::json!({ "mcpServers": {
            "a": { "command": "true", "disabled": true },
            "b": { "command": "true", "disabled": true }
        } }))
        .unwrap();
        let diff = ConfigDiff::between(&old_config, &new_config);
        assert_eq!(diff.removed, vec!["a"]);
        assert_eq!(diff.added, vec!["c"]);

        hub.handle_config_change(ConfigChange {
            config: new_config,
            diff,
        })
        .await;

        // a dropped, c present.
        assert!(hub.get_server_info("a").is_err());
        assert!(hub.get_server_info("c").is_ok());

        // Event order: CONFIG_CHANGED, SERVERS_UPDATING, ..., SERVERS_UPDATED.
        let mut subtypes = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), sub.recv()).await
        {
            if let HubEvent::Subscription { subtype, .. } = event {
                subtypes.push(subtype);
            }
        }
        assert_eq!(subtypes.first(), Some(&SubscriptionEventType::ConfigChanged));
        assert_eq!(
            subtypes.get(1),
            Some(&SubscriptionEventType::ServersUpdating)
        );
        assert_eq!(
            subtypes.iter().rev().find(|s| **s == SubscriptionEventType::ServersUpdated),
            Some(&SubscriptionEventType::ServersUpdated)
        );
        assert_eq!(
            subtypes
                .iter()
                .filter(|s| **s == SubscriptionEventType::ServersUpdated)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn insignificant_change_stops_after_detection() {
        let hub = inline_hub(serde_json::json!({ "mcpServers": {
            "a": { "command": "true", "disabled": true }
        } }));
        hub.initialize().await.unwrap();
        let mut sub = hub.subscribe(EventFilter::all());

        let config = HubConfig::from_value(serde_json::json!({ "mcpServers": {
            "a": { "command": "true", "disabled": true }
        } }))
        .unwrap();
        hub.handle_config_change(ConfigChange {
            config,
            diff: ConfigDiff::default(),
        })
        .await;

        let mut subtypes = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), sub.recv()).await
        {
            if let HubEvent::Subscription { subtype, .. } = event {
                subtypes.push(subtype);
            }
        }
        assert_eq!(subtypes, vec![SubscriptionEventType::ConfigChanged]);
    }

    #[tokio::test]
    async fn shutdown_reaches_stopped() {
        let hub = inline_hub(serde_json::json!({ "mcpServers": {
            "a": { "command": "true", "disabled": true }
        } }));
        hub.initialize().await.unwrap();
        hub.shutdown().await;
        assert_eq!(hub.state(), HubState::Stopped);
        assert!(hub.server_names().is_empty());
    }

    #[tokio::test]
    async fn subscription_accounting_tracks_drops() {
        let hub = inline_hub(serde_json::json!({ "mcpServers": {} }));
        hub.initialize().await.unwrap();

        let sub = hub.subscribe(EventFilter::all());
        assert_eq!(hub.client_count(), 1);
        drop(sub);
        assert_eq!(hub.client_count(), 0);
    }
}
