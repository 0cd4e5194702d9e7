//! MCP client handler
//!
//! One handler instance per connection. It identifies the hub to the
//! backend server and forwards the server's list-changed and logging
//! notifications onto the supervisor event channel, where the owning
//! supervisor reacts (partial capability refresh, client-visible logs).

use rmcp::model::{ClientCapabilities, ClientInfo, Implementation, LoggingLevel};
use rmcp::service::{NotificationContext, RunningService};
use rmcp::RoleClient;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use mcphub_core::{CapabilityKind, LogLevel, SupervisorEvent};

/// A connected MCP client session.
pub type McpClient = RunningService<RoleClient, HubClientHandler>;

/// Client handler wired to the supervisor event channel.
#[derive(Clone)]
pub struct HubClientHandler {
    info: ClientInfo,
    server: String,
    event_tx: broadcast::Sender<SupervisorEvent>,
}

impl std::fmt::Debug for HubClientHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClientHandler")
            .field("server", &self.server)
            .finish()
    }
}

impl HubClientHandler {
    pub fn new(server: &str, event_tx: broadcast::Sender<SupervisorEvent>) -> Self {
        Self {
            info: ClientInfo {
                protocol_version: Default::default(),
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: format!("mcp-hub-{}", server),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: Some("MCP Hub".to_string()),
                    icons: None,
                    website_url: None,
                    ..Default::default()
                },
                meta: None,
            },
            server: server.to_string(),
            event_tx,
        }
    }

    /// MCP logging levels collapse onto the bus's four.
    fn convert_logging_level(level: &LoggingLevel) -> LogLevel {
        match level {
            LoggingLevel::Debug => LogLevel::Debug,
            LoggingLevel::Info | LoggingLevel::Notice => LogLevel::Info,
            LoggingLevel::Warning => LogLevel::Warn,
            LoggingLevel::Error
            | LoggingLevel::Critical
            | LoggingLevel::Alert
            | LoggingLevel::Emergency => LogLevel::Error,
        }
    }

    fn emit_capability_change(&self, kind: CapabilityKind) {
        debug!(
            server = %self.server,
            kind = kind.as_str(),
            "Backend server sent list_changed notification"
        );
        if self
            .event_tx
            .send(SupervisorEvent::CapabilitiesChanged {
                server: self.server.clone(),
                kind,
            })
            .is_err()
        {
            warn!(
                server = %self.server,
                kind = kind.as_str(),
                "No listener for capability change notification"
            );
        }
    }
}

impl rmcp::ClientHandler for HubClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }

    fn on_tool_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let handler = self.clone();
        async move { handler.emit_capability_change(CapabilityKind::Tools) }
    }

    fn on_resource_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let handler = self.clone();
        async move {
            // Templates share the resources notification in MCP.
            handler.emit_capability_change(CapabilityKind::Resources);
            handler.emit_capability_change(CapabilityKind::ResourceTemplates);
        }
    }

    fn on_prompt_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let handler = self.clone();
        async move { handler.emit_capability_change(CapabilityKind::Prompts) }
    }

    fn on_logging_message(
        &self,
        params: rmcp::model::LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let server = self.server.clone();
        let event_tx = self.event_tx.clone();
        async move {
            let message = match &params.data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let level = Self::convert_logging_level(&params.level);

            debug!(server = %server, level = ?params.level, "Server log: {}", message);

            let _ = event_tx.send(SupervisorEvent::Log {
                server,
                level,
                message,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::ClientHandler;

    #[test]
    fn handler_identifies_the_hub() {
        let (tx, _rx) = broadcast::channel(8);
        let handler = HubClientHandler::new("github", tx);
        let info = handler.get_info();
        assert!(info.client_info.name.contains("mcp-hub"));
        assert!(info.client_info.name.contains("github"));
    }

    #[tokio::test]
    async fn capability_change_reaches_the_channel() {
        let (tx, mut rx) = broadcast::channel(8);
        let handler = HubClientHandler::new("s", tx);
        handler.emit_capability_change(CapabilityKind::Tools);

        match rx.recv().await.unwrap() {
            SupervisorEvent::CapabilitiesChanged { server, kind } => {
                assert_eq!(server, "s");
                assert_eq!(kind, CapabilityKind::Tools);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn logging_levels_collapse() {
        assert_eq!(
            HubClientHandler::convert_logging_level(&LoggingLevel::Critical),
            LogLevel::Error
        );
        assert_eq!(
            HubClientHandler::convert_logging_level(&LoggingLevel::Notice),
            LogLevel::Info
        );
    }
}
