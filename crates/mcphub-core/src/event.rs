//! Hub events
//!
//! All state changes visible to subscribed clients flow through these
//! types. Supervisors publish [`SupervisorEvent`]s on an internal
//! broadcast channel; the hub core translates them into [`HubEvent`]s
//! on the subscription bus.
//!
//! Events serialize with a `type` field containing the snake_case
//! variant name.

use serde::{Deserialize, Serialize};

use crate::config::ConfigDiff;
use crate::state::{ConnectionState, HubState};

/// Capability kinds a server advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CapabilityKind {
    Tools,
    Resources,
    ResourceTemplates,
    Prompts,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 4] = [
        CapabilityKind::Tools,
        CapabilityKind::Resources,
        CapabilityKind::ResourceTemplates,
        CapabilityKind::Prompts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Resources => "resources",
            Self::ResourceTemplates => "resourceTemplates",
            Self::Prompts => "prompts",
        }
    }
}

/// Log severity carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A structured log record for subscribed clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Subtypes of `SUBSCRIPTION_EVENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEventType {
    ConfigChanged,
    ServersUpdating,
    ServersUpdated,
    ToolListChanged,
    ResourceListChanged,
    PromptListChanged,
}

/// Events emitted by one supervisor, consumed by the hub core.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// The supervisor moved to a new connection state.
    StateChanged {
        server: String,
        state: ConnectionState,
        error: Option<String>,
    },
    /// A capability list was re-discovered after a change notification.
    CapabilitiesChanged {
        server: String,
        kind: CapabilityKind,
    },
    /// A log line worth surfacing to clients (backend stderr, MCP
    /// logging notifications).
    Log {
        server: String,
        level: LogLevel,
        message: String,
    },
}

/// Events delivered to subscribed clients, in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// The hub's process-wide state changed.
    HubState { state: HubState },

    /// A subscription event with its subtype and payload.
    Subscription {
        subtype: SubscriptionEventType,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },

    /// A structured log record.
    Log { record: LogRecord },
}

impl HubEvent {
    pub fn hub_state(state: HubState) -> Self {
        Self::HubState { state }
    }

    pub fn subscription(subtype: SubscriptionEventType, payload: Option<serde_json::Value>) -> Self {
        Self::Subscription { subtype, payload }
    }

    pub fn log(record: LogRecord) -> Self {
        Self::Log { record }
    }

    /// Subscription event for an applied config diff.
    pub fn config_changed(diff: &ConfigDiff) -> Self {
        Self::Subscription {
            subtype: SubscriptionEventType::ConfigChanged,
            payload: serde_json::to_value(diff).ok(),
        }
    }

    /// The capability-change subtype for a kind, when clients care.
    pub fn capability_subtype(kind: CapabilityKind) -> Option<SubscriptionEventType> {
        match kind {
            CapabilityKind::Tools => Some(SubscriptionEventType::ToolListChanged),
            CapabilityKind::Resources | CapabilityKind::ResourceTemplates => {
                Some(SubscriptionEventType::ResourceListChanged)
            }
            CapabilityKind::Prompts => Some(SubscriptionEventType::PromptListChanged),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::HubState { .. } => "hub_state",
            Self::Subscription { .. } => "subscription_event",
            Self::Log { .. } => "log",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = HubEvent::hub_state(HubState::Ready);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "hub_state");
        assert_eq!(json["state"], "ready");
    }

    #[test]
    fn subscription_event_carries_subtype() {
        let event = HubEvent::subscription(
            SubscriptionEventType::ToolListChanged,
            Some(serde_json::json!({ "server": "s" })),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["subtype"], "tool_list_changed");
        assert_eq!(json["payload"]["server"], "s");
    }

    #[test]
    fn resource_templates_map_to_resource_list_changed() {
        assert_eq!(
            HubEvent::capability_subtype(CapabilityKind::ResourceTemplates),
            Some(SubscriptionEventType::ResourceListChanged)
        );
    }
}
