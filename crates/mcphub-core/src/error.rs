//! Hub error taxonomy
//!
//! Every failure that crosses a component boundary is a `HubError` with a
//! stable code string and a structured data payload, so the transport
//! collaborator can map it onto a status without string matching.

use thiserror::Error;

/// Errors surfaced by the hub core and its supervisors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Schema violation in loaded configuration.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    /// Strict resolver failed to find a variable.
    #[error("variable '{name}' not found while resolving '{field}'")]
    VariableNotFound { name: String, field: String },

    /// Strict resolver command failed, timed out, or produced no output.
    #[error("command execution failed for '{command}': {reason}")]
    CmdExecutionFailed { command: String, reason: String },

    /// Remote transport replied 401; authorization URL available.
    #[error("server '{server}' requires authorization")]
    Unauthorized {
        server: String,
        authorization_url: Option<String>,
    },

    /// Any other fault during connect.
    #[error("failed to connect to '{server}': {reason}")]
    ConnectionFailed { server: String, reason: String },

    /// Dispatch before the supervisor ever connected.
    #[error("server '{server}' is not initialized")]
    NotInitialized { server: String },

    /// Dispatch while the supervisor is not in the connected state.
    #[error("server '{server}' is not connected (state: {state})")]
    NotConnected { server: String, state: String },

    #[error("tool '{tool}' not found on server '{server}'")]
    ToolNotFound {
        server: String,
        tool: String,
        available: Vec<String>,
    },

    #[error("resource '{uri}' not found on server '{server}'")]
    ResourceNotFound {
        server: String,
        uri: String,
        available: Vec<String>,
    },

    #[error("prompt '{prompt}' not found on server '{server}'")]
    PromptNotFound {
        server: String,
        prompt: String,
        available: Vec<String>,
    },

    /// Arguments were not null, a mapping, or a sequence.
    #[error("invalid arguments for '{operation}' on server '{server}': {reason}")]
    InvalidArguments {
        server: String,
        operation: String,
        reason: String,
    },

    #[error("tool '{tool}' failed on server '{server}': {reason}")]
    ToolExecutionFailed {
        server: String,
        tool: String,
        reason: String,
    },

    #[error("failed to read resource '{uri}' on server '{server}': {reason}")]
    ResourceReadFailed {
        server: String,
        uri: String,
        reason: String,
    },

    #[error("prompt '{prompt}' failed on server '{server}': {reason}")]
    PromptExecutionFailed {
        server: String,
        prompt: String,
        reason: String,
    },

    /// Hub lookup by unknown server name.
    #[error("server '{server}' not found")]
    ServerNotFound { server: String },
}

impl HubError {
    /// Stable code string for transport-boundary mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "CONFIG_INVALID",
            Self::VariableNotFound { .. } => "VARIABLE_NOT_FOUND",
            Self::CmdExecutionFailed { .. } => "CMD_EXECUTION_FAILED",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::NotInitialized { .. } => "NOT_INITIALIZED",
            Self::NotConnected { .. } => "NOT_CONNECTED",
            Self::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            Self::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            Self::PromptNotFound { .. } => "PROMPT_NOT_FOUND",
            Self::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            Self::ToolExecutionFailed { .. } => "TOOL_EXECUTION_FAILED",
            Self::ResourceReadFailed { .. } => "RESOURCE_READ_FAILED",
            Self::PromptExecutionFailed { .. } => "PROMPT_EXECUTION_FAILED",
            Self::ServerNotFound { .. } => "SERVER_NOT_FOUND",
        }
    }

    /// Structured payload describing the failure (server name, operation,
    /// offending input) for clients that want more than the message.
    pub fn data(&self) -> serde_json::Value {
        match self {
            Self::ConfigInvalid { reason } => serde_json::json!({ "reason": reason }),
            Self::VariableNotFound { name, field } => {
                serde_json::json!({ "variable": name, "field": field })
            }
            Self::CmdExecutionFailed { command, reason } => {
                serde_json::json!({ "command": command, "reason": reason })
            }
            Self::Unauthorized {
                server,
                authorization_url,
            } => serde_json::json!({
                "server": server,
                "authorizationUrl": authorization_url,
            }),
            Self::ConnectionFailed { server, reason } => {
                serde_json::json!({ "server": server, "reason": reason })
            }
            Self::NotInitialized { server } => serde_json::json!({ "server": server }),
            Self::NotConnected { server, state } => {
                serde_json::json!({ "server": server, "state": state })
            }
            Self::ToolNotFound {
                server,
                tool,
                available,
            } => serde_json::json!({
                "server": server,
                "tool": tool,
                "availableTools": available,
            }),
            Self::ResourceNotFound {
                server,
                uri,
                available,
            } => serde_json::json!({
                "server": server,
                "uri": uri,
                "availableResources": available,
            }),
            Self::PromptNotFound {
                server,
                prompt,
                available,
            } => serde_json::json!({
                "server": server,
                "prompt": prompt,
                "availablePrompts": available,
            }),
            Self::InvalidArguments {
                server,
                operation,
                reason,
            } => serde_json::json!({
                "server": server,
                "operation": operation,
                "reason": reason,
            }),
            Self::ToolExecutionFailed {
                server,
                tool,
                reason,
            } => serde_json::json!({ "server": server, "tool": tool, "reason": reason }),
            Self::ResourceReadFailed {
                server,
                uri,
                reason,
            } => serde_json::json!({ "server": server, "uri": uri, "reason": reason }),
            Self::PromptExecutionFailed {
                server,
                prompt,
                reason,
            } => serde_json::json!({ "server": server, "prompt": prompt, "reason": reason }),
            Self::ServerNotFound { server } => serde_json::json!({ "server": server }),
        }
    }
}

/// Result alias used across the hub.
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = HubError::ServerNotFound {
            server: "github".into(),
        };
        assert_eq!(err.code(), "SERVER_NOT_FOUND");
        assert_eq!(err.data()["server"], "github");
    }

    #[test]
    fn tool_not_found_carries_available_names() {
        let err = HubError::ToolNotFound {
            server: "s".into(),
            tool: "missing".into(),
            available: vec!["a".into(), "b".into()],
        };
        let data = err.data();
        assert_eq!(data["availableTools"][0], "a");
        assert_eq!(data["availableTools"][1], "b");
    }

    #[test]
    fn unauthorized_exposes_url() {
        let err = HubError::Unauthorized {
            server: "notes".into(),
            authorization_url: Some("https://auth.example/authorize?x=1".into()),
        };
        assert_eq!(err.code(), "UNAUTHORIZED");
        assert!(err.data()["authorizationUrl"]
            .as_str()
            .unwrap()
            .starts_with("https://auth.example"));
    }
}
