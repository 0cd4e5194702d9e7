//! Declarative server configuration
//!
//! The hub is driven by a JSON document with a top-level `mcpServers`
//! mapping. Transport fields live at the top level of each entry
//! (command/args/env for stdio, url/headers for remote), the format
//! editors and agents already write.

mod diff;
mod store;

pub use diff::{ConfigDiff, DiffDetail, SIGNIFICANT_FIELDS};
pub use store::{ConfigChange, ConfigSource, ConfigStore, WatchHandle};

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{HubError, HubResult};

/// Transport kind, derived from the entry shape during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Stdio,
    Remote,
}

impl ServerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Remote => "remote",
        }
    }
}

/// Dev-mode settings, stdio servers only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Glob patterns relative to `cwd`; `**` matches arbitrary depth.
    #[serde(default)]
    pub watch: Vec<String>,
    /// Absolute path the patterns are resolved against.
    pub cwd: PathBuf,
}

fn default_true() -> bool {
    true
}

/// A single managed server.
///
/// `env` values may be `null`, which means "inherit the like-named
/// process environment variable" during resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    /// Identity key, copied from the `mcpServers` map key.
    #[serde(skip)]
    pub name: String,

    // --- Stdio transport ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, Option<String>>,

    // --- Remote transport ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<DevConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ServerConfig {
    /// Derive the transport kind. Only valid after `validate()`.
    pub fn kind(&self) -> ServerKind {
        if self.url.is_some() {
            ServerKind::Remote
        } else {
            ServerKind::Stdio
        }
    }

    /// Shape validation: exactly one of command/url, dev only for stdio,
    /// absolute dev cwd.
    pub fn validate(&self) -> HubResult<()> {
        match (&self.command, &self.url) {
            (Some(_), Some(_)) => {
                return Err(HubError::ConfigInvalid {
                    reason: format!(
                        "server '{}' sets both 'command' and 'url'; exactly one is required",
                        self.name
                    ),
                });
            }
            (None, None) => {
                return Err(HubError::ConfigInvalid {
                    reason: format!(
                        "server '{}' sets neither 'command' nor 'url'; exactly one is required",
                        self.name
                    ),
                });
            }
            _ => {}
        }

        if let Some(url) = &self.url {
            if url.trim().is_empty() {
                return Err(HubError::ConfigInvalid {
                    reason: format!("server '{}' has an empty 'url'", self.name),
                });
            }
            if !self.args.is_empty() || !self.env.is_empty() {
                return Err(HubError::ConfigInvalid {
                    reason: format!(
                        "server '{}' is remote but sets stdio fields (args/env)",
                        self.name
                    ),
                });
            }
        }

        if let Some(command) = &self.command {
            if command.trim().is_empty() {
                return Err(HubError::ConfigInvalid {
                    reason: format!("server '{}' has an empty 'command'", self.name),
                });
            }
            if !self.headers.is_empty() {
                return Err(HubError::ConfigInvalid {
                    reason: format!(
                        "server '{}' is stdio but sets remote 'headers'",
                        self.name
                    ),
                });
            }
        }

        if let Some(dev) = &self.dev {
            if self.kind() != ServerKind::Stdio {
                return Err(HubError::ConfigInvalid {
                    reason: format!(
                        "server '{}' sets 'dev' but dev mode is stdio-only",
                        self.name
                    ),
                });
            }
            if !dev.cwd.is_absolute() {
                return Err(HubError::ConfigInvalid {
                    reason: format!(
                        "server '{}': dev.cwd must be an absolute path (got '{}')",
                        self.name,
                        dev.cwd.display()
                    ),
                });
            }
        }

        Ok(())
    }

    /// Whether dev-mode watching applies to this server.
    pub fn dev_watch_enabled(&self) -> bool {
        self.kind() == ServerKind::Stdio
            && self
                .dev
                .as_ref()
                .map(|d| d.enabled && !d.watch.is_empty())
                .unwrap_or(false)
    }
}

/// The whole hub configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl HubConfig {
    /// Parse and validate a configuration document.
    pub fn from_value(value: serde_json::Value) -> HubResult<Self> {
        let root = value.as_object().ok_or_else(|| HubError::ConfigInvalid {
            reason: "configuration root must be an object".into(),
        })?;
        if !root.contains_key("mcpServers") {
            return Err(HubError::ConfigInvalid {
                reason: "missing required 'mcpServers' mapping".into(),
            });
        }
        if !root["mcpServers"].is_object() {
            return Err(HubError::ConfigInvalid {
                reason: "'mcpServers' must be a mapping of name to server config".into(),
            });
        }

        let mut config: HubConfig =
            serde_json::from_value(value).map_err(|e| HubError::ConfigInvalid {
                reason: e.to_string(),
            })?;
        for (name, server) in config.servers.iter_mut() {
            server.name = name.clone();
            server.validate()?;
        }
        Ok(config)
    }

    /// Parse from JSON text.
    pub fn from_str(text: &str) -> HubResult<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| HubError::ConfigInvalid {
                reason: format!("configuration is not valid JSON: {}", e),
            })?;
        Self::from_value(value)
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> HubResult<HubConfig> {
        HubConfig::from_str(json)
    }

    #[test]
    fn parses_stdio_and_remote_entries() {
        let config = parse(
            r#"{
                "mcpServers": {
                    "local-search": {
                        "command": "${BIN}/mcp-search",
                        "args": ["--token", "${TOK}"],
                        "env": { "BIN": "/usr/local/bin", "API_KEY": null }
                    },
                    "remote-notes": {
                        "url": "https://notes.example/mcp",
                        "headers": { "Authorization": "Bearer x" }
                    }
                }
            }"#,
        )
        .unwrap();

        let local = config.get("local-search").unwrap();
        assert_eq!(local.kind(), ServerKind::Stdio);
        assert_eq!(local.name, "local-search");
        assert_eq!(local.env.get("API_KEY"), Some(&None));

        let remote = config.get("remote-notes").unwrap();
        assert_eq!(remote.kind(), ServerKind::Remote);
        assert_eq!(
            remote.headers.get("Authorization").map(String::as_str),
            Some("Bearer x")
        );
    }

    #[test]
    fn rejects_both_command_and_url() {
        let err = parse(
            r#"{ "mcpServers": { "bad": { "command": "x", "url": "https://e/" } } }"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn rejects_neither_command_nor_url() {
        let err = parse(r#"{ "mcpServers": { "bad": {} } }"#).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
        assert!(err.to_string().contains("neither"));
    }

    #[test]
    fn rejects_missing_mcp_servers() {
        let err = parse(r#"{ "servers": {} }"#).unwrap_err();
        assert!(err.to_string().contains("mcpServers"));
    }

    #[test]
    fn rejects_dev_on_remote() {
        let err = parse(
            r#"{ "mcpServers": { "r": {
                "url": "https://e/mcp",
                "dev": { "watch": ["**/*.js"], "cwd": "/tmp" }
            } } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("stdio-only"));
    }

    #[test]
    fn rejects_relative_dev_cwd() {
        let err = parse(
            r#"{ "mcpServers": { "s": {
                "command": "node",
                "dev": { "watch": ["**/*.js"], "cwd": "src" }
            } } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn dev_enabled_defaults_to_true() {
        let config = parse(
            r#"{ "mcpServers": { "s": {
                "command": "node",
                "dev": { "watch": ["**/*.js"], "cwd": "/srv/app" }
            } } }"#,
        )
        .unwrap();
        assert!(config.get("s").unwrap().dev_watch_enabled());
    }

    #[test]
    fn disabled_defaults_to_false() {
        let config =
            parse(r#"{ "mcpServers": { "s": { "command": "node" } } }"#).unwrap();
        assert!(!config.get("s").unwrap().disabled);
    }
}
