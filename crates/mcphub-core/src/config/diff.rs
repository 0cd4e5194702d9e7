//! Semantic configuration diffing
//!
//! A server counts as modified only when one of a fixed set of
//! significant fields changes; everything else is cosmetic and must not
//! trigger reconnects.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{HubConfig, ServerConfig};

/// Fields whose change forces a restart/reconnect of the server.
pub const SIGNIFICANT_FIELDS: &[&str] = &[
    "command", "args", "env", "disabled", "url", "headers", "dev", "name",
];

/// Per-server change detail: which fields moved and their values.
#[derive(Debug, Clone, Serialize, Default)]
pub struct DiffDetail {
    #[serde(rename = "modifiedFields")]
    pub modified_fields: Vec<String>,
    #[serde(rename = "oldValues")]
    pub old_values: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "newValues")]
    pub new_values: BTreeMap<String, serde_json::Value>,
}

/// Result of diffing two configurations.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ConfigDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
    pub details: BTreeMap<String, DiffDetail>,
}

impl ConfigDiff {
    /// Compute the diff from `old` to `new`.
    pub fn between(old: &HubConfig, new: &HubConfig) -> Self {
        let mut diff = ConfigDiff::default();

        for (name, new_server) in &new.servers {
            match old.servers.get(name) {
                None => diff.added.push(name.clone()),
                Some(old_server) => {
                    let detail = compare_servers(old_server, new_server);
                    if detail.modified_fields.is_empty() {
                        diff.unchanged.push(name.clone());
                    } else {
                        diff.modified.push(name.clone());
                        diff.details.insert(name.clone(), detail);
                    }
                }
            }
        }

        for name in old.servers.keys() {
            if !new.servers.contains_key(name) {
                diff.removed.push(name.clone());
            }
        }

        diff
    }

    /// Whether applying this diff would touch any running server.
    pub fn is_significant(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty())
    }

    /// True when the only significant change for `name` is the
    /// `disabled` flag (start/stop instead of full reconnect).
    pub fn only_disabled_changed(&self, name: &str) -> bool {
        self.details
            .get(name)
            .map(|d| d.modified_fields.as_slice() == ["disabled"])
            .unwrap_or(false)
    }
}

fn field_value(server: &ServerConfig, field: &str) -> serde_json::Value {
    match field {
        "command" => serde_json::json!(server.command),
        "args" => serde_json::json!(server.args),
        "env" => serde_json::json!(server.env),
        "disabled" => serde_json::json!(server.disabled),
        "url" => serde_json::json!(server.url),
        "headers" => serde_json::json!(server.headers),
        "dev" => serde_json::json!(server.dev),
        "name" => serde_json::json!(server.name),
        _ => serde_json::Value::Null,
    }
}

/// Deep-compare the significant fields of two server entries.
fn compare_servers(old: &ServerConfig, new: &ServerConfig) -> DiffDetail {
    let mut detail = DiffDetail::default();
    for field in SIGNIFICANT_FIELDS {
        let old_value = field_value(old, field);
        let new_value = field_value(new, field);
        if old_value != new_value {
            detail.modified_fields.push((*field).to_string());
            detail.old_values.insert((*field).to_string(), old_value);
            detail.new_values.insert((*field).to_string(), new_value);
        }
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> HubConfig {
        HubConfig::from_str(json).unwrap()
    }

    #[test]
    fn added_removed_modified() {
        // a removed, b enabled, c added - the hot-reload scenario
        let old = config(
            r#"{ "mcpServers": {
                "a": { "command": "srv-a" },
                "b": { "command": "srv-b", "disabled": true }
            } }"#,
        );
        let new = config(
            r#"{ "mcpServers": {
                "b": { "command": "srv-b", "disabled": false },
                "c": { "command": "srv-c" }
            } }"#,
        );

        let diff = ConfigDiff::between(&old, &new);
        assert_eq!(diff.removed, vec!["a"]);
        assert_eq!(diff.modified, vec!["b"]);
        assert_eq!(diff.added, vec!["c"]);
        assert!(diff.is_significant());
        assert!(diff.only_disabled_changed("b"));
    }

    #[test]
    fn insignificant_change_yields_empty_modified() {
        let old = config(
            r#"{ "mcpServers": { "s": { "command": "x", "description": "one" } } }"#,
        );
        let new = config(
            r#"{ "mcpServers": { "s": { "command": "x", "description": "two" } } }"#,
        );

        let diff = ConfigDiff::between(&old, &new);
        assert!(diff.modified.is_empty());
        assert_eq!(diff.unchanged, vec!["s"]);
        assert!(!diff.is_significant());
    }

    #[test]
    fn deep_equality_on_structured_fields() {
        let old = config(
            r#"{ "mcpServers": { "s": {
                "command": "x",
                "env": { "A": "1", "B": "2" }
            } } }"#,
        );
        let same = config(
            r#"{ "mcpServers": { "s": {
                "command": "x",
                "env": { "B": "2", "A": "1" }
            } } }"#,
        );
        let diff = ConfigDiff::between(&old, &same);
        assert!(!diff.is_significant());

        let changed = config(
            r#"{ "mcpServers": { "s": {
                "command": "x",
                "env": { "A": "1", "B": "3" }
            } } }"#,
        );
        let diff = ConfigDiff::between(&old, &changed);
        assert_eq!(diff.modified, vec!["s"]);
        let detail = &diff.details["s"];
        assert_eq!(detail.modified_fields, vec!["env"]);
        assert_eq!(detail.old_values["env"]["B"], "2");
        assert_eq!(detail.new_values["env"]["B"], "3");
    }

    #[test]
    fn args_order_is_significant() {
        let old = config(r#"{ "mcpServers": { "s": { "command": "x", "args": ["-a", "-b"] } } }"#);
        let new = config(r#"{ "mcpServers": { "s": { "command": "x", "args": ["-b", "-a"] } } }"#);
        let diff = ConfigDiff::between(&old, &new);
        assert_eq!(diff.modified, vec!["s"]);
    }

    #[test]
    fn dev_change_is_significant() {
        let old = config(r#"{ "mcpServers": { "s": { "command": "x" } } }"#);
        let new = config(
            r#"{ "mcpServers": { "s": {
                "command": "x",
                "dev": { "watch": ["src/**/*.js"], "cwd": "/srv" }
            } } }"#,
        );
        let diff = ConfigDiff::between(&old, &new);
        assert_eq!(diff.modified, vec!["s"]);
        assert!(!diff.only_disabled_changed("s"));
    }
}
