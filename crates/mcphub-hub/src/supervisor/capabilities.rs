//! Discovered capability lists
//!
//! Capabilities are kept as the server's own JSON records, identified
//! by `name` (tools, prompts), `uri` (resources), or `uriTemplate`
//! (resource templates). Template placeholders `{seg}` match exactly
//! one path segment when validating client-constructed URIs.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use mcphub_core::CapabilityKind;

lazy_static! {
    static ref TEMPLATE_PLACEHOLDER: Regex = Regex::new(r"\{[^}]+\}").unwrap();
}

/// The four capability lists of one server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Capabilities {
    pub tools: Vec<Value>,
    pub resources: Vec<Value>,
    #[serde(rename = "resourceTemplates")]
    pub resource_templates: Vec<Value>,
    pub prompts: Vec<Value>,
}

fn string_field<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record.get(field).and_then(Value::as_str)
}

fn names_of(records: &[Value], field: &str) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| string_field(r, field).map(str::to_string))
        .collect()
}

impl Capabilities {
    pub fn list(&self, kind: CapabilityKind) -> &[Value] {
        match kind {
            CapabilityKind::Tools => &self.tools,
            CapabilityKind::Resources => &self.resources,
            CapabilityKind::ResourceTemplates => &self.resource_templates,
            CapabilityKind::Prompts => &self.prompts,
        }
    }

    pub fn set(&mut self, kind: CapabilityKind, records: Vec<Value>) {
        match kind {
            CapabilityKind::Tools => self.tools = records,
            CapabilityKind::Resources => self.resources = records,
            CapabilityKind::ResourceTemplates => self.resource_templates = records,
            CapabilityKind::Prompts => self.prompts = records,
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        names_of(&self.tools, "name")
    }

    pub fn resource_uris(&self) -> Vec<String> {
        names_of(&self.resources, "uri")
    }

    pub fn prompt_names(&self) -> Vec<String> {
        names_of(&self.prompts, "name")
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| string_field(t, "name") == Some(name))
    }

    pub fn has_prompt(&self, name: &str) -> bool {
        self.prompts
            .iter()
            .any(|p| string_field(p, "name") == Some(name))
    }

    /// A URI is readable when it appears verbatim in the resource list
    /// or matches one of the advertised templates.
    pub fn matches_resource(&self, uri: &str) -> bool {
        if self
            .resources
            .iter()
            .any(|r| string_field(r, "uri") == Some(uri))
        {
            return true;
        }
        self.resource_templates
            .iter()
            .filter_map(|t| string_field(t, "uriTemplate"))
            .any(|template| template_matches(template, uri))
    }
}

/// Match a URI against a template: each `{name}` placeholder stands
/// for exactly one path segment (`[^/]+`), everything else is literal.
pub fn template_matches(template: &str, uri: &str) -> bool {
    let mut pattern = String::with_capacity(template.len() + 8);
    pattern.push('^');
    let mut cursor = 0usize;
    for placeholder in TEMPLATE_PLACEHOLDER.find_iter(template) {
        pattern.push_str(&regex::escape(&template[cursor..placeholder.start()]));
        pattern.push_str("[^/]+");
        cursor = placeholder.end();
    }
    pattern.push_str(&regex::escape(&template[cursor..]));
    pattern.push('$');

    Regex::new(&pattern)
        .map(|re| re.is_match(uri))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_matches_single_segments() {
        assert!(template_matches("tpl://{a}/{b}", "tpl://x/y"));
        assert!(!template_matches("tpl://{a}/{b}", "tpl://x/y/z"));
        assert!(!template_matches("tpl://{a}/{b}", "tpl://x"));
    }

    #[test]
    fn template_literals_are_escaped() {
        assert!(template_matches("file:///logs/{day}.txt", "file:///logs/2024-01-01.txt"));
        assert!(!template_matches("file:///logs/{day}.txt", "file:///logs/2024-01-01_txt"));
    }

    #[test]
    fn resource_lookup_checks_list_then_templates() {
        let caps = Capabilities {
            resources: vec![json!({ "uri": "mem://static", "name": "static" })],
            resource_templates: vec![json!({ "uriTemplate": "mem://{key}/value" })],
            ..Default::default()
        };
        assert!(caps.matches_resource("mem://static"));
        assert!(caps.matches_resource("mem://abc/value"));
        assert!(!caps.matches_resource("mem://abc/other"));
        assert!(!caps.matches_resource("mem://a/b/value"));
    }

    #[test]
    fn name_lookups() {
        let caps = Capabilities {
            tools: vec![json!({ "name": "search" }), json!({ "name": "fetch" })],
            prompts: vec![json!({ "name": "summarize" })],
            ..Default::default()
        };
        assert!(caps.has_tool("search"));
        assert!(!caps.has_tool("nope"));
        assert!(caps.has_prompt("summarize"));
        assert_eq!(caps.tool_names(), vec!["search", "fetch"]);
    }
}
