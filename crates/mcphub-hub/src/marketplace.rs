//! Marketplace collaborator
//!
//! The catalog fetcher lives outside the core; the hub only asks it to
//! decorate server names for display.

use std::collections::HashMap;

/// Display-name lookup against the marketplace catalog.
pub trait Marketplace: Send + Sync {
    /// Human-readable name for a server id, when the catalog knows it.
    fn display_name(&self, name: &str) -> Option<String>;
}

/// Fixed in-memory catalog; doubles as the test stand-in.
#[derive(Debug, Default)]
pub struct StaticMarketplace {
    names: HashMap<String, String>,
}

impl StaticMarketplace {
    pub fn new(names: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }
}

impl Marketplace for StaticMarketplace {
    fn display_name(&self, name: &str) -> Option<String> {
        self.names.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_lookup() {
        let catalog = StaticMarketplace::new([(
            "github".to_string(),
            "GitHub MCP Server".to_string(),
        )]);
        assert_eq!(
            catalog.display_name("github").as_deref(),
            Some("GitHub MCP Server")
        );
        assert!(catalog.display_name("unknown").is_none());
    }
}
