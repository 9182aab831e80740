//! Path-to-chain resolution.
//!
//! The registry is built once at startup from `[[handler]]` and `[[filter]]`
//! entries and is read-only afterwards, so workers share it without locks.
//!
//! Patterns are either exact (`/hello`) or prefixes ending in `*`
//! (`/static/*`, or `*` for everything). An exact match wins over any
//! prefix; among prefixes the longest wins.

use std::fmt;
use std::sync::Arc;

use super::{Filter, Handler};
use crate::components::ComponentRegistry;
use crate::config::ContainerConfig;
use crate::server::Error;

/// An ordered handler chain and the pattern it is bound to.
#[derive(Clone)]
pub struct HandlerDescription {
    pub pattern: String,
    /// Component names, parallel to `handlers`.
    pub names: Vec<String>,
    pub handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerDescription {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            names: Vec::new(),
            handlers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.names.push(name.into());
        self.handlers.push(handler);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescription")
            .field("pattern", &self.pattern)
            .field("handlers", &self.names)
            .finish()
    }
}

/// A global filter and the pattern it applies to.
#[derive(Clone)]
pub struct FilterEntry {
    pub name: String,
    pub pattern: String,
    pub filter: Arc<dyn Filter>,
}

impl fmt::Debug for FilterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterEntry")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .finish()
    }
}

fn matches(pattern: &str, script: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => script.starts_with(prefix),
        None => pattern == script,
    }
}

/// Immutable mapping from script path to handler chain, plus global filters.
#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<HandlerDescription>,
    filters: Vec<FilterEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every `[[handler]]` and `[[filter]]` entry against `components`.
    ///
    /// # Errors
    ///
    /// Fails when a named component is missing or is not a handler/filter.
    pub fn from_config(config: &ContainerConfig, components: &ComponentRegistry) -> Result<Self, Error> {
        let mut registry = Self::new();
        for entry in &config.handlers {
            let mut desc = HandlerDescription::new(&entry.path);
            for name in &entry.handlers {
                desc = desc.with_handler(name, components.handler(name)?);
            }
            registry.add_handler(desc);
        }
        for entry in &config.filters {
            let filter = components.filter(&entry.component)?;
            registry.add_filter(&entry.component, &entry.path, filter);
        }
        tracing::debug!(
            handlers = registry.handlers.len(),
            filters = registry.filters.len(),
            "Built handler registry"
        );
        Ok(registry)
    }

    /// Add a chain. A later chain with the same pattern replaces the earlier one.
    pub fn add_handler(&mut self, desc: HandlerDescription) -> &mut Self {
        self.handlers.retain(|d| d.pattern != desc.pattern);
        self.handlers.push(desc);
        self
    }

    pub fn add_filter(
        &mut self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        filter: Arc<dyn Filter>,
    ) -> &mut Self {
        self.filters.push(FilterEntry {
            name: name.into(),
            pattern: pattern.into(),
            filter,
        });
        self
    }

    /// Chain for `script`, if any.
    #[must_use]
    pub fn find_handler(&self, script: &str) -> Option<&HandlerDescription> {
        if let Some(exact) = self.handlers.iter().find(|d| d.pattern == script) {
            return Some(exact);
        }
        self.handlers
            .iter()
            .filter(|d| d.pattern.ends_with('*') && matches(&d.pattern, script))
            .max_by_key(|d| d.pattern.len())
    }

    /// Filters that apply to `script`, in registration order.
    pub fn filters_for<'a>(&'a self, script: &'a str) -> impl Iterator<Item = &'a FilterEntry> + 'a {
        self.filters
            .iter()
            .filter(move |f| matches(&f.pattern, script))
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{EchoHandler, PingHandler};
    use crate::handler::{FilterAction, FnFilter};

    fn desc(pattern: &str) -> HandlerDescription {
        HandlerDescription::new(pattern).with_handler("ping", Arc::new(PingHandler))
    }

    #[test]
    fn test_exact_beats_prefix() {
        let mut registry = HandlerRegistry::new();
        registry.add_handler(desc("/api/*"));
        registry.add_handler(desc("/api/users"));
        assert_eq!(registry.find_handler("/api/users").unwrap().pattern, "/api/users");
        assert_eq!(registry.find_handler("/api/other").unwrap().pattern, "/api/*");
        assert!(registry.find_handler("/other").is_none());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut registry = HandlerRegistry::new();
        registry.add_handler(desc("*"));
        registry.add_handler(desc("/static/*"));
        registry.add_handler(desc("/static/img/*"));
        assert_eq!(
            registry.find_handler("/static/img/a.png").unwrap().pattern,
            "/static/img/*"
        );
        assert_eq!(registry.find_handler("/static/a.css").unwrap().pattern, "/static/*");
        assert_eq!(registry.find_handler("/x").unwrap().pattern, "*");
    }

    #[test]
    fn test_same_pattern_replaces() {
        let mut registry = HandlerRegistry::new();
        registry.add_handler(desc("/a"));
        registry.add_handler(
            HandlerDescription::new("/a")
                .with_handler("echo", Arc::new(EchoHandler))
                .with_handler("ping", Arc::new(PingHandler)),
        );
        assert_eq!(registry.handler_count(), 1);
        assert_eq!(registry.find_handler("/a").unwrap().names, vec!["echo", "ping"]);
    }

    #[test]
    fn test_filters_in_order() {
        let pass = || Arc::new(FnFilter::new(|_: &mut crate::request::Request| Ok(FilterAction::Continue)));
        let mut registry = HandlerRegistry::new();
        registry.add_filter("first", "*", pass());
        registry.add_filter("admin", "/admin/*", pass());
        registry.add_filter("last", "*", pass());

        let names: Vec<_> = registry.filters_for("/admin/x").map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["first", "admin", "last"]);
        let names: Vec<_> = registry.filters_for("/public").map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["first", "last"]);
    }

    #[test]
    fn test_from_config() {
        let config = ContainerConfig::from_toml(
            r#"
[[endpoint]]
port = 9000

[[handler]]
path = "/hello"
handlers = ["echo", "ping"]
"#,
        )
        .unwrap();
        let registry = HandlerRegistry::from_config(&config, &ComponentRegistry::with_builtins()).unwrap();
        let chain = registry.find_handler("/hello").unwrap();
        assert_eq!(chain.handlers.len(), 2);
        assert_eq!(registry.filter_count(), 0);
    }

    #[test]
    fn test_from_config_rejects_bad_components() {
        let missing = ContainerConfig::from_toml(
            r#"
[[handler]]
path = "/x"
handlers = ["nope"]
"#,
        )
        .unwrap();
        let err = HandlerRegistry::from_config(&missing, &ComponentRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, Error::MissingComponent { .. }));

        let wrong = ContainerConfig::from_toml(
            r#"
[[filter]]
component = "ping"
"#,
        )
        .unwrap();
        let err = HandlerRegistry::from_config(&wrong, &ComponentRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, Error::Capability { expected: "Filter", .. }));
    }
}
