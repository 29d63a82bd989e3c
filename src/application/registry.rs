use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::entities::check::CheckConfig;
use crate::domain::ports::broker::ExchangeSpec;
use crate::domain::ports::extension::Extension;

/// Transport type of a configured handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Pipe,
    Tcp,
    Udp,
    Amqp,
    Set,
}

/// Socket target for `tcp`/`udp` handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketSpec {
    pub host: String,
    pub port: u16,
    /// Connect and idle timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// A configured handler definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerDef {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: HandlerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<SocketSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<ExchangeSpec>,
    /// Members of a `set` handler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handlers: Option<Vec<String>>,
    #[serde(default)]
    pub handle_flapping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutator: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HandlerDef {
    /// Filters listed on this handler: `filters`, or the single `filter`.
    #[must_use]
    pub fn filter_names(&self) -> Vec<String> {
        if let Some(filters) = &self.filters {
            filters.clone()
        } else if let Some(filter) = &self.filter {
            vec![filter.clone()]
        } else {
            vec![]
        }
    }
}

/// A configured event filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub negate: bool,
    #[serde(default)]
    pub attributes: Value,
}

/// A configured mutator command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutatorDef {
    #[serde(default)]
    pub name: String,
    pub command: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    checks: BTreeMap<String, CheckConfig>,
    #[serde(default)]
    handlers: BTreeMap<String, HandlerDef>,
    #[serde(default)]
    filters: BTreeMap<String, FilterDef>,
    #[serde(default)]
    mutators: BTreeMap<String, MutatorDef>,
}

/// Read-only view over the configured checks, handlers, filters and
/// mutators, plus any in-process extensions registered at startup.
#[derive(Default)]
pub struct Registry {
    checks: BTreeMap<String, CheckConfig>,
    handlers: BTreeMap<String, HandlerDef>,
    filters: BTreeMap<String, FilterDef>,
    mutators: BTreeMap<String, MutatorDef>,
    handler_extensions: BTreeMap<String, Arc<dyn Extension>>,
    mutator_extensions: BTreeMap<String, Arc<dyn Extension>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the registry from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read registry file")?;
        Self::from_toml_str(&content)
    }

    /// Parse the registry from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(content).context("Failed to parse registry")?;
        let mut registry = Self::new();
        for (name, mut check) in file.checks {
            check.name = name.clone();
            registry.checks.insert(name, check);
        }
        for (name, mut handler) in file.handlers {
            handler.name = name.clone();
            registry.handlers.insert(name, handler);
        }
        for (name, mut filter) in file.filters {
            filter.name = name.clone();
            registry.filters.insert(name, filter);
        }
        for (name, mut mutator) in file.mutators {
            mutator.name = name.clone();
            registry.mutators.insert(name, mutator);
        }
        Ok(registry)
    }

    // --- Mutation (startup wiring and tests) ---

    pub fn add_check(&mut self, check: CheckConfig) {
        self.checks.insert(check.name.clone(), check);
    }

    pub fn add_handler(&mut self, handler: HandlerDef) {
        self.handlers.insert(handler.name.clone(), handler);
    }

    pub fn add_filter(&mut self, filter: FilterDef) {
        self.filters.insert(filter.name.clone(), filter);
    }

    pub fn add_mutator(&mut self, mutator: MutatorDef) {
        self.mutators.insert(mutator.name.clone(), mutator);
    }

    pub fn register_handler_extension(&mut self, extension: Arc<dyn Extension>) {
        self.handler_extensions
            .insert(extension.name().to_string(), extension);
    }

    pub fn register_mutator_extension(&mut self, extension: Arc<dyn Extension>) {
        self.mutator_extensions
            .insert(extension.name().to_string(), extension);
    }

    // --- Lookups ---

    #[must_use]
    pub fn check(&self, name: &str) -> Option<&CheckConfig> {
        self.checks.get(name)
    }

    pub fn checks(&self) -> impl Iterator<Item = &CheckConfig> {
        self.checks.values()
    }

    #[must_use]
    pub fn check_count(&self) -> usize {
        self.checks.len()
    }

    #[must_use]
    pub fn handler(&self, name: &str) -> Option<&HandlerDef> {
        self.handlers.get(name)
    }

    #[must_use]
    pub fn handler_extension(&self, name: &str) -> Option<&Arc<dyn Extension>> {
        self.handler_extensions.get(name)
    }

    #[must_use]
    pub fn handler_exists(&self, name: &str) -> bool {
        self.handlers.contains_key(name) || self.handler_extensions.contains_key(name)
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len() + self.handler_extensions.len()
    }

    #[must_use]
    pub fn filter(&self, name: &str) -> Option<&FilterDef> {
        self.filters.get(name)
    }

    #[must_use]
    pub fn filter_exists(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    #[must_use]
    pub fn mutator(&self, name: &str) -> Option<&MutatorDef> {
        self.mutators.get(name)
    }

    #[must_use]
    pub fn mutator_extension(&self, name: &str) -> Option<&Arc<dyn Extension>> {
        self.mutator_extensions.get(name)
    }

    #[must_use]
    pub fn mutator_exists(&self, name: &str) -> bool {
        self.mutators.contains_key(name) || self.mutator_extensions.contains_key(name)
    }

    /// Flat snapshot of the registry passed to extensions.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        json!({
            "checks": self.checks,
            "handlers": self.handlers,
            "filters": self.filters,
            "mutators": self.mutators,
        })
    }
}
