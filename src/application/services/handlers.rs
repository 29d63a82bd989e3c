use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Local;
use serde_json::Value;
use tracing::{debug, error};

use super::filters::FilterEvaluator;
use crate::application::registry::{HandlerDef, HandlerKind, Registry};
use crate::domain::entities::event::{Event, EventAction};
use crate::domain::ports::extension::Extension;
use crate::domain::value_objects::severity::Severity;
use crate::domain::value_objects::subdue::SubdueAt;

/// A handler selected for dispatch: either a configured definition or an
/// in-process extension.
#[derive(Clone)]
pub enum ResolvedHandler {
    Config(HandlerDef),
    Extension {
        name: String,
        extension: Arc<dyn Extension>,
    },
}

impl ResolvedHandler {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Config(def) => &def.name,
            Self::Extension { name, .. } => name,
        }
    }

    #[must_use]
    pub fn handles_flapping(&self) -> bool {
        match self {
            Self::Config(def) => def.handle_flapping,
            Self::Extension { extension, .. } => {
                extension.definition()["handle_flapping"] == Value::Bool(true)
            }
        }
    }

    #[must_use]
    pub fn severities(&self) -> Option<Vec<String>> {
        match self {
            Self::Config(def) => def.severities.clone(),
            Self::Extension { extension, .. } => {
                extension.definition().get("severities").map(|list| {
                    list.as_array()
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(|item| item.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default()
                })
            }
        }
    }

    #[must_use]
    pub fn filter_names(&self) -> Vec<String> {
        match self {
            Self::Config(def) => def.filter_names(),
            Self::Extension { extension, .. } => extension
                .definition()
                .get("filters")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn mutator(&self) -> Option<String> {
        match self {
            Self::Config(def) => def.mutator.clone(),
            Self::Extension { extension, .. } => extension
                .definition()
                .get("mutator")
                .and_then(Value::as_str)
                .map(String::from),
        }
    }
}

/// Expands handler names into dispatchable handlers and applies the
/// severity/flapping/subdue/filter gates.
#[derive(Clone)]
pub struct HandlerResolver {
    registry: Arc<Registry>,
    filters: FilterEvaluator,
}

impl HandlerResolver {
    #[must_use]
    pub fn new(registry: Arc<Registry>, filters: FilterEvaluator) -> Self {
        Self { registry, filters }
    }

    /// Expand handler names, inlining `set` handlers one level deep.
    /// Nested sets and unknown names are logged and skipped; duplicates
    /// are removed.
    #[must_use]
    pub fn derive(&self, names: &[String]) -> Vec<ResolvedHandler> {
        let mut resolved = Vec::new();
        for name in names {
            if let Some(def) = self.registry.handler(name) {
                if def.kind == HandlerKind::Set {
                    for member in def.handlers.clone().unwrap_or_default() {
                        match self.registry.handler(&member) {
                            Some(inner) if inner.kind == HandlerKind::Set => {
                                error!(
                                    handler = member.as_str(),
                                    set = name.as_str(),
                                    "nested handler sets are not allowed"
                                );
                            }
                            Some(inner) => resolved.push(ResolvedHandler::Config(inner.clone())),
                            None => self.push_extension_or_warn(&member, &mut resolved),
                        }
                    }
                } else {
                    resolved.push(ResolvedHandler::Config(def.clone()));
                }
            } else {
                self.push_extension_or_warn(name, &mut resolved);
            }
        }

        let mut seen = BTreeSet::new();
        resolved.retain(|handler| seen.insert(handler.name().to_string()));
        resolved
    }

    fn push_extension_or_warn(&self, name: &str, resolved: &mut Vec<ResolvedHandler>) {
        if let Some(extension) = self.registry.handler_extension(name) {
            resolved.push(ResolvedHandler::Extension {
                name: name.to_string(),
                extension: Arc::clone(extension),
            });
        } else {
            error!(handler = name, "unknown handler");
        }
    }

    /// Handlers selected for an event after gating.
    #[must_use]
    pub fn for_event(&self, event: &Event) -> Vec<ResolvedHandler> {
        let names = event.check.handler_names();
        let event_value = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(error) => {
                error!(%error, "event not serializable, no handlers selected");
                return vec![];
            }
        };
        self.derive(&names)
            .into_iter()
            .filter(|handler| self.keeps(handler, event, &event_value))
            .collect()
    }

    fn keeps(&self, handler: &ResolvedHandler, event: &Event, event_value: &Value) -> bool {
        if event.action == Some(EventAction::Flapping) && !handler.handles_flapping() {
            debug!(
                handler = handler.name(),
                check = event.check.name.as_str(),
                "handler does not handle flapping events"
            );
            return false;
        }

        if let Some(subdue) = &event.check.subdue {
            if subdue.is_active(SubdueAt::Handler, Local::now().naive_local()) {
                debug!(
                    handler = handler.name(),
                    check = event.check.name.as_str(),
                    "check is subdued at the handler gate"
                );
                return false;
            }
        }

        if let Some(severities) = handler.severities() {
            // Resolves are kept so operators always see recoveries.
            if event.action != Some(EventAction::Resolve) {
                let severity = Severity::from_status(event.check.status);
                if !severities.iter().any(|name| name.as_str() == severity.as_str()) {
                    debug!(
                        handler = handler.name(),
                        severity = severity.as_str(),
                        "event severity not handled"
                    );
                    return false;
                }
            }
        }

        for filter_name in handler.filter_names() {
            if self.filters.event_filtered(&filter_name, event_value) {
                debug!(
                    handler = handler.name(),
                    filter = filter_name.as_str(),
                    "event filtered"
                );
                return false;
            }
        }

        true
    }
}
