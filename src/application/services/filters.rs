use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::application::registry::Registry;
use crate::domain::ports::sandbox::PredicateSandbox;

/// Evaluates configured filters against serialized events.
#[derive(Clone)]
pub struct FilterEvaluator {
    registry: Arc<Registry>,
    sandbox: Arc<dyn PredicateSandbox>,
}

impl FilterEvaluator {
    #[must_use]
    pub fn new(registry: Arc<Registry>, sandbox: Arc<dyn PredicateSandbox>) -> Self {
        Self { registry, sandbox }
    }

    /// True when the named filter suppresses the event.
    ///
    /// A non-negated filter drops events that do *not* match its
    /// attributes; a negated filter drops events that *do*. An unknown
    /// filter never drops.
    #[must_use]
    pub fn event_filtered(&self, filter_name: &str, event: &Value) -> bool {
        let Some(filter) = self.registry.filter(filter_name) else {
            warn!(filter = filter_name, "unknown filter");
            return false;
        };
        let matched = match &filter.attributes {
            Value::Null => true,
            attributes => self.attributes_match(attributes, event),
        };
        if filter.negate {
            matched
        } else {
            !matched
        }
    }

    /// Recursive attribute match: equal scalars match, mappings recurse,
    /// and `eval:` strings run as sandboxed predicates over the candidate
    /// value. A raised predicate error counts as no-match.
    #[must_use]
    pub fn attributes_match(&self, template: &Value, candidate: &Value) -> bool {
        match template {
            Value::Object(attributes) => match candidate {
                Value::Object(fields) => attributes.iter().all(|(key, expected)| {
                    let actual = fields.get(key).unwrap_or(&Value::Null);
                    self.attributes_match(expected, actual)
                }),
                _ => false,
            },
            Value::String(text) => match text.strip_prefix("eval:") {
                Some(expression) => self
                    .sandbox
                    .eval(expression.trim_start(), candidate)
                    .unwrap_or_else(|error| {
                        warn!(%error, "predicate evaluation raised, treating as no-match");
                        false
                    }),
                None => template == candidate,
            },
            _ => template == candidate,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::application::registry::FilterDef;
    use crate::infrastructure::sandbox::PredicateEvaluator;
    use serde_json::json;

    fn evaluator(filters: Vec<FilterDef>) -> FilterEvaluator {
        let mut registry = Registry::new();
        for filter in filters {
            registry.add_filter(filter);
        }
        FilterEvaluator::new(Arc::new(registry), Arc::new(PredicateEvaluator::new()))
    }

    fn production_filter(negate: bool) -> FilterDef {
        FilterDef {
            name: "production".into(),
            negate,
            attributes: json!({"client": {"environment": "production"}}),
        }
    }

    fn production_event() -> Value {
        json!({
            "client": {"name": "web-01", "environment": "production"},
            "check": {"name": "cpu", "status": 2}
        })
    }

    fn staging_event() -> Value {
        json!({
            "client": {"name": "web-02", "environment": "staging"},
            "check": {"name": "cpu", "status": 2}
        })
    }

    #[test]
    fn scalar_equality_matches() {
        let evaluator = evaluator(vec![]);
        assert!(evaluator.attributes_match(&json!({"status": 2}), &json!({"status": 2})));
        assert!(!evaluator.attributes_match(&json!({"status": 2}), &json!({"status": 0})));
    }

    #[test]
    fn nested_mappings_recurse() {
        let evaluator = evaluator(vec![]);
        let template = json!({"client": {"environment": "production"}});
        assert!(evaluator.attributes_match(&template, &production_event()));
        assert!(!evaluator.attributes_match(&template, &staging_event()));
    }

    #[test]
    fn missing_candidate_key_is_no_match() {
        let evaluator = evaluator(vec![]);
        let template = json!({"nope": 1});
        assert!(!evaluator.attributes_match(&template, &json!({"other": 1})));
    }

    #[test]
    fn all_template_keys_must_match() {
        let evaluator = evaluator(vec![]);
        let template = json!({"a": 1, "b": 2});
        assert!(evaluator.attributes_match(&template, &json!({"a": 1, "b": 2, "c": 3})));
        assert!(!evaluator.attributes_match(&template, &json!({"a": 1, "b": 9})));
    }

    #[test]
    fn eval_predicates_run_in_the_sandbox() {
        let evaluator = evaluator(vec![]);
        let template = json!({"check": {"status": "eval: value >= 2"}});
        assert!(evaluator.attributes_match(&template, &production_event()));
        assert!(!evaluator.attributes_match(&template, &json!({"check": {"status": 1}})));
    }

    #[test]
    fn raised_predicate_is_no_match() {
        let evaluator = evaluator(vec![]);
        let template = json!({"check": {"name": "eval: value > 5"}});
        // name is a string: ordering raises, which must count as no-match
        assert!(!evaluator.attributes_match(&template, &production_event()));
    }

    #[test]
    fn unknown_filter_does_not_drop() {
        let evaluator = evaluator(vec![]);
        assert!(!evaluator.event_filtered("missing", &production_event()));
    }

    #[test]
    fn non_negated_filter_drops_non_matching_events() {
        let evaluator = evaluator(vec![production_filter(false)]);
        assert!(!evaluator.event_filtered("production", &production_event()));
        assert!(evaluator.event_filtered("production", &staging_event()));
    }

    #[test]
    fn negated_filter_drops_matching_events() {
        let evaluator = evaluator(vec![production_filter(true)]);
        assert!(evaluator.event_filtered("production", &production_event()));
        assert!(!evaluator.event_filtered("production", &staging_event()));
    }

    #[test]
    fn negation_round_trip() {
        // With negate = true the filter drops exactly the events the
        // non-negated variant retains, and vice versa.
        let plain = evaluator(vec![production_filter(false)]);
        let negated = evaluator(vec![production_filter(true)]);
        for event in [production_event(), staging_event()] {
            assert_ne!(
                plain.event_filtered("production", &event),
                negated.event_filtered("production", &event)
            );
        }
    }

    #[test]
    fn empty_attributes_match_everything() {
        let evaluator = evaluator(vec![FilterDef {
            name: "all".into(),
            negate: false,
            attributes: Value::Null,
        }]);
        assert!(!evaluator.event_filtered("all", &production_event()));
    }
}
