use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::value_objects::subdue::Subdue;

/// A check definition from the registry.
///
/// `name` is the registry key and is filled in at load time; everything the
/// server does not interpret rides along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    #[serde(default)]
    pub name: String,
    pub command: String,
    /// Scheduling period in seconds.
    pub interval: u64,
    #[serde(default)]
    pub subscribers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standalone: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handlers: Option<Vec<String>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub check_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_resolve: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_resolve: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_flap_threshold: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_flap_threshold: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdue: Option<Subdue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The check portion of a result, after merging the registry definition
/// under the agent-reported fields.
///
/// The result wins on conflicts; definition-only keys (handlers, flap
/// thresholds, subdue, …) survive from the registry because agents do not
/// report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckPayload {
    pub name: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub output: String,
    /// Unix timestamp at which the request was issued.
    #[serde(default)]
    pub issued: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handlers: Option<Vec<String>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub check_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_resolve: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_resolve: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_flap_threshold: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_flap_threshold: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdue: Option<Subdue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CheckPayload {
    /// Merge a registry definition under this payload: the payload wins on
    /// every conflicting key.
    ///
    /// # Errors
    ///
    /// Returns a serde error if either side fails to round-trip through a
    /// JSON map (only possible with non-object serializations, which the
    /// types rule out in practice).
    pub fn merged_over(&self, config: &CheckConfig) -> Result<Self, serde_json::Error> {
        let mut base = match serde_json::to_value(config)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(overlay) = serde_json::to_value(self)? {
            for (key, value) in overlay {
                base.insert(key, value);
            }
        }
        serde_json::from_value(Value::Object(base))
    }

    /// Handler names for this check: `handlers`, then `handler`, then
    /// the `default` handler.
    #[must_use]
    pub fn handler_names(&self) -> Vec<String> {
        if let Some(handlers) = &self.handlers {
            handlers.clone()
        } else if let Some(handler) = &self.handler {
            vec![handler.clone()]
        } else {
            vec!["default".to_string()]
        }
    }

    #[must_use]
    pub fn history_key(client: &str, check: &str) -> String {
        format!("history:{client}:{check}")
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn payload(json: &str) -> CheckPayload {
        serde_json::from_str(json).expect("payload")
    }

    #[test]
    fn merge_keeps_definition_only_keys() {
        let config = CheckConfig {
            name: "cpu".into(),
            command: "check-cpu.sh".into(),
            interval: 60,
            handlers: Some(vec!["pagerduty".into()]),
            high_flap_threshold: Some(50),
            low_flap_threshold: Some(5),
            ..CheckConfig::default()
        };
        let result = payload(r#"{"name":"cpu","status":2,"output":"load high","issued":1700000100}"#);

        let merged = result.merged_over(&config).expect("merge");
        assert_eq!(merged.status, 2);
        assert_eq!(merged.output, "load high");
        assert_eq!(merged.handlers.as_deref(), Some(&["pagerduty".into()][..]));
        assert_eq!(merged.high_flap_threshold, Some(50));
    }

    #[test]
    fn merge_result_wins_on_conflict() {
        let config = CheckConfig {
            name: "cpu".into(),
            command: "check-cpu.sh".into(),
            interval: 60,
            check_type: Some("standard".into()),
            ..CheckConfig::default()
        };
        let result = payload(r#"{"name":"cpu","status":0,"type":"metric","issued":1}"#);

        let merged = result.merged_over(&config).expect("merge");
        assert_eq!(merged.check_type.as_deref(), Some("metric"));
    }

    #[test]
    fn handler_names_precedence() {
        let many = payload(r#"{"name":"a","handlers":["x","y"],"handler":"z"}"#);
        assert_eq!(many.handler_names(), vec!["x", "y"]);

        let one = payload(r#"{"name":"a","handler":"z"}"#);
        assert_eq!(one.handler_names(), vec!["z"]);

        let none = payload(r#"{"name":"a"}"#);
        assert_eq!(none.handler_names(), vec!["default"]);
    }

    #[test]
    fn unknown_keys_survive_the_merge() {
        let config = CheckConfig {
            name: "cpu".into(),
            command: "check-cpu.sh".into(),
            interval: 60,
            ..CheckConfig::default()
        };
        let result = payload(r#"{"name":"cpu","status":1,"duration":0.42}"#);
        let merged = result.merged_over(&config).expect("merge");
        assert_eq!(merged.extra["duration"], 0.42);
        assert_eq!(merged.extra["command"], "check-cpu.sh");
    }

    #[test]
    fn history_key_format() {
        assert_eq!(CheckPayload::history_key("web-01", "cpu"), "history:web-01:cpu");
    }
}
