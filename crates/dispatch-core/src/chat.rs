use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::messages::ChatTurn;
use crate::tier::ModelTier;
use crate::tokens::TokenUsage;

/// One chat turn as submitted by the caller. Immutable for the lifetime of
/// the request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatQuery {
    pub raw_text: String,
    pub current_page: String,
    pub conversation_history: Vec<ChatTurn>,
    pub force_deep: bool,
    pub snapshot: Option<MetricSnapshot>,
}

impl ChatQuery {
    pub fn new(raw_text: impl Into<String>, current_page: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            current_page: current_page.into(),
            ..Default::default()
        }
    }
}

/// Caller-provided metrics payload. Free-form JSON object; every accessor
/// is strict about types so rules never act on a guessed value.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct MetricSnapshot(Map<String, Value>);

impl MetricSnapshot {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build from any JSON value; only objects are accepted.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Look up a dotted path such as `system.reserve_margin_pct`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// A JSON number at `path`. Numeric strings do not count.
    pub fn number(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64).filter(|v| v.is_finite())
    }

    /// A non-negative JSON integer at `path`.
    pub fn count(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }

    /// A non-empty string at `path`.
    pub fn text(&self, path: &str) -> Option<&str> {
        self.get(path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Objects in the array at `path`.
    pub fn records(&self, path: &str) -> Vec<&Map<String, Value>> {
        self.get(path)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Suggested navigation target embedded in an answer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuggestedAction {
    pub label: String,
    pub route: String,
}

/// Wire contract between the orchestrator and its caller. Serialized as one
/// JSON object per line, tagged by `type`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    Meta {
        tier: ModelTier,
        tier_label: String,
        cached: bool,
        local: bool,
    },
    Text {
        text: String,
    },
    Done {
        tier: ModelTier,
        tier_label: String,
        cached: bool,
        local: bool,
        usage: TokenUsage,
        remaining: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        actions: Vec<SuggestedAction>,
    },
    Error {
        error: String,
    },
}

impl ChatStreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Serialize as one NDJSON record, newline included.
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","error":"unserializable event"}"#.to_string());
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> MetricSnapshot {
        MetricSnapshot::from_value(value).unwrap()
    }

    #[test]
    fn snapshot_dotted_paths() {
        let snap = snapshot(json!({"system": {"reserve_margin_pct": 14.5, "region": "North"}}));
        assert_eq!(snap.number("system.reserve_margin_pct"), Some(14.5));
        assert_eq!(snap.text("system.region"), Some("North"));
        assert_eq!(snap.number("system.missing"), None);
        assert_eq!(snap.number("nope.deeper"), None);
    }

    #[test]
    fn snapshot_numbers_are_strict() {
        let snap = snapshot(json!({"a": "12.5", "b": null, "c": true, "d": -3}));
        assert_eq!(snap.number("a"), None);
        assert_eq!(snap.number("b"), None);
        assert_eq!(snap.number("c"), None);
        assert_eq!(snap.number("d"), Some(-3.0));
        assert_eq!(snap.count("d"), None);
    }

    #[test]
    fn snapshot_records_skip_non_objects() {
        let snap = snapshot(json!({"stations": [{"name": "A"}, 3, {"name": "B"}]}));
        assert_eq!(snap.records("stations").len(), 2);
        assert!(snap.records("missing").is_empty());
    }

    #[test]
    fn only_objects_become_snapshots() {
        assert!(MetricSnapshot::from_value(json!([1, 2])).is_none());
        assert!(MetricSnapshot::from_value(json!({})).unwrap().is_empty());
    }

    #[test]
    fn meta_wire_shape() {
        let event = ChatStreamEvent::Meta {
            tier: ModelTier::Mid,
            tier_label: "Standard".into(),
            cached: false,
            local: false,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "meta", "tier": "mid", "tier_label": "Standard", "cached": false, "local": false})
        );
    }

    #[test]
    fn done_omits_empty_annotations() {
        let event = ChatStreamEvent::Done {
            tier: ModelTier::Cheap,
            tier_label: "Quick answer".into(),
            cached: true,
            local: false,
            usage: TokenUsage::default(),
            remaining: 17,
            suggestions: vec![],
            actions: vec![],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "done");
        assert_eq!(value["usage"], json!({"input_tokens": 0, "output_tokens": 0}));
        assert_eq!(value["remaining"], 17);
        assert!(value.get("suggestions").is_none());
        assert!(value.get("actions").is_none());
    }

    #[test]
    fn ndjson_is_single_line() {
        let line = ChatStreamEvent::Text { text: "line one\nline two".into() }.to_ndjson();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(ChatStreamEvent::error("boom").is_terminal());
    }
}
