//! Total decoding of gate requests and conversation snapshots from untyped JSON.
//!
//! Malformed or missing fields never fail the decode: they fall back to the
//! most conservative reading (empty query, no evidence, zero overlap, flags off).

use serde_json::Value;

use crate::{EvidenceHit, Excerpt, GateInput, ThreadMessage, ThreadSnapshot};

const SSOT_KEYS: &[&str] = &["has_ssot", "hasSSOT", "has_SSOT"];
const RESTRICTIVE_KEYS: &[&str] = &["restrictive_mode", "restrictiveMode", "onlyTiers", "only_tiers"];

impl GateInput {
    pub fn from_value_lenient(value: &Value) -> Self {
        let Value::Object(obj) = value else {
            return Self::default();
        };

        let query = obj
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let evidence = obj
            .get("evidence")
            .and_then(Value::as_array)
            .map(|hits| hits.iter().map(lenient_hit).collect())
            .unwrap_or_default();

        Self {
            query,
            evidence,
            has_ssot: flag(value, SSOT_KEYS),
            restrictive_mode: flag(value, RESTRICTIVE_KEYS),
        }
    }

    /// Invalid JSON decodes to an empty request, which the gate rejects.
    pub fn from_slice_lenient(bytes: &[u8]) -> Self {
        serde_json::from_slice::<Value>(bytes)
            .map(|value| Self::from_value_lenient(&value))
            .unwrap_or_default()
    }
}

impl ThreadSnapshot {
    /// Non-object messages are dropped; non-string content is rendered as text,
    /// with falsy values (`null`, `false`, `0`, `""`) reading as empty.
    pub fn from_value_lenient(value: &Value) -> Self {
        let Value::Object(obj) = value else {
            return Self::default();
        };

        let messages = obj
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|m| ThreadMessage {
                        role: m
                            .get("role")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        content: m.get("content").map(text_of).unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: obj.get("id").map(text_of).filter(|v| !v.is_empty()),
            title: obj.get("title").map(text_of).filter(|v| !v.is_empty()),
            messages,
        }
    }

    /// Invalid JSON decodes to an empty snapshot, which renders no evidence.
    pub fn from_slice_lenient(bytes: &[u8]) -> Self {
        serde_json::from_slice::<Value>(bytes)
            .map(|value| Self::from_value_lenient(&value))
            .unwrap_or_default()
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(false) => String::new(),
        Value::String(text) => text.clone(),
        Value::Number(n) if n.as_f64() == Some(0.0) => String::new(),
        other => other.to_string(),
    }
}

fn flag(value: &Value, keys: &[&str]) -> bool {
    keys.iter()
        .any(|key| value.get(*key).and_then(Value::as_bool) == Some(true))
}

fn lenient_hit(value: &Value) -> EvidenceHit {
    let path = value
        .get("path")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let overlap = value
        .get("overlap")
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .map_or(0.0, |v| v.clamp(0.0, 1.0));
    let excerpt = value
        .get("excerpt")
        .or_else(|| value.get("h"))
        .and_then(lenient_excerpt);

    EvidenceHit {
        path,
        overlap,
        excerpt,
    }
}

fn lenient_excerpt(value: &Value) -> Option<Excerpt> {
    let obj = value.as_object()?;
    let line = |key: &str| {
        obj.get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    };
    Some(Excerpt {
        text: obj
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        line_from: line("line_from"),
        line_to: line("line_to"),
    })
}
