use std::path::Path;

use anyhow::{anyhow, Context, Result};
use evgate_intent::{IntentPattern, IntentPatternSet};
use serde::Deserialize;

use crate::inspect::{MatchKind, PathMatcher, ProvenanceRules};

const BUILTIN_DEFAULT: &str = include_str!("../policies/default.json");

/// Environment variable naming a policy file to load instead of the builtin.
pub const POLICY_ENV: &str = "EVGATE_POLICY";

#[derive(Clone, Debug)]
pub struct GatePolicy {
    name: String,
    thresholds: Thresholds,
    provenance: ProvenanceRules,
    intents: IntentPatternSet,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Top overlap that counts as a strong topical match.
    pub strong_overlap: f64,
    /// Top overlap that still passes, graded as a caveated pass.
    pub weak_overlap: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            strong_overlap: 0.3,
            weak_overlap: 0.2,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawPolicy {
    #[serde(default)]
    schema_version: Option<u32>,
    name: Option<String>,
    thresholds: Option<RawThresholds>,
    provenance: Option<RawProvenance>,
    intents: Option<RawIntents>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
struct RawThresholds {
    strong_overlap: Option<f64>,
    weak_overlap: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawProvenance {
    #[serde(default)]
    thread: Vec<RawRule>,
}

#[derive(Clone, Debug, Deserialize)]
struct RawRule {
    pattern: String,
    #[serde(default)]
    kind: MatchKind,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawIntents {
    #[serde(default)]
    patterns: Vec<IntentPattern>,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

impl GatePolicy {
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_bytes("default", BUILTIN_DEFAULT.as_bytes(), false)
            .expect("builtin default policy must parse")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read policy file {}", path.display()))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("custom");
        Self::from_bytes(name, &bytes, true)
    }

    /// Loads the file named by `EVGATE_POLICY`, or the builtin when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(POLICY_ENV) {
            Some(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::builtin()),
        }
    }

    /// Parses a JSON or TOML policy. With `over_builtin`, unspecified fields keep
    /// the builtin values and intent patterns are appended to the builtin set.
    pub fn from_bytes(policy_name: &str, bytes: &[u8], over_builtin: bool) -> Result<Self> {
        let raw = parse_raw(bytes)
            .with_context(|| format!("Policy '{policy_name}' is not valid JSON/TOML configuration"))?;
        let merged = if over_builtin {
            merge_raw_policies(parse_raw(BUILTIN_DEFAULT.as_bytes())?, raw)
        } else {
            raw
        };
        Self::from_raw(merged, policy_name)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    #[must_use]
    pub const fn provenance(&self) -> &ProvenanceRules {
        &self.provenance
    }

    #[must_use]
    pub const fn intents(&self) -> &IntentPatternSet {
        &self.intents
    }

    fn from_raw(raw: RawPolicy, fallback_name: &str) -> Result<Self> {
        if let Some(schema_version) = raw.schema_version {
            if schema_version != 1 {
                return Err(anyhow!(
                    "policy.schema_version {schema_version} is not supported (expected 1)"
                ));
            }
        }

        let name = raw
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| fallback_name.to_string());
        let thresholds = Thresholds::from_raw(raw.thresholds)
            .with_context(|| format!("Invalid thresholds for policy '{name}'"))?;
        let provenance = build_provenance(raw.provenance)
            .with_context(|| format!("Invalid provenance rules for policy '{name}'"))?;

        let mut intents = IntentPatternSet::builtin();
        if let Some(raw_intents) = raw.intents {
            intents
                .extend(raw_intents.patterns)
                .with_context(|| format!("Invalid intent patterns for policy '{name}'"))?;
        }

        Ok(Self {
            name,
            thresholds,
            provenance,
            intents,
        })
    }
}

impl Thresholds {
    fn from_raw(raw: Option<RawThresholds>) -> Result<Self> {
        let defaults = Self::default();
        let raw = raw.unwrap_or_default();
        let strong_overlap = raw.strong_overlap.unwrap_or(defaults.strong_overlap);
        let weak_overlap = raw.weak_overlap.unwrap_or(defaults.weak_overlap);

        for (key, value) in [
            ("thresholds.strong_overlap", strong_overlap),
            ("thresholds.weak_overlap", weak_overlap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{key} must be in [0.0, 1.0] (got {value})"));
            }
        }
        if weak_overlap > strong_overlap {
            return Err(anyhow!(
                "thresholds.weak_overlap ({weak_overlap}) must not exceed thresholds.strong_overlap ({strong_overlap})"
            ));
        }

        Ok(Self {
            strong_overlap,
            weak_overlap,
        })
    }
}

fn build_provenance(raw: Option<RawProvenance>) -> Result<ProvenanceRules> {
    let Some(raw) = raw else {
        return Ok(ProvenanceRules::default());
    };
    let mut matchers = Vec::with_capacity(raw.thread.len());
    for rule in raw.thread {
        if rule.pattern.trim().is_empty() {
            continue;
        }
        matchers.push(PathMatcher::new(rule.kind, &rule.pattern)?);
    }
    if matchers.is_empty() {
        return Err(anyhow!("provenance.thread must contain at least one pattern"));
    }
    Ok(ProvenanceRules::new(matchers))
}

fn merge_raw_policies(base: RawPolicy, overlay: RawPolicy) -> RawPolicy {
    let thresholds = match (base.thresholds, overlay.thresholds) {
        (Some(base), Some(overlay)) => Some(RawThresholds {
            strong_overlap: overlay.strong_overlap.or(base.strong_overlap),
            weak_overlap: overlay.weak_overlap.or(base.weak_overlap),
        }),
        (base, overlay) => overlay.or(base),
    };

    RawPolicy {
        schema_version: overlay.schema_version.or(base.schema_version),
        name: overlay.name,
        thresholds,
        provenance: overlay.provenance.or(base.provenance),
        intents: overlay.intents.or(base.intents),
    }
}

fn parse_raw(bytes: &[u8]) -> Result<RawPolicy> {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(json_err) => {
            let utf8 = std::str::from_utf8(bytes).map_err(|err| anyhow!("{json_err}; {err}"))?;
            let toml_value: toml::Value = toml::from_str(utf8).map_err(|toml_err| {
                anyhow!("Policy is not valid JSON or TOML ({json_err}); TOML parse error: {toml_err}")
            })?;
            serde_json::to_value(toml_value)
                .map_err(|err| anyhow!("Failed to convert TOML policy to JSON: {err}"))?
        }
    };

    validate_policy_value(&value)?;
    serde_json::from_value(value).map_err(|err| anyhow!("Policy parse error: {err}"))
}

fn validate_policy_value(value: &serde_json::Value) -> Result<()> {
    fn push_unknown(unknown: &mut Vec<String>, base: &str, key: &str) {
        if base.is_empty() {
            unknown.push(key.to_string());
        } else {
            unknown.push(format!("{base}.{key}"));
        }
    }

    fn validate_object_keys(
        unknown: &mut Vec<String>,
        obj: &serde_json::Map<String, serde_json::Value>,
        base: &str,
        allowed: &[&str],
    ) {
        for key in obj.keys() {
            if !allowed.iter().any(|a| a == &key.as_str()) {
                push_unknown(unknown, base, key);
            }
        }
    }

    fn validate_array_items(
        unknown: &mut Vec<String>,
        value: Option<&serde_json::Value>,
        base: &str,
        allowed: &[&str],
    ) {
        let Some(serde_json::Value::Array(items)) = value else {
            return;
        };
        for (idx, item) in items.iter().enumerate() {
            if let serde_json::Value::Object(obj) = item {
                validate_object_keys(unknown, obj, &format!("{base}[{idx}]"), allowed);
            }
        }
    }

    let serde_json::Value::Object(root) = value else {
        return Err(anyhow!("Policy must be a JSON/TOML object"));
    };

    let mut unknown = Vec::new();
    validate_object_keys(
        &mut unknown,
        root,
        "",
        &["schema_version", "name", "thresholds", "provenance", "intents"],
    );

    if let Some(serde_json::Value::Object(thresholds)) = root.get("thresholds") {
        validate_object_keys(
            &mut unknown,
            thresholds,
            "thresholds",
            &["strong_overlap", "weak_overlap"],
        );
    }
    if let Some(serde_json::Value::Object(provenance)) = root.get("provenance") {
        validate_object_keys(&mut unknown, provenance, "provenance", &["thread"]);
        validate_array_items(
            &mut unknown,
            provenance.get("thread"),
            "provenance.thread",
            &["pattern", "kind"],
        );
    }
    if let Some(serde_json::Value::Object(intents)) = root.get("intents") {
        validate_object_keys(&mut unknown, intents, "intents", &["patterns"]);
        validate_array_items(
            &mut unknown,
            intents.get("patterns"),
            "intents.patterns",
            &["label", "pattern", "lang", "kind"],
        );
    }

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Unknown policy fields: {}", unknown.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evgate_intent::IntentKind;

    #[test]
    fn parses_builtin_default() {
        let policy = GatePolicy::builtin();
        assert_eq!(policy.name(), "default");
        assert_eq!(policy.thresholds(), Thresholds::default());
        assert!(policy.provenance().matches("/threads/1"));
        assert!(!policy.provenance().matches("/docs/1"));
    }

    #[test]
    fn overlay_keeps_unspecified_thresholds() {
        let policy = GatePolicy::from_bytes(
            "tight",
            br#"{"thresholds": {"strong_overlap": 0.6}}"#,
            true,
        )
        .unwrap();
        assert_eq!(policy.name(), "tight");
        let thresholds = policy.thresholds();
        assert!((thresholds.strong_overlap - 0.6).abs() < f64::EPSILON);
        assert!((thresholds.weak_overlap - 0.2).abs() < f64::EPSILON);
        assert!(policy.provenance().matches("/threads/1"));
    }

    #[test]
    fn overlay_replaces_provenance_and_extends_intents() {
        let bytes = br#"
name = "chat-archive"

[[provenance.thread]]
pattern = "archive/chats/"
kind = "prefix"

[[intents.patterns]]
label = "recap"
pattern = "recap"
lang = "en"
kind = "summary_request"
"#;
        let policy = GatePolicy::from_bytes("chat-archive", bytes, true).unwrap();
        assert_eq!(policy.name(), "chat-archive");
        assert!(policy.provenance().matches("archive/chats/9.jsonl"));
        assert!(!policy.provenance().matches("/threads/9"));
        assert!(policy.intents().matches(IntentKind::SummaryRequest, "recap please"));
        assert!(policy.intents().matches(IntentKind::SummaryRequest, "summarize"));
    }

    #[test]
    fn rejects_unknown_fields_with_paths() {
        let bytes = br#"{
            "thresholds": {"strong_overlap": 0.3, "oops": 1},
            "provenance": {"thread": [{"pattern": "/t/", "weight": 2}]},
            "intents": {"patterns": [{"label": "x", "pattern": "x", "kind": "summary_request", "lang": "en", "extra": 1}]}
        }"#;
        let err = GatePolicy::from_bytes("bad", bytes, true).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("thresholds.oops"), "{msg}");
        assert!(msg.contains("provenance.thread[0].weight"), "{msg}");
        assert!(msg.contains("intents.patterns[0].extra"), "{msg}");
    }

    #[test]
    fn rejects_unsupported_schema_version() {
        let err = GatePolicy::from_bytes("bad", br#"{"schema_version": 3}"#, true).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("policy.schema_version"), "{msg}");
    }

    #[test]
    fn rejects_out_of_range_or_inverted_thresholds() {
        let err = GatePolicy::from_bytes("bad", br#"{"thresholds": {"strong_overlap": 1.5}}"#, true)
            .unwrap_err();
        assert!(format!("{err:#}").contains("thresholds.strong_overlap"));

        let err = GatePolicy::from_bytes(
            "bad",
            br#"{"thresholds": {"strong_overlap": 0.2, "weak_overlap": 0.4}}"#,
            true,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("must not exceed"));
    }

    #[test]
    fn rejects_empty_provenance() {
        let err = GatePolicy::from_bytes("bad", br#"{"provenance": {"thread": []}}"#, true)
            .unwrap_err();
        assert!(format!("{err:#}").contains("provenance.thread"));
    }

    #[test]
    fn rejects_invalid_intent_regex() {
        let bytes = br#"{"intents": {"patterns": [{"label": "broken", "pattern": "(", "kind": "thread_reference"}]}}"#;
        let err = GatePolicy::from_bytes("bad", bytes, true).unwrap_err();
        assert!(format!("{err:#}").contains("broken"));
    }

    #[test]
    fn loads_policy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strict.toml");
        std::fs::write(&path, "[thresholds]\nweak_overlap = 0.25\n").unwrap();
        let policy = GatePolicy::from_file(&path).unwrap();
        assert_eq!(policy.name(), "strict");
        assert!((policy.thresholds().weak_overlap - 0.25).abs() < f64::EPSILON);
    }
}
