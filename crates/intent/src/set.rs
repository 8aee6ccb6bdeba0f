use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::error::{IntentError, Result};
use crate::pattern::{IntentKind, IntentPattern};

const BUILTIN_INTENTS: &str = include_str!("../patterns/intents.json");

static BUILTIN: Lazy<IntentPatternSet> = Lazy::new(|| {
    IntentPatternSet::from_bytes("builtin", BUILTIN_INTENTS.as_bytes(), false)
        .expect("bundled intent patterns must parse")
});

/// Process-wide builtin pattern set, compiled on first use.
pub fn builtin_patterns() -> &'static IntentPatternSet {
    &BUILTIN
}

#[derive(Clone, Debug)]
pub struct IntentPatternSet {
    name: String,
    patterns: Vec<IntentPattern>,
    compiled: Vec<Regex>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntentMatches<'a> {
    pub thread_reference: bool,
    pub summary_request: bool,
    pub labels: Vec<&'a str>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawPatternSet {
    #[serde(default)]
    schema_version: Option<u32>,
    name: Option<String>,
    #[serde(default)]
    patterns: Vec<IntentPattern>,
}

impl IntentPatternSet {
    #[must_use]
    pub fn builtin() -> Self {
        builtin_patterns().clone()
    }

    pub fn from_file(path: &Path, extend_builtin: bool) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("custom")
            .to_string();
        Self::from_bytes(&name, &bytes, extend_builtin)
    }

    /// Parses a JSON or TOML pattern set. With `extend_builtin`, its patterns are
    /// appended to the bundled ones instead of replacing them.
    pub fn from_bytes(name: &str, bytes: &[u8], extend_builtin: bool) -> Result<Self> {
        let raw = parse_raw(name, bytes)?;
        if let Some(schema_version) = raw.schema_version {
            if schema_version != 1 {
                return Err(IntentError::UnsupportedSchema(schema_version));
            }
        }
        let name = raw
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| name.to_string());

        let mut set = if extend_builtin {
            let mut base = Self::builtin();
            base.name = name;
            base
        } else {
            Self {
                name,
                patterns: Vec::new(),
                compiled: Vec::new(),
            }
        };
        set.extend(raw.patterns)?;
        Ok(set)
    }

    pub fn extend(&mut self, patterns: impl IntoIterator<Item = IntentPattern>) -> Result<()> {
        let mut labels: HashSet<String> = self.patterns.iter().map(|p| p.label.clone()).collect();
        for pattern in patterns {
            if pattern.pattern.trim().is_empty() {
                return Err(IntentError::EmptyPattern {
                    label: pattern.label,
                });
            }
            if !labels.insert(pattern.label.clone()) {
                return Err(IntentError::DuplicateLabel(pattern.label));
            }
            let compiled = RegexBuilder::new(&pattern.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| IntentError::InvalidPattern {
                    label: pattern.label.clone(),
                    source,
                })?;
            self.patterns.push(pattern);
            self.compiled.push(compiled);
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn patterns(&self) -> &[IntentPattern] {
        &self.patterns
    }

    #[must_use]
    pub fn matches(&self, kind: IntentKind, query: &str) -> bool {
        if query.is_empty() {
            return false;
        }
        self.entries()
            .any(|(pattern, re)| pattern.kind == kind && re.is_match(query))
    }

    #[must_use]
    pub fn matched_labels(&self, query: &str) -> Vec<&str> {
        if query.is_empty() {
            return Vec::new();
        }
        self.entries()
            .filter(|(_, re)| re.is_match(query))
            .map(|(pattern, _)| pattern.label.as_str())
            .collect()
    }

    #[must_use]
    pub fn classify(&self, query: &str) -> IntentMatches<'_> {
        let mut out = IntentMatches::default();
        if query.is_empty() {
            return out;
        }
        for (pattern, re) in self.entries() {
            if !re.is_match(query) {
                continue;
            }
            match pattern.kind {
                IntentKind::ThreadReference => out.thread_reference = true,
                IntentKind::SummaryRequest => out.summary_request = true,
            }
            out.labels.push(pattern.label.as_str());
        }
        out
    }

    fn entries(&self) -> impl Iterator<Item = (&IntentPattern, &Regex)> {
        self.patterns.iter().zip(self.compiled.iter())
    }
}

fn parse_raw(name: &str, bytes: &[u8]) -> Result<RawPatternSet> {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(json_err) => {
            let utf8 = std::str::from_utf8(bytes).map_err(|err| IntentError::Parse {
                name: name.to_string(),
                message: format!("{json_err}; {err}"),
            })?;
            let toml_value: toml::Value =
                toml::from_str(utf8).map_err(|toml_err| IntentError::Parse {
                    name: name.to_string(),
                    message: format!("{json_err}; TOML parse error: {toml_err}"),
                })?;
            serde_json::to_value(toml_value).map_err(|err| IntentError::Parse {
                name: name.to_string(),
                message: err.to_string(),
            })?
        }
    };

    validate_value(&value)?;
    serde_json::from_value(value).map_err(|err| IntentError::Parse {
        name: name.to_string(),
        message: err.to_string(),
    })
}

fn validate_value(value: &serde_json::Value) -> Result<()> {
    const ROOT_KEYS: &[&str] = &["schema_version", "name", "patterns"];
    const PATTERN_KEYS: &[&str] = &["label", "pattern", "lang", "kind"];

    let serde_json::Value::Object(root) = value else {
        return Ok(());
    };

    let mut unknown = Vec::new();
    for key in root.keys() {
        if !ROOT_KEYS.contains(&key.as_str()) {
            unknown.push(key.clone());
        }
    }
    if let Some(serde_json::Value::Array(patterns)) = root.get("patterns") {
        for (idx, entry) in patterns.iter().enumerate() {
            let serde_json::Value::Object(obj) = entry else {
                continue;
            };
            for key in obj.keys() {
                if !PATTERN_KEYS.contains(&key.as_str()) {
                    unknown.push(format!("patterns[{idx}].{key}"));
                }
            }
        }
    }

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(IntentError::UnknownFields(unknown))
    }
}
