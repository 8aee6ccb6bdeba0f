use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// "this thread / this conversation", self-awareness and topic questions.
    ThreadReference,
    SummaryRequest,
}

impl IntentKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            IntentKind::ThreadReference => "thread_reference",
            IntentKind::SummaryRequest => "summary_request",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum LanguageTag {
    Ko,
    En,
    #[default]
    Any,
}

/// One (label, pattern, language) entry of a pattern set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentPattern {
    pub label: String,
    pub pattern: String,
    #[serde(default)]
    pub lang: LanguageTag,
    pub kind: IntentKind,
}

impl IntentPattern {
    pub fn new(
        label: impl Into<String>,
        pattern: impl Into<String>,
        lang: LanguageTag,
        kind: IntentKind,
    ) -> Self {
        Self {
            label: label.into(),
            pattern: pattern.into(),
            lang,
            kind,
        }
    }
}
