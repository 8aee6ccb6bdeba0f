use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod lenient;

pub const GATE_SCHEMA_VERSION: u32 = 1;

/// Highlighted span of an evidence hit, kept for provenance display only.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct Excerpt {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub line_from: u32,
    #[serde(default)]
    pub line_to: u32,
}

/// One retrieved evidence unit.
///
/// Lists of hits are expected to arrive sorted by `overlap`, highest first.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct EvidenceHit {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub overlap: f64,
    #[serde(default, alias = "h", skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<Excerpt>,
}

impl EvidenceHit {
    pub fn new(path: impl Into<String>, overlap: f64) -> Self {
        Self {
            path: path.into(),
            overlap,
            excerpt: None,
        }
    }

    #[must_use]
    pub fn with_excerpt(mut self, excerpt: Excerpt) -> Self {
        self.excerpt = Some(excerpt);
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct GateInput {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub evidence: Vec<EvidenceHit>,
    /// An authoritative, pre-verified answer source exists for this query.
    #[serde(default, alias = "hasSSOT", alias = "has_SSOT")]
    pub has_ssot: bool,
    /// Disables the overlap-threshold acceptance paths.
    #[serde(default, alias = "restrictiveMode", alias = "onlyTiers", alias = "only_tiers")]
    pub restrictive_mode: bool,
}

impl GateInput {
    pub fn new(query: impl Into<String>, evidence: Vec<EvidenceHit>) -> Self {
        Self {
            query: query.into(),
            evidence,
            has_ssot: false,
            restrictive_mode: false,
        }
    }

    #[must_use]
    pub fn with_ssot(mut self, has_ssot: bool) -> Self {
        self.has_ssot = has_ssot;
        self
    }

    #[must_use]
    pub fn restrictive(mut self, restrictive_mode: bool) -> Self {
        self.restrictive_mode = restrictive_mode;
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    Pass,
    /// Only the weak overlap threshold was met.
    PassWithCaveat,
    Fail,
}

impl GateOutcome {
    pub const fn passed(self) -> bool {
        matches!(self, GateOutcome::Pass | GateOutcome::PassWithCaveat)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            GateOutcome::Pass => "pass",
            GateOutcome::PassWithCaveat => "pass_with_caveat",
            GateOutcome::Fail => "fail",
        }
    }
}

/// Sufficiency condition that held for a gate evaluation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    Ssot,
    ThreadReference,
    SummaryRequest,
    StrongOverlap,
    WeakOverlap,
}

impl GateRule {
    pub const fn as_str(self) -> &'static str {
        match self {
            GateRule::Ssot => "ssot",
            GateRule::ThreadReference => "thread_reference",
            GateRule::SummaryRequest => "summary_request",
            GateRule::StrongOverlap => "strong_overlap",
            GateRule::WeakOverlap => "weak_overlap",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct SourceDiversity {
    pub roots: Vec<String>,
    pub ref_count_ok: bool,
    pub source_diversity_ok: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct GateReport {
    pub schema_version: u32,
    pub outcome: GateOutcome,
    pub passed: bool,
    #[serde(default)]
    pub satisfied: Vec<GateRule>,
    pub top_overlap: f64,
    pub thread_provenance: bool,
    /// Labels of the intent patterns that matched the query.
    #[serde(default)]
    pub intents: Vec<String>,
    #[serde(default)]
    pub diversity: SourceDiversity,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    Read,
    Write,
    Exec,
}

impl PermissionAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            PermissionAction::Read => "read",
            PermissionAction::Write => "write",
            PermissionAction::Exec => "exec",
        }
    }

    /// Write and exec actions must pass the safety scan before they run.
    pub const fn mutates_workspace(self) -> bool {
        matches!(self, PermissionAction::Write | PermissionAction::Exec)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct PermissionContext {
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Rules identity stamped by the host so a decision can be traced to the rule set in force.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct CanonHeader {
    #[serde(alias = "X-Rules-Id")]
    pub rules_id: String,
    #[serde(alias = "X-Rules-Hash")]
    pub rules_hash: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct PermissionQuery {
    #[serde(alias = "fileId", alias = "resourceId")]
    pub resource_id: String,
    pub action: PermissionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PermissionContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canon: Option<CanonHeader>,
}

impl PermissionQuery {
    pub fn new(resource_id: impl Into<String>, action: PermissionAction) -> Self {
        Self {
            resource_id: resource_id.into(),
            action,
            context: None,
            canon: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, actor: impl Into<String>, reason: Option<String>) -> Self {
        self.context = Some(PermissionContext {
            actor: actor.into(),
            reason,
        });
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub rationale: String,
    #[serde(alias = "policyRef")]
    pub policy_ref: String,
}

impl PermissionDecision {
    pub fn allow(rationale: impl Into<String>, policy_ref: impl Into<String>) -> Self {
        Self {
            allowed: true,
            rationale: rationale.into(),
            policy_ref: policy_ref.into(),
        }
    }

    pub fn deny(rationale: impl Into<String>, policy_ref: impl Into<String>) -> Self {
        Self {
            allowed: false,
            rationale: rationale.into(),
            policy_ref: policy_ref.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct SafetyReport {
    pub dirty: bool,
    #[serde(default)]
    pub untracked: Vec<String>,
    #[serde(default, alias = "largeFiles", skip_serializing_if = "Option::is_none")]
    pub large_files: Option<Vec<String>>,
}

impl SafetyReport {
    pub fn needs_human_review(&self) -> bool {
        self.dirty || self.large_files.as_ref().is_some_and(|files| !files.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct AssistRequest {
    pub goal: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct AssistSuggestion {
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default, alias = "riskNotes", skip_serializing_if = "Option::is_none")]
    pub risk_notes: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct ThreadMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct ThreadSnapshot {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<ThreadMessage>,
}
