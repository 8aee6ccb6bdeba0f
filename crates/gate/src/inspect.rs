use std::collections::BTreeSet;

use anyhow::{Context, Result};
use evgate_protocol::{EvidenceHit, SourceDiversity};
use globset::{GlobBuilder, GlobMatcher};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Path segment marking evidence that originates from a conversation thread.
pub const THREAD_MARKER: &str = "/threads/";

static SOURCE_MAP: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(^|/)status/evidence/meetings/", "meetings"),
        (r"(^|/)status/evidence/memory/tiers/", "memory_tiers"),
        (r"(^|/)status/resources/vector_index/", "vector_index"),
    ]
    .into_iter()
    .map(|(pattern, tag)| (Regex::new(pattern).expect("source map regex"), tag))
    .collect()
});

/// Overlap of the top-ranked hit. Never looks past index 0.
#[must_use]
pub fn top_overlap(evidence: &[EvidenceHit]) -> f64 {
    evidence.first().map_or(0.0, |hit| hit.overlap)
}

/// Whether any hit, at any rank, comes from a conversation thread.
#[must_use]
pub fn has_thread_provenance(evidence: &[EvidenceHit]) -> bool {
    evidence.iter().any(|hit| hit.path.contains(THREAD_MARKER))
}

#[must_use]
pub fn has_provenance(evidence: &[EvidenceHit], rules: &ProvenanceRules) -> bool {
    evidence.iter().any(|hit| rules.matches(&hit.path))
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Prefix,
    Suffix,
    #[default]
    Contains,
    Glob,
}

#[derive(Clone, Debug)]
pub struct PathMatcher {
    kind: MatchKind,
    needle: String,
    glob: Option<GlobMatcher>,
}

impl PathMatcher {
    pub fn new(kind: MatchKind, needle: &str) -> Result<Self> {
        let glob = if kind == MatchKind::Glob {
            Some(
                GlobBuilder::new(needle)
                    .literal_separator(true)
                    .build()
                    .with_context(|| format!("Invalid glob pattern '{needle}'"))?
                    .compile_matcher(),
            )
        } else {
            None
        };
        Ok(Self {
            kind,
            needle: needle.to_string(),
            glob,
        })
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self.kind {
            MatchKind::Prefix => path.starts_with(&self.needle),
            MatchKind::Suffix => path.ends_with(&self.needle),
            MatchKind::Contains => path.contains(&self.needle),
            MatchKind::Glob => self.glob.as_ref().is_some_and(|g| g.is_match(path)),
        }
    }
}

/// Path matchers that classify a hit as thread provenance.
#[derive(Clone, Debug)]
pub struct ProvenanceRules {
    thread: Vec<PathMatcher>,
}

impl Default for ProvenanceRules {
    fn default() -> Self {
        Self {
            thread: vec![PathMatcher {
                kind: MatchKind::Contains,
                needle: THREAD_MARKER.to_string(),
                glob: None,
            }],
        }
    }
}

impl ProvenanceRules {
    #[must_use]
    pub fn new(thread: Vec<PathMatcher>) -> Self {
        Self { thread }
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.thread.iter().any(|m| m.matches(path))
    }
}

/// Strips a `#Lx-y` line anchor from an evidence reference.
fn path_from_ref(reference: &str) -> &str {
    reference.split_once('#').map_or(reference, |(path, _)| path)
}

/// Coarse origin bucket of an evidence path.
#[must_use]
pub fn source_root(path: &str) -> String {
    let path = path_from_ref(path);
    for (re, tag) in SOURCE_MAP.iter() {
        if re.is_match(path) {
            return (*tag).to_string();
        }
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        [] | [""] => "unknown".to_string(),
        ["status"] => "status".to_string(),
        ["status", second, ..] => (*second).to_string(),
        [first, ..] => (*first).to_string(),
    }
}

/// Reports whether the evidence is spread over enough refs and distinct roots.
/// `relaxed` trades root diversity for a higher ref count.
#[must_use]
pub fn source_diversity(evidence: &[EvidenceHit], relaxed: bool) -> SourceDiversity {
    let roots: BTreeSet<String> = evidence.iter().map(|hit| source_root(&hit.path)).collect();
    let (min_refs, min_roots) = if relaxed { (4, 1) } else { (3, 2) };
    SourceDiversity {
        ref_count_ok: evidence.len() >= min_refs,
        source_diversity_ok: roots.len() >= min_roots,
        roots: roots.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hits(items: &[(&str, f64)]) -> Vec<EvidenceHit> {
        items
            .iter()
            .map(|(path, overlap)| EvidenceHit::new(*path, *overlap))
            .collect()
    }

    #[test]
    fn top_overlap_reads_only_first_hit() {
        assert_eq!(top_overlap(&[]), 0.0);
        let evidence = hits(&[("/docs/a.md", 0.1), ("/docs/b.md", 0.9)]);
        assert_eq!(top_overlap(&evidence), 0.1);
    }

    #[test]
    fn thread_provenance_scans_whole_list() {
        assert!(has_thread_provenance(&hits(&[("/threads/abc", 0.01)])));
        let evidence = hits(&[("/docs/a.md", 0.9), ("/docs/b.md", 0.5), ("/threads/9", 0.0)]);
        assert!(has_thread_provenance(&evidence));
        assert!(!has_thread_provenance(&hits(&[("/docs/threads.md", 0.9)])));
        assert!(!has_thread_provenance(&[]));
    }

    #[test]
    fn provenance_rules_support_all_match_kinds() {
        let rules = ProvenanceRules::new(vec![
            PathMatcher::new(MatchKind::Prefix, "chat/").unwrap(),
            PathMatcher::new(MatchKind::Suffix, ".thread.jsonl").unwrap(),
            PathMatcher::new(MatchKind::Glob, "**/conversations/*.jsonl").unwrap(),
        ]);
        assert!(has_provenance(&hits(&[("chat/1", 0.0)]), &rules));
        assert!(has_provenance(&hits(&[("x/7.thread.jsonl", 0.0)]), &rules));
        assert!(has_provenance(&hits(&[("a/conversations/7.jsonl", 0.0)]), &rules));
        assert!(!has_provenance(&hits(&[("/threads/7", 0.0)]), &rules));
    }

    #[test]
    fn invalid_glob_is_reported() {
        assert!(PathMatcher::new(MatchKind::Glob, "a/[").is_err());
    }

    #[test]
    fn source_root_maps_known_prefixes() {
        assert_eq!(source_root("status/evidence/meetings/2024/notes.md#L1-4"), "meetings");
        assert_eq!(source_root("x/status/evidence/memory/tiers/t1.jsonl"), "memory_tiers");
        assert_eq!(source_root("status/resources/vector_index/idx"), "vector_index");
        assert_eq!(source_root("status/evidence/other.md"), "evidence");
        assert_eq!(source_root("/docs/guide.md"), "docs");
        assert_eq!(source_root("status"), "status");
        assert_eq!(source_root(""), "unknown");
    }

    #[test]
    fn diversity_thresholds_strict_and_relaxed() {
        let two_roots = hits(&[("docs/a", 0.5), ("docs/b", 0.4), ("threads/c", 0.3)]);
        let strict = source_diversity(&two_roots, false);
        assert_eq!(strict.roots, vec!["docs".to_string(), "threads".to_string()]);
        assert!(strict.ref_count_ok);
        assert!(strict.source_diversity_ok);

        let relaxed = source_diversity(&two_roots, true);
        assert!(!relaxed.ref_count_ok);
        assert!(relaxed.source_diversity_ok);

        let single_root = hits(&[("docs/a", 0.5), ("docs/b", 0.4), ("docs/c", 0.3)]);
        assert!(!source_diversity(&single_root, false).source_diversity_ok);
    }
}
