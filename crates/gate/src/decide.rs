use evgate_protocol::{GateInput, GateOutcome, GateReport, GateRule, GATE_SCHEMA_VERSION};
use once_cell::sync::Lazy;

use crate::inspect::{has_provenance, source_diversity, top_overlap};
use crate::policy::GatePolicy;

static DEFAULT_GATE: Lazy<EvidenceGate> = Lazy::new(EvidenceGate::default);

/// Decides whether there is enough evidence to answer a query.
///
/// Every sufficiency rule is evaluated and the verdict is their logical OR:
///
/// 1. an SSOT source exists;
/// 2. the query references the thread and thread evidence exists;
/// 3. the query asks for a summary and thread evidence exists;
/// 4. not restrictive, evidence present, top overlap >= strong threshold;
/// 5. not restrictive, evidence present, top overlap >= weak threshold.
///
/// Rule 5 subsumes rule 4 for the boolean verdict. Both are kept: the strong rule
/// yields [`GateOutcome::Pass`], the weak one alone yields
/// [`GateOutcome::PassWithCaveat`].
#[derive(Clone, Debug, Default)]
pub struct EvidenceGate {
    policy: GatePolicy,
}

impl EvidenceGate {
    #[must_use]
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    #[must_use]
    pub fn evaluate(&self, input: &GateInput) -> GateReport {
        let thresholds = self.policy.thresholds();
        let top = top_overlap(&input.evidence);
        let thread_evidence = has_provenance(&input.evidence, self.policy.provenance());
        let intents = self.policy.intents().classify(&input.query);
        let overlap_open = !input.restrictive_mode && !input.evidence.is_empty();

        let mut satisfied = Vec::new();
        if input.has_ssot {
            satisfied.push(GateRule::Ssot);
        }
        if intents.thread_reference && thread_evidence {
            satisfied.push(GateRule::ThreadReference);
        }
        if intents.summary_request && thread_evidence {
            satisfied.push(GateRule::SummaryRequest);
        }
        if overlap_open && top >= thresholds.strong_overlap {
            satisfied.push(GateRule::StrongOverlap);
        }
        if overlap_open && top >= thresholds.weak_overlap {
            satisfied.push(GateRule::WeakOverlap);
        }

        let outcome = grade(&satisfied);
        GateReport {
            schema_version: GATE_SCHEMA_VERSION,
            outcome,
            passed: outcome.passed(),
            satisfied,
            top_overlap: top,
            thread_provenance: thread_evidence,
            intents: intents.labels.iter().map(|label| (*label).to_string()).collect(),
            diversity: source_diversity(&input.evidence, false),
        }
    }

    #[must_use]
    pub fn decide(&self, input: &GateInput) -> bool {
        self.evaluate(input).passed
    }
}

fn grade(satisfied: &[GateRule]) -> GateOutcome {
    if satisfied.is_empty() {
        GateOutcome::Fail
    } else if satisfied.iter().all(|rule| *rule == GateRule::WeakOverlap) {
        GateOutcome::PassWithCaveat
    } else {
        GateOutcome::Pass
    }
}

/// Evaluates `input` against the builtin policy.
#[must_use]
pub fn evaluate(input: &GateInput) -> GateReport {
    DEFAULT_GATE.evaluate(input)
}

/// Boolean verdict against the builtin policy.
#[must_use]
pub fn decide(input: &GateInput) -> bool {
    DEFAULT_GATE.decide(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evgate_protocol::EvidenceHit;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn input(query: &str, hits: &[(&str, f64)]) -> GateInput {
        GateInput::new(
            query,
            hits.iter()
                .map(|(path, overlap)| EvidenceHit::new(*path, *overlap))
                .collect(),
        )
    }

    #[test]
    fn thread_question_with_thread_evidence_passes() {
        let req = input("이 스레드가 뭐에 관한 거야?", &[("/threads/42", 0.05)]);
        let report = evaluate(&req);
        assert!(report.passed);
        assert_eq!(report.outcome, GateOutcome::Pass);
        assert_eq!(report.satisfied, vec![GateRule::ThreadReference]);
        assert!(report.intents.contains(&"this_thread".to_string()));
    }

    #[test]
    fn strong_overlap_passes_in_default_mode() {
        let req = input("what's 2+2", &[("/docs/math.md", 0.5)]);
        let report = evaluate(&req);
        assert!(report.passed);
        assert_eq!(
            report.satisfied,
            vec![GateRule::StrongOverlap, GateRule::WeakOverlap]
        );
    }

    #[test]
    fn restrictive_mode_disables_overlap_rules() {
        let req = input("what's 2+2", &[("/docs/math.md", 0.5)]).restrictive(true);
        let report = evaluate(&req);
        assert!(!report.passed);
        assert_eq!(report.outcome, GateOutcome::Fail);
        assert!(report.satisfied.is_empty());
    }

    #[test]
    fn summary_without_thread_evidence_fails() {
        assert!(!decide(&input("summarize this", &[])));
        assert!(decide(&input("summarize this", &[("/threads/1", 0.0)])));
    }

    #[test]
    fn summary_with_thread_evidence_passes_even_in_restrictive_mode() {
        let req = input("요약해줘", &[("/docs/a.md", 0.9), ("/threads/1", 0.0)]).restrictive(true);
        let report = evaluate(&req);
        assert!(report.passed);
        assert_eq!(report.satisfied, vec![GateRule::SummaryRequest]);
    }

    #[test]
    fn thread_question_without_thread_evidence_falls_back_to_overlap() {
        let req = input("what is this thread about", &[("/docs/a.md", 0.1)]);
        assert!(!decide(&req));
    }

    #[test]
    fn empty_evidence_fails_in_any_mode() {
        assert!(!decide(&input("deploy it", &[])));
        assert!(!decide(&input("deploy it", &[]).restrictive(true)));
    }

    #[test]
    fn ssot_passes_regardless_of_evidence() {
        let req = input("", &[]).with_ssot(true).restrictive(true);
        let report = evaluate(&req);
        assert!(report.passed);
        assert_eq!(report.satisfied, vec![GateRule::Ssot]);
    }

    #[test]
    fn weak_threshold_subsumes_strong_threshold() {
        // Between the thresholds only the weak rule holds; the boolean verdict is
        // the same as for a strong match, the graded outcome carries a caveat.
        let weak = evaluate(&input("deploy it", &[("/docs/a.md", 0.25)]));
        assert!(weak.passed);
        assert_eq!(weak.outcome, GateOutcome::PassWithCaveat);
        assert_eq!(weak.satisfied, vec![GateRule::WeakOverlap]);

        let strong = evaluate(&input("deploy it", &[("/docs/a.md", 0.3)]));
        assert!(strong.passed);
        assert_eq!(strong.outcome, GateOutcome::Pass);

        let below = evaluate(&input("deploy it", &[("/docs/a.md", 0.19)]));
        assert!(!below.passed);
    }

    #[test]
    fn only_top_hit_counts_for_overlap() {
        let req = input("deploy it", &[("/docs/a.md", 0.1), ("/docs/b.md", 0.9)]);
        assert!(!decide(&req));
    }

    #[test]
    fn nan_overlap_never_passes_threshold() {
        let req = input("deploy it", &[("/docs/a.md", f64::NAN)]);
        assert!(!decide(&req));
    }

    #[test]
    fn custom_policy_thresholds_apply() {
        let policy = GatePolicy::from_bytes(
            "strict",
            br#"{"thresholds": {"strong_overlap": 0.8, "weak_overlap": 0.6}}"#,
            true,
        )
        .unwrap();
        let gate = EvidenceGate::new(policy);
        assert!(!gate.decide(&input("deploy it", &[("/docs/a.md", 0.5)])));
        assert!(gate.decide(&input("deploy it", &[("/docs/a.md", 0.7)])));
    }

    #[test]
    fn report_includes_source_diversity() {
        let req = input(
            "deploy it",
            &[("docs/a.md", 0.5), ("threads/1", 0.4), ("src/main.rs", 0.3)],
        );
        let report = evaluate(&req);
        assert_eq!(report.diversity.roots.len(), 3);
        assert!(report.diversity.source_diversity_ok);
    }

    fn arb_hits() -> impl Strategy<Value = Vec<(String, f64)>> {
        prop::collection::vec(
            (
                prop_oneof![Just("/docs/a.md".to_string()), Just("/threads/7".to_string())],
                0.0f64..=1.0,
            ),
            0..5,
        )
    }

    fn build(query: &str, hits: &[(String, f64)], ssot: bool, restrictive: bool) -> GateInput {
        GateInput::new(
            query,
            hits.iter()
                .map(|(path, overlap)| EvidenceHit::new(path.clone(), *overlap))
                .collect(),
        )
        .with_ssot(ssot)
        .restrictive(restrictive)
    }

    proptest! {
        #[test]
        fn ssot_always_passes(query in "\\PC{0,24}", hits in arb_hits(), restrictive in any::<bool>()) {
            prop_assert!(decide(&build(&query, &hits, true, restrictive)));
        }

        #[test]
        fn decide_is_idempotent(query in "\\PC{0,24}", hits in arb_hits(), ssot in any::<bool>(), restrictive in any::<bool>()) {
            let req = build(&query, &hits, ssot, restrictive);
            prop_assert_eq!(evaluate(&req), evaluate(&req));
        }

        #[test]
        fn raising_overlap_never_flips_pass_to_fail(
            query in "\\PC{0,24}",
            hits in arb_hits(),
            idx in 0usize..5,
            bump in 0.0f64..=1.0,
            ssot in any::<bool>(),
            restrictive in any::<bool>(),
        ) {
            let before = build(&query, &hits, ssot, restrictive);
            let mut raised = hits.clone();
            if let Some(hit) = raised.get_mut(idx) {
                hit.1 = (hit.1 + bump).min(1.0);
            }
            let after = build(&query, &raised, ssot, restrictive);
            if decide(&before) {
                prop_assert!(decide(&after));
            }
        }

        #[test]
        fn restrictive_without_ssot_or_thread_intent_fails(hits in arb_hits()) {
            let docs_only: Vec<(String, f64)> = hits
                .into_iter()
                .map(|(_, overlap)| ("/docs/a.md".to_string(), overlap))
                .collect();
            prop_assert!(!decide(&build("deploy it", &docs_only, false, true)));
        }
    }
}
