//! # Evidence Gate
//!
//! Decides whether an assistant may answer a query given ranked evidence, the
//! query's intent, an optional SSOT override and a restrictive-mode flag.
//!
//! ```text
//! GateInput ──> Intent classifiers (thread / summary)
//!     │
//!     ├──> Evidence inspector (top overlap, thread provenance, diversity)
//!     │
//!     └──> Rules (OR) ──> GateReport { outcome, passed, satisfied, .. }
//! ```
//!
//! All functions here are synchronous and pure. Callers own what happens on a
//! failing verdict; typically an "insufficient evidence" reply.
//!
//! ## Example
//!
//! ```
//! use evgate_gate::decide;
//! use evgate_protocol::{EvidenceHit, GateInput};
//!
//! let input = GateInput::new("what's 2+2", vec![EvidenceHit::new("/docs/math.md", 0.5)]);
//! assert!(decide(&input));
//! assert!(!decide(&input.restrictive(true)));
//! ```

mod decide;
mod inspect;
mod policy;
mod thread_context;

pub use decide::{decide, evaluate, EvidenceGate};
pub use inspect::{
    has_provenance, has_thread_provenance, source_diversity, source_root, top_overlap,
    MatchKind, PathMatcher, ProvenanceRules, THREAD_MARKER,
};
pub use policy::{GatePolicy, Thresholds, POLICY_ENV};
pub use thread_context::{thread_context_evidence, THREAD_CONTEXT_MAX_CHARS};
