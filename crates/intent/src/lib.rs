//! Lexical intent classifiers.
//!
//! Intents are recognised by a data-driven list of `(label, pattern, language)`
//! entries rather than hardcoded regexes, so new phrasings or languages only
//! touch the pattern file. Matching is a case-insensitive regex search anywhere
//! in the query; queries are never tokenised. Phrasings outside the pattern set
//! are simply not recognised.

mod error;
mod pattern;
mod set;

pub use error::{IntentError, Result};
pub use pattern::{IntentKind, IntentPattern, LanguageTag};
pub use set::{builtin_patterns, IntentMatches, IntentPatternSet};

/// Does the query refer to "this thread/conversation", ask whether the assistant
/// knows or remembers something, or ask what the discussion is about?
#[must_use]
pub fn is_thread_reference(query: &str) -> bool {
    builtin_patterns().matches(IntentKind::ThreadReference, query)
}

#[must_use]
pub fn is_summary_request(query: &str) -> bool {
    builtin_patterns().matches(IntentKind::SummaryRequest, query)
}
