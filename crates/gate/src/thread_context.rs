use evgate_protocol::{EvidenceHit, Excerpt, ThreadSnapshot};
use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Upper bound on the rendered conversation body, in characters.
pub const THREAD_CONTEXT_MAX_CHARS: usize = 1600;

/// Renders the current conversation as a thread-provenance evidence hit so a
/// host can let the gate answer questions about "this thread".
///
/// Returns `None` for a thread without messages. Only user and assistant turns
/// are kept; the hit carries zero overlap and relies on provenance alone.
#[must_use]
pub fn thread_context_evidence(thread: &ThreadSnapshot) -> Option<EvidenceHit> {
    if thread.messages.is_empty() {
        return None;
    }

    let turns: Vec<String> = thread
        .messages
        .iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .map(|m| {
            // Runs collapse to one space; edges are not trimmed.
            let content = WHITESPACE_RUN.replace_all(&m.content, " ");
            format!("{}: {content}", m.role)
        })
        .collect();
    let body: String = turns
        .join("\n")
        .chars()
        .take(THREAD_CONTEXT_MAX_CHARS)
        .collect();

    let id = non_empty(thread.id.as_deref()).unwrap_or("CURRENT");
    let title = non_empty(thread.title.as_deref()).unwrap_or("Untitled");
    let text = format!(
        "[thread: {id}]\n[title: {title}]\n[messages: {}]\n\n{body}",
        turns.len()
    );

    Some(
        EvidenceHit::new(format!("conversations/threads/{id}.jsonl"), 0.0).with_excerpt(Excerpt {
            text,
            line_from: 1,
            line_to: 1,
        }),
    )
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::has_thread_provenance;
    use evgate_protocol::ThreadMessage;

    fn message(role: &str, content: &str) -> ThreadMessage {
        ThreadMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn empty_thread_yields_nothing() {
        assert!(thread_context_evidence(&ThreadSnapshot::default()).is_none());
    }

    #[test]
    fn renders_user_and_assistant_turns_only() {
        let thread = ThreadSnapshot {
            id: Some("t-42".to_string()),
            title: Some("Release plan".to_string()),
            messages: vec![
                message("system", "hidden"),
                message("user", "ship   it\nsoon"),
                message("assistant", "ok"),
            ],
        };
        let hit = thread_context_evidence(&thread).unwrap();
        assert_eq!(hit.path, "conversations/threads/t-42.jsonl");
        assert_eq!(hit.overlap, 0.0);
        assert!(has_thread_provenance(std::slice::from_ref(&hit)));

        let text = hit.excerpt.unwrap().text;
        assert!(text.starts_with("[thread: t-42]\n[title: Release plan]\n[messages: 2]\n\n"));
        assert!(text.contains("user: ship it soon\nassistant: ok"));
        assert!(!text.contains("hidden"));
    }

    #[test]
    fn missing_id_and_title_use_placeholders() {
        let thread = ThreadSnapshot {
            id: None,
            title: Some("   ".to_string()),
            messages: vec![message("user", "hi")],
        };
        let hit = thread_context_evidence(&thread).unwrap();
        assert_eq!(hit.path, "conversations/threads/CURRENT.jsonl");
        assert!(hit.excerpt.unwrap().text.contains("[title: Untitled]"));
    }

    #[test]
    fn whitespace_runs_collapse_without_trimming() {
        let thread = ThreadSnapshot {
            id: None,
            title: None,
            messages: vec![message("user", "\n  padded\t\tturn  ")],
        };
        let text = thread_context_evidence(&thread).unwrap().excerpt.unwrap().text;
        assert!(text.ends_with("user:  padded turn "), "{text:?}");
    }

    #[test]
    fn body_is_bounded() {
        let thread = ThreadSnapshot {
            id: Some("long".to_string()),
            title: None,
            messages: vec![message("user", &"가".repeat(5000))],
        };
        let text = thread_context_evidence(&thread).unwrap().excerpt.unwrap().text;
        let body = text.split("\n\n").nth(1).unwrap();
        assert_eq!(body.chars().count(), THREAD_CONTEXT_MAX_CHARS);
    }
}
