//! Content detection for chat messages.
//!
//! `detect` turns raw message text into derived attachments (link previews),
//! actionable suggestions and a sensitivity verdict. It is pure and total:
//! no I/O, no shared mutable state, and every input yields a valid result,
//! so it can be called from any number of tasks at once.

pub mod links;
pub mod tables;
pub mod title;

use std::collections::HashSet;

use serde::Serialize;
use serde_json::json;

use trackeep_types::models::{NewAttachment, NewSuggestion, SuggestionType};

use crate::tables::{INTENT_TABLE, SENSITIVE_TABLE, URL_PATTERN};
use crate::title::{TITLE_BUDGET, truncate_title};

pub use links::{FoundLink, find_links};

const REDACTED: &str = "[redacted]";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Detection {
    pub suggestions: Vec<NewSuggestion>,
    pub attachments: Vec<NewAttachment>,
    pub sensitive: bool,
}

impl Detection {
    pub fn has_suggestion(&self, kind: SuggestionType) -> bool {
        self.suggestions.iter().any(|s| s.kind == kind)
    }

    /// Suggestions that only the author should see before acting on them.
    pub fn private_suggestions(&self) -> impl Iterator<Item = &NewSuggestion> {
        self.suggestions.iter().filter(|s| s.kind.is_author_only())
    }
}

pub fn detect(body: &str) -> Detection {
    let body = body.trim();
    if body.is_empty() {
        return Detection::default();
    }

    let mut detection = Detection::default();
    let mut seen: HashSet<(SuggestionType, String)> = HashSet::new();

    for link in find_links(body) {
        detection.attachments.push(NewAttachment {
            kind: link.kind.attachment,
            title: link.title(),
            url: Some(link.text.clone()),
            preview: link.preview(),
        });

        if seen.insert((link.kind.suggestion, link.text.clone())) {
            detection.suggestions.push(NewSuggestion {
                kind: link.kind.suggestion,
                payload: link.suggestion_payload(),
            });
        }
    }

    let sensitive_rule = SENSITIVE_TABLE
        .iter()
        .find(|rule| rule.pattern.is_match(body))
        .map(|rule| rule.name);

    let title_source = title_source(body, sensitive_rule.is_some());

    for rule in INTENT_TABLE.iter() {
        if !rule.pattern.is_match(body) {
            continue;
        }
        let payload = match rule.suggestion {
            SuggestionType::CreateTask => json!({ "title": task_title(&title_source) }),
            SuggestionType::SaveSearch => {
                json!({ "query": truncate_title(&title_source, TITLE_BUDGET) })
            }
            _ => json!({ "title": truncate_title(&title_source, TITLE_BUDGET) }),
        };
        detection.suggestions.push(NewSuggestion {
            kind: rule.suggestion,
            payload,
        });
    }

    if let Some(pattern) = sensitive_rule {
        detection.sensitive = true;
        detection.suggestions.push(NewSuggestion {
            kind: SuggestionType::PasswordWarning,
            payload: json!({
                "message": "This message looks like it contains a password or secret. Consider removing it from the chat.",
                "dismissible": false,
                "pattern": pattern,
            }),
        });
        detection.suggestions.push(NewSuggestion {
            kind: SuggestionType::MoveToPasswordVault,
            payload: json!({
                "title": "Secret shared in chat",
                "pattern": pattern,
            }),
        });
    }

    detection
}

/// Text used for derived titles: links removed, secrets redacted.
fn title_source(body: &str, sensitive: bool) -> String {
    let mut text = URL_PATTERN.replace_all(body, "").into_owned();
    if sensitive {
        for rule in SENSITIVE_TABLE.iter() {
            text = rule.pattern.replace_all(&text, REDACTED).into_owned();
        }
    }
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        body.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        text
    }
}

/// Drop a leading "TODO:" style marker, which adds nothing to a task title.
fn task_title(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let stripped = ["todo:", "todo ", "to-do:", "task:", "reminder:"]
        .iter()
        .find(|marker| lower.starts_with(*marker))
        .map(|marker| text[marker.len()..].trim_start())
        .filter(|rest| !rest.is_empty())
        .unwrap_or(text);
    truncate_title(stripped, TITLE_BUDGET)
}
