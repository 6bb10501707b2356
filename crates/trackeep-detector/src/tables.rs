//! Pattern tables driving detection. Each table is plain data, scanned in
//! order, so a new host family or phrase family is one more row.

use once_cell::sync::Lazy;
use regex::Regex;

use trackeep_types::models::{AttachmentKind, SuggestionType};

/// What a recognised host turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkKind {
    pub attachment: AttachmentKind,
    pub suggestion: SuggestionType,
}

pub const VIDEO: LinkKind = LinkKind {
    attachment: AttachmentKind::Youtube,
    suggestion: SuggestionType::SaveYoutube,
};

pub const CODE: LinkKind = LinkKind {
    attachment: AttachmentKind::Github,
    suggestion: SuggestionType::LinkGithub,
};

/// Anything no host rule claims.
pub const WEBSITE: LinkKind = LinkKind {
    attachment: AttachmentKind::Website,
    suggestion: SuggestionType::SaveBookmark,
};

pub struct HostRule {
    /// Matches the host itself or any subdomain of it.
    pub domains: &'static [&'static str],
    pub kind: LinkKind,
}

pub const URL_KIND_TABLE: &[HostRule] = &[
    HostRule {
        domains: &["youtube.com", "youtu.be", "youtube-nocookie.com"],
        kind: VIDEO,
    },
    HostRule {
        domains: &["github.com", "githubusercontent.com"],
        kind: CODE,
    },
];

pub fn classify_host(host: &str) -> LinkKind {
    let host = host.trim_end_matches('.');
    URL_KIND_TABLE
        .iter()
        .find(|rule| {
            rule.domains.iter().any(|domain| {
                host == *domain
                    || host
                        .strip_suffix(domain)
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
        })
        .map(|rule| rule.kind)
        .unwrap_or(WEBSITE)
}

/// Bare `www.` hosts are accepted and treated as https.
pub static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"'`]+"#).expect("Invalid URL pattern regex")
});

pub struct IntentRule {
    pub suggestion: SuggestionType,
    pub pattern: Regex,
}

pub static INTENT_TABLE: Lazy<Vec<IntentRule>> = Lazy::new(|| {
    vec![
        IntentRule {
            suggestion: SuggestionType::CreateTask,
            pattern: Regex::new(
                r"(?i)\b(?:todo|to-do|to do list|remind me|don'?t forget|need to|needs to|have to|has to|must|action items?|follow up on|task)\b",
            )
            .expect("Invalid task intent regex"),
        },
        IntentRule {
            suggestion: SuggestionType::CreateEvent,
            pattern: Regex::new(
                r"(?i)\b(?:meeting|meetup|meet up|appointment|schedule[ds]?|call at|tomorrow|tonight|today at|deadline|due (?:on|by)|(?:next|on|this) (?:week|month|monday|tuesday|wednesday|thursday|friday|saturday|sunday|weekend)|at \d{1,2}(?::\d{2})?\s?(?:am|pm))\b",
            )
            .expect("Invalid event intent regex"),
        },
        IntentRule {
            suggestion: SuggestionType::SaveSearch,
            pattern: Regex::new(
                r"(?i)\b(?:how (?:do|does|to|can)|what (?:is|are)|where (?:is|can)|why (?:is|does)|search for|look up|lookup|google it|find out|anyone know)\b",
            )
            .expect("Invalid search intent regex"),
        },
    ]
});

pub struct SensitiveRule {
    pub name: &'static str,
    pub pattern: Regex,
}

pub static SENSITIVE_TABLE: Lazy<Vec<SensitiveRule>> = Lazy::new(|| {
    let rule = |name: &'static str, pattern: &str| SensitiveRule {
        name,
        pattern: Regex::new(pattern).expect("Invalid sensitive-data regex"),
    };
    vec![
        rule(
            "credential_assignment",
            r"(?i)\b(?:password|passwd|pwd|passcode|pin|secret|client[_-]?secret|api[_-]?key|apikey|access[_-]?key|auth[_-]?token|token|private[_-]?key)\s*[:=]\s*\S+",
        ),
        rule(
            "credential_phrase",
            r"(?i)\bmy (?:password|passcode|pin|secret) is\s+\S+",
        ),
        rule("bearer_token", r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]{16,}=*"),
        rule("aws_access_key", r"\bAKIA[0-9A-Z]{16}\b"),
        rule("github_token", r"\bgh[pousr]_[A-Za-z0-9]{36,}\b"),
        rule("api_secret_key", r"\bsk-[A-Za-z0-9_-]{20,}\b"),
        rule(
            "jwt",
            r"\beyJ[A-Za-z0-9_-]{8,}\.eyJ[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}",
        ),
        rule("private_key_block", r"-----BEGIN (?:[A-Z]+ )?PRIVATE KEY-----"),
    ]
});
