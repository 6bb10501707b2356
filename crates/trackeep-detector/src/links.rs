use serde_json::json;
use url::Url;

use trackeep_types::models::AttachmentKind;

use crate::tables::{LinkKind, URL_PATTERN, classify_host};
use crate::title::{TITLE_BUDGET, truncate_title};

/// A URL found in a message, already classified.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundLink {
    /// The URL as written, minus trailing sentence punctuation.
    pub text: String,
    pub url: Url,
    pub kind: LinkKind,
}

impl FoundLink {
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Denormalized preview so clients never need a follow-up fetch.
    pub fn preview(&self) -> serde_json::Value {
        match self.kind.attachment {
            AttachmentKind::Youtube => json!({
                "url": self.text,
                "provider": "YouTube",
                "video_id": youtube_video_id(&self.url),
            }),
            AttachmentKind::Github => {
                let (owner, repo) = github_owner_repo(&self.url);
                json!({
                    "url": self.text,
                    "owner": owner,
                    "repo": repo,
                    "title": self.title(),
                })
            }
            _ => json!({
                "url": self.text,
                "host": self.host(),
                "title": self.title(),
            }),
        }
    }

    pub fn title(&self) -> String {
        match self.kind.attachment {
            AttachmentKind::Youtube => match youtube_video_id(&self.url) {
                Some(id) => format!("YouTube video {}", id),
                None => "YouTube video".to_string(),
            },
            AttachmentKind::Github => match github_owner_repo(&self.url) {
                (Some(owner), Some(repo)) => format!("{}/{}", owner, repo),
                (Some(owner), None) => owner,
                _ => "GitHub".to_string(),
            },
            _ => {
                let host = self.host().trim_start_matches("www.");
                let path = self.url.path().trim_end_matches('/');
                truncate_title(&format!("{}{}", host, path), TITLE_BUDGET)
            }
        }
    }

    /// Payload of the link-type suggestion for this URL.
    pub fn suggestion_payload(&self) -> serde_json::Value {
        match self.kind.attachment {
            AttachmentKind::Youtube => json!({
                "url": self.text,
                "video_id": youtube_video_id(&self.url),
            }),
            AttachmentKind::Github => {
                let (owner, repo) = github_owner_repo(&self.url);
                json!({ "url": self.text, "owner": owner, "repo": repo })
            }
            _ => json!({ "url": self.text, "title": self.title() }),
        }
    }
}

/// Every distinct URL in `text`, in order of first appearance.
pub fn find_links(text: &str) -> Vec<FoundLink> {
    let mut links: Vec<FoundLink> = Vec::new();

    for m in URL_PATTERN.find_iter(text) {
        let cleaned = strip_trailing_punctuation(m.as_str());
        let parsed = if cleaned.len() >= 4 && cleaned[..4].eq_ignore_ascii_case("www.") {
            Url::parse(&format!("https://{}", cleaned))
        } else {
            Url::parse(cleaned)
        };

        let Ok(url) = parsed else { continue };
        let Some(host) = url.host_str() else { continue };
        if links.iter().any(|l| l.url == url) {
            continue;
        }

        let kind = classify_host(host);
        links.push(FoundLink {
            text: cleaned.to_string(),
            url,
            kind,
        });
    }

    links
}

/// Remove what a URL picks up from the sentence around it: a final period or
/// comma, or a closing bracket that was never opened inside the URL.
fn strip_trailing_punctuation(mut s: &str) -> &str {
    loop {
        let Some(last) = s.chars().last() else { return s };
        let strip = match last {
            '.' | ',' | ';' | ':' | '!' | '?' | '\'' | '"' => true,
            ')' => s.matches(')').count() > s.matches('(').count(),
            ']' => s.matches(']').count() > s.matches('[').count(),
            '}' => s.matches('}').count() > s.matches('{').count(),
            _ => false,
        };
        if !strip {
            return s;
        }
        s = &s[..s.len() - last.len_utf8()];
    }
}

fn youtube_video_id(url: &Url) -> Option<String> {
    let host = url.host_str().unwrap_or_default();
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

    if host == "youtu.be" || host.ends_with(".youtu.be") {
        return segments.next().map(str::to_string);
    }

    match segments.next() {
        Some("watch") => url
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned()),
        Some("shorts" | "embed" | "live" | "v") => segments.next().map(str::to_string),
        _ => None,
    }
}

fn github_owner_repo(url: &Url) -> (Option<String>, Option<String>) {
    let Some(mut segments) = url.path_segments() else {
        return (None, None);
    };
    let owner = segments.next().filter(|s| !s.is_empty()).map(str::to_string);
    let repo = segments
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches(".git").to_string());
    (owner, repo)
}
