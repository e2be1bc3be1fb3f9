//! Inline annotation tokens embedded in campaign-note text.
//!
//! Recognized kinds:
//! - Internal links: `[[Note]]`, `[[folder/Note#Header|label]]`, embeds `![[Image]]`
//! - External references: `{{open5e:spells/fireball}}`
//! - Inline comments: `%%remember to foreshadow this%%`
//!
//! Token recognition is structural: a token counts only when it is
//! well-formed (opened and closed on the same line, non-empty target).

mod link;

pub use link::{Fragment, WikiLink};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The kind of an annotation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenKind {
    InternalLink,
    ExternalRef,
    Comment,
}

/// A reference into an external source such as the Open5e SRD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRef {
    /// Source namespace: "open5e"
    pub source: String,
    /// Path inside the source: "spells/fireball"
    pub path: String,
}

/// A single parsed annotation token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Annotation {
    InternalLink(WikiLink),
    ExternalRef(ExternalRef),
    Comment { body: String },
}

impl Annotation {
    pub fn kind(&self) -> TokenKind {
        match self {
            Annotation::InternalLink(_) => TokenKind::InternalLink,
            Annotation::ExternalRef(_) => TokenKind::ExternalRef,
            Annotation::Comment { .. } => TokenKind::Comment,
        }
    }
}

/// Token counts broken down by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    pub internal_links: usize,
    pub external_refs: usize,
    pub comments: usize,
}

impl TokenCounts {
    pub fn get(&self, kind: TokenKind) -> usize {
        match kind {
            TokenKind::InternalLink => self.internal_links,
            TokenKind::ExternalRef => self.external_refs,
            TokenKind::Comment => self.comments,
        }
    }

    pub fn total(&self) -> usize {
        self.internal_links + self.external_refs + self.comments
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn record(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::InternalLink => self.internal_links += 1,
            TokenKind::ExternalRef => self.external_refs += 1,
            TokenKind::Comment => self.comments += 1,
        }
    }
}

/// Parse every annotation token in `text`, in order of appearance.
pub fn parse_annotations(text: &str) -> Vec<Annotation> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut found = Vec::new();
    let mut i = 0;

    while i < len {
        if let Some((annotation, end)) = parse_token_at(&chars, i) {
            found.push(annotation);
            i = end;
            continue;
        }
        i += 1;
    }

    found
}

/// Count annotation tokens in `text` by kind.
pub fn count_tokens(text: &str) -> TokenCounts {
    let mut counts = TokenCounts::default();
    for annotation in parse_annotations(text) {
        counts.record(annotation.kind());
    }
    counts
}

/// Parse only the internal links in `text`.
pub fn parse_wiki_links(text: &str) -> Vec<WikiLink> {
    parse_annotations(text)
        .into_iter()
        .filter_map(|a| match a {
            Annotation::InternalLink(link) => Some(link),
            _ => None,
        })
        .collect()
}

/// Extract all unique page names linked from `text`, first occurrence first.
pub fn extract_linked_notes(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    parse_wiki_links(text)
        .into_iter()
        .filter(|link| seen.insert(link.name.clone()))
        .map(|link| link.name)
        .collect()
}

fn parse_token_at(chars: &[char], i: usize) -> Option<(Annotation, usize)> {
    let len = chars.len();
    let at = |offset: usize, c: char| i + offset < len && chars[i + offset] == c;

    if at(0, '!') && at(1, '[') && at(2, '[') {
        return link::parse_link_at(chars, i + 1, true)
            .map(|(link, end)| (Annotation::InternalLink(link), end));
    }
    if at(0, '[') && at(1, '[') {
        return link::parse_link_at(chars, i, false)
            .map(|(link, end)| (Annotation::InternalLink(link), end));
    }
    if at(0, '{') && at(1, '{') {
        return parse_external_ref_at(chars, i);
    }
    if at(0, '%') && at(1, '%') {
        return parse_comment_at(chars, i);
    }
    None
}

/// `{{source:path}}`
fn parse_external_ref_at(chars: &[char], start: usize) -> Option<(Annotation, usize)> {
    let (body, end) = delimited(chars, start + 2, ['}', '}'])?;
    let (source, path) = body.split_once(':')?;
    let source = source.trim();
    let path = path.trim();

    let valid_source = !source.is_empty()
        && source
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_source || path.is_empty() {
        return None;
    }

    Some((
        Annotation::ExternalRef(ExternalRef {
            source: source.to_string(),
            path: path.to_string(),
        }),
        end,
    ))
}

/// `%%body%%`
fn parse_comment_at(chars: &[char], start: usize) -> Option<(Annotation, usize)> {
    let (body, end) = delimited(chars, start + 2, ['%', '%'])?;
    Some((
        Annotation::Comment {
            body: body.trim().to_string(),
        },
        end,
    ))
}

/// Collect chars from `from` up to the closing two-char delimiter on the same line.
fn delimited(chars: &[char], from: usize, close: [char; 2]) -> Option<(String, usize)> {
    let mut i = from;
    while i + 1 < chars.len() {
        if chars[i] == '\n' {
            return None;
        }
        if chars[i] == close[0] && chars[i + 1] == close[1] {
            return Some((chars[from..i].iter().collect(), i + 2));
        }
        i += 1;
    }
    None
}
