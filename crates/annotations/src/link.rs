//! Internal links: `[[Page]]`, `[[folder/Page#Heading|label]]`, `![[Map]]`.

use serde::{Deserialize, Serialize};

/// What a link points at inside the target page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Fragment {
    /// `#Heading`
    Heading(String),
    /// `#^block-id`
    Block(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiLink {
    /// Folder part of the target, `None` for top-level pages.
    pub folder: Option<String>,
    /// Page name without folder or extension.
    pub name: String,
    pub extension: Option<String>,
    pub fragment: Option<Fragment>,
    /// Text after `|`.
    pub label: Option<String>,
    /// Written as `![[...]]`.
    pub embed: bool,
}

impl WikiLink {
    pub fn file_name(&self) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{ext}", self.name),
            None => self.name.clone(),
        }
    }

    /// Target without the fragment: `npcs/Strahd.md`.
    pub fn target(&self) -> String {
        match &self.folder {
            Some(folder) => format!("{folder}/{}", self.file_name()),
            None => self.file_name(),
        }
    }

    pub fn heading(&self) -> Option<&str> {
        match &self.fragment {
            Some(Fragment::Heading(heading)) => Some(heading),
            _ => None,
        }
    }

    pub fn block_ref(&self) -> Option<&str> {
        match &self.fragment {
            Some(Fragment::Block(id)) => Some(id),
            _ => None,
        }
    }

    /// What a reader sees: the label, else the page name.
    pub fn shown_as(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Parse the text between the brackets.
    pub fn parse(inner: &str, embed: bool) -> Option<Self> {
        let (target, label) = match inner.split_once('|') {
            Some((target, label)) => (target, Some(label.trim().to_string())),
            None => (inner, None),
        };

        let (path, fragment) = match target.split_once('#') {
            Some((path, rest)) => {
                let fragment = match rest.strip_prefix('^') {
                    Some(id) => Fragment::Block(id.trim().to_string()),
                    None => Fragment::Heading(rest.trim().to_string()),
                };
                (path.trim(), Some(fragment))
            }
            None => (target.trim(), None),
        };

        let (folder, file) = match path.rsplit_once('/') {
            Some((folder, file)) => (Some(folder.to_string()), file),
            None => (None, path),
        };
        let (name, extension) = match file.rsplit_once('.') {
            // `.hidden` is a name, not an extension
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext.to_string())),
            _ => (file, None),
        };
        if name.is_empty() {
            return None;
        }

        Some(WikiLink {
            folder,
            name: name.to_string(),
            extension,
            fragment,
            label,
            embed,
        })
    }
}

/// Parse a link whose `[[` opens at `start`.
///
/// Returns the link and the index just past its `]]`. A link ends at the
/// first `]]` and never crosses a newline or another `[[`.
pub(crate) fn parse_link_at(chars: &[char], start: usize, embed: bool) -> Option<(WikiLink, usize)> {
    if chars.get(start..start + 2)? != ['[', '['] {
        return None;
    }

    let body = start + 2;
    let close = chars[body..]
        .windows(2)
        .position(|pair| pair == [']', ']'])
        .map(|offset| body + offset)?;

    let inner = &chars[body..close];
    if inner.contains(&'\n') || inner.windows(2).any(|pair| pair == ['[', '[']) {
        return None;
    }

    let inner: String = inner.iter().collect();
    WikiLink::parse(&inner, embed).map(|link| (link, close + 2))
}
