//! Block model: identifiers, typed bodies, and the JSON wire form.
//!
//! A page is a forest of blocks. Each block carries a `type` tag plus
//! `props`/`content` maps whose shape depends on the type. Known types are
//! parsed into typed structs; unknown keys are kept in `extra` maps so a
//! round trip through the store never drops server data.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Open JSON object used for `props` and `content`.
pub type JsonMap = Map<String, Value>;

/// Errors raised when a block body fails validation.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("invalid {field} for {block_type} block: {source}")]
    InvalidField {
        block_type: String,
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{block_type} level {level} is out of range {min}..={max}")]
    InvalidLevel {
        block_type: String,
        level: u8,
        min: u8,
        max: u8,
    },

    #[error("{0} must be a JSON object")]
    NotAnObject(&'static str),
}

pub type Result<T> = std::result::Result<T, BlockError>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random id.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Server-assigned block identifier.
    BlockId
);

string_id!(
    /// Identifier of the page a block belongs to.
    PageId
);

/// Section levels allowed by the outline.
pub const SECTION_LEVELS: std::ops::RangeInclusive<u8> = 1..=3;

/// Heading levels accepted from legacy data.
pub const HEADING_LEVELS: std::ops::RangeInclusive<u8> = 1..=6;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// Content of text-bearing blocks (paragraphs, legacy headings).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextContent {
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadingProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionProps {
    /// Outline level. A section without a level is "plain".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionContent {
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableData {
    #[serde(default)]
    pub columns: Vec<Value>,
    #[serde(default)]
    pub rows: Vec<Value>,
    #[serde(default)]
    pub has_header: bool,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableContent {
    #[serde(default)]
    pub table: TableData,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// Type-tagged block body.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockBody {
    Paragraph {
        props: ParagraphProps,
        content: TextContent,
    },
    /// Legacy heading, upgraded to a section by the outline normalizer.
    Heading {
        props: HeadingProps,
        content: TextContent,
    },
    Section {
        props: SectionProps,
        content: SectionContent,
    },
    Divider {
        props: JsonMap,
        content: JsonMap,
    },
    Table {
        props: JsonMap,
        content: TableContent,
    },
    /// Any type this crate does not know, carried verbatim.
    Other {
        block_type: String,
        props: JsonMap,
        content: JsonMap,
    },
}

impl BlockBody {
    pub fn paragraph(text: impl Into<String>) -> Self {
        BlockBody::Paragraph {
            props: ParagraphProps::default(),
            content: TextContent {
                text: text.into(),
                extra: JsonMap::new(),
            },
        }
    }

    pub fn section(title: impl Into<String>, level: Option<u8>) -> Self {
        BlockBody::Section {
            props: SectionProps {
                level,
                ..Default::default()
            },
            content: SectionContent {
                title: title.into(),
                extra: JsonMap::new(),
            },
        }
    }

    pub fn heading(text: impl Into<String>, level: Option<u8>) -> Self {
        BlockBody::Heading {
            props: HeadingProps {
                level,
                extra: JsonMap::new(),
            },
            content: TextContent {
                text: text.into(),
                extra: JsonMap::new(),
            },
        }
    }

    pub fn divider() -> Self {
        BlockBody::Divider {
            props: JsonMap::new(),
            content: JsonMap::new(),
        }
    }

    /// Build a body from its wire parts, validating known types.
    pub fn from_parts(block_type: &str, props: JsonMap, content: JsonMap) -> Result<Self> {
        let body = match block_type {
            "paragraph" => BlockBody::Paragraph {
                props: typed(block_type, "props", props)?,
                content: typed(block_type, "content", content)?,
            },
            "heading" => {
                let props: HeadingProps = typed(block_type, "props", props)?;
                check_level(block_type, props.level, HEADING_LEVELS)?;
                BlockBody::Heading {
                    props,
                    content: typed(block_type, "content", content)?,
                }
            }
            "section" => {
                let props: SectionProps = typed(block_type, "props", props)?;
                check_level(block_type, props.level, SECTION_LEVELS)?;
                BlockBody::Section {
                    props,
                    content: typed(block_type, "content", content)?,
                }
            }
            "divider" => BlockBody::Divider { props, content },
            "table" => BlockBody::Table {
                props,
                content: typed(block_type, "content", content)?,
            },
            other => BlockBody::Other {
                block_type: other.to_string(),
                props,
                content,
            },
        };
        Ok(body)
    }

    /// Split into `(type, props, content)` wire parts.
    pub fn to_parts(&self) -> (String, JsonMap, JsonMap) {
        match self {
            BlockBody::Paragraph { props, content } => {
                ("paragraph".into(), to_map(props), to_map(content))
            }
            BlockBody::Heading { props, content } => {
                ("heading".into(), to_map(props), to_map(content))
            }
            BlockBody::Section { props, content } => {
                ("section".into(), to_map(props), to_map(content))
            }
            BlockBody::Divider { props, content } => {
                ("divider".into(), props.clone(), content.clone())
            }
            BlockBody::Table { props, content } => ("table".into(), props.clone(), to_map(content)),
            BlockBody::Other {
                block_type,
                props,
                content,
            } => (block_type.clone(), props.clone(), content.clone()),
        }
    }

    pub fn block_type(&self) -> &str {
        match self {
            BlockBody::Paragraph { .. } => "paragraph",
            BlockBody::Heading { .. } => "heading",
            BlockBody::Section { .. } => "section",
            BlockBody::Divider { .. } => "divider",
            BlockBody::Table { .. } => "table",
            BlockBody::Other { block_type, .. } => block_type,
        }
    }

    /// The free-text field guarded against annotation loss (`content.text`).
    pub fn text(&self) -> Option<&str> {
        match self {
            BlockBody::Paragraph { content, .. } | BlockBody::Heading { content, .. } => {
                Some(&content.text)
            }
            BlockBody::Other { content, .. } => content.get("text").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// A block as held by the store.
///
/// Serializes to the camelCase wire form
/// `{id, pageId, type, parentId, sort, props, content, createdAt}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBlock", into = "RawBlock")]
pub struct Block {
    pub id: BlockId,
    pub page_id: PageId,
    pub parent_id: Option<BlockId>,
    pub sort: u32,
    pub body: BlockBody,
    pub created_at: DateTime<Utc>,
}

impl Block {
    pub fn block_type(&self) -> &str {
        self.body.block_type()
    }

    pub fn is_section(&self) -> bool {
        matches!(self.body, BlockBody::Section { .. })
    }

    pub fn text(&self) -> Option<&str> {
        self.body.text()
    }

    /// Overwrite this block's fields from an authoritative copy.
    ///
    /// Structural fields are only taken when `structural` is set, so a
    /// content-only save cannot revert a local reorder that is still in flight.
    pub fn reconcile(&mut self, server: &Block, structural: bool) {
        self.page_id = server.page_id.clone();
        self.body = server.body.clone();
        self.created_at = server.created_at;
        if structural {
            self.parent_id = server.parent_id.clone();
            self.sort = server.sort;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    id: BlockId,
    page_id: PageId,
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    parent_id: Option<BlockId>,
    sort: u32,
    #[serde(default, deserialize_with = "object_or_null")]
    props: JsonMap,
    #[serde(default, deserialize_with = "object_or_null")]
    content: JsonMap,
    created_at: DateTime<Utc>,
}

impl TryFrom<RawBlock> for Block {
    type Error = BlockError;

    fn try_from(raw: RawBlock) -> Result<Self> {
        Ok(Block {
            body: BlockBody::from_parts(&raw.block_type, raw.props, raw.content)?,
            id: raw.id,
            page_id: raw.page_id,
            parent_id: raw.parent_id,
            sort: raw.sort,
            created_at: raw.created_at,
        })
    }
}

impl From<Block> for RawBlock {
    fn from(block: Block) -> Self {
        let (block_type, props, content) = block.body.to_parts();
        RawBlock {
            id: block.id,
            page_id: block.page_id,
            block_type,
            parent_id: block.parent_id,
            sort: block.sort,
            props,
            content,
            created_at: block.created_at,
        }
    }
}

fn object_or_null<'de, D>(deserializer: D) -> std::result::Result<JsonMap, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(JsonMap::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(de::Error::custom(format!(
            "expected an object, found {other}"
        ))),
    }
}

fn typed<T: serde::de::DeserializeOwned>(
    block_type: &str,
    field: &'static str,
    map: JsonMap,
) -> Result<T> {
    serde_json::from_value(Value::Object(map)).map_err(|source| BlockError::InvalidField {
        block_type: block_type.to_string(),
        field,
        source,
    })
}

fn check_level(
    block_type: &str,
    level: Option<u8>,
    range: std::ops::RangeInclusive<u8>,
) -> Result<()> {
    match level {
        Some(level) if !range.contains(&level) => Err(BlockError::InvalidLevel {
            block_type: block_type.to_string(),
            level,
            min: *range.start(),
            max: *range.end(),
        }),
        _ => Ok(()),
    }
}

/// Serialize a typed struct back into an open map.
pub(crate) fn to_map<T: Serialize>(value: &T) -> JsonMap {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => JsonMap::new(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Build a block with a fixed timestamp for tests.
    pub fn block(id: &str, parent: Option<&str>, sort: u32, body: BlockBody) -> Block {
        Block {
            id: BlockId::from(id),
            page_id: PageId::from("page"),
            parent_id: parent.map(BlockId::from),
            sort,
            body,
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        }
    }

    pub fn para(id: &str, parent: Option<&str>, sort: u32) -> Block {
        block(id, parent, sort, BlockBody::paragraph(id))
    }

    pub fn section(id: &str, parent: Option<&str>, sort: u32, level: Option<u8>) -> Block {
        block(id, parent, sort, BlockBody::section(id, level))
    }
}
