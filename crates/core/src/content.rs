//! Content model: the value types exchanged with the LLM.
//!
//! Message content is a tagged union of text, image and document blocks.
//! Tool-use requests and tool results are separate block kinds that only
//! appear inside prompts (and, for tool uses, inside transport responses).

use serde::{Deserialize, Serialize};

/// Image encodings accepted as message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn media_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }
}

/// Document encodings accepted as message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Csv,
    Doc,
    Docx,
    Xls,
    Xlsx,
    Html,
    Txt,
    Md,
}

impl DocumentFormat {
    /// Whether the document bytes are plain text (as opposed to a binary container).
    pub fn is_textual(self) -> bool {
        matches!(self, Self::Csv | Self::Html | Self::Txt | Self::Md)
    }
}

/// A single block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        format: ImageFormat,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Document {
        name: String,
        format: DocumentFormat,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl ContentBlock {
    /// The text of a text block, `None` for binary blocks.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Build a text block by concatenating `parts` as-is (no separator).
pub fn text<I, S>(parts: I) -> ContentBlock
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let text = parts.into_iter().fold(String::new(), |mut acc, part| {
        acc.push_str(part.as_ref());
        acc
    });
    ContentBlock::Text { text }
}

/// A directive from the LLM to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    /// Server-issued identifier; results are keyed by it.
    pub tool_use_id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// A tool result as it is replayed to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub status: crate::tool::ResultStatus,
    pub content: Vec<ContentBlock>,
}

/// Content of a single prompt message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptContent {
    Content(ContentBlock),
    ToolUse(ToolUse),
    ToolResult(ToolResultBlock),
}

impl From<ContentBlock> for PromptContent {
    fn from(block: ContentBlock) -> Self {
        Self::Content(block)
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
