//! Chunk payload extraction.
//!
//! Upstream drivers deliver partial content in a handful of shapes. Extraction tries a fixed,
//! ordered list of extractors and reports anything else as unrecognized instead of
//! stringifying it.

use serde_json::Value;

/// Error tag used by upstream drivers for payloads they failed to parse.
pub const JSON_PARSE_ERROR: &str = "json_parse_error";

/// One raw chunk as delivered by the upstream driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    Json(Value),
    Text(String),
}

impl From<Value> for ChunkPayload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<&str> for ChunkPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ChunkPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Result of extracting displayable text from a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkText {
    Text(String),
    /// The payload had a recognized shape but carried no text.
    Empty,
    /// The upstream flagged the payload as an error; `raw` is kept for logging only.
    ErrorFlagged { raw: Option<String> },
    Unrecognized,
}

impl ChunkText {
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

type Extractor = fn(&Value) -> Option<ChunkText>;

const EXTRACTORS: [Extractor; 6] = [
    error_flagged,
    choices_delta_content,
    delta_content,
    content_field,
    bare_string,
    raw_fallback,
];

/// Extracts the text carried by `payload`.
#[must_use]
pub fn extract_text(payload: &ChunkPayload) -> ChunkText {
    match payload {
        ChunkPayload::Text(text) if text.is_empty() => ChunkText::Empty,
        ChunkPayload::Text(text) => ChunkText::Text(text.clone()),
        ChunkPayload::Json(value) => EXTRACTORS
            .iter()
            .find_map(|extractor| extractor(value))
            .unwrap_or(ChunkText::Unrecognized),
    }
}

fn error_flagged(value: &Value) -> Option<ChunkText> {
    let error = value.get("error")?;
    let raw = value.get("raw").and_then(Value::as_str).map(str::to_string);
    if error.as_str() == Some(JSON_PARSE_ERROR) || raw.is_some() {
        return Some(ChunkText::ErrorFlagged { raw });
    }
    None
}

fn choices_delta_content(value: &Value) -> Option<ChunkText> {
    let content = value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;
    (!content.is_empty()).then(|| ChunkText::Text(content.to_string()))
}

fn delta_content(value: &Value) -> Option<ChunkText> {
    let content = value.get("delta")?.get("content")?.as_str()?;
    Some(text_or_empty(content))
}

fn content_field(value: &Value) -> Option<ChunkText> {
    let content = value.get("content")?.as_str()?;
    Some(text_or_empty(content))
}

fn bare_string(value: &Value) -> Option<ChunkText> {
    value.as_str().map(text_or_empty)
}

fn raw_fallback(value: &Value) -> Option<ChunkText> {
    let raw = value.get("raw")?.as_str()?;
    Some(text_or_empty(raw))
}

fn text_or_empty(text: &str) -> ChunkText {
    if text.is_empty() {
        ChunkText::Empty
    } else {
        ChunkText::Text(text.to_string())
    }
}
