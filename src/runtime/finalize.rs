//! Final text reconciliation.

use serde::{Deserialize, Serialize};

use crate::core::context::StreamContext;
use crate::core::history::is_usable_text;

/// Prefix marking error text that replaced a response.
pub const ERROR_MARKER: &str = "[Error]";

/// Data delivered alongside the end of a stream rather than through chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutOfBandPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutOfBandPayload {
    #[must_use]
    pub fn full_response(text: impl Into<String>) -> Self {
        Self {
            full_response: Some(text.into()),
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            full_response: None,
            error: Some(message.into()),
        }
    }
}

#[must_use]
pub fn error_marked(message: &str) -> String {
    format!("{ERROR_MARKER} {message}")
}

/// Decides the text a finalized stream settles on.
///
/// Usable accumulated text always wins. Otherwise a group stream may take the out-of-band
/// full response; any stream with an error payload shows the marked error; everything else
/// settles on empty text so a placeholder never becomes the final answer.
#[must_use]
pub fn reconcile_final_text(
    context: &StreamContext,
    accumulated: &str,
    payload: Option<&OutOfBandPayload>,
) -> String {
    if is_usable_text(accumulated) {
        return accumulated.to_string();
    }
    let Some(payload) = payload else {
        return String::new();
    };
    if context.is_group {
        if let Some(response) = payload
            .full_response
            .as_deref()
            .filter(|response| is_usable_text(response))
        {
            return response.to_string();
        }
    }
    match payload.error.as_deref().map(str::trim) {
        Some(message) if !message.is_empty() => error_marked(message),
        _ => String::new(),
    }
}
