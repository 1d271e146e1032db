//! Markdown to markup translation.

use std::sync::OnceLock;

use markdown::{to_html_with_options, Options};
use regex::Regex;
use thiserror::Error;

/// Comment inserted between an image and a directly following code fence.
pub const STREAM_SEPARATOR: &str = "<!-- stream-separator -->";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("markup translation failed: {message}")]
pub struct MarkupError {
    pub message: String,
}

impl MarkupError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Translates accumulated text into markup for the surface.
pub trait MarkupRenderer {
    /// Markup for an intermediate frame. The text may be syntactically incomplete.
    fn streaming_markup(&self, text: &str) -> Result<String, MarkupError>;

    /// Markup for the single high-fidelity render at finalization.
    fn final_markup(&self, text: &str) -> Result<String, MarkupError>;
}

/// GitHub-flavored markdown via the `markdown` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownMarkup;

impl MarkdownMarkup {
    fn translate(text: &str) -> Result<String, MarkupError> {
        let mut options = Options::gfm();
        options.compile.allow_dangerous_html = true;
        to_html_with_options(text, &options).map_err(|err| MarkupError::new(err.to_string()))
    }
}

impl MarkupRenderer for MarkdownMarkup {
    fn streaming_markup(&self, text: &str) -> Result<String, MarkupError> {
        Self::translate(&apply_streaming_preprocessors(text))
    }

    fn final_markup(&self, text: &str) -> Result<String, MarkupError> {
        Self::translate(&strip_speaker_tags(text))
    }
}

fn speaker_tag_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?m)^\[[^\]\n]*?的发言\]:\s*").expect("speaker tag regex must compile")
    })
}

fn glued_fence_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*```)([^\r\n\w`-])").expect("fence regex must compile")
    })
}

fn image_fence_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(<img[^>]+>)[ \t]*\n?[ \t]*(```)").expect("image fence regex must compile")
    })
}

fn strip_speaker_tags(text: &str) -> String {
    speaker_tag_regex().replace_all(text, "").into_owned()
}

/// Puts a space after a `~` that would otherwise open a strikethrough.
///
/// A `~` qualifies at the start of the text or after any char except a word char, `/`, a
/// backslash, `=` or `~`, and only when the next char is not whitespace or `~`.
fn space_after_tildes(text: &str) -> String {
    let mut spaced = String::with_capacity(text.len());
    let mut previous: Option<char> = None;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        spaced.push(ch);
        let opens = previous.map_or(true, |prev| {
            !(prev.is_alphanumeric() || matches!(prev, '_' | '/' | '\\' | '=' | '~'))
        });
        let followed = chars
            .peek()
            .map_or(true, |next| !next.is_whitespace() && *next != '~');
        if ch == '~' && opens && followed {
            spaced.push(' ');
        }
        previous = Some(ch);
    }
    spaced
}

/// Normalizes partial text so intermediate frames render predictably.
///
/// Strips `[<name>的发言]: ` speaker prefixes, breaks a line after a fence opener glued to
/// content, spaces out `~` before non-space (so it is not read as strikethrough), and keeps
/// an `<img>` from swallowing a directly following code fence.
#[must_use]
pub fn apply_streaming_preprocessors(text: &str) -> String {
    let text = strip_speaker_tags(text);
    let text = glued_fence_regex().replace_all(&text, "$1\n$2");
    let text = space_after_tildes(&text);
    image_fence_regex()
        .replace_all(&text, format!("$1\n\n{STREAM_SEPARATOR}\n\n$2").as_str())
        .into_owned()
}
