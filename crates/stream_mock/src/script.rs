use serde_json::{json, Value};
use tape_stream::{StreamEvent, WireContext};

/// Markdown reply used by the default script.
pub const DEMO_RESPONSE: &str = r#"# Streaming demo
A deterministic reply that exercises **bold**, *italic*, and `inline code`.

## Lists
- Unordered item one
  - Nested item
1. Ordered step one
2. Ordered step two

> Quotes keep their formatting while text streams in.

```rust
fn main() {
    println!("Hello, stream");
}
```

| Feature | Supported |
| --- | --- |
| Tables | yes |

Completed successfully.
"#;

/// How data chunks are encoded on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChunkStyle {
    /// Bare JSON strings.
    Text,
    /// Chat-completion deltas: `{"choices": [{"delta": {"content": ...}}]}`.
    #[default]
    Delta,
}

/// How a script terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ending {
    /// `end` without a finish reason.
    Completed,
    /// `end` with an explicit finish reason.
    Finished(String),
    /// `error` carrying a message.
    Failed(String),
    /// `end` carrying a complete response out of band (group replies).
    FullResponse(String),
    /// No terminal event; the stream stays open.
    Open,
}

/// One scripted upstream response.
#[derive(Debug, Clone)]
pub struct ScriptedUpstream {
    message_id: String,
    context: Option<WireContext>,
    thinking_first: bool,
    early_chunks: usize,
    chunks: Vec<String>,
    style: ChunkStyle,
    ending: Ending,
}

impl ScriptedUpstream {
    #[must_use]
    pub fn new(message_id: impl Into<String>, context: Option<WireContext>) -> Self {
        Self {
            message_id: message_id.into(),
            context,
            thinking_first: false,
            early_chunks: 0,
            chunks: token_split(DEMO_RESPONSE),
            style: ChunkStyle::default(),
            ending: Ending::Completed,
        }
    }

    /// A reply from `agent_id` in one of its own topics.
    #[must_use]
    pub fn direct(
        message_id: impl Into<String>,
        agent_id: impl Into<String>,
        topic_id: impl Into<String>,
    ) -> Self {
        Self::new(
            message_id,
            Some(WireContext {
                agent_id: Some(agent_id.into()),
                topic_id: Some(topic_id.into()),
                ..WireContext::default()
            }),
        )
    }

    /// A reply from `agent_name` posted into a group topic.
    #[must_use]
    pub fn group(
        message_id: impl Into<String>,
        group_id: impl Into<String>,
        topic_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self::new(
            message_id,
            Some(WireContext {
                group_id: Some(group_id.into()),
                topic_id: Some(topic_id.into()),
                is_group_message: true,
                agent_name: Some(agent_name.into()),
                ..WireContext::default()
            }),
        )
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Splits `text` into word tokens for the data events.
    #[must_use]
    pub fn with_text(mut self, text: &str) -> Self {
        self.chunks = token_split(text);
        self
    }

    #[must_use]
    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Emits `agent_thinking` before anything else.
    #[must_use]
    pub fn thinking_first(mut self) -> Self {
        self.thinking_first = true;
        self
    }

    /// Sends the first `count` data events ahead of `start`.
    #[must_use]
    pub fn data_before_start(mut self, count: usize) -> Self {
        self.early_chunks = count;
        self
    }

    #[must_use]
    pub fn chunk_style(mut self, style: ChunkStyle) -> Self {
        self.style = style;
        self
    }

    #[must_use]
    pub fn ending(mut self, ending: Ending) -> Self {
        self.ending = ending;
        self
    }

    /// The full concatenated reply this script streams.
    #[must_use]
    pub fn text(&self) -> String {
        self.chunks.concat()
    }

    /// Event sequence in delivery order.
    #[must_use]
    pub fn events(&self) -> Vec<StreamEvent> {
        let early = self.early_chunks.min(self.chunks.len());
        let mut events = Vec::with_capacity(self.chunks.len() + 3);

        if self.thinking_first {
            events.push(StreamEvent::AgentThinking {
                message_id: self.message_id.clone(),
                context: self.context.clone(),
            });
        }
        events.extend(self.chunks[..early].iter().map(|chunk| self.data(chunk)));
        events.push(StreamEvent::Start {
            message_id: self.message_id.clone(),
            context: self.context.clone(),
        });
        events.extend(self.chunks[early..].iter().map(|chunk| self.data(chunk)));

        let message_id = self.message_id.clone();
        let context = self.context.clone();
        match &self.ending {
            Ending::Completed => events.push(StreamEvent::End {
                message_id,
                context,
                finish_reason: None,
                full_response: None,
            }),
            Ending::Finished(reason) => events.push(StreamEvent::End {
                message_id,
                context,
                finish_reason: Some(reason.clone()),
                full_response: None,
            }),
            Ending::Failed(error) => events.push(StreamEvent::Error {
                message_id,
                context,
                error: Some(error.clone()),
            }),
            Ending::FullResponse(text) => events.push(StreamEvent::End {
                message_id,
                context,
                finish_reason: None,
                full_response: Some(text.clone()),
            }),
            Ending::Open => {}
        }
        events
    }

    fn data(&self, chunk: &str) -> StreamEvent {
        let chunk = match self.style {
            ChunkStyle::Text => Value::String(chunk.to_string()),
            ChunkStyle::Delta => delta_chunk(chunk),
        };
        StreamEvent::Data {
            message_id: self.message_id.clone(),
            chunk,
            context: self.context.clone(),
        }
    }
}

/// Splits text after every space and newline, keeping the separators.
#[must_use]
pub fn token_split(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut pending = String::new();
    for ch in text.chars() {
        pending.push(ch);
        if matches!(ch, ' ' | '\n') {
            tokens.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        tokens.push(pending);
    }
    tokens
}

/// Wraps `text` as a chat-completion delta payload.
#[must_use]
pub fn delta_chunk(text: &str) -> Value {
    json!({"choices": [{"delta": {"content": text}}]})
}
