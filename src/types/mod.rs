//! Canonical data structures shared by every provider.
//!
//! These types normalize vendor request/response shapes so callers never
//! branch on which protocol they are talking to: a [`Context`] goes in, a
//! sequence of [`StreamEvent`]s and a final [`AssistantMessage`] come out,
//! whatever backend produced them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Immutable descriptor of a callable model.
///
/// Owned by static configuration (see [`crate::model::ModelCatalog`]); looked
/// up by `(provider, id)` and never mutated. The `api` field names the wire
/// protocol the model must be driven through — the registry enforces that a
/// model only ever reaches a provider registered under the same identifier.
///
/// # Examples
///
/// ```
/// # use tsunagi_llm::types::{Model, ModelCost, InputModality};
/// let model = Model {
///     id: "kimi-k2.5".into(),
///     name: "Kimi K2.5".into(),
///     api: "kimi-messages".into(),
///     provider: "kimi".into(),
///     base_url: "https://api.moonshot.cn/v1".into(),
///     reasoning: true,
///     input: vec![InputModality::Text, InputModality::Image],
///     cost: ModelCost::default(),
///     context_window: 262_144,
///     max_tokens: 32_768,
/// };
/// assert_eq!(model.api, "kimi-messages");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier sent on the wire, e.g. `kimi-k2.5`.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// API protocol identifier this model must be driven through.
    pub api: String,
    /// Service provider identifier, e.g. `kimi`.
    pub provider: String,
    /// Base endpoint URL.
    pub base_url: String,
    /// Whether the model supports reasoning/thinking output.
    pub reasoning: bool,
    /// Supported input modalities.
    pub input: Vec<InputModality>,
    /// Per-million-token pricing.
    pub cost: ModelCost,
    /// Context window size in tokens.
    pub context_window: u64,
    /// Maximum output tokens for a single response.
    pub max_tokens: u64,
}

/// Input modalities a model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputModality {
    Text,
    Image,
}

/// Per-million-token prices in USD.
///
/// Missing or zero-priced categories are legal and simply contribute zero
/// cost — see [`crate::usage::calculate_cost`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

/// Caller-supplied conversation state handed to [`crate::dispatch::stream`].
///
/// Read-only from the core's perspective. Generation parameters here act as
/// per-conversation defaults; [`StreamOptions`] can override them per call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    /// Optional system prompt prepended to the conversation.
    pub system_prompt: Option<String>,
    /// Ordered conversation history.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Tool definitions available to the assistant.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Maximum output tokens for this conversation.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f32>,
    /// Sequences that stop generation when produced.
    pub stop_sequences: Option<Vec<String>>,
}

impl Context {
    /// Builds a context holding a single user text message.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tsunagi_llm::types::Context;
    /// let ctx = Context::from_prompt("Hello!");
    /// assert_eq!(ctx.messages.len(), 1);
    /// ```
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            ..Self::default()
        }
    }
}

/// Declarative definition of a tool available to the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique name exposed to the model.
    pub name: String,
    /// Natural-language description of the tool purpose.
    pub description: String,
    /// JSON Schema describing the input payload.
    pub parameters: Value,
}

/// One turn of conversation, tagged by role.
///
/// Block ordering inside a message is significant and preserved end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Turn authored by the end user.
    User(UserMessage),
    /// Turn produced by a model (possibly by an earlier call).
    Assistant(AssistantMessage),
    /// Result of executing a tool the assistant called.
    ToolResult(ToolResultMessage),
}

impl Message {
    /// Builds a plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserMessage {
            content: UserContent::Text(text.into()),
            timestamp: None,
        })
    }
}

/// User-authored message content plus optional client timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: UserContent,
    pub timestamp: Option<u64>,
}

/// User content is either a bare string or ordered content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// Outcome of a tool execution, fed back into the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultMessage {
    /// Identifier of the tool call this result answers.
    pub tool_call_id: String,
    /// Name of the executed tool.
    pub tool_name: String,
    /// Ordered result content.
    pub content: Vec<ContentBlock>,
    /// Whether the tool reported an error.
    #[serde(default)]
    pub is_error: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// One unit of message content with a stable position inside its message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text run.
    Text { text: String },
    /// Image input.
    Image { source: ImageSource },
    /// Tool invocation emitted by the assistant.
    ToolCall(ToolCallContent),
    /// Reasoning/thinking run emitted by reasoning-capable models.
    Thinking { text: String },
}

/// Tool invocation payload carried by [`ContentBlock::ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallContent {
    /// Provider-supplied invocation identifier.
    pub id: String,
    /// Tool name as exposed to the model.
    pub name: String,
    /// Structured arguments. While the block is streaming this holds the
    /// value from the last argument fragment that parsed successfully.
    pub arguments: Value,
}

/// Source for an image input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// Public URL accessible by the provider.
    Url { url: String },
    /// Base64-encoded inline payload.
    Base64 {
        data: String,
        media_type: Option<String>,
    },
}

/// The assistant message under construction during streaming, and the final
/// result once the stream terminates.
///
/// Exactly one in-flight stream owns and mutates this object; observers only
/// ever see snapshots (via [`StreamEvent::Start`]) or the frozen terminal
/// value (via [`StreamEvent::Done`] / [`crate::stream::StreamHandle::result`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Ordered content blocks. Positions are assigned once and never reused.
    pub content: Vec<ContentBlock>,
    /// API protocol identifier that produced this message.
    pub api: String,
    /// Provider identifier.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Running token usage and cost.
    pub usage: Usage,
    /// Why generation stopped; `None` while the stream is open.
    pub stop_reason: Option<StopReason>,
    /// Milliseconds since the Unix epoch at creation time.
    pub timestamp: u64,
}

impl AssistantMessage {
    /// Creates an empty message seeded from a model descriptor.
    pub fn new(model: &Model) -> Self {
        Self {
            content: Vec::new(),
            api: model.api.clone(),
            provider: model.provider.clone(),
            model: model.id.clone(),
            usage: Usage::default(),
            stop_reason: None,
            timestamp: now_millis(),
        }
    }

    /// Concatenates all text blocks, ignoring thinking and tool calls.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tsunagi_llm::types::{AssistantMessage, ContentBlock, Model, ModelCost};
    /// # let model = Model { id: "m".into(), name: "M".into(), api: "a".into(),
    /// #     provider: "p".into(), base_url: String::new(), reasoning: false,
    /// #     input: vec![], cost: ModelCost::default(), context_window: 0, max_tokens: 0 };
    /// let mut msg = AssistantMessage::new(&model);
    /// msg.content.push(ContentBlock::Text { text: "Hello".into() });
    /// msg.content.push(ContentBlock::Text { text: " world".into() });
    /// assert_eq!(msg.text(), "Hello world");
    /// ```
    pub fn text(&self) -> String {
        let mut buffer = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                buffer.push_str(text);
            }
        }
        buffer
    }

    /// Returns every tool call in content order.
    pub fn tool_calls(&self) -> Vec<&ToolCallContent> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }
}

/// Token usage accounting with derived totals and cost.
///
/// Counts arrive incrementally during streaming; only fields a vendor event
/// actually carries overwrite earlier values, so an input count seen once at
/// stream start survives later events that omit it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub input: u64,
    /// Completion tokens.
    pub output: u64,
    /// Tokens served from the provider's prompt cache.
    pub cache_read: u64,
    /// Tokens written into the provider's prompt cache.
    pub cache_write: u64,
    /// Sum of the four counters above.
    pub total_tokens: u64,
    /// Monetary cost derived from the counts and the model's price table.
    pub cost: Cost,
}

/// Cost breakdown in USD. `total` is always the sum of the components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
    pub total: f64,
}

/// Why a response stopped generating content.
///
/// `Aborted` is only ever set through the terminal error path; a `done`
/// event never carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Aborted,
}

/// Canonical, protocol-agnostic stream notification.
///
/// Every provider folds its native events into this algebra. Ordering is
/// strict: `Start` first, then for each content position a `*Start` before
/// any `*Delta`/`*End` for that position, at most one `*End` per position,
/// and exactly one terminal event (`Done` or `Error`) last.
///
/// # Examples
///
/// ```
/// # use tsunagi_llm::types::StreamEvent;
/// let event = StreamEvent::TextDelta { content_index: 0, delta: "Hel".into() };
/// let json = serde_json::to_value(&event).unwrap();
/// assert_eq!(json["type"], "text_delta");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event of every stream: a read-only snapshot of the partial
    /// message, guaranteeing observers see the model identifier and a usage
    /// baseline even if the request aborts immediately afterwards.
    Start { partial: AssistantMessage },
    /// A text block opened at `content_index`.
    TextStart { content_index: usize },
    /// A text fragment was appended to the block at `content_index`.
    TextDelta { content_index: usize, delta: String },
    /// The text block closed; `content` is the full accumulated text.
    TextEnd { content_index: usize, content: String },
    /// A thinking block opened.
    ThinkingStart { content_index: usize },
    /// A thinking fragment was appended.
    ThinkingDelta { content_index: usize, delta: String },
    /// The thinking block closed with its full text.
    ThinkingEnd { content_index: usize, content: String },
    /// A tool-call block opened.
    #[serde(rename = "toolcall_start")]
    ToolCallStart { content_index: usize },
    /// A raw JSON argument fragment arrived for the tool call.
    #[serde(rename = "toolcall_delta")]
    ToolCallDelta { content_index: usize, delta: String },
    /// The tool call closed; arguments passed the strict final parse.
    #[serde(rename = "toolcall_end")]
    ToolCallEnd {
        content_index: usize,
        tool_call: ToolCallContent,
    },
    /// Normal completion. Carries the frozen final message.
    Done {
        reason: StopReason,
        message: AssistantMessage,
    },
    /// Terminal failure or abort. Carries the frozen partial content.
    Error {
        error: String,
        partial: AssistantMessage,
    },
}

impl StreamEvent {
    /// Returns `true` for `Done` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// Tool-choice strategies passed through to providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Provider decides when to call tools.
    Auto,
    /// Provider must invoke at least one tool.
    Any,
    /// Tools are disabled for the request.
    None,
    /// Force a specific tool by name.
    Tool { name: String },
}

/// Hook invoked with the exact outbound request payload before dispatch.
pub type PayloadHook = Arc<dyn Fn(&Value) + Send + Sync>;

/// Per-call options forwarded to the vendor adapter.
///
/// The core itself interprets none of these; each adapter maps them onto its
/// own wire format. All fields are optional so callers only set the knobs
/// they care about.
#[derive(Clone, Default)]
pub struct StreamOptions {
    /// Explicit API key, overriding the credential resolver.
    pub api_key: Option<String>,
    /// Maximum output tokens, overriding the context default.
    pub max_tokens: Option<u32>,
    /// Sampling temperature, overriding the context default.
    pub temperature: Option<f32>,
    /// Request reasoning/thinking output where the model supports it.
    pub thinking_enabled: bool,
    /// Token budget for thinking output.
    pub thinking_budget_tokens: Option<u32>,
    /// Tool invocation policy.
    pub tool_choice: Option<ToolChoice>,
    /// Extra headers merged over the adapter defaults.
    pub headers: Option<HashMap<String, String>>,
    /// Cancellation signal observed by the adapter mid-stream.
    pub abort: Option<CancellationToken>,
    /// Debug hook receiving the outbound payload before dispatch.
    pub on_payload: Option<PayloadHook>,
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("thinking_enabled", &self.thinking_enabled)
            .field("thinking_budget_tokens", &self.thinking_budget_tokens)
            .field("tool_choice", &self.tool_choice)
            .field("headers", &self.headers)
            .field("abort", &self.abort.is_some())
            .field("on_payload", &self.on_payload.is_some())
            .finish()
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_model() -> Model {
        Model {
            id: "kimi-k2.5".to_string(),
            name: "Kimi K2.5".to_string(),
            api: "kimi-messages".to_string(),
            provider: "kimi".to_string(),
            base_url: "https://api.moonshot.cn/v1".to_string(),
            reasoning: true,
            input: vec![InputModality::Text, InputModality::Image],
            cost: ModelCost::default(),
            context_window: 262_144,
            max_tokens: 32_768,
        }
    }

    #[test]
    fn content_block_serde_uses_type_tag() {
        let block = ContentBlock::ToolCall(ToolCallContent {
            id: "call_1".to_string(),
            name: "get_weather".to_string(),
            arguments: json!({"location": "Tokyo"}),
        });
        let value = serde_json::to_value(&block).expect("serialize");
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["name"], "get_weather");

        let back: ContentBlock = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, block);
    }

    #[test]
    fn message_serde_uses_role_tag() {
        let msg = Message::user("hello");
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "hello");
    }

    #[test]
    fn stream_event_names_match_canonical_algebra() {
        let cases = vec![
            (
                StreamEvent::TextStart { content_index: 0 },
                "text_start",
            ),
            (
                StreamEvent::ToolCallDelta {
                    content_index: 1,
                    delta: "{".to_string(),
                },
                "toolcall_delta",
            ),
            (
                StreamEvent::ThinkingEnd {
                    content_index: 2,
                    content: "hm".to_string(),
                },
                "thinking_end",
            ),
        ];
        for (event, expected) in cases {
            let value = serde_json::to_value(&event).expect("serialize");
            assert_eq!(value["type"], expected);
        }
    }

    #[test]
    fn assistant_message_text_concatenates_text_blocks_only() {
        let mut msg = AssistantMessage::new(&sample_model());
        msg.content.push(ContentBlock::Thinking {
            text: "pondering".to_string(),
        });
        msg.content.push(ContentBlock::Text {
            text: "Hello".to_string(),
        });
        msg.content.push(ContentBlock::Text {
            text: "!".to_string(),
        });
        assert_eq!(msg.text(), "Hello!");
        assert!(msg.tool_calls().is_empty());
    }

    #[test]
    fn stream_options_debug_redacts_api_key() {
        let options = StreamOptions {
            api_key: Some("sk-secret".to_string()),
            ..StreamOptions::default()
        };
        let rendered = format!("{options:?}");
        assert!(!rendered.contains("sk-secret"));
    }
}
