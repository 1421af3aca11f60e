//! Single-pass folding state machine turning vendor-native stream events
//! into the canonical event algebra and one accumulating partial message.
//!
//! One [`StreamAccumulator`] exists per in-flight request and is the only
//! code that ever mutates the partial [`AssistantMessage`]. Adapters drive
//! it forward-only: `start`, then any number of block open/delta/close and
//! usage updates, then exactly one terminal (`finish` or `fail`). Every
//! transition hands back the canonical [`StreamEvent`] to push to the
//! consumer, so the emitted sequence cannot drift from the accumulated
//! state.
//!
//! Invariants enforced here:
//! - a vendor content-index binds to exactly one block position and never
//!   rebinds, even after the block closes;
//! - `*Start` precedes every `*Delta`/`*End` for a position, with at most
//!   one `*End`;
//! - at most one terminal transition; afterwards the message is frozen.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::LLMError;
use crate::types::{
    AssistantMessage, ContentBlock, Model, ModelCost, StopReason, StreamEvent, ToolCallContent,
};
use crate::usage::TokenDelta;

/// Kind of content block a vendor "block begin" event opens.
#[derive(Debug, Clone)]
pub enum BlockStart {
    Text,
    Thinking,
    ToolCall {
        /// Provider-supplied invocation identifier, empty when not yet known.
        id: String,
        /// Tool name as announced by the vendor.
        name: String,
    },
}

/// Folding state for one request: the partial message plus the
/// vendor-index bookkeeping.
pub struct StreamAccumulator {
    message: AssistantMessage,
    price: ModelCost,
    /// Vendor content-index -> position in `message.content`. Entries are
    /// never removed or overwritten.
    bindings: HashMap<usize, usize>,
    /// Positions whose block is still open.
    open: Vec<usize>,
    /// Accumulated raw JSON argument fragments per tool-call position.
    fragments: HashMap<usize, String>,
    started: bool,
    finished: bool,
}

impl StreamAccumulator {
    /// Creates an idle accumulator seeded from the model descriptor.
    pub fn new(model: &Model) -> Self {
        Self {
            message: AssistantMessage::new(model),
            price: model.cost,
            bindings: HashMap::new(),
            open: Vec::new(),
            fragments: HashMap::new(),
            started: false,
            finished: false,
        }
    }

    /// Read-only view of the partial message.
    pub fn message(&self) -> &AssistantMessage {
        &self.message
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Idle → Started: seeds the usage baseline and produces the `Start`
    /// snapshot event.
    ///
    /// Streaming adapters call this on the first vendor event (with whatever
    /// usage it carried); non-streaming adapters call it immediately. Either
    /// way observers always see the model identifier and a usage baseline,
    /// even if the request aborts right afterwards.
    pub fn start(&mut self, tokens: TokenDelta) -> Result<StreamEvent, LLMError> {
        if self.finished {
            return Err(LLMError::stream("start after terminal event"));
        }
        if self.started {
            return Err(LLMError::stream("start emitted twice"));
        }
        self.started = true;
        if !tokens.is_empty() {
            self.message.usage.apply(tokens, &self.price);
        }
        Ok(StreamEvent::Start {
            partial: self.message.clone(),
        })
    }

    /// Opens a new content block under the given vendor content-index.
    ///
    /// The block is appended to the content sequence; its position is stable
    /// for the lifetime of the message and never reused.
    pub fn begin_block(
        &mut self,
        vendor_index: usize,
        kind: BlockStart,
    ) -> Result<StreamEvent, LLMError> {
        self.ensure_streaming("block begin")?;
        if self.bindings.contains_key(&vendor_index) {
            return Err(LLMError::stream(format!(
                "vendor content index {vendor_index} already bound"
            )));
        }
        let position = self.message.content.len();
        let (block, event) = match kind {
            BlockStart::Text => (
                ContentBlock::Text {
                    text: String::new(),
                },
                StreamEvent::TextStart {
                    content_index: position,
                },
            ),
            BlockStart::Thinking => (
                ContentBlock::Thinking {
                    text: String::new(),
                },
                StreamEvent::ThinkingStart {
                    content_index: position,
                },
            ),
            BlockStart::ToolCall { id, name } => {
                self.fragments.insert(position, String::new());
                (
                    ContentBlock::ToolCall(ToolCallContent {
                        id,
                        name,
                        arguments: Value::Null,
                    }),
                    StreamEvent::ToolCallStart {
                        content_index: position,
                    },
                )
            }
        };
        self.message.content.push(block);
        self.bindings.insert(vendor_index, position);
        self.open.push(position);
        Ok(event)
    }

    /// Appends a text fragment to the open text block at `vendor_index`.
    pub fn append_text(
        &mut self,
        vendor_index: usize,
        delta: &str,
    ) -> Result<StreamEvent, LLMError> {
        let position = self.open_position(vendor_index)?;
        match &mut self.message.content[position] {
            ContentBlock::Text { text } => {
                text.push_str(delta);
                Ok(StreamEvent::TextDelta {
                    content_index: position,
                    delta: delta.to_string(),
                })
            }
            other => Err(kind_mismatch("text", other)),
        }
    }

    /// Appends a thinking fragment to the open thinking block at `vendor_index`.
    pub fn append_thinking(
        &mut self,
        vendor_index: usize,
        delta: &str,
    ) -> Result<StreamEvent, LLMError> {
        let position = self.open_position(vendor_index)?;
        match &mut self.message.content[position] {
            ContentBlock::Thinking { text } => {
                text.push_str(delta);
                Ok(StreamEvent::ThinkingDelta {
                    content_index: position,
                    delta: delta.to_string(),
                })
            }
            other => Err(kind_mismatch("thinking", other)),
        }
    }

    /// Appends a raw JSON argument fragment to the open tool-call block.
    ///
    /// The accumulated fragment is re-parsed on every delta; a parse failure
    /// here is expected (intermediate JSON is necessarily incomplete) and
    /// leaves `arguments` at the last value that parsed successfully.
    pub fn append_tool_arguments(
        &mut self,
        vendor_index: usize,
        delta: &str,
    ) -> Result<StreamEvent, LLMError> {
        let position = self.open_position(vendor_index)?;
        let accumulated = match self.fragments.get_mut(&position) {
            Some(fragment) => {
                fragment.push_str(delta);
                fragment.clone()
            }
            None => return Err(kind_mismatch("tool_call", &self.message.content[position])),
        };
        match &mut self.message.content[position] {
            ContentBlock::ToolCall(call) => {
                if let Ok(value) = serde_json::from_str::<Value>(&accumulated) {
                    call.arguments = value;
                }
                Ok(StreamEvent::ToolCallDelta {
                    content_index: position,
                    delta: delta.to_string(),
                })
            }
            other => Err(kind_mismatch("tool_call", other)),
        }
    }

    /// Updates the tool call's identifier or name after the block opened.
    ///
    /// Some dialects only reveal these in a later fragment than the one that
    /// opened the call.
    pub fn update_tool_identity(
        &mut self,
        vendor_index: usize,
        id: Option<&str>,
        name: Option<&str>,
    ) -> Result<(), LLMError> {
        let position = self.open_position(vendor_index)?;
        match &mut self.message.content[position] {
            ContentBlock::ToolCall(call) => {
                if let Some(id) = id {
                    if !id.is_empty() {
                        call.id = id.to_string();
                    }
                }
                if let Some(name) = name {
                    if !name.is_empty() {
                        call.name = name.to_string();
                    }
                }
                Ok(())
            }
            other => Err(kind_mismatch("tool_call", other)),
        }
    }

    /// Closes the block bound to `vendor_index` and emits its `*End` event
    /// carrying the finished content.
    ///
    /// For tool calls this performs the strict final parse of the
    /// accumulated argument fragment; failure is a hard
    /// [`LLMError::MalformedToolArguments`] error, never swallowed.
    pub fn end_block(&mut self, vendor_index: usize) -> Result<StreamEvent, LLMError> {
        let position = self.open_position(vendor_index)?;
        self.close_position(position)
    }

    /// Closes every still-open block in position order.
    ///
    /// Dialects without explicit "block end" events (OpenAI-style chat
    /// deltas) call this when the vendor signals completion.
    pub fn end_open_blocks(&mut self) -> Result<Vec<StreamEvent>, LLMError> {
        let mut positions: Vec<usize> = self.open.clone();
        positions.sort_unstable();
        let mut events = Vec::with_capacity(positions.len());
        for position in positions {
            events.push(self.close_position(position)?);
        }
        Ok(events)
    }

    /// Merges a usage update and recomputes cost. Present fields overwrite,
    /// absent fields keep their earlier values.
    pub fn update_usage(&mut self, tokens: TokenDelta) {
        if self.finished || tokens.is_empty() {
            return;
        }
        self.message.usage.apply(tokens, &self.price);
    }

    /// Records the vendor-reported stop reason for the eventual `Done` event.
    pub fn set_stop_reason(&mut self, reason: StopReason) {
        if !self.finished {
            self.message.stop_reason = Some(reason);
        }
    }

    /// Terminal(done): freezes the message and emits the `Done` event.
    ///
    /// Requires all blocks to be closed first — close them explicitly or via
    /// [`end_open_blocks`](Self::end_open_blocks). Uses the recorded stop
    /// reason, defaulting to [`StopReason::Stop`].
    pub fn finish(&mut self) -> Result<StreamEvent, LLMError> {
        self.ensure_streaming("finish")?;
        if !self.open.is_empty() {
            return Err(LLMError::stream(format!(
                "finish with {} block(s) still open",
                self.open.len()
            )));
        }
        let reason = self.message.stop_reason.unwrap_or(StopReason::Stop);
        self.message.stop_reason = Some(reason);
        self.finished = true;
        tracing::debug!(
            model = %self.message.model,
            reason = ?reason,
            total_tokens = self.message.usage.total_tokens,
            "stream finished"
        );
        Ok(StreamEvent::Done {
            reason,
            message: self.message.clone(),
        })
    }

    /// Terminal(error): freezes the message with whatever content
    /// accumulated so far and emits the `Error` event plus the matching
    /// rejection for `result()`.
    ///
    /// `aborted` distinguishes caller-initiated cancellation from
    /// vendor/network failure. Returns `None` when a terminal transition
    /// already happened — at most one terminal event is ever produced.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        aborted: bool,
    ) -> Option<(StreamEvent, LLMError)> {
        if self.finished {
            return None;
        }
        let message = message.into();
        self.finished = true;
        self.open.clear();
        self.message.stop_reason = Some(if aborted {
            StopReason::Aborted
        } else {
            StopReason::Error
        });
        tracing::debug!(model = %self.message.model, aborted, error = %message, "stream failed");
        let partial = self.message.clone();
        let error = if aborted {
            LLMError::Aborted {
                message: message.clone(),
                partial: Some(Box::new(partial.clone())),
            }
        } else {
            LLMError::Stream {
                message: message.clone(),
                partial: Some(Box::new(partial.clone())),
            }
        };
        Some((StreamEvent::Error { error: message, partial }, error))
    }

    fn close_position(&mut self, position: usize) -> Result<StreamEvent, LLMError> {
        let event = match &mut self.message.content[position] {
            ContentBlock::Text { text } => StreamEvent::TextEnd {
                content_index: position,
                content: text.clone(),
            },
            ContentBlock::Thinking { text } => StreamEvent::ThinkingEnd {
                content_index: position,
                content: text.clone(),
            },
            ContentBlock::ToolCall(call) => {
                let fragment = self.fragments.remove(&position).unwrap_or_default();
                // Tool calls without arguments stream no fragments at all.
                let source = if fragment.trim().is_empty() {
                    "{}"
                } else {
                    fragment.as_str()
                };
                let arguments: Value = serde_json::from_str(source).map_err(|err| {
                    LLMError::MalformedToolArguments {
                        name: call.name.clone(),
                        message: err.to_string(),
                    }
                })?;
                call.arguments = arguments;
                StreamEvent::ToolCallEnd {
                    content_index: position,
                    tool_call: call.clone(),
                }
            }
            ContentBlock::Image { .. } => {
                return Err(LLMError::stream("image blocks cannot stream"));
            }
        };
        self.open.retain(|open| *open != position);
        Ok(event)
    }

    fn open_position(&self, vendor_index: usize) -> Result<usize, LLMError> {
        let position = *self.bindings.get(&vendor_index).ok_or_else(|| {
            LLMError::stream(format!(
                "delta for unknown vendor content index {vendor_index}"
            ))
        })?;
        if !self.open.contains(&position) {
            return Err(LLMError::stream(format!(
                "delta for closed block at position {position}"
            )));
        }
        Ok(position)
    }

    fn ensure_streaming(&self, operation: &str) -> Result<(), LLMError> {
        if !self.started {
            return Err(LLMError::stream(format!("{operation} before start")));
        }
        if self.finished {
            return Err(LLMError::stream(format!(
                "{operation} after terminal event"
            )));
        }
        Ok(())
    }
}

fn kind_mismatch(expected: &str, block: &ContentBlock) -> LLMError {
    let actual = match block {
        ContentBlock::Text { .. } => "text",
        ContentBlock::Thinking { .. } => "thinking",
        ContentBlock::ToolCall(_) => "tool_call",
        ContentBlock::Image { .. } => "image",
    };
    LLMError::stream(format!("delta kind {expected} does not match open {actual} block"))
}
