//! Moonshot Kimi Messages adapter（OpenAI Chat Completions 方言）
//!
//! 将规范化的 Context 转为 Kimi 原生请求 并把其 SSE 增量折叠为规范事件流

mod error;
mod provider;
mod request;
mod stream;
mod types;

pub use provider::{API, KimiMessagesProvider, api_provider};
