use std::collections::HashMap;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::accumulator::{BlockStart, StreamAccumulator};
use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::sse::{SseDecoder, SseEvent};
use crate::stream::{StreamHandle, StreamSender, stream_channel};
use crate::types::{AssistantMessage, Model, StopReason, StreamEvent};
use crate::usage::TokenDelta;

use super::provider::API;
use super::types::{KimiStreamChunk, KimiUsage};

/// 启动折叠任务 把 SSE 响应体转为规范事件流
pub(crate) fn spawn_stream(
    model: Model,
    body: HttpBodyStream,
    abort: Option<CancellationToken>,
) -> StreamHandle {
    let (sender, handle) = stream_channel();
    tokio::spawn(run_stream(model, body, abort, sender));
    handle
}

/// Kimi 增量流没有显式的块边界事件 这里为每个打开的块合成稳定的
/// vendor 槽位 文本/思考切换时关闭前一个块 工具调用按 vendor 下标映射
#[derive(Default)]
struct Slots {
    next: usize,
    text: Option<usize>,
    thinking: Option<usize>,
    tools: HashMap<usize, usize>,
}

impl Slots {
    fn allocate(&mut self) -> usize {
        let slot = self.next;
        self.next += 1;
        slot
    }
}

async fn run_stream(
    model: Model,
    body: HttpBodyStream,
    abort: Option<CancellationToken>,
    sender: StreamSender,
) {
    let mut acc = StreamAccumulator::new(&model);
    let mut slots = Slots::default();
    let mut decoder = SseDecoder::new(body, API);

    loop {
        let item = match &abort {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    fail_stream(&mut acc, sender, LLMError::Aborted {
                        message: "aborted by caller".to_string(),
                        partial: None,
                    }, true).await;
                    return;
                }
                item = decoder.next() => item,
            },
            None => decoder.next().await,
        };

        match item {
            Some(Ok(SseEvent::Data(data))) => {
                let chunk: KimiStreamChunk = match serde_json::from_str(&data) {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let error = LLMError::provider(
                            API,
                            format!("failed to parse stream chunk: {err}"),
                        );
                        fail_stream(&mut acc, sender, error, false).await;
                        return;
                    }
                };
                match fold_chunk(&mut acc, &mut slots, chunk) {
                    Ok(events) => {
                        for event in events {
                            if !sender.send(event).await {
                                // 消费端已放弃 停止解码
                                return;
                            }
                        }
                    }
                    Err(error) => {
                        fail_stream(&mut acc, sender, error, false).await;
                        return;
                    }
                }
            }
            Some(Ok(SseEvent::Done)) => {
                match close_and_finish(&mut acc) {
                    Ok((events, message)) => {
                        for event in events {
                            if !sender.send(event).await {
                                return;
                            }
                        }
                        sender.finish(Ok(message));
                    }
                    Err(error) => fail_stream(&mut acc, sender, error, false).await,
                }
                return;
            }
            Some(Err(error)) => {
                fail_stream(&mut acc, sender, error, false).await;
                return;
            }
            None => {
                // 未收到 [DONE] 即断开 视为流异常结束
                let error = LLMError::stream("stream closed before completion");
                fail_stream(&mut acc, sender, error, false).await;
                return;
            }
        }
    }
}

/// 折叠一个增量块 返回需要下发的规范事件序列
fn fold_chunk(
    acc: &mut StreamAccumulator,
    slots: &mut Slots,
    chunk: KimiStreamChunk,
) -> Result<Vec<StreamEvent>, LLMError> {
    let mut events = Vec::new();

    if !acc.is_started() {
        events.push(acc.start(usage_delta(chunk.usage.as_ref()))?);
    }

    for choice in &chunk.choices {
        if let Some(delta) = &choice.delta {
            if let Some(reasoning) = delta.reasoning_content.as_deref() {
                if !reasoning.is_empty() {
                    if let Some(slot) = slots.text.take() {
                        events.push(acc.end_block(slot)?);
                    }
                    let slot = match slots.thinking {
                        Some(slot) => slot,
                        None => {
                            let slot = slots.allocate();
                            events.push(acc.begin_block(slot, BlockStart::Thinking)?);
                            slots.thinking = Some(slot);
                            slot
                        }
                    };
                    events.push(acc.append_thinking(slot, reasoning)?);
                }
            }

            if let Some(content) = delta.content.as_deref() {
                if !content.is_empty() {
                    if let Some(slot) = slots.thinking.take() {
                        events.push(acc.end_block(slot)?);
                    }
                    let slot = match slots.text {
                        Some(slot) => slot,
                        None => {
                            let slot = slots.allocate();
                            events.push(acc.begin_block(slot, BlockStart::Text)?);
                            slots.text = Some(slot);
                            slot
                        }
                    };
                    events.push(acc.append_text(slot, content)?);
                }
            }

            if let Some(tool_calls) = &delta.tool_calls {
                if !tool_calls.is_empty() {
                    // 工具调用开始后不再有正文增量 关闭未结的文本/思考块
                    if let Some(slot) = slots.text.take() {
                        events.push(acc.end_block(slot)?);
                    }
                    if let Some(slot) = slots.thinking.take() {
                        events.push(acc.end_block(slot)?);
                    }
                }
                for call in tool_calls {
                    let vendor_index = call.index.unwrap_or(0);
                    let (name, arguments) = call
                        .function
                        .as_ref()
                        .map(|f| (f.name.clone(), f.arguments.clone()))
                        .unwrap_or((None, None));

                    let slot = match slots.tools.get(&vendor_index) {
                        Some(slot) => {
                            acc.update_tool_identity(
                                *slot,
                                call.id.as_deref(),
                                name.as_deref(),
                            )?;
                            *slot
                        }
                        None => {
                            let slot = slots.allocate();
                            events.push(acc.begin_block(
                                slot,
                                BlockStart::ToolCall {
                                    id: call.id.clone().unwrap_or_default(),
                                    name: name.unwrap_or_default(),
                                },
                            )?);
                            slots.tools.insert(vendor_index, slot);
                            slot
                        }
                    };

                    if let Some(arguments) = arguments {
                        if !arguments.is_empty() {
                            events.push(acc.append_tool_arguments(slot, &arguments)?);
                        }
                    }
                }
            }
        }

        if let Some(reason) = choice.finish_reason.as_deref() {
            acc.set_stop_reason(convert_stop_reason(reason));
        }
    }

    if let Some(usage) = &chunk.usage {
        acc.update_usage(usage_delta(Some(usage)));
    }

    Ok(events)
}

/// 收到 [DONE] 后关闭所有未结块并产出终态事件
fn close_and_finish(
    acc: &mut StreamAccumulator,
) -> Result<(Vec<StreamEvent>, AssistantMessage), LLMError> {
    let mut events = Vec::new();
    if !acc.is_started() {
        events.push(acc.start(TokenDelta::default())?);
    }
    events.extend(acc.end_open_blocks()?);
    let done = acc.finish()?;
    let message = match &done {
        StreamEvent::Done { message, .. } => message.clone(),
        _ => unreachable!("finish always yields Done"),
    };
    events.push(done);
    Ok((events, message))
}

/// 发出终态 error 事件并以原始错误类型拒绝 result()
async fn fail_stream(
    acc: &mut StreamAccumulator,
    sender: StreamSender,
    error: LLMError,
    aborted: bool,
) {
    let message = match &error {
        LLMError::Stream { message, .. } | LLMError::Aborted { message, .. } => message.clone(),
        other => other.to_string(),
    };
    if let Some((event, default_error)) = acc.fail(message, aborted) {
        let _ = sender.send(event).await;
        // MalformedToolArguments 保留原始类型 其余统一为携带 partial 的
        // Stream/Aborted 终态错误
        let final_error = match error {
            LLMError::MalformedToolArguments { .. } => error,
            _ => default_error,
        };
        sender.finish(Err(final_error));
    }
}

fn convert_stop_reason(reason: &str) -> StopReason {
    match reason {
        "stop" => StopReason::Stop,
        "length" | "max_tokens" => StopReason::Length,
        "tool_calls" => StopReason::ToolCalls,
        "content_filter" => StopReason::ContentFilter,
        other => {
            tracing::warn!(reason = other, "unknown finish_reason, treating as stop");
            StopReason::Stop
        }
    }
}

fn usage_delta(usage: Option<&KimiUsage>) -> TokenDelta {
    let Some(usage) = usage else {
        return TokenDelta::default();
    };
    let cached = usage
        .prompt_tokens_details
        .as_ref()
        .and_then(|details| details.cached_tokens);
    // prompt_tokens 已包含缓存命中 拆出 cache_read 份额
    let input = usage
        .prompt_tokens
        .map(|prompt| prompt.saturating_sub(cached.unwrap_or(0)));
    TokenDelta {
        input,
        output: usage.completion_tokens,
        cache_read: cached,
        cache_write: None,
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::types::{ContentBlock, InputModality, Model, ModelCost};

    fn kimi_model() -> Model {
        Model {
            id: "kimi-k2.5".to_string(),
            name: "Kimi K2.5".to_string(),
            api: "kimi-messages".to_string(),
            provider: "kimi".to_string(),
            base_url: "https://api.moonshot.cn/v1".to_string(),
            reasoning: true,
            input: vec![InputModality::Text],
            cost: ModelCost {
                input: 2.0,
                output: 10.0,
                cache_read: 0.5,
                cache_write: 0.0,
            },
            context_window: 262_144,
            max_tokens: 32_768,
        }
    }

    fn sse_body(events: &[&str]) -> HttpBodyStream {
        let chunks: Vec<Result<Vec<u8>, LLMError>> = events
            .iter()
            .map(|event| Ok(format!("data: {event}\n\n").into_bytes()))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    async fn collect_events(mut handle: StreamHandle) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn text_stream_produces_the_canonical_event_sequence() {
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"role":"assistant","content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo!"}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":10,"completion_tokens":5}}"#,
            "[DONE]",
        ]);
        let handle = spawn_stream(kimi_model(), body, None);
        let events = collect_events(handle).await;

        assert!(matches!(events[0], StreamEvent::Start { .. }));
        assert!(matches!(events[1], StreamEvent::TextStart { content_index: 0 }));
        assert!(matches!(
            &events[2],
            StreamEvent::TextDelta { content_index: 0, delta } if delta == "Hel"
        ));
        assert!(matches!(
            &events[3],
            StreamEvent::TextDelta { content_index: 0, delta } if delta == "lo!"
        ));
        assert!(matches!(
            &events[4],
            StreamEvent::TextEnd { content_index: 0, content } if content == "Hello!"
        ));
        match events.last().expect("terminal event") {
            StreamEvent::Done { reason, message } => {
                assert_eq!(*reason, StopReason::Stop);
                assert_eq!(
                    message.content[0],
                    ContentBlock::Text {
                        text: "Hello!".to_string()
                    }
                );
                assert_eq!(message.usage.input, 10);
                assert_eq!(message.usage.output, 5);
                assert_eq!(message.usage.total_tokens, 15);
                let expected = (10.0 * 2.0 + 5.0 * 10.0) / 1_000_000.0;
                assert!((message.usage.cost.total - expected).abs() < 1e-12);
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_deltas_concatenate_to_the_end_content() {
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"content":"a"}}]}"#,
            r#"{"choices":[{"delta":{"content":"b"}}]}"#,
            r#"{"choices":[{"delta":{"content":"c"}}]}"#,
            "[DONE]",
        ]);
        let handle = spawn_stream(kimi_model(), body, None);
        let events = collect_events(handle).await;

        let mut concatenated = String::new();
        let mut end_content = None;
        for event in &events {
            match event {
                StreamEvent::TextDelta { delta, .. } => concatenated.push_str(delta),
                StreamEvent::TextEnd { content, .. } => end_content = Some(content.clone()),
                _ => {}
            }
        }
        assert_eq!(end_content.as_deref(), Some(concatenated.as_str()));
    }

    #[tokio::test]
    async fn reasoning_then_text_yields_two_blocks_in_order() {
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"reasoning_content":"let me think"}}]}"#,
            r#"{"choices":[{"delta":{"content":"The answer is 42."}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]);
        let handle = spawn_stream(kimi_model(), body, None);
        let events = collect_events(handle).await;

        assert!(matches!(events[1], StreamEvent::ThinkingStart { content_index: 0 }));
        assert!(matches!(events[2], StreamEvent::ThinkingDelta { .. }));
        // 切换到正文时思考块先关闭
        assert!(matches!(
            &events[3],
            StreamEvent::ThinkingEnd { content_index: 0, content } if content == "let me think"
        ));
        assert!(matches!(events[4], StreamEvent::TextStart { content_index: 1 }));

        match events.last().expect("terminal event") {
            StreamEvent::Done { message, .. } => {
                assert_eq!(message.content.len(), 2);
                assert!(matches!(message.content[0], ContentBlock::Thinking { .. }));
                assert!(matches!(message.content[1], ContentBlock::Text { .. }));
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_call_fragments_assemble_and_parse_at_close() {
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"get_weather","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"location\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Tokyo\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]);
        let handle = spawn_stream(kimi_model(), body, None);
        let events = collect_events(handle).await;

        assert!(events.iter().any(|event| matches!(
            event,
            StreamEvent::ToolCallStart { content_index: 0 }
        )));
        match events.last().expect("terminal event") {
            StreamEvent::Done { reason, message } => {
                assert_eq!(*reason, StopReason::ToolCalls);
                let calls = message.tool_calls();
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].name, "get_weather");
                assert_eq!(calls[0].arguments["location"], "Tokyo");
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_final_tool_arguments_reject_the_result() {
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"get_weather","arguments":"{\"broken\": "}}]}}]}"#,
            "[DONE]",
        ]);
        let handle = spawn_stream(kimi_model(), body, None);
        let err = handle.result().await.expect_err("must fail");
        assert!(matches!(err, LLMError::MalformedToolArguments { .. }));
    }

    #[tokio::test]
    async fn abort_mid_stream_freezes_partial_content() {
        // 两个正文增量之后流保持挂起 由 abort 信号终止
        let chunks: Vec<Result<Vec<u8>, LLMError>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"partial \"}}]}\n\n".to_vec()),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"answer\"}}]}\n\n".to_vec()),
        ];
        let body: HttpBodyStream =
            Box::pin(stream::iter(chunks).chain(stream::pending()));

        let token = CancellationToken::new();
        let mut handle = spawn_stream(kimi_model(), body, Some(token.clone()));

        // 排空 abort 前已经产生的事件
        for _ in 0..4 {
            handle.next().await.expect("pre-abort event");
        }
        token.cancel();

        let terminal = handle.next().await.expect("terminal event");
        match &terminal {
            StreamEvent::Error { partial, .. } => {
                assert_eq!(partial.stop_reason, Some(StopReason::Aborted));
                assert_eq!(partial.text(), "partial answer");
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }
        assert!(handle.next().await.is_none());

        let err = handle.result().await.expect_err("must reject");
        match err {
            LLMError::Aborted { partial, .. } => {
                assert_eq!(partial.expect("partial").text(), "partial answer");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn early_disconnect_without_done_is_a_stream_error() {
        let body = sse_body(&[r#"{"choices":[{"delta":{"content":"hi"}}]}"#]);
        let handle = spawn_stream(kimi_model(), body, None);
        let err = handle.result().await.expect_err("must fail");
        match err {
            LLMError::Stream { partial, .. } => {
                assert_eq!(partial.expect("partial").text(), "hi");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cached_prompt_tokens_split_into_cache_read() {
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"content":"ok"},"finish_reason":"stop"}],"usage":{"prompt_tokens":100,"completion_tokens":3,"prompt_tokens_details":{"cached_tokens":40}}}"#,
            "[DONE]",
        ]);
        let handle = spawn_stream(kimi_model(), body, None);
        let message = handle.result().await.expect("result");
        assert_eq!(message.usage.input, 60);
        assert_eq!(message.usage.cache_read, 40);
        assert_eq!(message.usage.output, 3);
        assert_eq!(message.usage.total_tokens, 103);
    }

    #[test]
    fn stop_reasons_map_into_the_canonical_set() {
        assert_eq!(convert_stop_reason("stop"), StopReason::Stop);
        assert_eq!(convert_stop_reason("length"), StopReason::Length);
        assert_eq!(convert_stop_reason("tool_calls"), StopReason::ToolCalls);
        assert_eq!(
            convert_stop_reason("content_filter"),
            StopReason::ContentFilter
        );
        assert_eq!(convert_stop_reason("mystery"), StopReason::Stop);
    }
}
