use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{
    ContentBlock, Context, ImageSource, Message, Model, StreamOptions, ToolChoice, ToolDefinition,
    UserContent,
};

/// 构建 Kimi Chat Completions 请求体
pub(crate) fn build_kimi_body(
    model: &Model,
    context: &Context,
    options: &StreamOptions,
) -> Result<Value, LLMError> {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.id.clone()));

    // 1. system prompt 置于消息序列首位 其余按原顺序转换
    let mut messages = Vec::new();
    if let Some(system) = &context.system_prompt {
        if !system.is_empty() {
            messages.push(json!({ "role": "system", "content": system }));
        }
    }
    for message in &context.messages {
        messages.push(convert_message(message)?);
    }
    if messages.is_empty() {
        return Err(LLMError::Validation {
            message: "Kimi Messages request requires at least one message".to_string(),
        });
    }
    body.insert("messages".to_string(), Value::Array(messages));

    // 2. 生成控制参数 options 覆盖 context 默认值
    let max_tokens = options
        .max_tokens
        .or(context.max_tokens)
        .unwrap_or((model.max_tokens / 3) as u32);
    body.insert("max_tokens".to_string(), Value::from(max_tokens));
    if let Some(temperature) = options.temperature.or(context.temperature) {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = context.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }
    if let Some(stop) = &context.stop_sequences {
        if !stop.is_empty() {
            body.insert("stop".to_string(), json!(stop));
        }
    }

    // 3. tools 与 tool_choice
    if let Some(tools) = &context.tools {
        if !tools.is_empty() {
            body.insert(
                "tools".to_string(),
                Value::Array(tools.iter().map(convert_tool).collect()),
            );
        }
    }
    if let Some(choice) = &options.tool_choice {
        body.insert("tool_choice".to_string(), convert_tool_choice(choice));
    }

    // 4. thinking 仅对 reasoning 模型下发
    if options.thinking_enabled && model.reasoning {
        body.insert(
            "thinking".to_string(),
            json!({
                "type": "enabled",
                "budget_tokens": options.thinking_budget_tokens.unwrap_or(1024),
            }),
        );
    }

    body.insert("stream".to_string(), Value::Bool(true));
    // 要求末尾 chunk 携带 usage 否则无法做用量与成本核算
    body.insert("stream_options".to_string(), json!({ "include_usage": true }));

    Ok(Value::Object(body))
}

fn convert_message(message: &Message) -> Result<Value, LLMError> {
    match message {
        Message::User(user) => {
            let content = match &user.content {
                UserContent::Text(text) => Value::String(text.clone()),
                UserContent::Blocks(blocks) => Value::Array(
                    blocks
                        .iter()
                        .map(convert_user_block)
                        .collect::<Result<Vec<_>, _>>()?,
                ),
            };
            Ok(json!({ "role": "user", "content": content }))
        }
        Message::Assistant(assistant) => {
            let mut obj = Map::new();
            obj.insert("role".to_string(), Value::String("assistant".to_string()));

            // thinking 块不回放 只还原文本与工具调用
            let text = assistant.text();
            let tool_calls: Vec<Value> = assistant
                .tool_calls()
                .into_iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        },
                    })
                })
                .collect();

            if !text.is_empty() || tool_calls.is_empty() {
                obj.insert("content".to_string(), Value::String(text));
            }
            if !tool_calls.is_empty() {
                obj.insert("tool_calls".to_string(), Value::Array(tool_calls));
            }
            Ok(Value::Object(obj))
        }
        Message::ToolResult(result) => {
            let mut buffer = String::new();
            for block in &result.content {
                if let ContentBlock::Text { text } = block {
                    if !buffer.is_empty() {
                        buffer.push('\n');
                    }
                    buffer.push_str(text);
                }
            }
            Ok(json!({
                "role": "tool",
                "tool_call_id": result.tool_call_id,
                "content": buffer,
            }))
        }
    }
}

fn convert_user_block(block: &ContentBlock) -> Result<Value, LLMError> {
    match block {
        ContentBlock::Text { text } => Ok(json!({ "type": "text", "text": text })),
        ContentBlock::Image { source } => {
            let url = match source {
                ImageSource::Url { url } => url.clone(),
                ImageSource::Base64 { data, media_type } => {
                    let media_type = media_type.as_deref().unwrap_or("image/png");
                    format!("data:{media_type};base64,{data}")
                }
            };
            Ok(json!({ "type": "image_url", "image_url": { "url": url } }))
        }
        ContentBlock::ToolCall(_) | ContentBlock::Thinking { .. } => Err(LLMError::Validation {
            message: "user messages may only carry text and image blocks".to_string(),
        }),
    }
}

fn convert_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".to_string()),
        ToolChoice::Any => Value::String("required".to_string()),
        ToolChoice::None => Value::String("none".to_string()),
        ToolChoice::Tool { name } => json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}
