use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;

use super::provider::API;

/// 解析 Kimi 错误响应体 按状态码归类
pub(crate) fn parse_kimi_error(status: u16, body: &str) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }
    #[derive(Deserialize)]
    struct InnerError {
        message: Option<String>,
        #[allow(dead_code)]
        r#type: Option<String>,
        code: Option<Value>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(error) = parsed.error {
            let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
            if let Some(code) = error.code {
                message = format!("{message} ({code})");
            }
            return match status {
                401 | 403 => LLMError::Auth { message },
                429 => LLMError::RateLimit {
                    message,
                    retry_after: None,
                },
                400 => LLMError::Validation { message },
                _ => LLMError::Provider {
                    provider: API,
                    message,
                },
            };
        }
    }

    LLMError::Provider {
        provider: API,
        message: format!("status {status}: {body}"),
    }
}
