use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::DynCredentialResolver;
use crate::error::LLMError;
use crate::http::{DynHttpTransport, collect_stream_text, post_json_stream};
use crate::provider::{ApiStream, ApiStreamSimple};
use crate::registry::ApiProvider;
use crate::stream::StreamHandle;
use crate::types::{Context, Model, StreamOptions};

use super::error::parse_kimi_error;
use super::request::build_kimi_body;
use super::stream::spawn_stream;

/// Kimi Messages API 协议标识
pub const API: &str = "kimi-messages";

/// Moonshot Kimi Provider 通过 OpenAI Chat Completions 方言调用
pub struct KimiMessagesProvider {
    transport: DynHttpTransport,
    credentials: DynCredentialResolver,
}

impl KimiMessagesProvider {
    /// 创建 Provider 密钥在每次调用时解析
    pub fn new(transport: DynHttpTransport, credentials: DynCredentialResolver) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    fn endpoint(model: &Model) -> String {
        let base = model.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// options.headers 覆盖默认头
    fn build_headers(&self, api_key: &str, options: &StreamOptions) -> HashMap<String, String> {
        let mut headers = HashMap::from([
            ("Authorization".to_string(), format!("Bearer {api_key}")),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ]);
        if let Some(extra) = &options.headers {
            for (name, value) in extra {
                headers.insert(name.clone(), value.clone());
            }
        }
        headers
    }

    /// 密钥优先级 options.api_key > 凭证解析器
    fn resolve_api_key(
        &self,
        model: &Model,
        options: &StreamOptions,
    ) -> Result<String, LLMError> {
        options
            .api_key
            .clone()
            .or_else(|| self.credentials.resolve(&model.provider))
            .ok_or_else(|| LLMError::Auth {
                message: format!("no api key configured for provider {}", model.provider),
            })
    }
}

#[async_trait]
impl ApiStream for KimiMessagesProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: StreamOptions,
    ) -> Result<StreamHandle, LLMError> {
        let api_key = self.resolve_api_key(model, &options)?;
        let body = build_kimi_body(model, context, &options)?;
        if let Some(hook) = &options.on_payload {
            hook(&body);
        }

        let headers = self.build_headers(&api_key, &options);
        let response = post_json_stream(
            self.transport.as_ref(),
            Self::endpoint(model),
            headers,
            &body,
        )
        .await?;

        if !(200..300).contains(&response.status) {
            let text = collect_stream_text(response.body, API).await?;
            return Err(parse_kimi_error(response.status, &text));
        }

        Ok(spawn_stream(model.clone(), response.body, options.abort.clone()))
    }
}

#[async_trait]
impl ApiStreamSimple for KimiMessagesProvider {
    async fn stream_simple(
        &self,
        model: &Model,
        prompt: &str,
        options: StreamOptions,
    ) -> Result<StreamHandle, LLMError> {
        let context = Context::from_prompt(prompt);
        self.stream(model, &context, options).await
    }
}

/// 构造可直接注册的提供商载荷
pub fn api_provider(
    transport: DynHttpTransport,
    credentials: DynCredentialResolver,
) -> ApiProvider {
    let provider = Arc::new(KimiMessagesProvider::new(transport, credentials));
    ApiProvider {
        api: API.to_string(),
        stream: provider.clone(),
        stream_simple: Some(provider),
    }
}
