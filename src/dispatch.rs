use crate::error::LLMError;
use crate::registry::ApiRegistry;
use crate::stream::StreamHandle;
use crate::types::{AssistantMessage, Context, Model, StreamOptions};

/// 发起流式调用 按模型声明的 API 从注册表解析提供商后纯委派
///
/// 未注册该 API 时立即返回 [`LLMError::UnregisteredApi`] 不会产生任何网络交互
/// 流建立后的失败通过流自身的 error 通道传递 不会从这里抛出
pub async fn stream(
    registry: &ApiRegistry,
    model: &Model,
    context: &Context,
    options: StreamOptions,
) -> Result<StreamHandle, LLMError> {
    let provider = registry
        .get(&model.api)
        .ok_or_else(|| LLMError::UnregisteredApi {
            api: model.api.clone(),
        })?;
    tracing::debug!(api = %model.api, model = %model.id, "dispatching stream");
    provider.stream(model, context, options).await
}

/// 非流式调用 内部先 stream 再排空事件序列取最终结果
///
/// 本层不设超时 取消需由调用方通过 options 的 abort 信号发起
pub async fn complete(
    registry: &ApiRegistry,
    model: &Model,
    context: &Context,
    options: StreamOptions,
) -> Result<AssistantMessage, LLMError> {
    let handle = stream(registry, model, context, options).await?;
    handle.result().await
}
