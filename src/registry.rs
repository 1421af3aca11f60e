use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::LLMError;
use crate::provider::{ApiStream, ApiStreamSimple, DynApiStream, DynApiStreamSimple};
use crate::stream::StreamHandle;
use crate::types::{Context, Model, StreamOptions};

/// API 提供商注册载荷 由各 adapter 构造后交给 [`ApiRegistry::register`]
pub struct ApiProvider {
    /// API 协议标识 例如 `kimi-messages`
    pub api: String,
    /// 流式调用实现
    pub stream: DynApiStream,
    /// 可选的纯文本简化流式实现
    pub stream_simple: Option<DynApiStreamSimple>,
}

/// 注册后的内部条目 stream/stream_simple 均已包裹 API 校验
///
/// 条目创建后不可变 重复注册同一标识时整体替换
pub struct ApiProviderInternal {
    api: String,
    stream: DynApiStream,
    stream_simple: Option<DynApiStreamSimple>,
}

impl ApiProviderInternal {
    /// 该条目注册时声明的 API 标识
    pub fn api(&self) -> &str {
        &self.api
    }

    /// 是否提供简化流式能力
    pub fn supports_stream_simple(&self) -> bool {
        self.stream_simple.is_some()
    }

    /// 发起流式调用 模型声明的 API 必须与注册标识一致
    pub async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: StreamOptions,
    ) -> Result<StreamHandle, LLMError> {
        self.stream.stream(model, context, options).await
    }

    /// 发起简化流式调用 未提供该能力时返回 Validation 错误
    pub async fn stream_simple(
        &self,
        model: &Model,
        prompt: &str,
        options: StreamOptions,
    ) -> Result<StreamHandle, LLMError> {
        match &self.stream_simple {
            Some(simple) => simple.stream_simple(model, prompt, options).await,
            None => Err(LLMError::Validation {
                message: format!("provider for {} has no stream_simple", self.api),
            }),
        }
    }
}

struct RegisteredApiProvider {
    provider: Arc<ApiProviderInternal>,
    source_id: Option<String>,
}

/// API 协议标识到提供商实现的注册表
///
/// 显式对象而非模块级单例 便于同一进程内共存多套独立配置（例如测试）
/// 注册通常发生在进程初始化阶段 之后以读为主
#[derive(Default)]
pub struct ApiRegistry {
    entries: RwLock<HashMap<String, RegisteredApiProvider>>,
}

impl ApiRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册提供商 stream/stream_simple 会被包裹 API 校验
    ///
    /// 同一标识重复注册时静默覆盖（last-write-wins）这是有意的插件式扩展行为
    /// `source_id` 仅作诊断用途 标记该注册来自哪个组件
    pub fn register(&self, provider: ApiProvider, source_id: Option<&str>) {
        let api = provider.api.clone();
        let internal = ApiProviderInternal {
            api: api.clone(),
            stream: Arc::new(ValidatedStream {
                api: api.clone(),
                inner: provider.stream,
            }),
            stream_simple: provider.stream_simple.map(|simple| {
                Arc::new(ValidatedStreamSimple {
                    api: api.clone(),
                    inner: simple,
                }) as DynApiStreamSimple
            }),
        };
        tracing::debug!(api = %api, source_id = ?source_id, "registering api provider");
        let mut entries = self.entries.write().expect("api registry lock poisoned");
        entries.insert(
            api,
            RegisteredApiProvider {
                provider: Arc::new(internal),
                source_id: source_id.map(str::to_string),
            },
        );
    }

    /// 查找指定 API 的提供商 未注册时返回 None 不抛错
    pub fn get(&self, api: &str) -> Option<Arc<ApiProviderInternal>> {
        let entries = self.entries.read().expect("api registry lock poisoned");
        entries.get(api).map(|entry| entry.provider.clone())
    }

    /// 查询某 API 注册来源 便于诊断覆盖问题
    pub fn source_id(&self, api: &str) -> Option<String> {
        let entries = self.entries.read().expect("api registry lock poisoned");
        entries.get(api).and_then(|entry| entry.source_id.clone())
    }

    /// 当前已注册的 API 标识列表
    pub fn apis(&self) -> Vec<String> {
        let entries = self.entries.read().expect("api registry lock poisoned");
        entries.keys().cloned().collect()
    }
}

/// stream 包装 调用前校验模型声明的 API
struct ValidatedStream {
    api: String,
    inner: DynApiStream,
}

#[async_trait]
impl ApiStream for ValidatedStream {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: StreamOptions,
    ) -> Result<StreamHandle, LLMError> {
        check_api(&self.api, model)?;
        self.inner.stream(model, context, options).await
    }
}

/// stream_simple 包装 校验逻辑与 stream 一致
struct ValidatedStreamSimple {
    api: String,
    inner: DynApiStreamSimple,
}

#[async_trait]
impl ApiStreamSimple for ValidatedStreamSimple {
    async fn stream_simple(
        &self,
        model: &Model,
        prompt: &str,
        options: StreamOptions,
    ) -> Result<StreamHandle, LLMError> {
        check_api(&self.api, model)?;
        self.inner.stream_simple(model, prompt, options).await
    }
}

fn check_api(expected: &str, model: &Model) -> Result<(), LLMError> {
    if model.api != expected {
        return Err(LLMError::ApiMismatch {
            expected: expected.to_string(),
            actual: model.api.clone(),
        });
    }
    Ok(())
}
