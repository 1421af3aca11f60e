use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::DynCredentialResolver;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::registry::ApiRegistry;
use crate::stream::StreamHandle;
use crate::types::{Context, Model, StreamOptions};

pub mod kimi_messages;

/// 流式调用契约 所有 adapter 实现该接口即可注册接入
///
/// 建立流之前的失败（鉴权、请求构造、连接）通过返回值报告
/// 流建立之后的失败走流自身的 error 事件与 result 拒绝
#[async_trait]
pub trait ApiStream: Send + Sync {
    /// 将规范化的 Context 转为本协议请求并返回规范事件流
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: StreamOptions,
    ) -> Result<StreamHandle, LLMError>;
}

/// 可选的纯文本简化流式契约
#[async_trait]
pub trait ApiStreamSimple: Send + Sync {
    /// 以单条用户文本发起流式调用
    async fn stream_simple(
        &self,
        model: &Model,
        prompt: &str,
        options: StreamOptions,
    ) -> Result<StreamHandle, LLMError>;
}

/// 线程安全 stream 实现句柄
pub type DynApiStream = Arc<dyn ApiStream>;

/// 线程安全 stream_simple 实现句柄
pub type DynApiStreamSimple = Arc<dyn ApiStreamSimple>;

/// 注册全部内置 API 提供商
///
/// 预期在进程初始化阶段调用一次 之后注册表以读为主
pub fn register_builtin_api_providers(
    registry: &ApiRegistry,
    transport: DynHttpTransport,
    credentials: DynCredentialResolver,
) {
    registry.register(
        kimi_messages::api_provider(transport, credentials),
        Some("builtin"),
    );
}
