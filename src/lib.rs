//! LLM 多提供商统一调用层
//!
//! 规范化的请求/响应与流式事件代数 调用方无需关心后端协议差异

pub mod accumulator;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod model;
pub mod provider;
pub mod registry;
pub mod sse;
pub mod stream;
pub mod types;
pub mod usage;

pub use dispatch::{complete, stream};
pub use error::LLMError;
pub use model::ModelCatalog;
pub use registry::{ApiProvider, ApiProviderInternal, ApiRegistry};
pub use stream::StreamHandle;
pub use types::*;
