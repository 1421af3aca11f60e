use std::collections::HashMap;
use std::sync::Arc;

/// 凭证解析契约 给定提供商标识返回可选密钥
///
/// 核心只依赖这一接口 具体来源（环境变量、密钥管理服务等）由实现决定
pub trait CredentialResolver: Send + Sync {
    /// 解析指定提供商的密钥 未配置时返回 None
    fn resolve(&self, provider: &str) -> Option<String>;
}

/// 线程安全的解析器句柄
pub type DynCredentialResolver = Arc<dyn CredentialResolver>;

/// 从进程环境变量读取密钥 约定键名为 `{PROVIDER大写}_API_KEY`
///
/// 例如 provider `kimi` 对应 `KIMI_API_KEY`
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialResolver for EnvCredentials {
    fn resolve(&self, provider: &str) -> Option<String> {
        let key = format!("{}_API_KEY", provider.to_uppercase());
        std::env::var(key).ok().filter(|value| !value.is_empty())
    }
}

/// 固定映射解析器 主要用于测试或嵌入式配置
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<String, String>,
}

impl StaticCredentials {
    /// 以 (provider, key) 对构建解析器
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            keys: pairs
                .into_iter()
                .map(|(provider, key)| (provider.into(), key.into()))
                .collect(),
        }
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, provider: &str) -> Option<String> {
        self.keys.get(provider).cloned()
    }
}
