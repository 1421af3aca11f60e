use std::collections::HashMap;

use crate::error::LLMError;
use crate::types::{InputModality, Model, ModelCost};

/// 模型目录 双层映射 provider -> model id -> 模型配置
///
/// 静态配置数据 构造后只读 条目本身不可变
pub struct ModelCatalog {
    models: HashMap<String, HashMap<String, Model>>,
}

impl ModelCatalog {
    /// 创建空目录
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// 加载内置模型配置
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for model in builtin_models() {
            catalog.insert(model);
        }
        catalog
    }

    /// 插入或覆盖一个模型条目
    pub fn insert(&mut self, model: Model) {
        self.models
            .entry(model.provider.clone())
            .or_default()
            .insert(model.id.clone(), model);
    }

    /// 获取指定提供商的指定模型 不存在时返回 Validation 错误
    pub fn get(&self, provider: &str, model_id: &str) -> Result<&Model, LLMError> {
        let provider_models = self.models.get(provider).ok_or_else(|| LLMError::Validation {
            message: format!("invalid provider: {provider}"),
        })?;
        provider_models.get(model_id).ok_or_else(|| LLMError::Validation {
            message: format!("invalid model: {model_id} for provider: {provider}"),
        })
    }

    /// 获取指定提供商的全部模型 提供商不存在时返回空列表
    pub fn all(&self, provider: &str) -> Vec<&Model> {
        self.models
            .get(provider)
            .map(|models| models.values().collect())
            .unwrap_or_default()
    }

    /// 检查模型是否存在
    pub fn contains(&self, provider: &str, model_id: &str) -> bool {
        self.models
            .get(provider)
            .is_some_and(|models| models.contains_key(model_id))
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// 内置模型配置 费用单位为每百万 token 的美元价格
fn builtin_models() -> Vec<Model> {
    vec![Model {
        id: "kimi-k2.5".to_string(),
        name: "Kimi K2.5".to_string(),
        api: "kimi-messages".to_string(),
        provider: "kimi".to_string(),
        base_url: "https://api.moonshot.cn/v1".to_string(),
        reasoning: true,
        input: vec![InputModality::Text, InputModality::Image],
        cost: ModelCost {
            input: 0.0,
            output: 0.0,
            cache_read: 0.0,
            cache_write: 0.0,
        },
        context_window: 262_144,
        max_tokens: 32_768,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_resolves_kimi_k25() {
        let catalog = ModelCatalog::builtin();
        let model = catalog.get("kimi", "kimi-k2.5").expect("model");
        assert_eq!(model.name, "Kimi K2.5");
        assert_eq!(model.api, "kimi-messages");
        assert_eq!(model.context_window, 262_144);
        assert_eq!(model.max_tokens, 32_768);
        assert!(model.reasoning);
    }

    #[test]
    fn unknown_provider_and_model_are_errors() {
        let catalog = ModelCatalog::builtin();
        assert!(matches!(
            catalog.get("invalid", "model"),
            Err(LLMError::Validation { .. })
        ));
        assert!(matches!(
            catalog.get("kimi", "invalid-model"),
            Err(LLMError::Validation { .. })
        ));
    }

    #[test]
    fn all_returns_empty_for_unknown_provider() {
        let catalog = ModelCatalog::builtin();
        assert!(catalog.all("nope").is_empty());
        assert_eq!(catalog.all("kimi").len(), 1);
    }

    #[test]
    fn contains_matches_get() {
        let catalog = ModelCatalog::builtin();
        assert!(catalog.contains("kimi", "kimi-k2.5"));
        assert!(!catalog.contains("kimi", "kimi-k1"));
    }

    #[test]
    fn custom_entries_can_be_inserted() {
        let mut catalog = ModelCatalog::new();
        let mut model = builtin_models().remove(0);
        model.provider = "proxy".to_string();
        catalog.insert(model);
        assert!(catalog.contains("proxy", "kimi-k2.5"));
        assert!(!catalog.contains("kimi", "kimi-k2.5"));
    }
}
