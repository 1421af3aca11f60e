use serde::Deserialize;

/// Kimi 流式增量块 与 OpenAI Chat Completions chunk 同构
#[derive(Debug, Deserialize, Clone)]
pub(crate) struct KimiStreamChunk {
    #[serde(default)]
    pub(crate) choices: Vec<KimiStreamChoice>,
    #[serde(default)]
    pub(crate) usage: Option<KimiUsage>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct KimiStreamChoice {
    #[serde(default)]
    pub(crate) delta: Option<KimiDelta>,
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct KimiDelta {
    #[serde(default)]
    pub(crate) content: Option<String>,
    /// 推理输出增量 仅 reasoning 模型返回
    #[serde(default)]
    pub(crate) reasoning_content: Option<String>,
    #[serde(default)]
    pub(crate) tool_calls: Option<Vec<KimiToolCallDelta>>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct KimiToolCallDelta {
    #[serde(default)]
    pub(crate) index: Option<usize>,
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) function: Option<KimiToolFunctionDelta>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct KimiToolFunctionDelta {
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) arguments: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct KimiUsage {
    #[serde(default)]
    pub(crate) prompt_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) completion_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) prompt_tokens_details: Option<KimiPromptTokensDetails>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct KimiPromptTokensDetails {
    #[serde(default)]
    pub(crate) cached_tokens: Option<u64>,
}
