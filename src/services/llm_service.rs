//! LLM 服务 - 业务能力层
//!
//! 只负责"给一段提示词，拿回一段文本"，不关心提示词内容和解析
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CompletionError;

const SYSTEM_MESSAGE: &str = "You are a meticulous data analyst who solves quiz questions. \
Work only from the material provided, compute exact values, and always reply with the JSON block requested.";

/// 模型调用能力
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Completer: Send + Sync {
    /// 单次调用，不保留对话状态
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

/// LLM 服务
///
/// 职责：
/// - 调用 LLM API
/// - 每次调用都是独立的单轮对话
/// - 不解析模型输出
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.model_api_key.expose_secret())
            .with_api_base(&config.llm_api_base_url);

        let client = Client::with_config(openai_config);

        Self {
            client,
            model_name: config.llm_model_name.clone(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn api_error(&self, message: impl ToString) -> CompletionError {
        CompletionError::Api {
            model: self.model_name.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Completer for LlmService {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("提示词长度: {} 字符", prompt.chars().count());

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_MESSAGE)
            .build()
            .map_err(|e| self.api_error(e))?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| self.api_error(e))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.1)
            .max_tokens(2048u32)
            .build()
            .map_err(|e| self.api_error(e))?;

        // 调用 API
        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            self.api_error(e)
        })?;

        debug!("LLM API 调用成功");

        // 提取响应内容
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CompletionError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // 需要真实 API Key，手动运行
    async fn test_complete_live() {
        dotenvy::dotenv().ok();
        let config = Config::from_env();
        let service = LlmService::new(&config);
        let reply = service.complete("Reply with the single word: pong").await.unwrap();
        assert!(reply.to_lowercase().contains("pong"));
    }

    #[test]
    fn test_model_name_from_config() {
        let mut config = Config::test_config();
        config.llm_model_name = "gemini-2.0-flash".to_string();
        assert_eq!(LlmService::new(&config).model_name(), "gemini-2.0-flash");
    }
}
