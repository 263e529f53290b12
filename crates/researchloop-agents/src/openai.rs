//! OpenAI-compatible provider on top of `async-openai`.

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest, ResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;
use researchloop_core::{LlmConfig, SecretValue};
use tracing::debug;

use crate::error::AgentError;
use crate::provider::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, Role};

pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(api_key: &SecretValue, base_url: Option<&str>, timeout: Duration) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key.expose());
        if let Some(base_url) = base_url {
            config = config.with_api_base(base_url);
        }
        Self {
            client: Client::with_config(config),
            timeout,
        }
    }

    /// Build from the `[llm]` section, reading the key from its environment variable.
    pub fn from_config(config: &LlmConfig) -> Result<Self, AgentError> {
        let api_key = researchloop_core::require_env(&config.api_key_env)
            .map_err(|_| AgentError::ApiKeyMissing(config.api_key_env.clone()))?;
        Ok(Self::new(
            &api_key,
            config.base_url.as_deref(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    fn convert_message(message: &ChatMessage) -> ChatCompletionRequestMessage {
        match message.role {
            Role::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(
                        message.content.clone(),
                    ),
                    name: None,
                })
            }
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(message.content.clone()),
                name: None,
            }),
        }
    }

    fn build_request(request: &ChatRequest) -> CreateChatCompletionRequest {
        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            temperature: request.temperature,
            response_format: request.json_mode.then_some(ResponseFormat::JsonObject),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<async-openai::Client>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let chat = self.client.chat();
        let call = chat.create(Self::build_request(request));
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AgentError::Timeout(self.timeout.as_secs()))?
            .map_err(|err| AgentError::ApiRequest {
                message: err.to_string(),
                status: None,
            })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        let total_tokens = response.usage.map(|usage| usage.total_tokens);
        debug!(model = %request.model, ?total_tokens, "chat completion received");

        Ok(ChatResponse {
            content,
            total_tokens,
        })
    }
}
