//! Chat Completions client for OpenAI-compatible endpoints.
//!
//! One implementation serves both providers: OpenAI directly, and Anthropic
//! through its OpenAI-compatible surface by pointing the base URL at
//! `https://api.anthropic.com/v1`. The handle's `model` field selects the
//! model per call, so a single client serves every endpoint of its provider.

use async_trait::async_trait;
use tracing::{debug, trace};

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage, ChatCompletionTool,
        ChatCompletionToolChoiceOption, ChatCompletionTools, CreateChatCompletionRequestArgs,
        FunctionObject, ToolChoiceOptions,
    },
    Client,
};
use tokio_util::sync::CancellationToken;

use crate::domain::IrSchema;
use crate::error::CoreError;
use crate::llm::extract_json;
use crate::ports::{ChatMessage, ChatRole, LlmClient, LlmUsage, RawToolCall, ToolDecl, TypedResponse};
use crate::router::ModelHandle;

/// OpenAI-compatible Chat Completions client.
pub struct OpenAiCompatClient {
    client: Client<OpenAIConfig>,
    provider_label: String,
}

impl OpenAiCompatClient {
    /// Client for api.openai.com with the given key.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(OpenAIConfig::new().with_api_key(api_key)),
            provider_label: "openai".to_string(),
        }
    }

    /// Client for Anthropic's OpenAI-compatible surface.
    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.anthropic.com/v1", "anthropic")
    }

    /// Client for any OpenAI-compatible base URL (self-hosted gateways).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::with_config(
                OpenAIConfig::new()
                    .with_api_key(api_key)
                    .with_api_base(base_url),
            ),
            provider_label: label.into(),
        }
    }

    fn messages_to_request(messages: &[ChatMessage]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m.role {
                ChatRole::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(m.content.as_str()),
                ),
                ChatRole::User | ChatRole::Tool => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(m.content.as_str()),
                ),
                ChatRole::Assistant => {
                    ChatCompletionRequestMessage::Assistant(m.content.as_str().into())
                }
            })
            .collect()
    }

    fn unavailable(&self, message: impl std::fmt::Display) -> CoreError {
        CoreError::ProviderUnavailable {
            provider: self.provider_label.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat(
        &self,
        handle: &ModelHandle,
        messages: &[ChatMessage],
        schema: Option<&IrSchema>,
        tools: Option<&[ToolDecl]>,
        cancel: &CancellationToken,
    ) -> Result<TypedResponse, CoreError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(handle.model.clone());
        args.messages(Self::messages_to_request(messages));

        if let Some(tools) = tools {
            let chat_tools: Vec<ChatCompletionTools> = tools
                .iter()
                .map(|t| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.parameters.clone()),
                            ..Default::default()
                        },
                    })
                })
                .collect();
            args.tools(chat_tools);
            args.tool_choice(ChatCompletionToolChoiceOption::Mode(
                ToolChoiceOptions::Required,
            ));
        }

        let request = args
            .build()
            .map_err(|e| self.unavailable(format!("request build failed: {e}")))?;

        debug!(
            provider = %self.provider_label,
            model = %handle.model,
            message_count = messages.len(),
            with_schema = schema.is_some(),
            "chat completions create"
        );
        if let Ok(js) = serde_json::to_string(&request) {
            trace!(request = %js, "chat request body");
        }

        // The cancel token is the abort primitive: dropping the in-flight
        // future aborts the HTTP request.
        let response = tokio::select! {
            r = self.client.chat().create(request) => {
                r.map_err(|e| self.unavailable(e))?
            }
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
        };

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.unavailable("no choices in response"))?;

        let msg = choice.message;
        let content = msg.content.unwrap_or_default();
        let mut tool_calls = Vec::new();
        for tc in msg.tool_calls.unwrap_or_default() {
            if let ChatCompletionMessageToolCalls::Function(f) = tc {
                let parsed_args = serde_json::from_str(&f.function.arguments).map_err(|e| {
                    CoreError::ToolCallMalformed {
                        message: format!(
                            "tool call `{}` arguments do not parse: {e}",
                            f.function.name
                        ),
                    }
                })?;
                tool_calls.push(RawToolCall {
                    name: f.function.name,
                    args: parsed_args,
                });
            }
        }

        let json = match schema {
            Some(schema) => {
                let value = extract_json(&content, &handle.model)?;
                schema.validate(&value, &handle.model)?;
                Some(value)
            }
            None => None,
        };

        let usage = response
            .usage
            .map(|u| LlmUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(TypedResponse {
            content,
            json,
            tool_calls,
            usage,
        })
    }
}
