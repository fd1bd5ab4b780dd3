//! LLM 服务 - 业务能力层
//!
//! 只负责"完成一次对话"能力，不关心批量和重试
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点（如 litellm 代理）和模型
//! - 兼容 OpenAI API 的服务
//! - 可强制模型调用指定函数，返回函数参数 JSON

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionNamedToolChoice, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, ChatCompletionTool,
        ChatCompletionToolChoiceOption, ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionName,
        FunctionObjectArgs,
    },
    Client,
};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::LlmError;

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
}

/// 对话消息
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// 函数工具定义
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema
    pub parameters: serde_json::Value,
}

/// 一次对话请求
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// None 表示不传温度参数（部分模型不支持）
    pub temperature: Option<f32>,
    /// 设置后强制模型调用该函数，返回值为函数参数 JSON
    pub forced_tool: Option<ToolSpec>,
}

impl ChatRequest {
    /// 只包含一条用户消息的请求
    pub fn single(model: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::user(user_message)],
            temperature: None,
            forced_tool: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_forced_tool(mut self, tool: ToolSpec) -> Self {
        self.forced_tool = Some(tool);
        self
    }
}

/// 远程调用错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCallErrorKind {
    /// 请求本身有问题（如提示词过长），重试无意义
    BadRequest,
    /// 网络、限流、服务端错误等
    Transient,
}

/// 远程调用错误
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteCallError {
    pub kind: RemoteCallErrorKind,
    pub message: String,
}

impl RemoteCallError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteCallErrorKind::BadRequest,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteCallErrorKind::Transient,
            message: message.into(),
        }
    }
}

impl From<OpenAIError> for RemoteCallError {
    fn from(err: OpenAIError) -> Self {
        match &err {
            OpenAIError::ApiError(api) if api.r#type.as_deref() == Some("invalid_request_error") => {
                RemoteCallError::bad_request(err.to_string())
            }
            OpenAIError::InvalidArgument(_) => RemoteCallError::bad_request(err.to_string()),
            _ => RemoteCallError::transient(err.to_string()),
        }
    }
}

/// 对话补全能力
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, RemoteCallError>;
}

/// LLM 服务
///
/// 职责：
/// - 调用 OpenAI 兼容 API 完成单个对话
/// - 把 API 错误分为"请求错误"和"瞬时错误"
/// - 不重试、不缓存、不关心批量
pub struct LlmService {
    client: Client<OpenAIConfig>,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
        }
    }

    fn build_messages(request: &ChatRequest) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            let built = match message.role {
                ChatRole::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(message.content.as_str())
                        .build()?,
                ),
                ChatRole::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(message.content.as_str())
                        .build()?,
                ),
            };
            messages.push(built);
        }
        Ok(messages)
    }

    /// 构造函数工具及强制调用它的 tool_choice
    fn build_tool(tool: &ToolSpec) -> Result<(ChatCompletionTools, ChatCompletionToolChoiceOption), OpenAIError> {
        let function = FunctionObjectArgs::default()
            .name(tool.name.as_str())
            .description(tool.description.as_str())
            .parameters(tool.parameters.clone())
            .build()?;

        let choice = ChatCompletionToolChoiceOption::Function(ChatCompletionNamedToolChoice {
            function: FunctionName {
                name: tool.name.clone(),
            },
        });
        Ok((ChatCompletionTools::Function(ChatCompletionTool { function }), choice))
    }
}

/// 取第一个函数调用的参数
fn tool_call_arguments(tool_calls: Option<&[ChatCompletionMessageToolCalls]>, name: &str) -> Option<String> {
    tool_calls?.iter().find_map(|call| match call {
        ChatCompletionMessageToolCalls::Function(call) if call.function.name == name => {
            Some(call.function.arguments.clone())
        }
        _ => None,
    })
}

#[async_trait]
impl Completer for LlmService {
    async fn complete(&self, request: &ChatRequest) -> Result<String, RemoteCallError> {
        debug!("调用 LLM API，模型: {}", request.model);

        let messages = Self::build_messages(request).map_err(|e| RemoteCallError::bad_request(e.to_string()))?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&request.model).messages(messages);
        if let Some(temperature) = request.temperature {
            builder.temperature(temperature);
        }
        if let Some(tool) = &request.forced_tool {
            let (tool, choice) = Self::build_tool(tool).map_err(|e| RemoteCallError::bad_request(e.to_string()))?;
            builder.tools(vec![tool]).tool_choice(choice);
        }
        let api_request = builder
            .build()
            .map_err(|e| RemoteCallError::bad_request(e.to_string()))?;

        let response = self.client.chat().create(api_request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            RemoteCallError::from(e)
        })?;

        debug!("LLM API 调用成功");

        let message = response.choices.first().map(|choice| &choice.message);
        let text = match (&request.forced_tool, message) {
            (Some(tool), Some(message)) => {
                tool_call_arguments(message.tool_calls.as_deref(), &tool.name).or_else(|| message.content.clone())
            }
            (None, Some(message)) => message.content.clone(),
            (_, None) => None,
        };

        text.ok_or_else(|| {
                RemoteCallError::transient(
                    LlmError::EmptyContent {
                        model: request.model.clone(),
                    }
                    .to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service() -> LlmService {
        let config = Config::from_env();
        LlmService::new(&config)
    }

    #[test]
    fn test_build_messages_keeps_order() {
        let request = ChatRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            temperature: None,
            forced_tool: None,
        };
        let messages = LlmService::build_messages(&request).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
    }

    fn verdict_tool() -> ToolSpec {
        ToolSpec {
            name: "verdict".to_string(),
            description: "Record the verdict".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"correct": {"type": "boolean"}},
                "required": ["correct"]
            }),
        }
    }

    #[test]
    fn test_build_tool_forces_named_function() {
        let (tool, choice) = LlmService::build_tool(&verdict_tool()).unwrap();

        match tool {
            ChatCompletionTools::Function(tool) => {
                assert_eq!(tool.function.name, "verdict");
                assert_eq!(tool.function.description.as_deref(), Some("Record the verdict"));
                assert_eq!(tool.function.parameters.unwrap()["required"][0], "correct");
            }
            other => panic!("意外的工具类型: {:?}", other),
        }
        match choice {
            ChatCompletionToolChoiceOption::Function(named) => assert_eq!(named.function.name, "verdict"),
            other => panic!("意外的 tool_choice: {:?}", other),
        }

        let json = serde_json::to_value(ChatCompletionToolChoiceOption::Function(ChatCompletionNamedToolChoice {
            function: FunctionName {
                name: "verdict".to_string(),
            },
        }))
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "function", "function": {"name": "verdict"}}));
    }

    #[test]
    fn test_tool_call_arguments_picks_named_function() {
        let calls: Vec<ChatCompletionMessageToolCalls> = serde_json::from_value(serde_json::json!([
            {"id": "call_0", "type": "function", "function": {"name": "other", "arguments": "{}"}},
            {"id": "call_1", "type": "function", "function": {"name": "verdict", "arguments": "{\"correct\": true}"}}
        ]))
        .unwrap();

        assert_eq!(
            tool_call_arguments(Some(calls.as_slice()), "verdict").as_deref(),
            Some("{\"correct\": true}")
        );
        assert_eq!(tool_call_arguments(Some(calls.as_slice()), "missing"), None);
        assert_eq!(tool_call_arguments(None, "verdict"), None);
    }

    #[test]
    fn test_single_request_has_no_tool() {
        let request = ChatRequest::single("m", "hi").with_forced_tool(verdict_tool());
        assert_eq!(request.forced_tool.as_ref().map(|t| t.name.as_str()), Some("verdict"));
        assert_eq!(ChatRequest::single("m", "hi").forced_tool, None);
    }

    #[test]
    fn test_invalid_argument_is_bad_request() {
        let err = RemoteCallError::from(OpenAIError::InvalidArgument("prompt too long".to_string()));
        assert_eq!(err.kind, RemoteCallErrorKind::BadRequest);
    }

    /// 需要可用的 LLM 端点：
    /// ```bash
    /// LLM_API_BASE_URL=... LLM_API_KEY=... cargo test test_complete_simple -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_complete_simple() {
        let _ = tracing_subscriber::fmt::try_init();

        let service = create_test_service();
        let model = std::env::var("LLM_MODEL_NAME").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let request = ChatRequest::single(model, "Reply with the single word: pong").with_temperature(0.0);

        match service.complete(&request).await {
            Ok(response) => {
                println!("LLM 响应: {}", response);
                assert!(!response.is_empty());
            }
            Err(e) => panic!("测试失败: {}", e),
        }
    }
}
