//! 业务能力层：描述"我能做什么"，只处理单个工作项

pub mod capability;
pub mod converter;
pub mod llm_service;

pub use capability::{CompletionCall, ConvertCall};
pub use converter::{CommandConverter, ConversionError, ConversionLib, DocumentConverter};
pub use llm_service::{
    ChatMessage, ChatRequest, ChatRole, Completer, LlmService, RemoteCallError, RemoteCallErrorKind, ToolSpec,
};
