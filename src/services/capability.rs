//! 能力适配器
//!
//! 把转换、对话能力包装成批量执行器可以调用的 [`CallFn`]，
//! 并在这里统一完成错误分类。

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::models::CallError;
use crate::orchestrator::CallFn;
use crate::services::converter::{ConversionError, DocumentConverter};
use crate::services::llm_service::{ChatRequest, Completer, RemoteCallError, RemoteCallErrorKind};

/// 所有转换失败都视为可重试：上游无法区分基础设施问题和文件本身的问题
impl From<ConversionError> for CallError {
    fn from(err: ConversionError) -> Self {
        CallError::Transient(err.message)
    }
}

impl From<RemoteCallError> for CallError {
    fn from(err: RemoteCallError) -> Self {
        match err.kind {
            RemoteCallErrorKind::BadRequest => CallError::Permanent(err.message),
            RemoteCallErrorKind::Transient => CallError::Transient(err.message),
        }
    }
}

/// 文档转换调用
pub struct ConvertCall {
    converter: Arc<dyn DocumentConverter>,
    model: Option<String>,
    img_prompt: String,
}

impl ConvertCall {
    pub fn new(converter: Arc<dyn DocumentConverter>, model: Option<String>, img_prompt: impl Into<String>) -> Self {
        Self {
            converter,
            model,
            img_prompt: img_prompt.into(),
        }
    }
}

#[async_trait]
impl CallFn<PathBuf, String> for ConvertCall {
    async fn call(&self, file: &PathBuf) -> Result<String, CallError> {
        Ok(self
            .converter
            .convert(file, self.model.as_deref(), &self.img_prompt)
            .await?)
    }
}

/// 对话补全调用
pub struct CompletionCall {
    completer: Arc<dyn Completer>,
}

impl CompletionCall {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self { completer }
    }
}

#[async_trait]
impl CallFn<ChatRequest, String> for CompletionCall {
    async fn call(&self, request: &ChatRequest) -> Result<String, CallError> {
        Ok(self.completer.complete(request).await?)
    }
}
