//! 文档转换服务 - 业务能力层
//!
//! 只负责"把一个文件转换成 markdown"能力，不关心缓存和批量。
//! 具体的转换库通过命令行调用，每个库对应一个命令模板。

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::utils::logging::truncate_text;

/// 支持的转换库（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionLib {
    Docling,
    Markitdown,
    Zerox,
    Marker,
}

impl ConversionLib {
    /// 用于缓存键和日志的稳定名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionLib::Docling => "docling",
            ConversionLib::Markitdown => "markitdown",
            ConversionLib::Zerox => "zerox",
            ConversionLib::Marker => "marker",
        }
    }

    /// 内置命令模板，只有自带 stdout 输出 CLI 的库才有
    pub fn default_command(&self) -> Option<Vec<String>> {
        match self {
            ConversionLib::Markitdown => Some(vec!["markitdown".to_string(), "{file}".to_string()]),
            _ => None,
        }
    }
}

impl fmt::Display for ConversionLib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 转换失败
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConversionError {
    pub message: String,
}

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 文档转换能力
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    fn lib(&self) -> ConversionLib;

    /// 转换单个文件
    ///
    /// - `model`: 用于图片描述的模型，None 表示不使用
    /// - `img_prompt`: 图片描述提示词
    async fn convert(
        &self,
        file: &Path,
        model: Option<&str>,
        img_prompt: &str,
    ) -> Result<String, ConversionError>;
}

/// 通过外部命令行工具转换文档
///
/// 命令模板中的 `{file}`、`{model}`、`{img_prompt}` 会被替换，stdout 即转换结果。
#[derive(Debug, Clone)]
pub struct CommandConverter {
    lib: ConversionLib,
    template: Vec<String>,
}

impl CommandConverter {
    pub fn new(lib: ConversionLib, template: Vec<String>) -> Result<Self, ConversionError> {
        if template.is_empty() || template[0].is_empty() {
            return Err(ConversionError::new(format!("转换库 {} 的命令模板为空", lib)));
        }
        Ok(Self { lib, template })
    }

    /// 展开命令模板
    fn expand(&self, file: &Path, model: Option<&str>, img_prompt: &str) -> Vec<String> {
        let file = file.to_string_lossy();
        self.template
            .iter()
            .map(|arg| {
                arg.replace("{file}", &file)
                    .replace("{model}", model.unwrap_or_default())
                    .replace("{img_prompt}", img_prompt)
            })
            .collect()
    }
}

#[async_trait]
impl DocumentConverter for CommandConverter {
    fn lib(&self) -> ConversionLib {
        self.lib
    }

    async fn convert(
        &self,
        file: &Path,
        model: Option<&str>,
        img_prompt: &str,
    ) -> Result<String, ConversionError> {
        let args = self.expand(file, model, img_prompt);
        debug!("执行转换命令: {:?}", args);

        let output = Command::new(&args[0])
            .args(&args[1..])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConversionError::new(format!("无法启动 {}: {}", args[0], e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConversionError::new(format!(
                "{} 退出码 {:?}: {}",
                self.lib,
                output.status.code(),
                truncate_text(stderr.trim(), 500)
            )));
        }

        let markdown = String::from_utf8_lossy(&output.stdout).to_string();
        if markdown.trim().is_empty() {
            return Err(ConversionError::new(format!(
                "{} 对 {} 的转换结果为空",
                self.lib,
                file.display()
            )));
        }

        Ok(markdown)
    }
}
