use thiserror::Error;

/// 应用程序错误类型
///
/// 注意：单个工作项的远程调用失败不会变成 `AppError`，
/// 而是作为 [`CallResult::Failure`](crate::models::CallResult) 数据返回。
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误（包括编程错误，如并发数为 0）
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// LLM 服务错误
    #[error("LLM错误: {0}")]
    Llm(#[from] LlmError),
    /// 缓存错误
    #[error("缓存错误: {0}")]
    Cache(#[from] CacheError),
    /// 批次完整性被破坏（输入输出数量不一致），属于逻辑缺陷
    #[error("批次完整性错误: 期望 {expected} 个结果, 实际 {actual} 个")]
    Integrity { expected: usize, actual: usize },
    /// 外部中断（如 Ctrl-C），不会被重试逻辑吞掉
    #[error("批次已取消: 已完成 {settled}/{total}")]
    Cancelled { settled: usize, total: usize },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 参数非法（编程错误，立即失败，不会重试）
    #[error("参数 {name} 非法: {reason}")]
    InvalidArgument { name: String, reason: String },
    /// 配置项校验失败
    #[error("配置项 {field} 校验失败: {reason}")]
    ValidationFailed { field: String, reason: String },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 目录不存在
    #[error("目录不存在: {path}")]
    DirectoryNotFound { path: String },
}

/// LLM 服务错误
#[derive(Debug, Error)]
pub enum LlmError {
    /// 返回内容为空
    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
    /// 评判结果解析失败
    #[error("无法解析评判结果: {reason}")]
    JudgementParseFailed { reason: String },
}

/// 缓存错误
#[derive(Debug, Error)]
pub enum CacheError {
    /// 无法创建缓存目录
    #[error("无法创建缓存目录 ({path}): {source}")]
    CreateDirFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 读取缓存条目失败（不包括未命中）
    #[error("读取缓存条目失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 写入缓存条目失败
    #[error("写入缓存条目失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 无法计算输入文件的内容标识
    #[error("无法获取文件标识 ({path}): {source}")]
    IdentityFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建参数非法错误
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        })
    }

    /// 创建配置校验错误
    pub fn validation_failed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::ValidationFailed {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
