//! 批量调用的数据模型
//!
//! 一个批次由若干 [`WorkItem`] 组成，执行后每个工作项恰好对应一个 [`CallResult`]，
//! 两者通过下标一一对应。

use std::fmt;
use std::time::Duration;

/// 工作项
///
/// 负载 `P` 对批量执行器是不透明的（可以是文件路径、也可以是一次对话请求）。
/// 身份由它在输入列表中的位置决定，提交后不可变。
#[derive(Debug, Clone)]
pub struct WorkItem<P> {
    pub payload: P,
    /// 为 false 时，瞬时错误也只尝试一次
    pub retryable: bool,
}

impl<P> WorkItem<P> {
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            retryable: true,
        }
    }

    /// 创建不允许重试的工作项
    pub fn once(payload: P) -> Self {
        Self {
            payload,
            retryable: false,
        }
    }
}

impl<P> From<P> for WorkItem<P> {
    fn from(payload: P) -> Self {
        WorkItem::new(payload)
    }
}

/// 失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 可重试：网络抖动、限流、超时、一般转换失败
    Transient,
    /// 不可重试：请求本身有问题
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "TransientError"),
            FailureKind::Permanent => write!(f, "PermanentError"),
        }
    }
}

/// 单个工作项的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult<T> {
    Success(T),
    Failure { kind: FailureKind, message: String },
}

impl<T> CallResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Success(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CallResult::Success(_) => None,
            CallResult::Failure { kind, .. } => Some(*kind),
        }
    }

    /// 转换为标准 Result，失败时返回 (类型, 信息)
    pub fn into_result(self) -> Result<T, (FailureKind, String)> {
        match self {
            CallResult::Success(value) => Ok(value),
            CallResult::Failure { kind, message } => Err((kind, message)),
        }
    }
}

/// 能力调用返回的错误
///
/// 由各能力适配器负责把自身的错误映射到这里。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    Transient(String),
    Permanent(String),
    /// 外部中断信号，立即终止，不消耗重试次数
    Cancelled,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Transient(msg) => write!(f, "瞬时错误: {}", msg),
            CallError::Permanent(msg) => write!(f, "永久错误: {}", msg),
            CallError::Cancelled => write!(f, "已取消"),
        }
    }
}

impl std::error::Error for CallError {}

/// 工作项的终止状态
///
/// 完整状态机：`Pending → Attempting → {Succeeded, Retrying → Attempting,
/// FailedPermanently, FailedAfterRetries}`，这里只记录终止状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Succeeded,
    FailedPermanently,
    FailedAfterRetries,
    Cancelled,
}

/// 单个工作项的执行记录（仅用于观测，不属于结果契约）
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub index: usize,
    pub attempts: u32,
    pub elapsed: Duration,
    pub state: TerminalState,
}
