//! # DocQA Bench
//!
//! 评测文档转换流水线对问答信息保留程度的 Rust 应用程序：
//! 转换报告 → 基于转换结果回答问题 → 对照标准答案评判
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有持久化资源和进程级信号，只暴露能力
//! - `ContentCache` - 内容寻址的转换结果缓存
//! - `CancelSignal` - 全局取消信号（Ctrl-C）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个工作项
//! - `DocumentConverter` - 文档转换能力（命令行工具）
//! - `Completer` / `LlmService` - 对话补全能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义每个阶段的完整处理流程
//! - `ConvertStage` / `AnswerStage` / `JudgeStage`
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_executor` - 有界并发、单项重试的批量执行器
//! - `orchestrator/app` - 应用生命周期与阶段调度
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, RunConfig};
pub use error::{AppError, AppResult};
pub use infrastructure::{CancelSignal, ContentCache, ContentIdentity};
pub use models::{CallError, CallResult, FailureKind, WorkItem};
pub use orchestrator::{merge_with_cache, App, BatchExecutor, BatchOptions, CallFn, RetryPolicy};
pub use workflow::StageStats;
