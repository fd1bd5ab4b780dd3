//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量调用和阶段调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 应用编排
//! - 管理应用生命周期（初始化、运行）
//! - 创建缓存、执行器和能力，并注入各阶段
//! - 输出全局统计信息
//!
//! ### `batch_executor` - 批量执行器
//! - 有界并发（Semaphore）
//! - 单项重试、超时、取消
//! - 结果与输入同序
//!
//! ### `retry` / `merge`
//! - 重试策略（指数退避 + 全抖动）
//! - 缓存命中与新结果的合并
//!
//! ## 层次关系
//!
//! ```text
//! app (调度各阶段)
//!     ↓
//! workflow (convert / answer / judge)
//!     ↓
//! batch_executor + merge        infrastructure::ContentCache
//!     ↓
//! services (能力层：converter / llm)
//! ```
//!
//! 执行器和缓存互不依赖，由流程层组合。

pub mod app;
pub mod batch_executor;
pub mod merge;
pub mod retry;

// 重新导出主要类型
pub use app::App;
pub use batch_executor::{BatchExecutor, BatchOptions, BatchOutcome, CallFn};
pub use merge::{merge_with_cache, MergedBatch};
pub use retry::RetryPolicy;
