//! 流程层（Workflow Layer）
//!
//! 每个阶段定义"一类工作项"的完整处理流程：构造工作项 → 查缓存 → 批量执行 → 合并 → 落盘
//!
//! - `convert_stage` - 报告转换为 markdown
//! - `answer_stage` - 基于转换结果回答问题
//! - `judge_stage` - 对照标准答案评判回答
//! - `prompt` - 提示词模板渲染

pub mod answer_stage;
pub mod convert_stage;
pub mod judge_stage;
pub mod prompt;

pub use answer_stage::AnswerStage;
pub use convert_stage::ConvertStage;
pub use judge_stage::JudgeStage;

/// 单个阶段的处理统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageStats {
    pub name: String,
    pub total: usize,
    pub failed: usize,
    pub cached: usize,
}

impl StageStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}
