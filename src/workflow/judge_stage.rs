//! 评判阶段 - 流程层
//!
//! 对照标准答案评判每个回答。评判模型需要返回 `{"reasoning": ..., "correct": ...}`，
//! 默认通过强制调用 `judgement` 函数取得，也可以关闭函数调用，要求模型直接输出 JSON。
//! 解析失败或调用失败都记为 `EVALUATION_ERROR: ...`，不会中断整个阶段。

use anyhow::Result;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info};

use crate::config::JudgeConfig;
use crate::error::LlmError;
use crate::models::loaders::{load_answers, write_json};
use crate::models::{sentinel, CallResult, Evaluation, QuestionAnswer, WorkItem};
use crate::orchestrator::BatchExecutor;
use crate::services::{ChatMessage, ChatRequest, Completer, CompletionCall, ToolSpec};
use crate::workflow::prompt::render_prompt;
use crate::workflow::StageStats;

/// 要求评判模型输出固定 JSON 格式
const JUDGE_FORMAT_INSTRUCTIONS: &str = "Respond only with a JSON object of the form \
{\"reasoning\": \"<step-by-step reasoning>\", \"correct\": <true|false>}. \
`correct` is your final judgment based on the reasoning.";

/// 评判函数名
const JUDGEMENT_TOOL: &str = "judgement";

/// 评判函数：参数即评判结果
pub fn judgement_tool() -> ToolSpec {
    ToolSpec {
        name: JUDGEMENT_TOOL.to_string(),
        description: "Record whether the answer matches the ground truth.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "reasoning": {
                    "type": "string",
                    "description": "Step-by-step reasoning comparing the answer with the ground truth."
                },
                "correct": {
                    "type": "boolean",
                    "description": "Final judgment based on the reasoning."
                }
            },
            "required": ["reasoning", "correct"]
        }),
    }
}

/// 构造一次评判对话
pub fn judge_request(cfg: &JudgeConfig, prompt: String) -> ChatRequest {
    if cfg.tool_call {
        ChatRequest::single(&cfg.model, prompt).with_forced_tool(judgement_tool())
    } else {
        ChatRequest {
            model: cfg.model.clone(),
            messages: vec![ChatMessage::system(JUDGE_FORMAT_INSTRUCTIONS), ChatMessage::user(prompt)],
            temperature: None,
            forced_tool: None,
        }
    }
}

/// 评判阶段
pub struct JudgeStage {
    completer: Arc<dyn Completer>,
    executor: BatchExecutor,
}

impl JudgeStage {
    pub fn new(completer: Arc<dyn Completer>, executor: BatchExecutor) -> Self {
        Self { completer, executor }
    }

    pub async fn run(&self, cfg: &JudgeConfig, answers_file: &Path, evaluated_file: &Path) -> Result<StageStats> {
        info!("开始评判回答");

        let answers = load_answers(answers_file).await?;
        let (evaluated, stats) = self.evaluate(answers, cfg).await?;

        write_json(&evaluated, evaluated_file).await?;
        info!("评判结果已保存至 {}", evaluated_file.display());

        Ok(stats)
    }

    /// 为每个回答填写 `evaluation`
    pub async fn evaluate(
        &self,
        mut questions: Vec<QuestionAnswer>,
        cfg: &JudgeConfig,
    ) -> Result<(Vec<QuestionAnswer>, StageStats)> {
        let mut stats = StageStats::new("评判");
        // (问题序号, 回答序号)
        let mut slots: Vec<(usize, usize)> = Vec::new();
        let mut items: Vec<WorkItem<ChatRequest>> = Vec::new();

        for (qi, qa) in questions.iter_mut().enumerate() {
            for (ai, answer) in qa.report_answers.iter_mut().enumerate() {
                stats.total += 1;

                if answer.conversion_error {
                    debug!("问题 {} 的报告转换失败，跳过评判", qa.question.question_id);
                    answer.evaluation = Some(Evaluation::failed(sentinel::CONVERSION_ERROR));
                    stats.failed += 1;
                    continue;
                }
                if answer.generation_error {
                    debug!("问题 {} 的回答生成失败，跳过评判", qa.question.question_id);
                    answer.evaluation = Some(Evaluation::failed(answer.answer.clone()));
                    stats.failed += 1;
                    continue;
                }

                let prompt = render_prompt(
                    &cfg.prompt,
                    &[
                        ("question", qa.question.question.as_str()),
                        ("answer", answer.answer.as_str()),
                        ("ground_truth", qa.question.ground_truth.as_str()),
                    ],
                );
                items.push(WorkItem::new(judge_request(cfg, prompt)));
                slots.push((qi, ai));
            }
        }

        if items.is_empty() {
            info!("没有需要评判的回答");
            return Ok((questions, stats));
        }

        info!(
            "使用 {} 处理 {} 个评判 (函数调用: {})",
            cfg.model,
            items.len(),
            if cfg.tool_call { "开" } else { "关" }
        );
        let capability = Arc::new(CompletionCall::new(Arc::clone(&self.completer)));
        let results = self.executor.run(items, capability).await?;

        for ((qi, ai), result) in slots.into_iter().zip(results) {
            let question_id = questions[qi].question.question_id.clone();
            let evaluation = match result {
                CallResult::Success(text) => parse_judgement(&text).map_err(|e| e.to_string()),
                CallResult::Failure { message, .. } => Err(message),
            };
            let evaluation = evaluation.unwrap_or_else(|message| {
                error!("评判问题 {} 时出错: {}", question_id, message);
                stats.failed += 1;
                Evaluation::failed(sentinel::evaluation_failure(&message))
            });
            questions[qi].report_answers[ai].evaluation = Some(evaluation);
        }

        Ok((questions, stats))
    }
}

fn json_object_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"))
}

/// 从模型回复中提取评判结果
///
/// 允许外层有代码块或说明文字；末尾缺少 `}` 时补上再解析。
pub fn parse_judgement(text: &str) -> Result<Evaluation, LlmError> {
    let start = text.find('{').ok_or_else(|| LlmError::JudgementParseFailed {
        reason: "回复中没有 JSON 对象".to_string(),
    })?;
    let tail = &text[start..];

    let candidate = match json_object_regex().find(tail) {
        Some(m) => m.as_str().to_string(),
        None => {
            let mut repaired = tail.trim_end().trim_end_matches('`').trim_end().to_string();
            repaired.push('}');
            repaired
        }
    };

    serde_json::from_str(&candidate).map_err(|e| LlmError::JudgementParseFailed { reason: e.to_string() })
}
