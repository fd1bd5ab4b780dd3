//! 回答阶段 - 流程层
//!
//! 流程顺序：
//! 1. 为每个问题找到 `<report_name>_from*.md`
//! 2. 转换失败的报告直接记为 `CONVERSION_ERROR`
//! 3. 其余报告构造对话，整体交给批量执行器
//! 4. 回答失败记为 `EVALUATION_ERROR: ...`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info};

use crate::config::AnswerConfig;
use crate::models::loaders::{load_questions, write_json};
use crate::models::{sentinel, CallResult, Question, QuestionAnswer, ReportAnswer, WorkItem};
use crate::orchestrator::BatchExecutor;
use crate::services::{ChatRequest, Completer, CompletionCall};
use crate::workflow::prompt::render_prompt;
use crate::workflow::StageStats;

/// 待发送的对话及其归属
struct PendingChat {
    question_index: usize,
    report_filename: String,
    request: ChatRequest,
}

/// 回答阶段
pub struct AnswerStage {
    completer: Arc<dyn Completer>,
    executor: BatchExecutor,
}

impl AnswerStage {
    pub fn new(completer: Arc<dyn Completer>, executor: BatchExecutor) -> Self {
        Self { completer, executor }
    }

    /// 读取问题文件，回答后写出结果
    pub async fn run(
        &self,
        cfg: &AnswerConfig,
        questions_file: &Path,
        markdown_dir: &Path,
        answers_file: &Path,
    ) -> Result<StageStats> {
        info!("开始回答问题");

        let questions = load_questions(questions_file).await?;
        let (answers, stats) = self.answer_questions(questions, markdown_dir, cfg).await?;

        write_json(&answers, answers_file).await?;
        info!("回答已保存至 {}", answers_file.display());

        Ok(stats)
    }

    /// 针对每份匹配的报告回答每个问题
    pub async fn answer_questions(
        &self,
        questions: Vec<Question>,
        markdown_dir: &Path,
        cfg: &AnswerConfig,
    ) -> Result<(Vec<QuestionAnswer>, StageStats)> {
        let mut stats = StageStats::new("回答");
        let mut answers: Vec<QuestionAnswer> = Vec::with_capacity(questions.len());
        let mut pending: Vec<PendingChat> = Vec::new();

        for question in questions {
            debug!("处理问题 {}，报告: {}", question.question_id, question.report_name);

            let reports = find_matching_reports(markdown_dir, &question.report_name).await?;
            if reports.is_empty() {
                debug!("没有找到 {} 的报告 (问题: {})", question.report_name, question.question_id);
            }

            let mut question_answer = QuestionAnswer::from(question);
            for report_path in reports {
                let content = fs::read_to_string(&report_path)
                    .await
                    .with_context(|| format!("无法读取报告: {}", report_path.display()))?;
                let report_filename = file_name(&report_path);
                stats.total += 1;

                if sentinel::is_conversion_failure(&content) {
                    info!("跳过报告 {}：转换未成功", report_filename);
                    question_answer.report_answers.push(ReportAnswer {
                        report_filename,
                        answer: sentinel::CONVERSION_ERROR.to_string(),
                        model: cfg.model.clone(),
                        conversion_error: true,
                        generation_error: false,
                        evaluation: None,
                    });
                    stats.failed += 1;
                    continue;
                }

                let prompt = render_prompt(
                    &cfg.prompt,
                    &[
                        ("question", question_answer.question.question.as_str()),
                        ("report_content", content.as_str()),
                    ],
                );
                pending.push(PendingChat {
                    question_index: answers.len(),
                    report_filename,
                    request: ChatRequest::single(&cfg.model, prompt).with_temperature(cfg.temperature),
                });
            }
            answers.push(question_answer);
        }

        if pending.is_empty() {
            info!("没有可用于回答的报告");
            return Ok((answers, stats));
        }

        info!("使用 {} 处理 {} 个对话", cfg.model, pending.len());
        let items: Vec<WorkItem<ChatRequest>> = pending.iter().map(|p| WorkItem::new(p.request.clone())).collect();
        let capability = Arc::new(CompletionCall::new(Arc::clone(&self.completer)));
        let results = self.executor.run(items, capability).await?;

        for (chat, result) in pending.into_iter().zip(results) {
            let (answer, generation_error) = match result {
                CallResult::Success(text) => (text, false),
                CallResult::Failure { kind, message } => {
                    error!("回答失败 ({}) [{}]: {}", chat.report_filename, kind, message);
                    stats.failed += 1;
                    (sentinel::evaluation_failure(&message), true)
                }
            };
            answers[chat.question_index].report_answers.push(ReportAnswer {
                report_filename: chat.report_filename,
                answer,
                model: cfg.model.clone(),
                conversion_error: false,
                generation_error,
                evaluation: None,
            });
        }

        Ok((answers, stats))
    }
}

/// 找到以 `<report_name>_from` 开头的 markdown 文件，按文件名排序
pub async fn find_matching_reports(markdown_dir: &Path, report_name: &str) -> Result<Vec<PathBuf>> {
    let prefix = format!("{}_from", report_name);
    let mut matching = Vec::new();

    let mut entries = fs::read_dir(markdown_dir)
        .await
        .with_context(|| format!("无法读取文件夹: {}", markdown_dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&prefix) && name.ends_with(".md") {
            matching.push(entry.path());
        }
    }

    matching.sort();
    Ok(matching)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
