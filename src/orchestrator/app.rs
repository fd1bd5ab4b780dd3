//! 应用编排 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：日志文件、运行配置、缓存、转换与 LLM 能力
//! 2. **资源所有者**：唯一创建 `ContentCache` 和批量执行器的地方
//! 3. **阶段调度**：按 `[steps]` 依次运行转换、回答、评判
//! 4. **全局统计**：汇总各阶段结果
//!
//! 取消信号由调用方传入，所有执行器共享同一个信号。

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, RunConfig};
use crate::infrastructure::{CancelSignal, ContentCache};
use crate::models::loaders::load_run_config;
use crate::orchestrator::{BatchExecutor, BatchOptions, RetryPolicy};
use crate::services::{CommandConverter, Completer, DocumentConverter, LlmService};
use crate::utils::logging::{init_log_file, log_startup, log_stage_complete, log_stage_start, print_final_stats};
use crate::workflow::{AnswerStage, ConvertStage, JudgeStage, StageStats};

/// 应用主结构
pub struct App {
    config: Config,
    run_config: RunConfig,
    convert_stage: ConvertStage,
    answer_stage: AnswerStage,
    judge_stage: JudgeStage,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config, cancel: CancelSignal) -> Result<Self> {
        // 初始化日志文件
        init_log_file(&config.output_log_file)?;

        log_startup(config.llm_workers, config.llm_retries);

        let run_config = load_run_config(Path::new(&config.run_config_path)).await?;
        info!("✓ 已加载运行配置: {}", config.run_config_path);

        let template = run_config
            .convert
            .command_template()
            .with_context(|| format!("转换库 {} 没有配置命令模板", run_config.convert.lib))?;
        let converter: Arc<dyn DocumentConverter> = Arc::new(CommandConverter::new(run_config.convert.lib, template)?);
        let completer: Arc<dyn Completer> = Arc::new(LlmService::new(&config));

        Self::assemble(config, run_config, converter, completer, cancel).await
    }

    /// 用给定的能力组装应用
    pub async fn assemble(
        config: Config,
        run_config: RunConfig,
        converter: Arc<dyn DocumentConverter>,
        completer: Arc<dyn Completer>,
        cancel: CancelSignal,
    ) -> Result<Self> {
        let cache = if run_config.convert.read_cache || run_config.convert.write_cache {
            Some(ContentCache::open(&run_config.paths.cache_dir).await?)
        } else {
            None
        };

        let llm_executor = BatchExecutor::new(BatchOptions {
            concurrency: config.llm_workers,
            retry: RetryPolicy::from_retries(config.llm_retries),
            timeout_per_call: Duration::from_secs(config.llm_timeout_secs),
        })?
        .with_cancel_signal(cancel.clone());

        let convert_executor = BatchExecutor::new(BatchOptions {
            concurrency: run_config.convert.workers,
            retry: RetryPolicy::from_retries(run_config.convert.retries),
            timeout_per_call: Duration::from_secs(run_config.convert.timeout_secs),
        })?
        .with_cancel_signal(cancel);

        Ok(Self {
            convert_stage: ConvertStage::new(converter, convert_executor, cache),
            answer_stage: AnswerStage::new(Arc::clone(&completer), llm_executor.clone()),
            judge_stage: JudgeStage::new(completer, llm_executor),
            config,
            run_config,
        })
    }

    /// 运行应用主逻辑，返回各阶段统计
    pub async fn run(&self) -> Result<Vec<StageStats>> {
        let paths = &self.run_config.paths;
        let steps = &self.run_config.steps;
        let mut all_stats = Vec::new();
        let mut step = 0;

        if steps.convert {
            step += 1;
            log_stage_start(step, "转换报告");
            let stats = self
                .convert_stage
                .run(&self.run_config.convert, &paths.reports_dir, &paths.markdown_dir)
                .await?;
            log_stage_complete(&stats);
            all_stats.push(stats);
        }

        if steps.answer {
            step += 1;
            log_stage_start(step, "回答问题");
            let stats = self
                .answer_stage
                .run(
                    &self.run_config.answer,
                    &paths.questions_file,
                    &paths.markdown_dir,
                    &paths.answers_file,
                )
                .await?;
            log_stage_complete(&stats);
            all_stats.push(stats);
        }

        if steps.judge {
            step += 1;
            log_stage_start(step, "评判回答");
            let stats = self
                .judge_stage
                .run(&self.run_config.judge, &paths.answers_file, &paths.evaluated_answers_file)
                .await?;
            log_stage_complete(&stats);
            all_stats.push(stats);
        }

        print_final_stats(&all_stats, &self.config.output_log_file);

        Ok(all_stats)
    }
}
