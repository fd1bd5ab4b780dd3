//! 日志工具模块
//!
//! 提供日志初始化、格式化和输出的辅助函数

use anyhow::Result;
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::workflow::StageStats;

/// 初始化 tracing 日志
///
/// 优先读取 `RUST_LOG`，否则按 `verbose` 使用 debug 或 info 级别。可重复调用。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n实验运行日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
///
/// # 参数
/// - `llm_workers`: LLM 并发数
/// - `llm_retries`: LLM 重试次数
pub fn log_startup(llm_workers: usize, llm_retries: u32) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 文档转换问答评测");
    info!("📊 LLM 并发数: {}，重试次数: {}", llm_workers, llm_retries);
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始信息
///
/// # 参数
/// - `step`: 阶段编号
/// - `description`: 阶段说明
pub fn log_stage_start(step: usize, description: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📦 第 {} 步: {}", step, description);
    info!("{}", "=".repeat(60));
}

/// 记录阶段完成信息
pub fn log_stage_complete(stats: &StageStats) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ {} 完成: 成功 {}/{}，缓存命中 {}",
        stats.name,
        stats.total.saturating_sub(stats.failed),
        stats.total,
        stats.cached
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `stages`: 各阶段统计
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(stages: &[StageStats], log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    for stage in stages {
        info!(
            "{}: ✅ 成功 {}/{} ❌ 失败 {}",
            stage.name,
            stage.total.saturating_sub(stage.failed),
            stage.total,
            stage.failed
        );
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
