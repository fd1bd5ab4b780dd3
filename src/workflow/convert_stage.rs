//! 转换阶段 - 流程层
//!
//! 流程顺序：
//! 1. 扫描报告文件并按配置筛选
//! 2. 查询缓存，剪掉已转换的文件
//! 3. 批量转换剩余文件
//! 4. 合并结果，失败替换为 `Error converting ...` 标记
//! 5. 写出 markdown，并把新结果写入缓存

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::config::ConversionConfig;
use crate::error::FileError;
use crate::infrastructure::{ContentCache, ContentIdentity};
use crate::models::{sentinel, WorkItem};
use crate::orchestrator::{merge_with_cache, BatchExecutor};
use crate::services::{ConvertCall, DocumentConverter};
use crate::workflow::StageStats;

/// 转换阶段
///
/// - 不持有缓存的所有权，只通过注入的句柄读写
/// - 转换失败作为标记文本写出，不中断整个阶段
pub struct ConvertStage {
    converter: Arc<dyn DocumentConverter>,
    executor: BatchExecutor,
    cache: Option<ContentCache>,
}

impl ConvertStage {
    pub fn new(converter: Arc<dyn DocumentConverter>, executor: BatchExecutor, cache: Option<ContentCache>) -> Self {
        Self {
            converter,
            executor,
            cache,
        }
    }

    pub async fn run(&self, cfg: &ConversionConfig, reports_dir: &Path, markdown_dir: &Path) -> Result<StageStats> {
        info!("开始转换报告");

        let files = get_report_files(reports_dir, cfg.suffix.as_deref()).await?;
        if files.is_empty() {
            warn!("⚠️ 报告目录中没有找到文件");
            return Ok(StageStats::new("转换"));
        }
        let files = select_files(files, cfg);

        let lib = self.converter.lib();
        let capability = lib.as_str();
        let model = cfg.model.as_deref();

        // 内容标识：缓存读写共用
        let mut identities = Vec::with_capacity(files.len());
        for file in &files {
            identities.push(ContentIdentity::from_path(file, cfg.cache_identity).await?);
        }

        // 查询缓存
        let mut cached: Vec<Option<String>> = vec![None; files.len()];
        match (&self.cache, cfg.read_cache) {
            (Some(cache), true) => {
                for (slot, identity) in cached.iter_mut().zip(&identities) {
                    *slot = cache
                        .get(identity, capability, model, cfg.retry_cached_failures)
                        .await?;
                }
                let n_cached = cached.iter().filter(|c| c.is_some()).count();
                info!("使用缓存结果 {} 个", n_cached);
            }
            _ => info!("跳过缓存查询"),
        }

        // 批量转换未命中的文件
        let to_convert: Vec<WorkItem<PathBuf>> = files
            .iter()
            .zip(&cached)
            .filter(|(_, slot)| slot.is_none())
            .map(|(file, _)| WorkItem::new(file.clone()))
            .collect();

        let fresh = if to_convert.is_empty() {
            info!("全部 {} 个文件都命中缓存", files.len());
            Vec::new()
        } else {
            let count = to_convert.len();
            info!("使用 {} 转换 {} 个文件，模型: {}", lib, count, model.unwrap_or("无"));

            let started = Instant::now();
            let capability = Arc::new(ConvertCall::new(
                Arc::clone(&self.converter),
                cfg.model.clone(),
                cfg.img_prompt.clone(),
            ));
            let results = self.executor.run(to_convert, capability).await?;

            let elapsed = started.elapsed().as_secs_f64();
            info!(
                "转换 {} 个文件耗时 {:.2}s ({:.2}s/文件)",
                count,
                elapsed,
                elapsed / count as f64
            );
            results
        };

        let merged = merge_with_cache(cached, fresh, |index, _kind, message| {
            let text = sentinel::conversion_failure(identities[index].basename(), message);
            error!("{}", text);
            text
        })?;
        if merged.failures > 0 {
            error!("转换过程中发生 {} 个错误", merged.failures);
        }

        // 写出所有结果
        fs::create_dir_all(markdown_dir)
            .await
            .with_context(|| format!("无法创建目录: {}", markdown_dir.display()))?;
        for (file, text) in files.iter().zip(&merged.texts) {
            let md_path = markdown_path(file, markdown_dir);
            fs::write(&md_path, text)
                .await
                .with_context(|| format!("无法写入文件: {}", md_path.display()))?;
        }

        // 新结果写入缓存
        match (&self.cache, cfg.write_cache) {
            (Some(cache), true) => {
                for ((identity, text), from_cache) in identities.iter().zip(&merged.texts).zip(&merged.from_cache) {
                    if !from_cache {
                        cache.put(identity, capability, model, text).await?;
                    }
                }
            }
            _ => debug!("跳过写入缓存"),
        }

        Ok(StageStats {
            name: "转换".to_string(),
            total: merged.texts.len(),
            failed: merged.failures,
            cached: merged.from_cache.iter().filter(|c| **c).count(),
        })
    }
}

/// 递归扫描报告文件，默认返回 PDF 和 PPTX，按路径排序
pub async fn get_report_files(report_dir: &Path, suffix: Option<&str>) -> Result<Vec<PathBuf>> {
    info!("正在扫描报告目录: {}", report_dir.display());

    if !report_dir.exists() {
        return Err(FileError::DirectoryNotFound {
            path: report_dir.display().to_string(),
        }
        .into());
    }

    let matches = |path: &Path| -> bool {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        match suffix {
            Some(suffix) => name.ends_with(suffix),
            None => name.ends_with(".pdf") || name.ends_with(".pptx"),
        }
    };

    let mut report_files = Vec::new();
    let mut pending = vec![report_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("无法读取文件夹: {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if matches(&path) {
                report_files.push(path);
            }
        }
    }

    report_files.sort();
    Ok(report_files)
}

/// 按 target_files / sample_first_n 筛选
fn select_files(files: Vec<PathBuf>, cfg: &ConversionConfig) -> Vec<PathBuf> {
    if let Some(targets) = cfg.target_files.as_ref().filter(|t| !t.is_empty()) {
        let selected: Vec<PathBuf> = files
            .into_iter()
            .filter(|f| {
                f.file_name()
                    .map(|n| targets.iter().any(|t| t.as_str() == n.to_string_lossy()))
                    .unwrap_or(false)
            })
            .collect();
        info!("使用 target_files 指定的 {} 个文件", selected.len());
        selected
    } else if let Some(n) = cfg.sample_first_n {
        let selected: Vec<PathBuf> = files.into_iter().take(n).collect();
        info!("使用前 {} 个文件", selected.len());
        selected
    } else {
        info!("使用全部 {} 个文件", files.len());
        files
    }
}

/// `<markdown_dir>/<文件名>_from_<扩展名>.md`
pub fn markdown_path(file: &Path, markdown_dir: &Path) -> PathBuf {
    let stem = file.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let extension = file.extension().map(|e| e.to_string_lossy()).unwrap_or_default();
    markdown_dir.join(format!("{}_from_{}.md", stem, extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_path() {
        let path = markdown_path(Path::new("/reports/2024/acme.pptx"), Path::new("out"));
        assert_eq!(path, PathBuf::from("out/acme_from_pptx.md"));
    }

    #[tokio::test]
    async fn test_get_report_files_recurses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"").unwrap();
        std::fs::write(dir.path().join("sub/a.pptx"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let files = get_report_files(dir.path(), None).await.unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["b.pdf".to_string(), "sub/a.pptx".to_string()]);

        let txt = get_report_files(dir.path(), Some(".txt")).await.unwrap();
        assert_eq!(txt.len(), 1);
    }
}
