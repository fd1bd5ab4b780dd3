//! 缓存结果与批量结果的合并

use crate::error::{AppError, AppResult};
use crate::models::{CallResult, FailureKind};
use tracing::error;

/// 合并后的批次，与原始输入一一对应
#[derive(Debug, Clone, PartialEq)]
pub struct MergedBatch {
    pub texts: Vec<String>,
    /// 对应位置是否来自缓存
    pub from_cache: Vec<bool>,
    /// 被替换为失败标记的数量
    pub failures: usize,
}

/// 把缓存命中与批量执行结果合并回原始顺序
///
/// - `cached`：与原始输入等长，命中缓存的位置为 `Some`
/// - `fresh`：按顺序对应 `cached` 中每个 `None` 位置的执行结果
/// - `sentinel`：把失败转换为标记文本，参数为 (原始下标, 失败类型, 错误信息)
///
/// `fresh` 的数量与 `None` 的数量不一致属于逻辑缺陷，返回 `AppError::Integrity`。
pub fn merge_with_cache<S>(
    cached: Vec<Option<String>>,
    fresh: Vec<CallResult<String>>,
    sentinel: S,
) -> AppResult<MergedBatch>
where
    S: Fn(usize, FailureKind, &str) -> String,
{
    let pending = cached.iter().filter(|slot| slot.is_none()).count();
    if pending != fresh.len() {
        error!(
            expected = pending,
            actual = fresh.len(),
            "合并失败：待处理数量与执行结果数量不一致"
        );
        return Err(AppError::Integrity {
            expected: pending,
            actual: fresh.len(),
        });
    }

    let mut fresh = fresh.into_iter();
    let mut merged = MergedBatch {
        texts: Vec::with_capacity(cached.len()),
        from_cache: Vec::with_capacity(cached.len()),
        failures: 0,
    };

    for (index, slot) in cached.into_iter().enumerate() {
        match slot {
            Some(text) => {
                merged.texts.push(text);
                merged.from_cache.push(true);
            }
            None => {
                // 数量已在上面校验过
                let text = match fresh.next() {
                    Some(CallResult::Success(text)) => text,
                    Some(CallResult::Failure { kind, message }) => {
                        merged.failures += 1;
                        sentinel(index, kind, &message)
                    }
                    None => {
                        return Err(AppError::Integrity {
                            expected: pending,
                            actual: index,
                        })
                    }
                };
                merged.texts.push(text);
                merged.from_cache.push(false);
            }
        }
    }

    Ok(merged)
}
