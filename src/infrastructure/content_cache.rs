//! 内容寻址缓存 - 基础设施层
//!
//! 把 (内容标识, 处理能力, 模型) 映射到一段已经计算好的文本，
//! 用于跳过昂贵的重复转换。
//!
//! ## 存储布局
//!
//! 缓存根目录下平铺，每个键一个文件：`<sha256 hex>.md`，内容为原始 UTF-8 文本。
//!
//! ## 内容标识的取舍
//!
//! - `Mtime`（默认）：文件名 + 修改时间。代价低，但文件被 touch 也会失效，
//!   且不同目录下同名、同修改时间的两个文件会撞键。
//! - `Content`：文件内容的 SHA-256。需要完整读取文件，但只有内容变化才会失效，
//!   移动或重命名文件也不影响。

use crate::error::{AppResult, CacheError};
use crate::models::sentinel;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::{debug, info};

/// 缓存文件扩展名
const ENTRY_EXTENSION: &str = "md";

/// 未使用模型时参与计算的占位名
const NO_MODEL: &str = "no_model";

/// 内容标识的计算方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheIdentityMode {
    #[default]
    Mtime,
    Content,
}

/// 输入内容的稳定标识，与文件路径无关
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentIdentity {
    /// 文件名 + 修改时间（纳秒）
    Modified { basename: String, mtime_nanos: u128 },
    /// 文件内容的 SHA-256，文件名仅用于日志
    Digest { basename: String, sha256: String },
}

impl ContentIdentity {
    pub fn modified(basename: impl Into<String>, mtime_nanos: u128) -> Self {
        ContentIdentity::Modified {
            basename: basename.into(),
            mtime_nanos,
        }
    }

    /// 根据文件内容计算标识
    pub fn digest(basename: impl Into<String>, content: &[u8]) -> Self {
        ContentIdentity::Digest {
            basename: basename.into(),
            sha256: hex::encode(Sha256::digest(content)),
        }
    }

    /// 从磁盘文件计算标识
    pub async fn from_path(path: &Path, mode: CacheIdentityMode) -> AppResult<Self> {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let identity_failed = |source: std::io::Error| CacheError::IdentityFailed {
            path: path.display().to_string(),
            source,
        };

        match mode {
            CacheIdentityMode::Mtime => {
                let metadata = fs::metadata(path).await.map_err(identity_failed)?;
                let modified = metadata.modified().map_err(identity_failed)?;
                let mtime_nanos = modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or_default();
                Ok(Self::modified(basename, mtime_nanos))
            }
            CacheIdentityMode::Content => {
                let bytes = fs::read(path).await.map_err(identity_failed)?;
                Ok(Self::digest(basename, &bytes))
            }
        }
    }

    pub fn basename(&self) -> &str {
        match self {
            ContentIdentity::Modified { basename, .. } | ContentIdentity::Digest { basename, .. } => {
                basename
            }
        }
    }

    /// 参与缓存键计算的部分
    fn fingerprint(&self) -> String {
        match self {
            ContentIdentity::Modified {
                basename,
                mtime_nanos,
            } => format!("{}_{}", basename, mtime_nanos),
            ContentIdentity::Digest { sha256, .. } => format!("sha256:{}", sha256),
        }
    }
}

/// 缓存键：SHA-256 摘要的十六进制形式（64 个字符）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn file_name(&self) -> String {
        format!("{}.{}", self.0, ENTRY_EXTENSION)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 内容寻址缓存
///
/// 每次运行构造一次，显式传给需要的阶段。
/// 不同键的并发写互不影响；同一个键的并发写以最后一次为准。
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    /// 打开缓存目录（不存在则创建）
    pub async fn open(root: impl Into<PathBuf>) -> AppResult<Self> {
        let cache = Self { root: root.into() };
        cache.ensure_root().await?;
        debug!("使用缓存目录: {}", cache.root.display());
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 计算缓存键（纯函数，跨进程稳定）
    pub fn key_for(identity: &ContentIdentity, capability: &str, model: Option<&str>) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(identity.fingerprint().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(capability.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(model.unwrap_or(NO_MODEL).as_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }

    /// 缓存条目在磁盘上的路径
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// 查询缓存
    ///
    /// 未命中返回 `None`。若条目是转换失败标记且 `treat_failure_as_miss` 为 true，
    /// 同样返回 `None`，以便下次运行重新转换。只有真正的 I/O 错误才返回 `Err`。
    pub async fn get(
        &self,
        identity: &ContentIdentity,
        capability: &str,
        model: Option<&str>,
        treat_failure_as_miss: bool,
    ) -> AppResult<Option<String>> {
        let key = Self::key_for(identity, capability, model);
        let path = self.entry_path(&key);

        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("未找到缓存: {}", identity.basename());
                return Ok(None);
            }
            Err(source) => {
                return Err(CacheError::ReadFailed {
                    path: path.display().to_string(),
                    source,
                }
                .into())
            }
        };

        if treat_failure_as_miss && sentinel::is_conversion_failure(&text) {
            info!(
                "跳过缓存结果 {} (缓存文件: {})，该结果是转换失败",
                identity.basename(),
                path.display()
            );
            return Ok(None);
        }

        info!(
            "使用缓存结果 {} (缓存文件: {})",
            identity.basename(),
            path.display()
        );
        Ok(Some(text))
    }

    /// 写入（或覆盖）缓存条目
    pub async fn put(
        &self,
        identity: &ContentIdentity,
        capability: &str,
        model: Option<&str>,
        text: &str,
    ) -> AppResult<()> {
        self.ensure_root().await?;

        let key = Self::key_for(identity, capability, model);
        let path = self.entry_path(&key);

        fs::write(&path, text)
            .await
            .map_err(|source| CacheError::WriteFailed {
                path: path.display().to_string(),
                source,
            })?;

        debug!("已缓存 {}，键: {}", identity.basename(), key);
        Ok(())
    }

    async fn ensure_root(&self) -> AppResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| CacheError::CreateDirFailed {
                path: self.root.display().to_string(),
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn identity() -> ContentIdentity {
        ContentIdentity::modified("report.pdf", 1_700_000_000_000_000_000)
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = ContentCache::key_for(&identity(), "docling", Some("gpt-4o"));
        let b = ContentCache::key_for(&identity(), "docling", Some("gpt-4o"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_changes_with_each_input() {
        let base = ContentCache::key_for(&identity(), "docling", Some("gpt-4o"));

        let other_file = ContentIdentity::modified("report.pdf", 1_700_000_000_000_000_001);
        assert_ne!(base, ContentCache::key_for(&other_file, "docling", Some("gpt-4o")));
        assert_ne!(base, ContentCache::key_for(&identity(), "marker", Some("gpt-4o")));
        assert_ne!(base, ContentCache::key_for(&identity(), "docling", Some("gpt-4.1")));
        assert_ne!(base, ContentCache::key_for(&identity(), "docling", None));
    }

    #[test]
    fn test_key_fields_do_not_bleed_into_each_other() {
        let a = ContentCache::key_for(&identity(), "doc", Some("ling"));
        let b = ContentCache::key_for(&identity(), "docling", Some(""));
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_identity_ignores_basename() {
        let a = ContentIdentity::digest("a.pdf", b"same bytes");
        let b = ContentIdentity::digest("renamed.pdf", b"same bytes");
        assert_eq!(
            ContentCache::key_for(&a, "markitdown", None),
            ContentCache::key_for(&b, "markitdown", None)
        );

        let c = ContentIdentity::digest("a.pdf", b"other bytes");
        assert_ne!(
            ContentCache::key_for(&a, "markitdown", None),
            ContentCache::key_for(&c, "markitdown", None)
        );
    }

    #[tokio::test]
    async fn test_miss_then_round_trip() {
        let dir = tempdir().unwrap();
        let cache = ContentCache::open(dir.path()).await.unwrap();

        let miss = cache.get(&identity(), "docling", Some("m"), true).await.unwrap();
        assert!(miss.is_none());

        cache.put(&identity(), "docling", Some("m"), "abc").await.unwrap();
        let hit = cache.get(&identity(), "docling", Some("m"), true).await.unwrap();
        assert_eq!(hit.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_failure_sentinel_respects_flag() {
        let dir = tempdir().unwrap();
        let cache = ContentCache::open(dir.path()).await.unwrap();

        cache
            .put(&identity(), "docling", Some("m"), "Error converting: timeout")
            .await
            .unwrap();

        let retried = cache.get(&identity(), "docling", Some("m"), true).await.unwrap();
        assert!(retried.is_none());

        let kept = cache.get(&identity(), "docling", Some("m"), false).await.unwrap();
        assert_eq!(kept.as_deref(), Some("Error converting: timeout"));
    }

    #[tokio::test]
    async fn test_put_overwrites_and_creates_missing_root() {
        let dir = tempdir().unwrap();
        let cache = ContentCache::open(dir.path().join("nested")).await.unwrap();
        std::fs::remove_dir_all(cache.root()).unwrap();

        cache.put(&identity(), "zerox", None, "first").await.unwrap();
        cache.put(&identity(), "zerox", None, "second").await.unwrap();

        let key = ContentCache::key_for(&identity(), "zerox", None);
        let path = cache.entry_path(&key);
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("md"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "second");
    }

    #[tokio::test]
    async fn test_identity_from_path() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("deck.pptx");
        std::fs::write(&file, b"slides").unwrap();

        let by_mtime = ContentIdentity::from_path(&file, CacheIdentityMode::Mtime)
            .await
            .unwrap();
        assert_eq!(by_mtime.basename(), "deck.pptx");
        assert!(matches!(by_mtime, ContentIdentity::Modified { .. }));

        let by_content = ContentIdentity::from_path(&file, CacheIdentityMode::Content)
            .await
            .unwrap();
        assert_eq!(by_content, ContentIdentity::digest("deck.pptx", b"slides"));

        let missing = ContentIdentity::from_path(&dir.path().join("gone.pdf"), CacheIdentityMode::Mtime).await;
        assert!(missing.is_err());
    }
}
