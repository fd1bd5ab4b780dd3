//! 基础设施层：持有持久化资源和进程级信号，只暴露能力

pub mod cancel;
pub mod content_cache;

pub use cancel::CancelSignal;
pub use content_cache::{CacheIdentityMode, CacheKey, ContentCache, ContentIdentity};
