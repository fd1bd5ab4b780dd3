//! 重试策略
//!
//! 指数退避 + 全抖动：第 n 次失败后的等待时间在
//! `[0, min(max_delay, base_delay * multiplier^(n-1))]` 内均匀随机。

use crate::error::{AppError, AppResult};
use crate::models::CallError;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 总尝试次数（= 重试次数 + 1），至少为 1
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// 单次等待的上限
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// 按重试次数创建，`retries = 0` 表示只尝试一次
    pub fn from_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.max_attempts < 1 {
            return Err(AppError::invalid_argument("max_attempts", "必须 >= 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(AppError::invalid_argument("multiplier", "必须是 >= 1 的有限数"));
        }
        Ok(())
    }

    /// 第 `attempt` 次失败后等待时间的上限
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// 第 `attempt` 次失败后的实际等待时间（全抖动）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling_ms = self.backoff_ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }

    /// 已经尝试 `attempts` 次后，是否还应重试
    pub fn should_retry(&self, error: &CallError, attempts: u32, retryable: bool) -> bool {
        match error {
            CallError::Transient(_) => retryable && attempts < self.max_attempts,
            CallError::Permanent(_) | CallError::Cancelled => false,
        }
    }
}
