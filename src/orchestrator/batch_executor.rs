//! 批量执行器 - 编排层
//!
//! ## 职责
//!
//! 接收一组相互独立的工作项，在有界并发下调用外部能力，
//! 每个工作项单独重试，返回与输入等长、同序的结果列表。
//!
//! ## 执行模型
//!
//! - 并发数会被收紧到 `min(concurrency, items.len())`，不启动空闲 worker
//! - 并发数为 1 时严格顺序执行，便于调试和遵守严格的限流
//! - 并发数大于 1 时使用 Semaphore + tokio::spawn，结果按下标收集
//! - 单个工作项失败不会中止整个批次，失败作为数据返回
//! - 外部取消信号会立即终止进行中的调用和退避等待，并以 `AppError::Cancelled` 返回

use crate::error::{AppError, AppResult};
use crate::infrastructure::CancelSignal;
use crate::models::{CallError, CallResult, FailureKind, ItemReport, TerminalState, WorkItem};
use crate::orchestrator::retry::RetryPolicy;
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// 被批量调用的外部能力
///
/// 实现方负责把自身的错误分类为 [`CallError`] 的某一种。
#[async_trait]
pub trait CallFn<P: Sync, T>: Send + Sync {
    async fn call(&self, payload: &P) -> Result<T, CallError>;
}

/// 批量执行参数
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// 最大并发数，至少为 1
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// 单次尝试的超时，超时计为一次瞬时失败
    pub timeout_per_call: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryPolicy::default(),
            timeout_per_call: Duration::from_secs(300),
        }
    }
}

/// 一次批量执行的完整输出
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// 与输入同序的结果
    pub results: Vec<CallResult<T>>,
    /// 与输入同序的执行记录
    pub reports: Vec<ItemReport>,
}

impl<T> BatchOutcome<T> {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            reports: Vec::new(),
        }
    }

    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }
}

/// 单个工作项的结算结果
struct Settlement<T> {
    result: CallResult<T>,
    report: ItemReport,
}

impl<T> Settlement<T> {
    fn new(index: usize, attempts: u32, started: Instant, state: TerminalState, result: CallResult<T>) -> Self {
        Self {
            result,
            report: ItemReport {
                index,
                attempts,
                elapsed: started.elapsed(),
                state,
            },
        }
    }

    fn failure(
        index: usize,
        attempts: u32,
        started: Instant,
        state: TerminalState,
        kind: FailureKind,
        message: String,
    ) -> Self {
        Self::new(index, attempts, started, state, CallResult::Failure { kind, message })
    }

    /// 能力在执行中 panic，记为永久失败
    fn panicked(index: usize, detail: &str) -> Self {
        error!("[调用 {}] 任务执行失败: {}", index, detail);
        Self::failure(
            index,
            0,
            Instant::now(),
            TerminalState::FailedPermanently,
            FailureKind::Permanent,
            format!("任务执行失败: {}", detail),
        )
    }

    fn cancelled(index: usize, attempts: u32, started: Instant) -> Self {
        Self::failure(
            index,
            attempts,
            started,
            TerminalState::Cancelled,
            FailureKind::Permanent,
            "已取消".to_string(),
        )
    }
}

/// 批量执行器
///
/// 不持有任何持久状态，每次 `run` 都是一次独立的请求/响应变换。
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    options: BatchOptions,
    cancel: CancelSignal,
}

impl BatchExecutor {
    /// 创建执行器，非法参数（编程错误）立即返回错误
    pub fn new(options: BatchOptions) -> AppResult<Self> {
        if options.concurrency < 1 {
            return Err(AppError::invalid_argument("concurrency", "必须 >= 1"));
        }
        options.retry.validate()?;
        if options.timeout_per_call.is_zero() {
            return Err(AppError::invalid_argument("timeout_per_call", "必须大于 0"));
        }

        Ok(Self {
            options,
            cancel: CancelSignal::new(),
        })
    }

    /// 使用外部传入的取消信号
    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// 执行批次，只返回结果
    pub async fn run<P, T, F>(&self, items: Vec<WorkItem<P>>, capability: Arc<F>) -> AppResult<Vec<CallResult<T>>>
    where
        P: Send + Sync + 'static,
        T: Send + 'static,
        F: CallFn<P, T> + ?Sized + 'static,
    {
        Ok(self.run_detailed(items, capability).await?.results)
    }

    /// 执行批次，同时返回每个工作项的尝试次数和耗时
    pub async fn run_detailed<P, T, F>(&self, items: Vec<WorkItem<P>>, capability: Arc<F>) -> AppResult<BatchOutcome<T>>
    where
        P: Send + Sync + 'static,
        T: Send + 'static,
        F: CallFn<P, T> + ?Sized + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(BatchOutcome::empty());
        }

        let workers = self.options.concurrency.min(total);
        if workers < self.options.concurrency {
            debug!("worker 数多于工作项，并发数降为 {}", workers);
        }

        let items: Arc<[WorkItem<P>]> = items.into();
        let started = Instant::now();

        let settlements = if workers == 1 {
            info!("顺序执行 {} 个调用", total);
            self.run_sequential(&items, capability.as_ref()).await
        } else {
            info!("使用 {} 个 worker 并发执行 {} 个调用", workers, total);
            self.run_concurrent(&items, capability, workers).await
        };

        if settlements.len() != total {
            error!(
                expected = total,
                actual = settlements.len(),
                "批次结果数量与输入不一致"
            );
            return Err(AppError::Integrity {
                expected: total,
                actual: settlements.len(),
            });
        }

        let mut outcome = BatchOutcome {
            results: Vec::with_capacity(total),
            reports: Vec::with_capacity(total),
        };
        for settlement in settlements {
            outcome.results.push(settlement.result);
            outcome.reports.push(settlement.report);
        }

        let cancelled = outcome
            .reports
            .iter()
            .filter(|r| r.state == TerminalState::Cancelled)
            .count();
        if cancelled > 0 {
            warn!("批次被取消，{} 个调用未完成", cancelled);
            return Err(AppError::Cancelled {
                settled: total - cancelled,
                total,
            });
        }

        let failures = outcome.failure_count();
        if failures > 0 {
            error!("{} 个调用失败 (共 {} 个)", failures, total);
        }
        info!(
            "批次完成: 成功 {}/{}，耗时 {:.2}s",
            total - failures,
            total,
            started.elapsed().as_secs_f64()
        );

        Ok(outcome)
    }

    async fn run_sequential<P, T, F>(&self, items: &[WorkItem<P>], capability: &F) -> Vec<Settlement<T>>
    where
        P: Sync,
        F: CallFn<P, T> + ?Sized,
    {
        let mut settlements = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let settlement = AssertUnwindSafe(execute_item(
                index,
                item,
                capability,
                &self.options.retry,
                self.options.timeout_per_call,
                &self.cancel,
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Settlement::panicked(index, &panic_message(payload.as_ref())));
            settlements.push(settlement);
        }
        settlements
    }

    async fn run_concurrent<P, T, F>(
        &self,
        items: &Arc<[WorkItem<P>]>,
        capability: Arc<F>,
        workers: usize,
    ) -> Vec<Settlement<T>>
    where
        P: Send + Sync + 'static,
        T: Send + 'static,
        F: CallFn<P, T> + ?Sized + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::with_capacity(items.len());

        for index in 0..items.len() {
            // Semaphore 只在本函数内使用且不会被关闭
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let items = Arc::clone(items);
            let capability = Arc::clone(&capability);
            let policy = self.options.retry.clone();
            let timeout = self.options.timeout_per_call;
            let cancel = self.cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                execute_item(index, &items[index], capability.as_ref(), &policy, timeout, &cancel).await
            });
            handles.push(handle);
        }

        join_all(handles)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, joined)| match joined {
                Ok(settlement) => settlement,
                Err(e) => Settlement::panicked(index, &e.to_string()),
            })
            .collect()
    }
}

/// 取出 panic 携带的信息
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知 panic".to_string()
    }
}

/// 执行单个工作项直到进入终止状态
async fn execute_item<P, T, F>(
    index: usize,
    item: &WorkItem<P>,
    capability: &F,
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancelSignal,
) -> Settlement<T>
where
    P: Sync,
    F: CallFn<P, T> + ?Sized,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Settlement::cancelled(index, attempts, started);
        }

        attempts += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Cancelled),
            result = tokio::time::timeout(timeout, capability.call(&item.payload)) => match result {
                Ok(result) => result,
                Err(_) => Err(CallError::Transient(format!("调用超时 ({:.1}s)", timeout.as_secs_f64()))),
            },
        };

        let error = match outcome {
            Ok(value) => {
                debug!(
                    index,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "调用成功"
                );
                return Settlement::new(index, attempts, started, TerminalState::Succeeded, CallResult::Success(value));
            }
            Err(error) => error,
        };

        if !policy.should_retry(&error, attempts, item.retryable) {
            return match error {
                CallError::Cancelled => {
                    // 能力自身报告中断时，同样中止整个批次
                    cancel.cancel();
                    Settlement::cancelled(index, attempts, started)
                }
                CallError::Permanent(message) => {
                    warn!(index, attempts, error = %message, "调用失败，不可重试");
                    Settlement::failure(
                        index,
                        attempts,
                        started,
                        TerminalState::FailedPermanently,
                        FailureKind::Permanent,
                        message,
                    )
                }
                CallError::Transient(message) => {
                    error!(index, attempts, error = %message, "调用失败，重试次数已用尽");
                    Settlement::failure(
                        index,
                        attempts,
                        started,
                        TerminalState::FailedAfterRetries,
                        FailureKind::Transient,
                        message,
                    )
                }
            };
        }

        let backoff = policy.backoff(attempts);
        warn!(
            index,
            attempt = attempts,
            max_attempts = policy.max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "调用失败，等待后重试"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Settlement::cancelled(index, attempts, started),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fast_options(concurrency: usize, max_attempts: u32) -> BatchOptions {
        BatchOptions {
            concurrency,
            retry: RetryPolicy::default()
                .with_max_attempts(max_attempts)
                .with_delays(Duration::from_millis(1), Duration::from_millis(2)),
            timeout_per_call: Duration::from_secs(5),
        }
    }

    /// 按脚本返回结果的能力：每个负载对应一串预设错误，用完后成功
    struct Scripted {
        script: HashMap<u32, Vec<CallError>>,
        calls: Mutex<HashMap<u32, u32>>,
    }

    impl Scripted {
        fn new(script: HashMap<u32, Vec<CallError>>) -> Self {
            Self {
                script,
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn calls_for(&self, payload: u32) -> u32 {
            self.calls.lock().unwrap().get(&payload).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl CallFn<u32, String> for Scripted {
        async fn call(&self, payload: &u32) -> Result<String, CallError> {
            let attempt = {
                let mut calls = self.calls.lock().unwrap();
                let counter = calls.entry(*payload).or_insert(0);
                *counter += 1;
                *counter
            };
            match self.script.get(payload) {
                Some(errors) if (attempt as usize) <= errors.len() => Err(errors[attempt as usize - 1].clone()),
                _ => Ok(format!("ok-{}", payload)),
            }
        }
    }

    fn items(payloads: &[u32]) -> Vec<WorkItem<u32>> {
        payloads.iter().copied().map(WorkItem::new).collect()
    }

    #[test]
    fn test_rejects_invalid_options() {
        assert!(BatchExecutor::new(fast_options(0, 3)).is_err());
        assert!(BatchExecutor::new(fast_options(1, 0)).is_err());

        let mut options = fast_options(1, 1);
        options.timeout_per_call = Duration::ZERO;
        assert!(BatchExecutor::new(options).is_err());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let executor = BatchExecutor::new(fast_options(4, 3)).unwrap();
        let capability = Arc::new(Scripted::new(HashMap::new()));
        let results = executor.run(Vec::new(), capability).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_preserves_call_order() {
        struct Recorder(Mutex<Vec<u32>>);

        #[async_trait]
        impl CallFn<u32, u32> for Recorder {
            async fn call(&self, payload: &u32) -> Result<u32, CallError> {
                self.0.lock().unwrap().push(*payload);
                Ok(payload * 10)
            }
        }

        let executor = BatchExecutor::new(fast_options(1, 1)).unwrap();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let results = executor.run(items(&[3, 1, 2]), recorder.clone()).await.unwrap();

        assert_eq!(*recorder.0.lock().unwrap(), vec![3, 1, 2]);
        assert_eq!(
            results,
            vec![
                CallResult::Success(30),
                CallResult::Success(10),
                CallResult::Success(20)
            ]
        );
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let mut script = HashMap::new();
        script.insert(1, vec![CallError::Permanent("malformed".to_string()); 5]);
        let capability = Arc::new(Scripted::new(script));

        let executor = BatchExecutor::new(fast_options(2, 5)).unwrap();
        let outcome = executor.run_detailed(items(&[1]), capability.clone()).await.unwrap();

        assert_eq!(capability.calls_for(1), 1);
        assert_eq!(outcome.reports[0].attempts, 1);
        assert_eq!(outcome.reports[0].state, TerminalState::FailedPermanently);
        assert_eq!(
            outcome.results[0],
            CallResult::Failure {
                kind: FailureKind::Permanent,
                message: "malformed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_not_retryable_item_gets_one_attempt() {
        let mut script = HashMap::new();
        script.insert(7, vec![CallError::Transient("blip".to_string())]);
        let capability = Arc::new(Scripted::new(script));

        let executor = BatchExecutor::new(fast_options(1, 3)).unwrap();
        let outcome = executor
            .run_detailed(vec![WorkItem::once(7)], capability.clone())
            .await
            .unwrap();

        assert_eq!(capability.calls_for(7), 1);
        assert_eq!(outcome.results[0].failure_kind(), Some(FailureKind::Transient));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient_attempt() {
        struct Slow(AtomicUsize);

        #[async_trait]
        impl CallFn<u32, u32> for Slow {
            async fn call(&self, payload: &u32) -> Result<u32, CallError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(*payload)
            }
        }

        let mut options = fast_options(1, 2);
        options.timeout_per_call = Duration::from_millis(20);
        let executor = BatchExecutor::new(options).unwrap();
        let slow = Arc::new(Slow(AtomicUsize::new(0)));

        let outcome = executor.run_detailed(items(&[1]), slow.clone()).await.unwrap();

        assert_eq!(slow.0.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.reports[0].state, TerminalState::FailedAfterRetries);
        match &outcome.results[0] {
            CallResult::Failure { kind, message } => {
                assert_eq!(*kind, FailureKind::Transient);
                assert!(message.contains("超时"));
            }
            other => panic!("期望失败，实际 {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_capability_cancellation_aborts_batch() {
        let mut script = HashMap::new();
        script.insert(1, vec![CallError::Cancelled]);
        let capability = Arc::new(Scripted::new(script));

        let executor = BatchExecutor::new(fast_options(1, 3)).unwrap();
        let err = executor.run(items(&[1, 2, 3]), capability.clone()).await.unwrap_err();

        assert!(matches!(err, AppError::Cancelled { settled: 0, total: 3 }));
        assert_eq!(capability.calls_for(1), 1);
        assert_eq!(capability.calls_for(2), 0);
        assert!(executor.cancel_signal().is_cancelled());
    }

    #[tokio::test]
    async fn test_external_cancel_interrupts_in_flight_calls() {
        struct Hang;

        #[async_trait]
        impl CallFn<u32, u32> for Hang {
            async fn call(&self, _payload: &u32) -> Result<u32, CallError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(0)
            }
        }

        let cancel = CancelSignal::new();
        let executor = BatchExecutor::new(fast_options(4, 3))
            .unwrap()
            .with_cancel_signal(cancel.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            executor.run(items(&[1, 2, 3, 4, 5, 6]), Arc::new(Hang)),
        )
        .await
        .expect("取消后批次应立即返回");
        trigger.await.unwrap();

        assert!(matches!(result, Err(AppError::Cancelled { settled: 0, total: 6 })));
    }

    #[tokio::test]
    async fn test_panicking_capability_is_captured() {
        struct Boom;

        #[async_trait]
        impl CallFn<u32, u32> for Boom {
            async fn call(&self, payload: &u32) -> Result<u32, CallError> {
                if *payload == 2 {
                    panic!("boom");
                }
                Ok(*payload)
            }
        }

        // 并发路径（JoinError）和顺序路径（catch_unwind）都要捕获
        for concurrency in [3, 1] {
            let executor = BatchExecutor::new(fast_options(concurrency, 1)).unwrap();
            let outcome = executor.run_detailed(items(&[1, 2, 3]), Arc::new(Boom)).await.unwrap();

            assert_eq!(outcome.results.len(), 3);
            assert_eq!(outcome.results[0], CallResult::Success(1));
            assert_eq!(outcome.results[1].failure_kind(), Some(FailureKind::Permanent));
            assert_eq!(outcome.reports[1].state, TerminalState::FailedPermanently);
            assert_eq!(outcome.results[2], CallResult::Success(3));
        }
    }

    #[tokio::test]
    async fn test_single_item_panic_is_captured() {
        struct AlwaysBoom;

        #[async_trait]
        impl CallFn<u32, u32> for AlwaysBoom {
            async fn call(&self, _payload: &u32) -> Result<u32, CallError> {
                panic!("converter crashed on {}", "deck.pptx");
            }
        }

        // 单个工作项会被收紧为顺序执行
        let executor = BatchExecutor::new(fast_options(8, 3)).unwrap();
        let results = executor.run(items(&[7]), Arc::new(AlwaysBoom)).await.unwrap();

        match &results[0] {
            CallResult::Failure { kind, message } => {
                assert_eq!(*kind, FailureKind::Permanent);
                assert!(message.contains("converter crashed on deck.pptx"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
