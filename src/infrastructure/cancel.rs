//! 取消信号
//!
//! 外部中断（Ctrl-C 等）通过它传给批量执行器：正在进行的调用和退避等待会立刻结束，
//! 尚未开始的工作项不再启动。

use std::sync::Arc;
use tokio::sync::watch;

/// 可克隆的取消信号，所有克隆共享同一状态
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// 触发取消（幂等）
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// 等待直到被取消
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // 发送端由 self 持有，wait_for 不会因通道关闭而返回
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
