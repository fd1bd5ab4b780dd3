use anyhow::Result;
use docqa_bench::utils::logging;
use docqa_bench::{App, CancelSignal, Config};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    logging::init(config.verbose_logging);

    // Ctrl-C 触发取消
    let cancel = CancelSignal::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⚠️ 收到中断信号，正在取消...");
            signal.cancel();
        }
    });

    // 初始化并运行应用
    App::initialize(config, cancel).await?.run().await?;

    Ok(())
}
