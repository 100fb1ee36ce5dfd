use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::rate_limiter::MessageRateLimiter;

/// 定期清理限流器中的过期记录
///
/// 由 `spawn` 启动后台任务，`shutdown` 通知任务退出并等待其结束；
/// 未调用 `shutdown` 就被丢弃时直接中止任务。
pub struct CleanupSweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupSweeper {
    pub fn spawn(limiter: Arc<MessageRateLimiter>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即完成，跳过
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = limiter.cleanup_expired_quotas();
                        tracing::debug!(
                            removed,
                            tracked_users = limiter.tracked_users(),
                            "Cleanup sweep finished"
                        );
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Cleanup sweeper stopped");
        });

        tracing::info!(interval_secs = interval.as_secs(), "Cleanup sweeper started");
        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = ?err, "Cleanup sweeper task failed");
            }
        }
    }
}

impl Drop for CleanupSweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
