//! 固定宽度的工作池
//!
//! 生产者把任务放入有界队列，N 个 worker 共享接收端并持续取任务，队列关闭且
//! 取空后 worker 退出，调用方等待全部 worker 结束。单个任务失败（包括 panic）
//! 只记录，不影响其它任务。

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, warn};

/// 默认并发数
pub const DEFAULT_WORKERS: usize = 10;

/// 任务统计
#[derive(Debug, Default)]
struct TaskStats {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
}

/// 一次批量执行的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub completed: u64,
    pub failed: u64,
    /// 因取消而未执行的任务数
    pub not_attempted: u64,
    pub bytes: u64,
    pub errors: Vec<String>,
}

impl PoolReport {
    pub fn attempted(&self) -> u64 {
        self.completed + self.failed
    }
}

/// 工作池
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    cancelled: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(workers: usize, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            workers: workers.max(1),
            cancelled,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 执行全部任务。`task` 成功时返回处理的字节数
    pub async fn run<T, F, Fut>(&self, label: &'static str, items: Vec<T>, task: F) -> PoolReport
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<u64>> + Send + 'static,
    {
        let total = items.len() as u64;
        if total == 0 {
            return PoolReport::default();
        }

        let workers = self.workers.min(items.len());
        debug!("{}: {} 个任务, {} 个 worker", label, total, workers);

        let (tx, rx) = mpsc::channel::<T>(workers * 2);
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(TaskStats::default());
        let errors = Arc::new(RwLock::new(Vec::<String>::new()));
        let task = Arc::new(task);

        // 生产者：取消后停止投放，发送端随任务结束而关闭队列
        let cancelled = self.cancelled.clone();
        let producer = tokio::spawn(async move {
            for item in items {
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = rx.clone();
            let stats = stats.clone();
            let errors = errors.clone();
            let task = task.clone();
            let cancelled = self.cancelled.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let Some(item) = next_item(&rx, &cancelled).await else {
                        debug!("{} worker {} 退出", label, worker_id);
                        break;
                    };
                    stats.dispatched.fetch_add(1, Ordering::Relaxed);

                    // 每个任务单独 spawn，panic 只影响该任务
                    match tokio::spawn(task(item)).await {
                        Ok(Ok(bytes)) => {
                            stats.completed.fetch_add(1, Ordering::Relaxed);
                            stats.bytes.fetch_add(bytes, Ordering::Relaxed);
                        }
                        Ok(Err(e)) => {
                            stats.failed.fetch_add(1, Ordering::Relaxed);
                            warn!("{} 失败: {:#}", label, e);
                            errors.write().await.push(format!("{:#}", e));
                        }
                        Err(e) => {
                            stats.failed.fetch_add(1, Ordering::Relaxed);
                            error!("{} 任务异常退出: {}", label, e);
                            errors.write().await.push(format!("任务异常退出: {}", e));
                        }
                    }
                }
            }));
        }
        // worker 全部退出后接收端随之释放，阻塞中的生产者会收到错误
        drop(rx);

        // 等待所有任务完成
        for handle in handles {
            if let Err(e) = handle.await {
                error!("{} worker 异常退出: {}", label, e);
            }
        }
        if let Err(e) = producer.await {
            error!("{} 任务投放异常退出: {}", label, e);
        }

        let dispatched = stats.dispatched.load(Ordering::Relaxed);
        let error_list = errors.read().await.clone();

        PoolReport {
            completed: stats.completed.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            not_attempted: total.saturating_sub(dispatched),
            bytes: stats.bytes.load(Ordering::Relaxed),
            errors: error_list,
        }
    }
}

/// 取下一个任务。队列关闭或已取消时返回 None
///
/// 等待期间可能已经取消，取到任务后需再次检查；被丢弃的任务计入未执行。
async fn next_item<T>(rx: &Mutex<mpsc::Receiver<T>>, cancelled: &AtomicBool) -> Option<T> {
    if cancelled.load(Ordering::SeqCst) {
        return None;
    }
    let item = rx.lock().await.recv().await?;
    if cancelled.load(Ordering::SeqCst) {
        return None;
    }
    Some(item)
}
