use crate::core::pool::{PoolReport, WorkerPool};
use crate::storage::ObjectStore;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

/// 删除远程多余对象
pub struct Sweeper {
    store: Arc<dyn ObjectStore>,
}

impl Sweeper {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, pool: &WorkerPool, keys: Vec<String>) -> PoolReport {
        if keys.is_empty() {
            return PoolReport::default();
        }
        info!("开始删除 {} 个远程多余对象", keys.len());

        let store = self.store.clone();
        pool.run("删除", keys, move |key| {
            let store = store.clone();
            async move {
                store
                    .delete(&key)
                    .await
                    .with_context(|| format!("删除失败: {}", key))?;
                info!("已删除 {}", key);
                Ok(0)
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_deletes_every_key() {
        let store = Arc::new(MemoryStore::new());
        for key in ["p/a", "p/b", "p/c", "p/keep"] {
            store.insert(key, "x");
        }
        let pool = WorkerPool::new(2, Arc::new(AtomicBool::new(false)));

        let report = Sweeper::new(store.clone())
            .run(&pool, vec!["p/a".into(), "p/b".into(), "p/c".into()])
            .await;

        assert_eq!(report.completed, 3);
        assert_eq!(store.keys(), vec!["p/keep".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_stop_others() {
        let store = Arc::new(MemoryStore::new());
        for key in ["p/a", "p/b", "p/c"] {
            store.insert(key, "x");
        }
        store.fail_delete_for("p/a");
        let pool = WorkerPool::new(1, Arc::new(AtomicBool::new(false)));

        let report = Sweeper::new(store.clone())
            .run(&pool, vec!["p/a".into(), "p/b".into(), "p/c".into()])
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 2);
        assert_eq!(store.keys(), vec!["p/a".to_string()]);
        assert!(report.errors[0].contains("p/a"));
    }
}
