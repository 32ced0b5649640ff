use crate::core::inventory::RemoteInventory;
use crate::core::pool::{PoolReport, WorkerPool};
use crate::core::scanner::FileRecord;
use crate::storage::{ByteStream, ObjectStore};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// 上传调度器
///
/// 每个任务独立打开本地文件并流式上传，文件句柄随任务结束释放。
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    storage_class: Option<String>,
    inventory: Arc<RemoteInventory>,
}

impl Uploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        storage_class: Option<String>,
        inventory: Arc<RemoteInventory>,
    ) -> Self {
        Self {
            store,
            storage_class,
            inventory,
        }
    }

    /// 上传全部记录，单个文件失败不影响其它文件
    pub async fn run(&self, pool: &WorkerPool, records: Vec<FileRecord>) -> PoolReport {
        if records.is_empty() {
            return PoolReport::default();
        }
        info!(
            "开始上传 {} 个文件 (并发 {}, 存储类型 {})",
            records.len(),
            pool.workers(),
            self.storage_class.as_deref().unwrap_or("默认")
        );

        let store = self.store.clone();
        let storage_class = self.storage_class.clone();
        let inventory = self.inventory.clone();

        pool.run("上传", records, move |record| {
            let store = store.clone();
            let storage_class = storage_class.clone();
            // 上传前远程已有该 key（如大小比较触发的覆盖），失败后不能删除
            let existed = inventory.contains(&record.relative_key);
            async move { upload_file(store, record, storage_class, existed).await }
        })
        .await
    }
}

async fn upload_file(
    store: Arc<dyn ObjectStore>,
    record: FileRecord,
    storage_class: Option<String>,
    existed: bool,
) -> Result<u64> {
    let key = record.relative_key.as_str();

    let result = put_file(store.as_ref(), &record, storage_class.as_deref()).await;
    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            if !existed {
                remove_leftover(store.as_ref(), key).await;
            }
            return Err(e);
        }
    };

    info!("已上传 {} ({} 字节)", key, bytes);
    Ok(bytes)
}

async fn put_file(
    store: &dyn ObjectStore,
    record: &FileRecord,
    storage_class: Option<&str>,
) -> Result<u64> {
    let path = &record.local_path;
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("打开文件失败: {}", path.display()))?;
    let size = file
        .metadata()
        .await
        .with_context(|| format!("读取文件信息失败: {}", path.display()))?
        .len();

    debug!("上传: {} -> {} ({} 字节)", path.display(), record.relative_key, size);

    let display = path.display().to_string();
    let body: ByteStream = Box::pin(ReaderStream::new(file).map(move |chunk| {
        chunk.with_context(|| format!("读取文件失败: {}", display))
    }));

    store
        .put(&record.relative_key, body, size, storage_class)
        .await
        .with_context(|| format!("上传失败: {}", record.relative_key))?;

    Ok(size)
}

/// 失败的上传不得留下远程对象
async fn remove_leftover(store: &dyn ObjectStore, key: &str) {
    match store.head(key).await {
        Ok(Some(_)) => {
            warn!("清理上传失败残留的对象: {}", key);
            if let Err(e) = store.delete(key).await {
                warn!("清理残留对象失败: {} - {:#}", key, e);
            }
        }
        Ok(None) => {}
        Err(e) => debug!("检查残留对象失败: {} - {:#}", key, e),
    }
}
