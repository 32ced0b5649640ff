pub mod memory;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub use memory::MemoryStore;
pub use s3::S3Store;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- list, stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 上传
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 每页列举的最大条目数（与 S3 ListObjectsV2 默认值一致）
pub const LIST_PAGE_SIZE: usize = 1000;

/// 上传用的字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// 远程对象信息（列举时的快照）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub key: String,
    pub size: Option<u64>,
    pub storage_class: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteObject {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: None,
            storage_class: None,
            etag: None,
            last_modified: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// 目录占位对象（以 / 结尾的 key）
    pub fn is_dir_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// 一页列举结果
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<RemoteObject>,
    /// 续页标记，None 表示已列举完毕
    pub next: Option<String>,
}

/// 远程对象存储抽象接口
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 列举前缀下的一页对象（递归），`continuation` 为上一页返回的续页标记
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage>;

    /// 获取对象元数据，不存在时返回 None
    async fn head(&self, key: &str) -> Result<Option<RemoteObject>>;

    /// 流式上传对象。失败时不得留下对象
    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        storage_class: Option<&str>,
    ) -> Result<()>;

    /// 删除对象（对象不存在时不报错）
    async fn delete(&self, key: &str) -> Result<()>;

    /// 检查对象是否存在
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head(key).await?.is_some())
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 同步前缀对应的列举命名空间，统一以 / 结尾，避免 `photos` 误匹配 `photos2/`
pub fn namespace_for(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// 拼接对象 key：前缀 + 相对路径，分隔符固定为 /
pub fn object_key(prefix: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    format!("{}{}", namespace_for(prefix), relative)
}
