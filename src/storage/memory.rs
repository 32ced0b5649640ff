//! 内存对象存储
//!
//! 不访问网络的 `ObjectStore` 实现，支持小页列举并记录所有调用。
//! 按 key 注入失败的接口只在测试构建中提供。

use super::{ByteStream, ListPage, ObjectStore, RemoteObject};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// 已存储的对象
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub storage_class: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    /// put 失败且不留下对象
    fail_put: HashSet<String>,
    /// put 写入了对象但仍返回错误（模拟残留的半成品）
    fail_put_leaving_object: HashSet<String>,
    fail_delete: HashSet<String>,
    /// 第 n 次 list_page 调用失败（从 0 开始）
    fail_list_call: Option<usize>,
    put_calls: Vec<String>,
    delete_calls: Vec<String>,
    list_calls: usize,
}

pub struct MemoryStore {
    state: Mutex<State>,
    page_size: usize,
    name: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(super::LIST_PAGE_SIZE)
    }

    /// 指定每页条目数，便于测试分页
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: page_size.max(1),
            name: "memory".to_string(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 直接放入对象（不计入 put 调用）
    pub fn insert(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.state().objects.insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                storage_class: None,
            },
        );
    }

    #[cfg(test)]
    pub fn fail_put_for(&self, key: &str) {
        self.state().fail_put.insert(key.to_string());
    }

    #[cfg(test)]
    pub fn fail_put_leaving_object_for(&self, key: &str) {
        self.state().fail_put_leaving_object.insert(key.to_string());
    }

    #[cfg(test)]
    pub fn fail_delete_for(&self, key: &str) {
        self.state().fail_delete.insert(key.to_string());
    }

    #[cfg(test)]
    pub fn fail_list_on_call(&self, call: usize) {
        self.state().fail_list_call = Some(call);
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.state().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    pub fn put_calls(&self) -> Vec<String> {
        self.state().put_calls.clone()
    }

    pub fn delete_calls(&self) -> Vec<String> {
        self.state().delete_calls.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage> {
        let mut state = self.state();
        let call = state.list_calls;
        state.list_calls += 1;

        if state.fail_list_call == Some(call) {
            return Err(anyhow!("模拟列举失败 (第 {} 页)", call + 1));
        }

        let mut matching = state
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.map_or(true, |token| key.as_str() > token));

        let objects: Vec<RemoteObject> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, obj)| RemoteObject {
                key: key.clone(),
                size: Some(obj.data.len() as u64),
                storage_class: obj.storage_class.clone(),
                etag: None,
                last_modified: None,
            })
            .collect();

        let next = if matching.next().is_some() {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ListPage { objects, next })
    }

    async fn head(&self, key: &str) -> Result<Option<RemoteObject>> {
        Ok(self.state().objects.get(key).map(|obj| RemoteObject {
            key: key.to_string(),
            size: Some(obj.data.len() as u64),
            storage_class: obj.storage_class.clone(),
            etag: None,
            last_modified: None,
        }))
    }

    async fn put(
        &self,
        key: &str,
        mut body: ByteStream,
        _size: u64,
        storage_class: Option<&str>,
    ) -> Result<()> {
        self.state().put_calls.push(key.to_string());

        // 先完整读取数据流，锁不跨越 await
        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }

        let mut state = self.state();
        if state.fail_put.contains(key) {
            return Err(anyhow!("模拟上传失败: {}", key));
        }

        state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                storage_class: storage_class.map(str::to_string),
            },
        );

        if state.fail_put_leaving_object.contains(key) {
            return Err(anyhow!("模拟上传中断: {}", key));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state();
        state.delete_calls.push(key.to_string());
        if state.fail_delete.contains(key) {
            return Err(anyhow!("模拟删除失败: {}", key));
        }
        state.objects.remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
