use crate::error::SyncError;
use crate::storage::{ObjectStore, RemoteObject};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// 远程对象清单
///
/// 在规划前一次性列举完毕，之后只读，可被多个上传任务并发查询。
#[derive(Debug, Clone, Default)]
pub struct RemoteInventory {
    namespace: String,
    objects: HashMap<String, RemoteObject>,
    pages: usize,
}

impl RemoteInventory {
    /// 列举命名空间下的全部对象，自动跟随续页标记直到最后一页
    pub async fn list(store: &dyn ObjectStore, namespace: &str) -> Result<Self, SyncError> {
        info!("开始列举远程对象: {}/{}", store.name(), namespace);

        let mut objects = HashMap::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;
        let mut dir_markers = 0usize;

        loop {
            let page = store
                .list_page(namespace, token.as_deref())
                .await
                .map_err(|e| SyncError::inventory(namespace, e))?;
            pages += 1;

            debug!(
                "第 {} 页: {} 个对象, 续页: {:?}",
                pages,
                page.objects.len(),
                page.next
            );

            for object in page.objects {
                if object.is_dir_marker() {
                    dir_markers += 1;
                    continue;
                }
                if !object.key.starts_with(namespace) {
                    warn!("忽略命名空间之外的对象: {}", object.key);
                    continue;
                }
                objects.insert(object.key.clone(), object);
            }

            match page.next {
                Some(next) => {
                    // 续页标记不前进会导致死循环
                    if token.as_deref() == Some(next.as_str()) {
                        return Err(SyncError::inventory(
                            namespace,
                            format!("续页标记未前进: {}", next),
                        ));
                    }
                    token = Some(next);
                }
                None => break,
            }
        }

        info!(
            "列举完成: {} 个对象, {} 页, {} 个目录占位",
            objects.len(),
            pages,
            dir_markers
        );

        Ok(Self {
            namespace: namespace.to_string(),
            objects,
            pages,
        })
    }

    /// 直接从对象集合构建（用于规划测试）
    pub fn from_objects(namespace: &str, objects: impl IntoIterator<Item = RemoteObject>) -> Self {
        Self {
            namespace: namespace.to_string(),
            objects: objects
                .into_iter()
                .filter(|o| !o.is_dir_marker() && o.key.starts_with(namespace))
                .map(|o| (o.key.clone(), o))
                .collect(),
            pages: 0,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&RemoteObject> {
        self.objects.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn pages(&self) -> usize {
        self.pages
    }
}
