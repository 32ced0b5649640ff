use super::{ByteStream, ListPage, ObjectStore, RemoteObject, IO_TIMEOUT_SECS, LIST_PAGE_SIZE, OP_TIMEOUT_SECS};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use opendal::{layers::TimeoutLayer, services::S3, Metakey, Operator};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// 分块上传的块大小（S3 要求除最后一块外不小于 5MB）
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// 基于 OpenDAL 的 S3 存储
///
/// 凭证由 OpenDAL 从环境变量 / ~/.aws 配置中自动加载。
pub struct S3Store {
    bucket: String,
    region: Option<String>,
    endpoint: Option<String>,
    operator: Operator,
    /// 按存储类型缓存的 operator（存储类型只能在 builder 上设置）
    tiered: RwLock<HashMap<String, Operator>>,
    name: String,
}

impl S3Store {
    pub fn new(bucket: &str, region: Option<&str>, endpoint: Option<&str>) -> Result<Self> {
        let region = region.filter(|r| !r.is_empty()).map(str::to_string);
        let endpoint = endpoint.filter(|e| !e.is_empty()).map(str::to_string);

        let operator = Self::build_operator(bucket, region.as_deref(), endpoint.as_deref(), None)
            .with_context(|| format!("S3 配置错误: bucket={}", bucket))?;

        Ok(Self {
            bucket: bucket.to_string(),
            region,
            endpoint,
            operator,
            tiered: RwLock::new(HashMap::new()),
            name: format!("s3://{}", bucket),
        })
    }

    fn build_operator(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        storage_class: Option<&str>,
    ) -> Result<Operator> {
        let mut builder = S3::default().bucket(bucket);

        if let Some(r) = region {
            builder = builder.region(r);
        }
        if let Some(ep) = endpoint {
            builder = builder.endpoint(ep);
        }
        if let Some(class) = storage_class {
            builder = builder.default_storage_class(class);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(operator)
    }

    /// 取得写入指定存储类型所用的 operator
    fn operator_for(&self, storage_class: Option<&str>) -> Result<Operator> {
        let Some(class) = storage_class else {
            return Ok(self.operator.clone());
        };

        if let Some(op) = self
            .tiered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class)
        {
            return Ok(op.clone());
        }

        let op = Self::build_operator(
            &self.bucket,
            self.region.as_deref(),
            self.endpoint.as_deref(),
            Some(class),
        )?;
        debug!("创建存储类型 {} 的 operator", class);
        self.tiered
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class.to_string(), op.clone());
        Ok(op)
    }
}

/// 把一次列举的条目截成一页
///
/// 目录条目计入页大小但不返回；页满时以最后一个条目的 key 作为续页标记，
/// 下一次列举从它之后开始。
struct PageCollector<'a> {
    prefix: &'a str,
    limit: usize,
    seen: usize,
    last_key: Option<String>,
    objects: Vec<RemoteObject>,
}

impl<'a> PageCollector<'a> {
    fn new(prefix: &'a str, limit: usize) -> Self {
        Self {
            prefix,
            limit: limit.max(1),
            seen: 0,
            last_key: None,
            objects: Vec::new(),
        }
    }

    /// 加入一个条目（目录传 None），页满时返回 true
    fn push(&mut self, path: &str, object: Option<RemoteObject>) -> bool {
        let key = path.trim_start_matches('/');

        // 跳过根目录
        if key.is_empty() || key == self.prefix {
            return false;
        }

        self.seen += 1;
        if let Some(mut object) = object {
            object.key = key.to_string();
            self.objects.push(object);
        }
        self.last_key = Some(key.to_string());
        self.seen >= self.limit
    }

    fn finish(self, full: bool) -> ListPage {
        ListPage {
            objects: self.objects,
            next: if full { self.last_key } else { None },
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage> {
        let mut request = self
            .operator
            .lister_with(prefix)
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Etag | Metakey::Mode);

        // 续页标记即上一页最后一个 key，对应 S3 的 start-after
        if let Some(token) = continuation {
            request = request.start_after(token);
        }

        let mut lister = request
            .await
            .with_context(|| format!("列举 {}/{} 失败", self.name, prefix))?;

        let mut page = PageCollector::new(prefix, LIST_PAGE_SIZE);

        while let Some(entry) = lister.try_next().await? {
            let meta = entry.metadata();
            let object = (!meta.is_dir()).then(|| RemoteObject {
                key: String::new(),
                size: Some(meta.content_length()),
                storage_class: None,
                etag: meta.etag().map(|s| s.trim_matches('"').to_string()),
                last_modified: meta.last_modified(),
            });

            if page.push(entry.path(), object) {
                return Ok(page.finish(true));
            }
        }

        Ok(page.finish(false))
    }

    async fn head(&self, key: &str) -> Result<Option<RemoteObject>> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(Some(RemoteObject {
                key: key.to_string(),
                size: Some(meta.content_length()),
                storage_class: None,
                etag: meta.etag().map(|s| s.trim_matches('"').to_string()),
                last_modified: meta.last_modified(),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        key: &str,
        mut body: ByteStream,
        size: u64,
        storage_class: Option<&str>,
    ) -> Result<()> {
        let operator = self.operator_for(storage_class)?;
        let mut writer = operator
            .writer_with(key)
            .chunk(UPLOAD_CHUNK_SIZE)
            .await
            .with_context(|| format!("创建写入器失败: {}", key))?;

        while let Some(chunk) = body.next().await {
            let written = match chunk {
                Ok(bytes) => writer.write(bytes).await.map_err(anyhow::Error::from),
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                // 放弃已上传的分块，保证失败时不留下对象
                if let Err(abort_err) = writer.abort().await {
                    debug!("放弃上传失败: {} - {}", key, abort_err);
                }
                return Err(e.context(format!("写入 {} 失败", key)));
            }
        }

        writer
            .close()
            .await
            .with_context(|| format!("完成上传 {} 失败 ({} 字节)", key, size))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // S3 删除不存在的对象不会报错
        self.operator
            .delete(key)
            .await
            .with_context(|| format!("删除 {} 失败", key))?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
