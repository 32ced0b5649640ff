use crate::core::exclude::ExcludePatterns;
use crate::core::marker::MARKER_FILE_NAME;
use crate::error::SyncError;
use crate::storage::object_key;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 遍历线程与消费者之间的通道容量
const SCAN_CHANNEL_CAPACITY: usize = 1024;

/// 本地文件记录（每次运行重新生成）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub local_path: PathBuf,
    /// 前缀 + 相对路径，分隔符固定为 /
    pub relative_key: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

/// 扫描统计
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub files: usize,
    pub dirs: usize,
    pub excluded: usize,
    /// 指向目录或无法解析的符号链接、设备文件、非 UTF-8 文件名等
    pub skipped: usize,
}

/// 本地文件扫描器
pub struct FileScanner {
    root: PathBuf,
    prefix: String,
    excludes: Arc<ExcludePatterns>,
}

impl FileScanner {
    pub fn new(root: impl Into<PathBuf>, prefix: &str, excludes: Arc<ExcludePatterns>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.to_string(),
            excludes,
        }
    }

    /// 开始遍历，记录通过通道逐个交付；遍历结束后通道关闭
    ///
    /// 根目录不可读时立即返回错误；遍历中途出错时，错误通过 JoinHandle 返回。
    pub fn enumerate(
        &self,
    ) -> Result<(mpsc::Receiver<FileRecord>, JoinHandle<Result<ScanStats, SyncError>>), SyncError>
    {
        check_root(&self.root)?;

        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let root = self.root.clone();
        let prefix = self.prefix.clone();
        let excludes = self.excludes.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let handle =
            tokio::task::spawn_blocking(move || walk(&root, &prefix, &excludes, &tx));

        Ok((rx, handle))
    }

    /// 完整扫描并收集所有记录
    pub async fn scan(&self) -> Result<Vec<FileRecord>, SyncError> {
        info!("开始扫描本地目录: {}", self.root.display());

        let (mut rx, handle) = self.enumerate()?;
        let mut records = Vec::new();
        while let Some(record) = rx.recv().await {
            records.push(record);
        }

        let stats = handle
            .await
            .map_err(|e| SyncError::enumeration(&self.root, e))??;

        info!(
            "扫描完成: {} 个文件, {} 个目录, {} 个被排除, {} 个跳过",
            stats.files, stats.dirs, stats.excluded, stats.skipped
        );
        Ok(records)
    }
}

/// 根目录必须存在、是目录且可读
fn check_root(root: &Path) -> Result<(), SyncError> {
    let metadata = std::fs::metadata(root).map_err(|e| SyncError::enumeration(root, e))?;
    if !metadata.is_dir() {
        return Err(SyncError::enumeration(
            root,
            format!("{} 不是目录", root.display()),
        ));
    }
    std::fs::read_dir(root).map_err(|e| SyncError::enumeration(root, e))?;
    Ok(())
}

fn walk(
    root: &Path,
    prefix: &str,
    excludes: &ExcludePatterns,
    tx: &mpsc::Sender<FileRecord>,
) -> Result<ScanStats, SyncError> {
    let mut stats = ScanStats::default();
    let mut walker = WalkDir::new(root).follow_links(false).min_depth(1).into_iter();

    while let Some(entry) = walker.next() {
        // 任何条目出错都中止：不完整的本地列表会导致误删远程对象
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            SyncError::enumeration(path, e)
        })?;

        let Some(relative) = relative_path(root, entry.path()) else {
            warn!("跳过无法表示为 UTF-8 的路径: {}", entry.path().display());
            stats.skipped += 1;
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        };

        let file_type = entry.file_type();

        if file_type.is_dir() {
            if excludes.is_excluded(&relative) {
                debug!("排除目录: {}", relative);
                stats.excluded += 1;
                walker.skip_current_dir();
            } else {
                stats.dirs += 1;
            }
            continue;
        }

        let is_link = file_type.is_symlink();
        if !file_type.is_file() && !is_link {
            debug!("跳过非普通文件: {}", relative);
            stats.skipped += 1;
            continue;
        }

        if relative == MARKER_FILE_NAME {
            continue;
        }

        if excludes.is_excluded(&relative) {
            debug!("排除文件: {}", relative);
            stats.excluded += 1;
            continue;
        }

        // 指向普通文件的符号链接按目标文件上传；不进入链接目录
        let metadata = if is_link {
            match std::fs::metadata(entry.path()) {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => {
                    debug!("跳过指向目录或特殊文件的符号链接: {}", relative);
                    stats.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("跳过无法解析的符号链接 {}: {}", relative, e);
                    stats.skipped += 1;
                    continue;
                }
            }
        } else {
            entry
                .metadata()
                .map_err(|e| SyncError::enumeration(entry.path(), e))?
        };
        let modified = metadata
            .modified()
            .map_err(|e| SyncError::enumeration(entry.path(), e))?;

        let record = FileRecord {
            local_path: entry.path().to_path_buf(),
            relative_key: object_key(prefix, &relative),
            modified: DateTime::<Utc>::from(modified),
            size: metadata.len(),
        };
        stats.files += 1;

        if tx.blocking_send(record).is_err() {
            // 接收端已关闭，停止遍历
            debug!("扫描结果接收端已关闭，停止遍历");
            break;
        }
    }

    Ok(stats)
}

/// 相对于根目录的路径，统一使用 / 分隔
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
