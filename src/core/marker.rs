//! 增量同步标记
//!
//! 标记文件位于本地根目录下，其修改时间记录上一次成功同步的开始时间。

use crate::error::SyncError;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// 标记文件名（扫描时自动跳过）
pub const MARKER_FILE_NAME: &str = ".bucketsync-marker";

pub struct Marker {
    path: PathBuf,
}

impl Marker {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(MARKER_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取上次成功同步的时间，标记不存在时返回 None
    pub fn read(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        match fs::metadata(&self.path) {
            Ok(metadata) => {
                let modified = metadata.modified().map_err(|e| self.error(e))?;
                let at = DateTime::<Utc>::from(modified);
                debug!("读取同步标记: {}", at.to_rfc3339());
                Ok(Some(at))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.error(e)),
        }
    }

    /// 写入标记，修改时间设为 `at`
    pub fn write(&self, at: DateTime<Utc>) -> Result<(), SyncError> {
        let mut file = File::create(&self.path).map_err(|e| self.error(e))?;
        // 内容仅供人工查看，判断以修改时间为准
        writeln!(file, "{}", at.to_rfc3339()).map_err(|e| self.error(e))?;
        file.set_modified(SystemTime::from(at))
            .map_err(|e| self.error(e))?;
        info!("已更新同步标记: {}", at.to_rfc3339());
        Ok(())
    }

    fn error(&self, source: std::io::Error) -> SyncError {
        SyncError::Marker {
            path: self.path.clone(),
            source,
        }
    }
}
