//! 同步过程中的致命错误
//!
//! 单个文件 / 对象的失败不在这里：它们在任务层以 `anyhow::Error` 记录并跳过，
//! 不会中断整个同步。

use std::path::PathBuf;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 会中止整个同步流程的错误
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// 参数缺失、取值非法，或无法创建远程存储客户端
    #[error("配置错误: {0}")]
    Config(String),

    /// 本地根目录不可读或遍历失败
    #[error("无法遍历本地目录 {path}: {source}")]
    Enumeration {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// 远程列举失败（任何一页失败都视为整体失败）
    #[error("列举远程对象失败 (前缀 \"{namespace}\"): {source}")]
    Inventory {
        namespace: String,
        #[source]
        source: BoxError,
    },

    /// 增量标记文件读写失败
    #[error("标记文件 {path} 读写失败: {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config(message.into())
    }

    pub fn enumeration(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        SyncError::Enumeration {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn inventory(namespace: &str, source: impl Into<BoxError>) -> Self {
        SyncError::Inventory {
            namespace: namespace.to_string(),
            source: source.into(),
        }
    }

    /// 是否属于用法错误（命令行参数层面）
    pub fn is_usage(&self) -> bool {
        matches!(self, SyncError::Config(_))
    }
}
