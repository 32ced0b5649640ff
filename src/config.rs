//! 应用配置模块
//!
//! 配置文件为 camelCase JSON，命令行参数优先于文件中的值。

use crate::core::comparator::CompareMode;
use crate::core::engine::SyncConfig;
use crate::core::exclude::{ExcludePatterns, JUNK_EXCLUDES};
use crate::error::SyncError;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// S3 支持的存储类型
pub const STORAGE_CLASSES: &[&str] = &[
    "STANDARD",
    "REDUCED_REDUNDANCY",
    "STANDARD_IA",
    "ONEZONE_IA",
    "INTELLIGENT_TIERING",
    "GLACIER",
    "GLACIER_IR",
    "DEEP_ARCHIVE",
    "OUTPOSTS",
    "EXPRESS_ONEZONE",
];

/// 配置文件内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub storage_class: Option<String>,
    /// 额外的排除规则（追加在默认规则之后）
    #[serde(default)]
    pub exclude: Vec<String>,
    /// 启用常见垃圾文件规则（版本控制目录、系统文件、临时文件）
    #[serde(default)]
    pub exclude_junk: bool,
    #[serde(default)]
    pub region: Option<String>,
    /// 自定义 S3 兼容端点
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_workers() -> usize {
    crate::core::pool::DEFAULT_WORKERS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            storage_class: None,
            exclude: Vec::new(),
            exclude_junk: false,
            region: None,
            endpoint: None,
            log: LogConfig::default(),
        }
    }
}

/// 命令行中与同步相关的选项
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub workers: Option<usize>,
    pub storage_class: Option<String>,
    pub exclude: Vec<String>,
    pub no_default_excludes: bool,
    pub exclude_junk: bool,
    pub compare: CompareMode,
    pub incremental: bool,
    pub no_delete: bool,
    pub dry_run: bool,
}

impl AppConfig {
    /// 默认配置文件路径
    pub fn default_path() -> Option<PathBuf> {
        crate::dirs::config_dir().map(|p| p.join("bucketsync").join("config.json"))
    }

    /// 加载配置。显式指定的文件必须存在；默认位置没有文件时使用默认值
    pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(SyncError::config(format!(
                    "无法读取配置文件 {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            SyncError::config(format!("配置文件格式错误 {}: {}", path.display(), e))
        })?;
        debug!("已加载配置文件: {}", path.display());
        Ok(config)
    }

    /// 合并命令行参数，生成本次运行的同步配置
    pub fn resolve(
        &self,
        local_root: &Path,
        bucket: &str,
        prefix: &str,
        options: &RunOptions,
    ) -> Result<SyncConfig, SyncError> {
        if local_root.as_os_str().is_empty() {
            return Err(SyncError::config("本地目录不能为空"));
        }
        if bucket.trim().is_empty() {
            return Err(SyncError::config("bucket 不能为空"));
        }
        if prefix.trim_matches('/').is_empty() {
            return Err(SyncError::config("前缀不能为空"));
        }

        let workers = options.workers.unwrap_or(self.workers);
        if workers == 0 {
            return Err(SyncError::config("并发数必须大于 0"));
        }

        let storage_class = options
            .storage_class
            .as_deref()
            .or(self.storage_class.as_deref())
            .map(normalize_storage_class)
            .transpose()?;

        let mut patterns = Vec::new();
        if options.exclude_junk || self.exclude_junk {
            patterns.extend(JUNK_EXCLUDES.iter().map(|p| p.to_string()));
        }
        patterns.extend(self.exclude.iter().cloned());
        patterns.extend(options.exclude.iter().cloned());
        let excludes = ExcludePatterns::with_extra(&patterns, !options.no_default_excludes)
            .map_err(|e| SyncError::config(format!("{:#}", e)))?;

        Ok(SyncConfig {
            local_root: local_root.to_path_buf(),
            bucket: bucket.trim().to_string(),
            prefix: prefix.to_string(),
            storage_class,
            workers,
            excludes: Arc::new(excludes),
            compare: options.compare,
            incremental: options.incremental,
            delete_extra: !options.no_delete,
            dry_run: options.dry_run,
        })
    }
}

/// 规范化存储类型名称（大小写不敏感，`-` 视同 `_`）
pub fn normalize_storage_class(value: &str) -> Result<String, SyncError> {
    let normalized = value.trim().to_uppercase().replace('-', "_");
    if STORAGE_CLASSES.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(SyncError::config(format!(
            "未知的存储类型 \"{}\"，可选值: {}",
            value,
            STORAGE_CLASSES.join(", ")
        )))
    }
}
