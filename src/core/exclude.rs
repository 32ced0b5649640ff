//! 排除规则
//!
//! shell 风格的 glob 匹配，支持 `**` 跨目录通配。不含 `/` 的规则匹配路径中的
//! 任意一段（`*.tmp` 可排除 `a/b/x.tmp`），含 `/` 的规则匹配完整相对路径。

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// 默认排除规则：macOS 资源分叉文件
pub const DEFAULT_EXCLUDES: &[&str] = &["._*"];

/// 可选的常见垃圾文件规则（`--exclude-junk` / 配置 `excludeJunk` 启用）
pub const JUNK_EXCLUDES: &[&str] = &[
    // 版本控制
    ".git",
    ".svn",
    // 系统文件
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    // 临时文件
    "*.tmp",
    "*.temp",
    "~*",
];

/// 排除规则集合（只做匹配，没有任何副作用）
#[derive(Debug, Clone)]
pub struct ExcludePatterns {
    /// 匹配单个路径段的规则
    component_set: GlobSet,
    /// 匹配完整相对路径的规则
    path_set: GlobSet,
    /// 原始规则（用于日志和展示）
    patterns: Vec<String>,
}

impl Default for ExcludePatterns {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ExcludePatterns {
    /// 空规则集
    pub fn new() -> Self {
        Self {
            component_set: GlobSet::empty(),
            path_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    /// 仅包含默认规则
    pub fn with_defaults() -> Self {
        Self::from_patterns(DEFAULT_EXCLUDES).unwrap_or_else(|e| {
            tracing::warn!("默认排除规则编译失败: {:#}", e);
            Self::new()
        })
    }

    /// 从规则列表创建
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut component_builder = GlobSetBuilder::new();
        let mut path_builder = GlobSetBuilder::new();
        let mut pattern_list = Vec::new();

        for raw in patterns {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }

            // 结尾的 / 表示目录，按路径段匹配即可；开头的 / 表示锚定到根
            let anchored = raw.starts_with('/');
            let pattern = raw.trim_start_matches('/').trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }

            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .with_context(|| format!("无效的排除规则: {}", raw))?;

            if anchored || pattern.contains('/') {
                path_builder.add(glob);
            } else {
                component_builder.add(glob);
            }
            pattern_list.push(raw.to_string());
        }

        Ok(Self {
            component_set: component_builder.build()?,
            path_set: path_builder.build()?,
            patterns: pattern_list,
        })
    }

    /// 默认规则 + 额外规则
    pub fn with_extra<S: AsRef<str>>(extra: &[S], use_defaults: bool) -> Result<Self> {
        let mut all: Vec<String> = if use_defaults {
            DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
        } else {
            Vec::new()
        };
        for pattern in extra {
            let pattern = pattern.as_ref().to_string();
            if !all.contains(&pattern) {
                all.push(pattern);
            }
        }
        Self::from_patterns(&all)
    }

    /// 检查相对路径（以 / 分隔）是否应被排除
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        let path = relative_path.trim_start_matches('/');

        if self.path_set.is_match(path) {
            return true;
        }

        // 逐段检查，目录规则会排除其下所有文件
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .any(|segment| self.component_set.is_match(segment))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
