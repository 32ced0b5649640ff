use crate::core::exclude::ExcludePatterns;
use crate::core::inventory::RemoteInventory;
use crate::core::scanner::FileRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// 已存在对象的比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    /// 只看 key 是否存在，存在即跳过
    #[default]
    Presence,
    /// key 存在但大小不同时重新上传
    Size,
}

/// 同步计划
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub to_upload: Vec<FileRecord>,
    pub to_skip: Vec<FileRecord>,
    pub to_delete: Vec<String>,
    /// 因早于增量标记而跳过的数量（包含在 to_skip 中）
    pub skipped_by_marker: usize,
    /// 重复 key 被丢弃的数量
    pub duplicates: usize,
}

impl SyncPlan {
    pub fn upload_bytes(&self) -> u64 {
        self.to_upload.iter().map(|r| r.size).sum()
    }

    /// 没有任何需要执行的动作
    pub fn is_noop(&self) -> bool {
        self.to_upload.is_empty() && self.to_delete.is_empty()
    }
}

/// 差异规划器
#[derive(Debug, Clone, Default)]
pub struct FileComparator {
    mode: CompareMode,
    /// 增量模式：早于该时间的文件视为已同步
    since: Option<DateTime<Utc>>,
    /// 是否删除远程多余对象
    delete_extra: bool,
}

impl FileComparator {
    pub fn new(mode: CompareMode, since: Option<DateTime<Utc>>, delete_extra: bool) -> Self {
        Self {
            mode,
            since,
            delete_extra,
        }
    }

    /// 根据本地记录和远程清单生成同步计划
    pub fn plan(
        &self,
        local: Vec<FileRecord>,
        remote: &RemoteInventory,
        excludes: &ExcludePatterns,
    ) -> SyncPlan {
        let mut plan = SyncPlan::default();
        let mut local_keys: HashSet<String> = HashSet::with_capacity(local.len());

        for record in local {
            if !local_keys.insert(record.relative_key.clone()) {
                warn!("重复的 key，已忽略: {}", record.relative_key);
                plan.duplicates += 1;
                continue;
            }

            if self.needs_upload(&record, remote) {
                match self.since {
                    Some(since) if record.modified < since => {
                        debug!("早于同步标记，跳过: {}", record.relative_key);
                        plan.skipped_by_marker += 1;
                        plan.to_skip.push(record);
                    }
                    _ => plan.to_upload.push(record),
                }
            } else {
                plan.to_skip.push(record);
            }
        }

        if self.delete_extra {
            let namespace = remote.namespace();
            plan.to_delete = remote
                .keys()
                .filter(|key| !local_keys.contains(*key))
                .filter(|key| {
                    // 命名空间之外的对象不在同步范围内
                    let Some(relative) = key.strip_prefix(namespace) else {
                        return false;
                    };
                    // 匹配排除规则的远程对象保持不动
                    if excludes.is_excluded(relative) {
                        debug!("远程对象匹配排除规则，保留: {}", key);
                        return false;
                    }
                    true
                })
                .map(str::to_string)
                .collect();
        }

        // 按 key 排序，确保一致性
        plan.to_upload.sort_by(|a, b| a.relative_key.cmp(&b.relative_key));
        plan.to_skip.sort_by(|a, b| a.relative_key.cmp(&b.relative_key));
        plan.to_delete.sort();

        debug!(
            "规划完成: 上传 {}, 跳过 {} (标记跳过 {}), 删除 {}",
            plan.to_upload.len(),
            plan.to_skip.len(),
            plan.skipped_by_marker,
            plan.to_delete.len()
        );

        plan
    }

    fn needs_upload(&self, record: &FileRecord, remote: &RemoteInventory) -> bool {
        let Some(existing) = remote.get(&record.relative_key) else {
            return true;
        };

        match self.mode {
            CompareMode::Presence => false,
            CompareMode::Size => match existing.size {
                Some(size) if size != record.size => {
                    debug!(
                        "文件大小不同: {} (本地={}, 远程={})",
                        record.relative_key, record.size, size
                    );
                    true
                }
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RemoteObject;
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;

    fn record(key: &str, size: u64, modified: DateTime<Utc>) -> FileRecord {
        FileRecord {
            local_path: PathBuf::from("/data").join(key),
            relative_key: key.to_string(),
            modified,
            size,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn keys(records: &[FileRecord]) -> Vec<&str> {
        records.iter().map(|r| r.relative_key.as_str()).collect()
    }

    fn remote(keys: &[&str]) -> RemoteInventory {
        RemoteInventory::from_objects(
            "prefix/",
            keys.iter().map(|k| RemoteObject::new(*k).with_size(1)),
        )
    }

    #[test]
    fn test_upload_missing_and_skip_present() {
        let local = vec![record("prefix/a.txt", 1, at(1)), record("prefix/b.txt", 1, at(1))];
        let plan = FileComparator::new(CompareMode::Presence, None, true).plan(
            local,
            &remote(&["prefix/a.txt"]),
            &ExcludePatterns::new(),
        );

        assert_eq!(keys(&plan.to_upload), vec!["prefix/b.txt"]);
        assert_eq!(keys(&plan.to_skip), vec!["prefix/a.txt"]);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn test_stray_remote_key_is_deleted() {
        let local = vec![record("prefix/a.txt", 1, at(1))];
        let plan = FileComparator::new(CompareMode::Presence, None, true).plan(
            local,
            &remote(&["prefix/a.txt", "prefix/old.txt"]),
            &ExcludePatterns::new(),
        );

        assert_eq!(plan.to_delete, vec!["prefix/old.txt".to_string()]);
    }

    #[test]
    fn test_delete_disabled() {
        let plan = FileComparator::new(CompareMode::Presence, None, false).plan(
            vec![],
            &remote(&["prefix/old.txt"]),
            &ExcludePatterns::new(),
        );
        assert!(plan.to_delete.is_empty());
        assert!(plan.is_noop());
    }

    #[test]
    fn test_set_algebra_holds() {
        let local_keys = ["prefix/1", "prefix/2", "prefix/3", "prefix/4"];
        let remote_keys = ["prefix/3", "prefix/4", "prefix/5", "prefix/6"];
        let local = local_keys.iter().map(|k| record(k, 1, at(1))).collect();

        let plan = FileComparator::new(CompareMode::Presence, None, true).plan(
            local,
            &remote(&remote_keys),
            &ExcludePatterns::new(),
        );

        assert_eq!(keys(&plan.to_upload), vec!["prefix/1", "prefix/2"]);
        assert_eq!(keys(&plan.to_skip), vec!["prefix/3", "prefix/4"]);
        assert_eq!(plan.to_delete, vec!["prefix/5", "prefix/6"]);

        let upload: HashSet<_> = keys(&plan.to_upload).into_iter().collect();
        let skip: HashSet<_> = keys(&plan.to_skip).into_iter().collect();
        assert!(upload.is_disjoint(&skip));
    }

    #[test]
    fn test_presence_ignores_content_changes() {
        let local = vec![record("prefix/a.txt", 999, at(23))];
        let plan = FileComparator::new(CompareMode::Presence, None, true).plan(
            local,
            &remote(&["prefix/a.txt"]),
            &ExcludePatterns::new(),
        );
        assert!(plan.to_upload.is_empty());
    }

    #[test]
    fn test_size_mode_reuploads_changed_size() {
        let local = vec![record("prefix/a.txt", 999, at(1)), record("prefix/b.txt", 1, at(1))];
        let plan = FileComparator::new(CompareMode::Size, None, true).plan(
            local,
            &remote(&["prefix/a.txt", "prefix/b.txt"]),
            &ExcludePatterns::new(),
        );
        assert_eq!(keys(&plan.to_upload), vec!["prefix/a.txt"]);
        assert_eq!(keys(&plan.to_skip), vec!["prefix/b.txt"]);
    }

    #[test]
    fn test_incremental_skips_files_older_than_marker() {
        let marker = at(12);
        let local = vec![
            record("prefix/old.txt", 1, marker - Duration::hours(1)),
            record("prefix/same.txt", 1, marker),
            record("prefix/new.txt", 1, marker + Duration::hours(1)),
        ];

        let plan = FileComparator::new(CompareMode::Presence, Some(marker), true).plan(
            local,
            &remote(&[]),
            &ExcludePatterns::new(),
        );

        assert_eq!(keys(&plan.to_upload), vec!["prefix/new.txt", "prefix/same.txt"]);
        assert_eq!(keys(&plan.to_skip), vec!["prefix/old.txt"]);
        assert_eq!(plan.skipped_by_marker, 1);
        // 早于标记的文件仍属于本地 key，不会触发删除
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn test_excluded_remote_keys_are_kept() {
        let excludes = ExcludePatterns::from_patterns(&["*.tmp"]).unwrap();
        let plan = FileComparator::new(CompareMode::Presence, None, true).plan(
            vec![],
            &remote(&["prefix/x.tmp", "prefix/gone.txt"]),
            &excludes,
        );
        assert_eq!(plan.to_delete, vec!["prefix/gone.txt".to_string()]);
    }

    #[test]
    fn test_duplicate_keys_are_dropped() {
        let local = vec![record("prefix/a", 1, at(1)), record("prefix/a", 2, at(2))];
        let plan = FileComparator::new(CompareMode::Presence, None, true).plan(
            local,
            &remote(&[]),
            &ExcludePatterns::new(),
        );
        assert_eq!(plan.to_upload.len(), 1);
        assert_eq!(plan.to_upload[0].size, 1);
        assert_eq!(plan.duplicates, 1);
    }

    #[test]
    fn test_second_plan_after_sync_is_empty() {
        let local: Vec<_> = ["prefix/a", "prefix/b"]
            .iter()
            .map(|k| record(k, 1, at(1)))
            .collect();
        let comparator = FileComparator::new(CompareMode::Presence, None, true);

        let first = comparator.plan(local.clone(), &remote(&["prefix/z"]), &ExcludePatterns::new());
        assert_eq!(first.to_upload.len(), 2);
        assert_eq!(first.to_delete, vec!["prefix/z".to_string()]);

        // 模拟执行后的远程状态
        let second = comparator.plan(local, &remote(&["prefix/a", "prefix/b"]), &ExcludePatterns::new());
        assert!(second.is_noop());
        assert_eq!(second.upload_bytes(), 0);
    }
}
