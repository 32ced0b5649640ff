use crate::core::comparator::{CompareMode, FileComparator, SyncPlan};
use crate::core::exclude::ExcludePatterns;
use crate::core::inventory::RemoteInventory;
use crate::core::marker::Marker;
use crate::core::pool::{PoolReport, WorkerPool, DEFAULT_WORKERS};
use crate::core::scanner::FileScanner;
use crate::core::sweeper::Sweeper;
use crate::core::upload::Uploader;
use crate::error::SyncError;
use crate::storage::{namespace_for, ObjectStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// 同步配置（运行期间不可变）
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub local_root: PathBuf,
    pub bucket: String,
    pub prefix: String,
    pub storage_class: Option<String>,
    /// 上传 / 删除的并发数
    pub workers: usize,
    pub excludes: Arc<ExcludePatterns>,
    pub compare: CompareMode,
    /// 只上传修改时间不早于上次成功同步的文件
    pub incremental: bool,
    /// 删除远程多余对象
    pub delete_extra: bool,
    /// 只规划不执行
    pub dry_run: bool,
}

impl SyncConfig {
    pub fn new(local_root: impl Into<PathBuf>, bucket: &str, prefix: &str) -> Self {
        Self {
            local_root: local_root.into(),
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            storage_class: None,
            workers: DEFAULT_WORKERS,
            excludes: Arc::new(ExcludePatterns::with_defaults()),
            compare: CompareMode::default(),
            incremental: false,
            delete_extra: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Completed,
    /// 有文件或对象处理失败
    Failed,
    Cancelled,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SyncStatus,
    pub dry_run: bool,
    pub files_scanned: u64,
    pub files_uploaded: u64,
    pub files_skipped: u64,
    pub files_deleted: u64,
    pub files_failed: u64,
    /// 因取消而未执行的上传 / 删除
    pub not_attempted: u64,
    pub bytes_uploaded: u64,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

impl SyncReport {
    /// 人类可读的汇总
    pub fn summary(&self) -> String {
        let status = match self.status {
            SyncStatus::Completed => "完成",
            SyncStatus::Failed => "部分失败",
            SyncStatus::Cancelled => "已取消",
        };
        let verb = if self.dry_run { "将" } else { "已" };
        let mut lines = vec![
            format!(
                "同步{}{}: 扫描 {} 个文件, {}上传 {} ({}), 跳过 {}, {}删除 {}",
                status,
                if self.dry_run { " (演练)" } else { "" },
                self.files_scanned,
                verb,
                self.files_uploaded,
                format_bytes(self.bytes_uploaded),
                self.files_skipped,
                verb,
                self.files_deleted
            ),
            format!(
                "失败 {}, 未执行 {}, 耗时 {:.1}s",
                self.files_failed,
                self.not_attempted,
                self.duration_ms as f64 / 1000.0
            ),
        ];
        for error in &self.errors {
            lines.push(format!("  - {}", error));
        }
        lines.join("\n")
    }

    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Completed
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// 同步引擎
///
/// 阶段顺序固定：扫描本地 ‖ 列举远程 → 规划 → 上传 → 删除 → 写标记。
pub struct SyncEngine {
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        if config.bucket.trim().is_empty() {
            return Err(SyncError::config("bucket 不能为空"));
        }
        if config.prefix.trim_matches('/').is_empty() {
            return Err(SyncError::config("前缀不能为空"));
        }
        if config.workers == 0 {
            return Err(SyncError::config("并发数必须大于 0"));
        }

        Ok(Self {
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 取消同步：停止分派新任务，进行中的任务继续完成
    ///
    /// 返回调用前是否已经处于取消状态。
    pub fn cancel(&self) -> bool {
        self.cancelled.swap(true, Ordering::SeqCst)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 运行同步任务
    pub async fn run(&self, store: Arc<dyn ObjectStore>) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("sync", run_id = %run_id);
        self.run_inner(store, run_id).instrument(span).await
    }

    async fn run_inner(
        &self,
        store: Arc<dyn ObjectStore>,
        run_id: String,
    ) -> Result<SyncReport, SyncError> {
        let start_time = Utc::now();
        let started = Instant::now();
        let config = &self.config;
        let namespace = namespace_for(&config.prefix);

        info!(
            "开始同步: {} -> {}/{}",
            config.local_root.display(),
            store.name(),
            namespace
        );

        let marker = Marker::new(&config.local_root);
        let since = if config.incremental {
            let since = marker.read()?;
            match since {
                Some(at) => info!("增量模式: 跳过 {} 之前修改的文件", at.to_rfc3339()),
                None => info!("增量模式: 未找到同步标记，执行完整同步"),
            }
            since
        } else {
            None
        };

        // 扫描与列举并行
        let scanner = FileScanner::new(&config.local_root, &config.prefix, config.excludes.clone());
        let (local, remote) = tokio::join!(
            scanner.scan(),
            RemoteInventory::list(store.as_ref(), &namespace)
        );
        let local = local?;
        let remote = Arc::new(remote?);
        let files_scanned = local.len() as u64;

        let comparator = FileComparator::new(config.compare, since, config.delete_extra);
        let SyncPlan {
            to_upload,
            to_skip,
            to_delete,
            ..
        } = comparator.plan(local, &remote, &config.excludes);

        info!(
            "规划: 上传 {} 个文件, 跳过 {} 个, 删除 {} 个",
            to_upload.len(),
            to_skip.len(),
            to_delete.len()
        );

        let mut report = SyncReport {
            run_id,
            start_time,
            end_time: start_time,
            status: SyncStatus::Completed,
            dry_run: config.dry_run,
            files_scanned,
            files_uploaded: 0,
            files_skipped: to_skip.len() as u64,
            files_deleted: 0,
            files_failed: 0,
            not_attempted: 0,
            bytes_uploaded: 0,
            duration_ms: 0,
            errors: Vec::new(),
        };

        if config.dry_run {
            for record in &to_upload {
                info!("[演练] 上传 {}", record.relative_key);
            }
            for key in &to_delete {
                info!("[演练] 删除 {}", key);
            }
            report.files_uploaded = to_upload.len() as u64;
            report.bytes_uploaded = to_upload.iter().map(|r| r.size).sum();
            report.files_deleted = to_delete.len() as u64;
            return Ok(self.finish(report, started));
        }

        let pool = WorkerPool::new(config.workers, self.cancelled.clone());

        let uploader = Uploader::new(store.clone(), config.storage_class.clone(), remote.clone());
        let uploads = uploader.run(&pool, to_upload).await;
        report.files_uploaded = uploads.completed;
        report.bytes_uploaded = uploads.bytes;
        absorb(&mut report, uploads);

        // 取消后不再删除
        if self.is_cancelled() {
            warn!("同步已取消，跳过删除阶段");
            report.not_attempted += to_delete.len() as u64;
        } else {
            let deletions = Sweeper::new(store.clone()).run(&pool, to_delete).await;
            report.files_deleted = deletions.completed;
            absorb(&mut report, deletions);
        }

        if self.is_cancelled() {
            report.status = SyncStatus::Cancelled;
        } else if report.files_failed > 0 {
            report.status = SyncStatus::Failed;
        }

        // 只有完全成功的同步才更新标记
        if config.incremental && report.status == SyncStatus::Completed {
            if let Err(e) = marker.write(start_time) {
                warn!("{}", e);
                report.errors.push(e.to_string());
            }
        }

        Ok(self.finish(report, started))
    }

    fn finish(&self, mut report: SyncReport, started: Instant) -> SyncReport {
        report.end_time = Utc::now();
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "同步结束: 上传 {}, 跳过 {}, 删除 {}, 失败 {}, 未执行 {}",
            report.files_uploaded,
            report.files_skipped,
            report.files_deleted,
            report.files_failed,
            report.not_attempted
        );
        report
    }
}

fn absorb(report: &mut SyncReport, pool: PoolReport) {
    report.files_failed += pool.failed;
    report.not_attempted += pool.not_attempted;
    report.errors.extend(pool.errors);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::marker::MARKER_FILE_NAME;
    use crate::storage::MemoryStore;
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn engine(root: &Path) -> SyncEngine {
        SyncEngine::new(SyncConfig::new(root, "bucket", "prefix")).unwrap()
    }

    fn engine_with(root: &Path, f: impl FnOnce(&mut SyncConfig)) -> SyncEngine {
        let mut config = SyncConfig::new(root, "bucket", "prefix");
        f(&mut config);
        SyncEngine::new(config).unwrap()
    }

    #[test]
    fn test_rejects_empty_arguments() {
        let dir = tempfile::tempdir().unwrap();
        for (bucket, prefix) in [("", "p"), ("b", ""), ("b", "/")] {
            let err = SyncEngine::new(SyncConfig::new(dir.path(), bucket, prefix))
                .err()
                .unwrap();
            assert!(err.is_usage());
        }
        let mut config = SyncConfig::new(dir.path(), "b", "p");
        config.workers = 0;
        assert!(SyncEngine::new(config).is_err());
    }

    #[tokio::test]
    async fn test_uploads_missing_and_skips_present() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        write(dir.path(), "b.txt", "b");
        let store = Arc::new(MemoryStore::new());
        store.insert("prefix/a.txt", "remote a");

        let report = engine(dir.path()).run(store.clone()).await.unwrap();

        assert_eq!(report.status, SyncStatus::Completed);
        assert_eq!(store.put_calls(), vec!["prefix/b.txt".to_string()]);
        assert_eq!(report.files_uploaded, 1);
        assert_eq!(report.files_skipped, 1);
        // 已存在的对象不会被覆盖
        assert_eq!(store.get("prefix/a.txt").unwrap().data, b"remote a");
    }

    #[tokio::test]
    async fn test_stray_remote_object_is_deleted_once() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        let store = Arc::new(MemoryStore::new());
        store.insert("prefix/a.txt", "a");
        store.insert("prefix/old.txt", "old");
        store.insert("other/keep.txt", "x");

        let report = engine(dir.path()).run(store.clone()).await.unwrap();

        assert_eq!(store.delete_calls(), vec!["prefix/old.txt".to_string()]);
        assert_eq!(report.files_deleted, 1);
        assert!(store.get("other/keep.txt").is_some());
    }

    #[tokio::test]
    async fn test_excluded_files_are_never_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.txt", "k");
        write(dir.path(), "x.tmp", "t");
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(dir.path(), |c| {
            c.excludes = Arc::new(ExcludePatterns::from_patterns(&["*.tmp"]).unwrap());
        });

        let report = engine.run(store.clone()).await.unwrap();

        assert_eq!(store.keys(), vec!["prefix/keep.txt".to_string()]);
        assert_eq!(report.files_scanned, 1);
        assert!(dir.path().join("x.tmp").exists());
    }

    #[tokio::test]
    async fn test_default_run_uploads_temp_and_vcs_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "report.tmp", "~draft.docx", "Thumbs.db", ".git/config", "._a.txt"] {
            write(dir.path(), name, "x");
        }
        let store = Arc::new(MemoryStore::new());
        store.insert("prefix/old.tmp", "stale");

        let report = engine(dir.path()).run(store.clone()).await.unwrap();

        assert_eq!(report.status, SyncStatus::Completed);
        assert_eq!(
            store.keys(),
            vec![
                "prefix/.git/config".to_string(),
                "prefix/Thumbs.db".to_string(),
                "prefix/a.txt".to_string(),
                "prefix/report.tmp".to_string(),
                "prefix/~draft.docx".to_string(),
            ]
        );
        assert_eq!(store.delete_calls(), vec!["prefix/old.tmp".to_string()]);
    }

    #[tokio::test]
    async fn test_multi_page_listing_is_fully_diffed() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            write(dir.path(), name, name);
        }
        let store = Arc::new(MemoryStore::with_page_size(2));
        for key in ["prefix/a", "prefix/b", "prefix/c", "prefix/d", "prefix/zz"] {
            store.insert(key, "x");
        }

        let report = engine(dir.path()).run(store.clone()).await.unwrap();

        assert_eq!(store.put_calls(), vec!["prefix/e".to_string()]);
        assert_eq!(store.delete_calls(), vec!["prefix/zz".to_string()]);
        assert_eq!(report.files_skipped, 4);
        assert!(store.list_calls() >= 3);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        write(dir.path(), "sub/b.txt", "b");
        let store = Arc::new(MemoryStore::new());
        store.insert("prefix/stale", "x");
        let engine = engine(dir.path());

        engine.run(store.clone()).await.unwrap();
        let puts = store.put_calls().len();
        let deletes = store.delete_calls().len();

        let second = engine.run(store.clone()).await.unwrap();

        assert_eq!(second.files_uploaded, 0);
        assert_eq!(second.files_deleted, 0);
        assert_eq!(second.files_skipped, 2);
        assert_eq!(store.put_calls().len(), puts);
        assert_eq!(store.delete_calls().len(), deletes);
    }

    #[tokio::test]
    async fn test_failed_upload_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            write(dir.path(), &format!("f{}.txt", i), "data");
        }
        let store = Arc::new(MemoryStore::new());
        store.fail_put_for("prefix/f3.txt");
        let engine = engine_with(dir.path(), |c| c.workers = 3);

        let report = engine.run(store.clone()).await.unwrap();

        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.files_uploaded, 9);
        assert_eq!(store.put_calls().len(), 10);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_same_result_for_any_width() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..40 {
            write(dir.path(), &format!("d{}/f{}.bin", i % 4, i), &"x".repeat(i));
        }

        let mut finals = Vec::new();
        for workers in [1, 4, 32] {
            let store = Arc::new(MemoryStore::new());
            let engine = engine_with(dir.path(), |c| c.workers = workers);
            let report = engine.run(store.clone()).await.unwrap();

            assert_eq!(report.files_uploaded, 40);
            let mut puts = store.put_calls();
            puts.sort();
            puts.dedup();
            assert_eq!(puts.len(), 40);
            finals.push(store.keys());
        }
        assert!(finals.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "new.txt", "new");
        let store = Arc::new(MemoryStore::new());
        store.insert("prefix/old.txt", "old");
        let engine = engine_with(dir.path(), |c| {
            c.dry_run = true;
            c.incremental = true;
        });

        let report = engine.run(store.clone()).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.files_uploaded, 1);
        assert_eq!(report.files_deleted, 1);
        assert!(store.put_calls().is_empty());
        assert!(store.delete_calls().is_empty());
        assert!(!dir.path().join(MARKER_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_no_delete_keeps_stray_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("prefix/old.txt", "old");
        let engine = engine_with(dir.path(), |c| c.delete_extra = false);

        engine.run(store.clone()).await.unwrap();

        assert!(store.delete_calls().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_listing_error_aborts_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        let store = Arc::new(MemoryStore::new());
        store.fail_list_on_call(0);

        let err = engine(dir.path()).run(store.clone()).await.unwrap_err();

        assert!(matches!(err, SyncError::Inventory { .. }));
        assert!(store.put_calls().is_empty());
    }

    #[tokio::test]
    async fn test_incremental_writes_marker_and_skips_old_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "old.txt", "old");
        let old = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(dir.path().join("old.txt"))
            .unwrap()
            .set_modified(old)
            .unwrap();

        let engine = engine_with(dir.path(), |c| c.incremental = true);

        // 第一次没有标记：完整同步并写入标记
        let store = Arc::new(MemoryStore::new());
        let first = engine.run(store.clone()).await.unwrap();
        assert_eq!(first.files_uploaded, 1);
        let marker = Marker::new(dir.path()).read().unwrap().unwrap();
        assert!(marker <= Utc::now());

        // 换一个空的远程：旧文件早于标记，不再上传
        let fresh = Arc::new(MemoryStore::new());
        let second = engine.run(fresh.clone()).await.unwrap();
        assert_eq!(second.files_uploaded, 0);
        assert_eq!(second.files_skipped, 1);
        assert!(fresh.put_calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_run_does_not_write_marker() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        let store = Arc::new(MemoryStore::new());
        store.fail_put_for("prefix/a.txt");
        let engine = engine_with(dir.path(), |c| c.incremental = true);

        let report = engine.run(store).await.unwrap();

        assert_eq!(report.status, SyncStatus::Failed);
        assert!(!dir.path().join(MARKER_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_attempts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        write(dir.path(), "b.txt", "b");
        let store = Arc::new(MemoryStore::new());
        store.insert("prefix/old", "x");
        let engine = engine(dir.path());
        engine.cancel();

        let report = engine.run(store.clone()).await.unwrap();

        assert_eq!(report.status, SyncStatus::Cancelled);
        assert_eq!(report.not_attempted, 3);
        assert!(store.put_calls().is_empty());
        assert!(store.delete_calls().is_empty());
    }

    #[test]
    fn test_second_cancel_reports_already_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());

        assert!(!engine.cancel());
        assert!(engine.is_cancelled());
        assert!(engine.cancel());
    }

    #[test]
    fn test_summary_mentions_counts() {
        let report = SyncReport {
            run_id: "r".into(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            status: SyncStatus::Failed,
            dry_run: false,
            files_scanned: 3,
            files_uploaded: 2,
            files_skipped: 0,
            files_deleted: 0,
            files_failed: 1,
            not_attempted: 0,
            bytes_uploaded: 2048,
            duration_ms: 1500,
            errors: vec!["上传失败: prefix/x".into()],
        };
        let summary = report.summary();
        assert!(summary.contains("部分失败"));
        assert!(summary.contains("2.0 KB"));
        assert!(summary.contains("prefix/x"));
        assert!(!report.is_success());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
