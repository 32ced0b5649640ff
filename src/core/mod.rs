pub mod comparator;
pub mod engine;
pub mod exclude;
pub mod inventory;
pub mod marker;
pub mod pool;
pub mod scanner;
pub mod sweeper;
pub mod upload;

pub use comparator::{CompareMode, FileComparator, SyncPlan};
pub use engine::{SyncConfig, SyncEngine, SyncReport, SyncStatus};
pub use exclude::{ExcludePatterns, DEFAULT_EXCLUDES, JUNK_EXCLUDES};
pub use inventory::RemoteInventory;
pub use marker::{Marker, MARKER_FILE_NAME};
pub use pool::{PoolReport, WorkerPool};
pub use scanner::{FileRecord, FileScanner, ScanStats};
pub use sweeper::Sweeper;
pub use upload::Uploader;
