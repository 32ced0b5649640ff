pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{AppConfig, RunOptions};
pub use core::{CompareMode, SyncConfig, SyncEngine, SyncReport, SyncStatus};
pub use error::SyncError;
pub use storage::{MemoryStore, ObjectStore, S3Store};

pub mod dirs {
    use std::path::PathBuf;

    /// 用户配置目录，Linux 下遵循 XDG_CONFIG_HOME
    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
