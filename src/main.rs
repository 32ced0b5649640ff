use bucketsync_lib::config::{AppConfig, RunOptions};
use bucketsync_lib::core::{CompareMode, SyncEngine, SyncStatus};
use bucketsync_lib::logging::init_logging;
use bucketsync_lib::storage::{ObjectStore, S3Store};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

/// 把本地目录差异同步到 S3 bucket 的指定前缀下
#[derive(Parser)]
#[command(name = "bucketsync")]
#[command(version)]
struct Cli {
    /// 本地根目录
    local_path: PathBuf,

    /// 目标 bucket
    bucket: String,

    /// 对象 key 前缀（同步命名空间）
    prefix: String,

    /// 上传 / 删除并发数（默认 10）
    #[arg(short, long)]
    workers: Option<usize>,

    /// 额外的排除规则，可重复
    #[arg(short, long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,

    /// 不使用内置的默认排除规则（`._*`）
    #[arg(long)]
    no_default_excludes: bool,

    /// 同时排除常见垃圾文件：.git、.svn、.DS_Store、Thumbs.db、临时文件等
    #[arg(long)]
    exclude_junk: bool,

    /// 只显示将要执行的操作
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// 上传对象的存储类型，如 STANDARD_IA、GLACIER
    #[arg(long, env = "BUCKETSYNC_STORAGE_CLASS")]
    storage_class: Option<String>,

    /// 只上传上次成功同步后修改过的文件
    #[arg(long)]
    incremental: bool,

    /// 不删除远程多余对象
    #[arg(long)]
    no_delete: bool,

    /// 远程已存在对象的比较方式
    #[arg(long, value_enum, default_value_t = CompareMode::Presence)]
    compare: CompareMode,

    /// S3 区域（默认读取 AWS_REGION）
    #[arg(long)]
    region: Option<String>,

    /// S3 兼容服务的端点地址
    #[arg(long)]
    endpoint: Option<String>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 日志级别: error, warn, info, debug, trace
    #[arg(long)]
    log_level: Option<String>,

    /// 同时写入日志文件
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut app_config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Some(level) = &cli.log_level {
        app_config.log.level = level.clone();
    }
    if let Some(file) = &cli.log_file {
        app_config.log.file = Some(file.clone());
    }
    init_logging(&app_config.log);

    let options = RunOptions {
        workers: cli.workers,
        storage_class: cli.storage_class.clone(),
        exclude: cli.exclude.clone(),
        no_default_excludes: cli.no_default_excludes,
        exclude_junk: cli.exclude_junk,
        compare: cli.compare,
        incremental: cli.incremental,
        no_delete: cli.no_delete,
        dry_run: cli.dry_run,
    };

    let sync_config = match app_config.resolve(&cli.local_path, &cli.bucket, &cli.prefix, &options)
    {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let region = cli.region.as_deref().or(app_config.region.as_deref());
    let endpoint = cli.endpoint.as_deref().or(app_config.endpoint.as_deref());
    let store: Arc<dyn ObjectStore> = match S3Store::new(&sync_config.bucket, region, endpoint) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("无法创建 S3 客户端: {:#}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let engine = match SyncEngine::new(sync_config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    // 第一次 Ctrl-C 停止分派新任务，等待进行中的上传结束；第二次立即退出
    let engine = Arc::new(engine);
    let signal_engine = engine.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if signal_engine.cancel() {
                error!("再次收到中断信号，强制退出");
                std::process::exit(EXIT_CANCELLED as i32);
            }
            warn!("收到中断信号，正在停止... (再按一次 Ctrl-C 强制退出)");
        }
    });

    match engine.run(store).await {
        Ok(report) => {
            println!("{}", report.summary());
            match report.status {
                SyncStatus::Completed => {
                    info!("同步成功");
                    ExitCode::SUCCESS
                }
                SyncStatus::Failed => ExitCode::from(EXIT_FAILURE),
                SyncStatus::Cancelled => ExitCode::from(EXIT_CANCELLED),
            }
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(if e.is_usage() { EXIT_USAGE } else { EXIT_FAILURE })
        }
    }
}
