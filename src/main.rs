use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use remote_transfer::config::JsonPreferences;
use remote_transfer::core::{Comparator, FileResult, ListFilter, SyncDirection, TransferStatus};
use remote_transfer::logging::{init_logging, log_dir, LogConfig};
use remote_transfer::{
    Engine, Host, Resource, Session, TransferAction, TransferError, TransferItem, TransferKind,
    TransferListener, TransferState,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "remote-transfer", version, about = "远程文件传输")]
struct Cli {
    /// 配置目录，默认为系统配置目录下的 remote-transfer
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 列出远程目录
    List {
        host: String,
        #[arg(default_value = "/")]
        path: String,
        /// 包含隐藏文件
        #[arg(short, long)]
        all: bool,
        /// 递归列出
        #[arg(short, long)]
        recursive: bool,
    },
    /// 上传本地文件或目录
    Upload {
        host: String,
        local: PathBuf,
        remote: String,
        #[arg(long)]
        action: Option<String>,
    },
    /// 下载远程文件或目录
    Download {
        host: String,
        remote: String,
        local: PathBuf,
        #[arg(long)]
        action: Option<String>,
    },
    /// 在同一主机内复制
    Copy {
        host: String,
        from: String,
        to: String,
        #[arg(long)]
        action: Option<String>,
    },
    /// 同步本地目录与远程目录
    Sync {
        host: String,
        local: PathBuf,
        remote: String,
        /// upload / download / mirror
        #[arg(long, default_value = "mirror")]
        direction: String,
        #[arg(long)]
        action: Option<String>,
    },
}

/// 逐个文件打印结果
struct ConsoleProgress;

impl TransferListener for ConsoleProgress {
    fn queued(&self) {
        println!("等待队列名额...");
    }

    fn did_transfer(&self, resource: &Resource, status: &TransferStatus) {
        println!("  {} ({} 字节)", resource, status.current);
    }
}

fn parse_action(action: Option<String>) -> Option<TransferAction> {
    action.as_deref().map(TransferAction::from)
}

fn find_host(hosts: &HashMap<String, Host>, name: &str) -> anyhow::Result<Host> {
    if name == "local" {
        return Ok(Host::local("/"));
    }
    hosts
        .get(name)
        .cloned()
        .ok_or_else(|| anyhow!("未配置的主机: {} (在 config.json 的 hosts 中添加)", name))
}

/// 本地路径转为根目录为 `/` 的本地会话中的资源
fn local_resource(path: &Path) -> anyhow::Result<Resource> {
    let absolute = if path.exists() {
        path.canonicalize()
            .with_context(|| format!("无法解析路径 {:?}", path))?
    } else {
        std::env::current_dir()?.join(path)
    };
    let display = absolute.to_string_lossy().replace('\\', "/");
    Ok(if absolute.is_dir() {
        Resource::directory(&display)
    } else {
        Resource::file(&display)
    })
}

/// 远程路径按文件查找，找不到时当作目录
async fn remote_resource(session: &Session, path: &str) -> anyhow::Result<Resource> {
    let file = Resource::file(path);
    if let Some(found) = session.find(&file).await? {
        return Ok(found);
    }
    Ok(Resource::directory(path))
}

/// 失败文件按退避间隔重试，重试属于调用方策略
async fn execute(
    engine: &Engine,
    kind: TransferKind,
    source: Arc<Session>,
    target: Arc<Session>,
    roots: Vec<TransferItem>,
    action: Option<TransferAction>,
) -> anyhow::Result<()> {
    let config = engine.config();
    let mut roots = roots;
    let mut attempt = 0;
    loop {
        let transfer = engine
            .transfer(kind, source.clone(), target.clone(), roots.clone())
            .with_listener(Arc::new(ConsoleProgress));
        match engine.run(&transfer, action).await {
            Ok(outcome) => {
                println!("{}", outcome.summary());
                if outcome.state == TransferState::Canceled {
                    bail!("传输已取消");
                }
                for (resource, error) in outcome.failures() {
                    eprintln!("  失败 {}: {}", resource, error);
                }
                let failed: Vec<TransferItem> = outcome
                    .files
                    .iter()
                    .filter(|f| matches!(f.result, FileResult::Failed(_)))
                    .map(|f| TransferItem::new(f.source.clone(), f.target.clone()))
                    .collect();
                if failed.is_empty() {
                    return Ok(());
                }
                if attempt >= config.retries {
                    bail!("{} 个文件传输失败", failed.len());
                }
                // 同步需要重新比较两侧，整体重跑
                if !matches!(kind, TransferKind::Sync(_)) {
                    roots = failed;
                }
            }
            Err(e @ (TransferError::ConnectionCanceled
            | TransferError::LoginCanceled
            | TransferError::LoginFailure { .. }
            | TransferError::Config(_))) => return Err(e.into()),
            Err(e) => {
                if attempt >= config.retries {
                    return Err(e.into());
                }
                warn!("传输失败: {}", e);
            }
        }
        let delay = config.retry_delay(attempt);
        attempt += 1;
        info!("{:?} 后重试 ({}/{})", delay, attempt, config.retries);
        tokio::time::sleep(delay).await;
    }
}

async fn list(session: &Session, path: &str, all: bool, recursive: bool) -> anyhow::Result<()> {
    let directory = Resource::directory(path);
    if recursive {
        for resource in session.list_recursive(&directory).await? {
            println!("{}", resource);
        }
        return Ok(());
    }
    let mut listing = session.list(&directory).await?;
    let filter = if all {
        ListFilter::All
    } else {
        ListFilter::HideDotfiles
    };
    for resource in listing.filter(Comparator::default(), filter) {
        let kind = if resource.is_directory() { "d" } else { "-" };
        let size = resource.attributes.known_size().unwrap_or(0);
        let modified = resource
            .attributes
            .known_modified()
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{} {:>12} {:16} {}", kind, size, modified, resource.name());
    }
    Ok(())
}

async fn run(cli: Cli, engine: Arc<Engine>, hosts: HashMap<String, Host>) -> anyhow::Result<()> {
    match cli.command {
        Command::List {
            host,
            path,
            all,
            recursive,
        } => {
            let session = engine.session(find_host(&hosts, &host)?);
            list(&session, &path, all, recursive).await
        }
        Command::Upload {
            host,
            local,
            remote,
            action,
        } => {
            let source = engine.local("/");
            let target = engine.session(find_host(&hosts, &host)?);
            let root = local_resource(&local)?;
            let remote = Resource::new(&remote, root.kind());
            let roots = vec![TransferItem::new(root, remote)];
            execute(&engine, TransferKind::Upload, source, target, roots, parse_action(action)).await
        }
        Command::Download {
            host,
            remote,
            local,
            action,
        } => {
            let source = engine.session(find_host(&hosts, &host)?);
            let target = engine.local("/");
            let root = remote_resource(&source, &remote).await?;
            let local = local_resource(&local)?;
            let local = Resource::new(local.path(), root.kind());
            let roots = vec![TransferItem::new(root, local)];
            execute(&engine, TransferKind::Download, source, target, roots, parse_action(action)).await
        }
        Command::Copy {
            host,
            from,
            to,
            action,
        } => {
            let session = engine.session(find_host(&hosts, &host)?);
            let root = remote_resource(&session, &from).await?;
            let to = Resource::new(&to, root.kind());
            let roots = vec![TransferItem::new(root, to)];
            execute(
                &engine,
                TransferKind::Copy,
                session.clone(),
                session,
                roots,
                parse_action(action),
            )
            .await
        }
        Command::Sync {
            host,
            local,
            remote,
            direction,
            action,
        } => {
            let source = engine.local("/");
            let target = engine.session(find_host(&hosts, &host)?);
            let local = local_resource(&local)?;
            if !local.is_directory() {
                bail!("同步需要本地目录: {}", local);
            }
            let roots = vec![TransferItem::new(local, Resource::directory(&remote))];
            let kind = TransferKind::Sync(SyncDirection::from(direction.as_str()));
            execute(&engine, kind, source, target, roots, parse_action(action)).await
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let engine = Arc::new(Engine::open(cli.config.clone())?);

    // 日志配置与主机列表都在 config.json 中
    let prefs = JsonPreferences::load(engine.config_dir());
    let _guard = init_logging(&log_dir(engine.config_dir()), &LogConfig::load(&prefs));
    let hosts: HashMap<String, Host> = prefs.section("hosts").unwrap_or_default();
    info!("配置目录: {:?}, {} 个主机", engine.config_dir(), hosts.len());

    {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.cleanup();
            }
        });
    }

    let result = run(cli, engine.clone(), hosts).await;
    engine.cleanup();
    result
}
