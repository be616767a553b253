use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod callback;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod session;

pub use crate::core::{
    Resource, Transfer, TransferAction, TransferItem, TransferKind, TransferOutcome, TransferQueue,
    TransferState,
};
pub use callback::{LoginCallback, Notifier, TransferListener, TransferPrompt};
pub use config::{JsonPreferences, MemoryPreferences, Preferences, TransferConfig};
pub use error::{Result, TransferError};
pub use session::{Host, Protocol, Session};

use crate::core::DirectoryCache;
use callback::{DefaultPrompt, DisabledLoginCallback, LoggingNotifier};
use scopeguard::defer;
use session::{BackendFactory, DefaultBackendFactory};

/// 引擎上下文：配置、队列与协作方，替代进程级单例
///
/// 会话与传输都从这里创建，测试可为每个用例构造独立的引擎。
pub struct Engine {
    config_dir: PathBuf,
    preferences: Arc<dyn Preferences>,
    config: RwLock<TransferConfig>,
    queue: Arc<TransferQueue>,
    /// 未设置时按当前配置创建默认后端
    factory: Option<Arc<dyn BackendFactory>>,
    login: Arc<dyn LoginCallback>,
    prompt: Arc<dyn TransferPrompt>,
    notifier: Arc<dyn Notifier>,
    /// 运行中传输的取消令牌
    running: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl Engine {
    pub fn new(config_dir: PathBuf, preferences: Arc<dyn Preferences>) -> Self {
        let config = TransferConfig::load(preferences.as_ref());
        tracing::debug!("引擎配置目录: {:?}, 并发数 {}", config_dir, config.connections);
        Self {
            config_dir,
            queue: Arc::new(TransferQueue::new(config.connections)),
            config: RwLock::new(config),
            preferences,
            factory: None,
            login: Arc::new(DisabledLoginCallback),
            prompt: Arc::new(DefaultPrompt::default()),
            notifier: Arc::new(LoggingNotifier),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// 从配置目录打开，未指定时使用默认目录
    pub fn open(config_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = resolve_config_dir(config_dir.unwrap_or_else(config::default_config_dir))?;
        let preferences = Arc::new(JsonPreferences::load(&config_dir));
        Ok(Self::new(config_dir, preferences))
    }

    pub fn with_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_login(mut self, login: Arc<dyn LoginCallback>) -> Self {
        self.login = login;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn TransferPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn preferences(&self) -> &dyn Preferences {
        self.preferences.as_ref()
    }

    pub fn config(&self) -> TransferConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn queue(&self) -> Arc<TransferQueue> {
        self.queue.clone()
    }

    /// 为主机创建会话，尚未连接
    pub fn session(&self, host: Host) -> Arc<Session> {
        let config = self.config();
        let factory = self.factory.clone().unwrap_or_else(|| {
            Arc::new(DefaultBackendFactory::new(config.backend_options())) as Arc<dyn BackendFactory>
        });
        Arc::new(Session::new(
            host,
            factory,
            self.login.clone(),
            DirectoryCache::new().with_ttl(config.cache_ttl),
        ))
    }

    /// 本地文件系统会话
    pub fn local(&self, root: &str) -> Arc<Session> {
        self.session(Host::local(root))
    }

    /// 按当前配置创建传输
    pub fn transfer(
        &self,
        kind: TransferKind,
        source: Arc<Session>,
        target: Arc<Session>,
        roots: Vec<TransferItem>,
    ) -> Transfer {
        Transfer::new(kind, source, target, roots)
            .with_options(self.config().transfer_options())
            .with_queue(self.queue.clone())
            .with_prompt(self.prompt.clone())
            .with_notifier(self.notifier.clone())
    }

    /// 执行传输，未指定策略时使用该传输类型的默认策略
    pub async fn run(
        &self,
        transfer: &Transfer,
        action: Option<TransferAction>,
    ) -> Result<TransferOutcome> {
        let id = transfer.id();
        self.lock_running().insert(id, transfer.token());
        defer! {
            self.lock_running().remove(&id);
        }
        let action = action.unwrap_or_else(|| self.config().action_for(transfer.kind()));
        transfer.start(action).await
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 重新读取配置并调整队列并发数
    pub fn reload(&self) -> Result<()> {
        self.preferences.reload()?;
        let config = TransferConfig::load(self.preferences.as_ref());
        self.queue.resize(config.connections);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        tracing::info!("配置已重新加载");
        Ok(())
    }

    /// 取消运行或排队中的传输
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.lock_running().get(&id) {
            Some(token) => {
                tracing::info!("取消传输: {}", id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn running_count(&self) -> usize {
        self.lock_running().len()
    }

    /// 清理资源（程序退出时调用）
    pub fn cleanup(&self) {
        tracing::info!("正在清理引擎资源...");
        for (id, token) in self.lock_running().drain() {
            tracing::debug!("取消传输: {}", id);
            token.cancel();
        }
        tracing::info!("资源清理完成");
    }
}

/// 配置目录：config.json 中的 `data_path` 指向已存在目录时改用该目录
pub fn resolve_config_dir(default_dir: PathBuf) -> Result<PathBuf> {
    config::ensure_config_dir(&default_dir)?;
    let data_path = JsonPreferences::load(&default_dir)
        .property("data_path")
        .map(PathBuf::from)
        .filter(|p| p.is_dir());
    match data_path {
        Some(dir) => {
            tracing::debug!("使用自定义数据路径: {:?}", dir);
            Ok(dir)
        }
        None => Ok(default_dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_resizes_queue() {
        let prefs = Arc::new(MemoryPreferences::new().with("queue.connections", 1));
        let engine = Engine::new(PathBuf::from("."), prefs.clone());
        assert_eq!(engine.queue().limit(), 1);

        prefs.set("queue.connections", 3);
        engine.reload().unwrap();
        assert_eq!(engine.queue().limit(), 3);
        assert_eq!(engine.config().connections, 3);
    }

    #[test]
    fn test_cancel_unknown_transfer() {
        let engine = Engine::new(PathBuf::from("."), Arc::new(MemoryPreferences::new()));
        assert!(!engine.cancel(Uuid::new_v4()));
        assert_eq!(engine.running_count(), 0);
    }

    #[test]
    fn test_data_path_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(config::CONFIG_FILE),
            serde_json::json!({ "data_path": data.path() }).to_string(),
        )
        .unwrap();
        let resolved = resolve_config_dir(dir.path().to_path_buf()).unwrap();
        assert_eq!(resolved, data.path());
    }
}
