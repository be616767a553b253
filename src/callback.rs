//! 外部协作方接口：凭据输入、冲突询问、进度与生命周期、完成通知
//!
//! 界面层实现这些 trait；核心只依赖接口，默认实现用于命令行和测试。

use crate::core::conflict::TransferAction;
use crate::core::resource::Resource;
use crate::core::status::TransferStatus;
use crate::session::{Credentials, Protocol};
use async_trait::async_trait;
use tracing::{debug, info};

/// 凭据输入。返回 None 表示用户取消
#[async_trait]
pub trait LoginCallback: Send + Sync {
    async fn prompt(
        &self,
        protocol: Protocol,
        credentials: &Credentials,
        title: &str,
        message: &str,
    ) -> Option<Credentials>;
}

/// 不提供交互，始终取消
pub struct DisabledLoginCallback;

#[async_trait]
impl LoginCallback for DisabledLoginCallback {
    async fn prompt(
        &self,
        _protocol: Protocol,
        _credentials: &Credentials,
        title: &str,
        message: &str,
    ) -> Option<Credentials> {
        debug!("无法交互输入凭据: {} - {}", title, message);
        None
    }
}

/// Prompt 策略的询问方，对一次传输只问一次
#[async_trait]
pub trait TransferPrompt: Send + Sync {
    async fn prompt(&self, conflicts: &[Resource]) -> TransferAction;
}

/// 固定返回预设策略
pub struct DefaultPrompt {
    pub action: TransferAction,
}

impl DefaultPrompt {
    pub fn new(action: TransferAction) -> Self {
        Self { action }
    }
}

impl Default for DefaultPrompt {
    fn default() -> Self {
        Self::new(TransferAction::Overwrite)
    }
}

#[async_trait]
impl TransferPrompt for DefaultPrompt {
    async fn prompt(&self, conflicts: &[Resource]) -> TransferAction {
        debug!("{} 个冲突, 使用预设策略 {}", conflicts.len(), self.action);
        self.action
    }
}

/// 进度与生命周期回调，均有空默认实现
pub trait TransferListener: Send + Sync {
    /// 进入等待队列
    fn queued(&self) {}
    /// 获得队列名额
    fn resumed(&self) {}
    fn will_transfer(&self, _resource: &Resource) {}
    fn did_transfer(&self, _resource: &Resource, _status: &TransferStatus) {}
    /// 限速变化，0 表示不限速
    fn bandwidth_changed(&self, _rate: u64) {}
    /// 传输累计字节数
    fn progress(&self, _transferred: u64) {}
}

/// 传输结束后的通知钩子，不影响正确性
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, description: &str);
}

pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify(&self, title: &str, description: &str) {
        info!("{}: {}", title, description);
    }
}
