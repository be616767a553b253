//! 协议会话
//!
//! `ProtocolSession` 是各后端实现的协议操作集合；`Session` 在其外层维护
//! 连接状态机、单飞调用、目录列表缓存以及错误到缓存失效的映射。

pub mod bridge;
pub mod ftp;
pub mod local;
pub mod remote;
pub mod s3;
#[cfg(unix)]
pub mod sftp;
pub mod swift;
pub mod webdav;

use crate::callback::LoginCallback;
use crate::core::cache::DirectoryCache;
use crate::core::listing::DirectoryListing;
use crate::core::resource::{Attributes, Checksum, HashAlgorithm, Resource};
use crate::core::status::TransferStatus;
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use bridge::{BodySink, RequestBody, StreamingBridge};
pub use local::LocalSession;
pub use remote::{Backend, RemoteSession};

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 读取得到的数据流
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Local,
    Ftp,
    Sftp,
    WebDav,
    S3,
    Swift,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Local => "file",
            Protocol::Ftp => "ftp",
            Protocol::Sftp => "sftp",
            Protocol::WebDav => "https",
            Protocol::S3 => "s3",
            Protocol::Swift => "swift",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Local => 0,
            Protocol::Ftp => 21,
            Protocol::Sftp => 22,
            Protocol::WebDav | Protocol::S3 | Protocol::Swift => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Local => write!(f, "local"),
            Protocol::Ftp => write!(f, "ftp"),
            Protocol::Sftp => write!(f, "sftp"),
            Protocol::WebDav => write!(f, "webdav"),
            Protocol::S3 => write!(f, "s3"),
            Protocol::Swift => write!(f, "swift"),
        }
    }
}

/// 登录凭据。S3 中 username/password 为 access key / secret key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Swift 等使用的令牌
    #[serde(default)]
    pub token: Option<String>,
    /// SFTP 私钥路径
    #[serde(default)]
    pub identity: Option<String>,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..Default::default()
        }
    }
}

/// 主机描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub protocol: Protocol,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: Option<u16>,
    /// 远程根路径（本地协议为根目录）
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// 显式服务地址，S3 兼容存储与 WebDAV 使用
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub credentials: Credentials,
}

impl Host {
    pub fn new(protocol: Protocol, hostname: &str) -> Self {
        Self {
            protocol,
            hostname: hostname.to_string(),
            port: None,
            path: None,
            bucket: None,
            container: None,
            region: None,
            endpoint: None,
            credentials: Credentials::default(),
        }
    }

    pub fn local(root: &str) -> Self {
        let mut host = Self::new(Protocol::Local, "localhost");
        host.path = Some(root.to_string());
        host
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    /// 用于日志和通知的地址
    pub fn url(&self) -> String {
        let path = self
            .path
            .as_deref()
            .unwrap_or("")
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if self.protocol == Protocol::Local {
            return format!("file:///{}", path);
        }
        let user = self
            .credentials
            .username
            .as_deref()
            .filter(|u| !u.is_empty() && !matches!(self.protocol, Protocol::S3 | Protocol::Swift))
            .map(|u| format!("{}@", urlencoding::encode(u)))
            .unwrap_or_default();
        format!(
            "{}://{}{}:{}/{}",
            self.protocol.scheme(),
            user,
            self.hostname,
            self.port(),
            path
        )
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// 后端能力，过滤器据此降级（如不能追加时续传退化为覆盖）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub append: bool,
    pub rename: bool,
    pub copy: bool,
    pub symlink: bool,
    pub timestamp: bool,
    pub permission: bool,
    pub metadata: bool,
}

/// 单个后端连接上的协议操作
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn capabilities(&self) -> Capabilities;

    /// 建立连接并验证登录，凭据被拒绝时返回 `LoginFailure`
    async fn open(&self) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// 应用层健康检查，连接半死时必须失败
    async fn ping(&self) -> Result<()>;

    /// 列出目录的直接子项
    async fn list(&self, directory: &Resource) -> Result<Vec<Resource>>;

    /// 递归列出目录下所有资源（父目录在子项之前）
    async fn list_recursive(&self, directory: &Resource) -> Result<Vec<Resource>> {
        let mut result = Vec::new();
        let mut pending = VecDeque::from([directory.clone()]);
        while let Some(dir) = pending.pop_front() {
            for child in self.list(&dir).await? {
                if child.is_directory() && !child.is_symlink() {
                    pending.push_back(child.clone());
                }
                result.push(child);
            }
        }
        Ok(result)
    }

    /// 读取属性，不存在时返回 `NotFound`
    async fn attributes(&self, resource: &Resource) -> Result<Attributes>;

    /// 从 `offset` 开始读取文件
    async fn read(&self, file: &Resource, offset: u64) -> Result<ByteStream>;

    /// 开始写入文件，`status.resume` 时追加到已有内容之后。
    /// 响应为写入后的属性
    async fn write(&self, file: &Resource, status: &TransferStatus)
        -> Result<StreamingBridge<Attributes>>;

    async fn delete(&self, resource: &Resource) -> Result<()>;

    async fn rename(&self, from: &Resource, to: &Resource) -> Result<()>;

    async fn mkdir(&self, directory: &Resource) -> Result<()>;

    /// 服务端复制
    async fn copy(&self, from: &Resource, _to: &Resource) -> Result<()> {
        Err(TransferError::unsupported("copy", from.path()))
    }

    async fn read_metadata(&self, _resource: &Resource) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }

    async fn write_metadata(
        &self,
        resource: &Resource,
        _metadata: &HashMap<String, String>,
    ) -> Result<()> {
        Err(TransferError::unsupported("write_metadata", resource.path()))
    }

    /// 创建指向 `target`（相对路径）的符号链接
    async fn symlink(&self, link: &Resource, _target: &str) -> Result<()> {
        Err(TransferError::unsupported("symlink", link.path()))
    }

    /// 设置修改时间（毫秒）
    async fn set_timestamp(&self, resource: &Resource, _modified: i64) -> Result<()> {
        Err(TransferError::unsupported("timestamp", resource.path()))
    }

    async fn set_permission(&self, resource: &Resource, _mode: u32) -> Result<()> {
        Err(TransferError::unsupported("permission", resource.path()))
    }

    /// 计算或读取校验和，后端无法提供时返回 None
    async fn checksum(
        &self,
        _file: &Resource,
        _algorithm: HashAlgorithm,
    ) -> Result<Option<Checksum>> {
        Ok(None)
    }

    /// 上传时计算的校验和所用算法，None 表示不校验
    fn checksum_algorithm(&self) -> Option<HashAlgorithm> {
        None
    }
}

/// 后端构造参数
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub chunk_size: u64,
    /// 流式写入桥的缓冲块数
    pub buffer: usize,
    pub timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            buffer: 4,
            timeout: Duration::from_secs(OP_TIMEOUT_SECS),
            io_timeout: Duration::from_secs(IO_TIMEOUT_SECS),
        }
    }
}

/// 每次连接都创建新的后端实例，失败的连接不复用
pub trait BackendFactory: Send + Sync {
    fn create(&self, host: &Host, credentials: &Credentials) -> Result<Box<dyn ProtocolSession>>;
}

pub struct DefaultBackendFactory {
    pub options: BackendOptions,
}

impl DefaultBackendFactory {
    pub fn new(options: BackendOptions) -> Self {
        Self { options }
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create(&self, host: &Host, credentials: &Credentials) -> Result<Box<dyn ProtocolSession>> {
        create_backend(host, credentials, &self.options)
    }
}

/// 根据协议创建后端实例
pub fn create_backend(
    host: &Host,
    credentials: &Credentials,
    options: &BackendOptions,
) -> Result<Box<dyn ProtocolSession>> {
    let session: Box<dyn ProtocolSession> = match host.protocol {
        Protocol::Local => {
            let root = host
                .path
                .as_deref()
                .ok_or_else(|| TransferError::Config("本地会话需要 path".to_string()))?;
            info!("初始化本地会话: {}", root);
            Box::new(LocalSession::new(root, options.clone()))
        }
        Protocol::S3 => Box::new(RemoteSession::<s3::S3Backend>::new(
            host,
            credentials,
            options.clone(),
        )?),
        Protocol::WebDav => Box::new(RemoteSession::<webdav::WebDavBackend>::new(
            host,
            credentials,
            options.clone(),
        )?),
        Protocol::Ftp => Box::new(RemoteSession::<ftp::FtpBackend>::new(
            host,
            credentials,
            options.clone(),
        )?),
        Protocol::Swift => Box::new(RemoteSession::<swift::SwiftBackend>::new(
            host,
            credentials,
            options.clone(),
        )?),
        #[cfg(unix)]
        Protocol::Sftp => Box::new(RemoteSession::<sftp::SftpBackend>::new(
            host,
            credentials,
            options.clone(),
        )?),
        #[cfg(not(unix))]
        Protocol::Sftp => return Err(TransferError::unsupported("sftp", host.url())),
    };
    Ok(session)
}

/// 一个活动连接：状态机 + 单飞调用 + 目录缓存
pub struct Session {
    host: Host,
    credentials: Mutex<Credentials>,
    state: Mutex<ConnectionState>,
    /// 持锁调用协议操作，同一会话不会被并发驱动
    backend: tokio::sync::Mutex<Option<Box<dyn ProtocolSession>>>,
    factory: Arc<dyn BackendFactory>,
    login: Arc<dyn LoginCallback>,
    cache: DirectoryCache,
}

impl Session {
    pub fn new(
        host: Host,
        factory: Arc<dyn BackendFactory>,
        login: Arc<dyn LoginCallback>,
        cache: DirectoryCache,
    ) -> Self {
        let credentials = host.credentials.clone();
        Self {
            host,
            credentials: Mutex::new(credentials),
            state: Mutex::new(ConnectionState::Disconnected),
            backend: tokio::sync::Mutex::new(None),
            factory,
            login,
            cache,
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            debug!("会话状态 {}: {:?} -> {:?}", self.host, *current, state);
            *current = state;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }

    /// 连接。已连接时为空操作
    pub async fn connect(&self) -> Result<()> {
        let mut backend = self.backend.lock().await;
        self.connect_locked(&mut backend).await
    }

    async fn connect_locked(&self, slot: &mut Option<Box<dyn ProtocolSession>>) -> Result<()> {
        if slot.is_some() && self.is_connected() {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);

        if let Err(e) = self.resolve().await {
            self.set_state(ConnectionState::Failed);
            return Err(e);
        }

        loop {
            let credentials = self
                .credentials
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let backend = match self.factory.create(&self.host, &credentials) {
                Ok(backend) => backend,
                Err(e) => {
                    self.set_state(ConnectionState::Failed);
                    return Err(e);
                }
            };
            match backend.open().await {
                Ok(()) => {
                    info!("已连接: {}", self.host);
                    *slot = Some(backend);
                    self.set_state(ConnectionState::Connected);
                    return Ok(());
                }
                Err(TransferError::LoginFailure { message }) => {
                    warn!("登录失败 {}: {}", self.host, message);
                    let title = format!("登录 {}", self.host.hostname);
                    match self
                        .login
                        .prompt(self.host.protocol, &credentials, &title, &message)
                        .await
                    {
                        Some(updated) => {
                            *self.credentials.lock().unwrap_or_else(PoisonError::into_inner) =
                                updated;
                        }
                        None => {
                            self.set_state(ConnectionState::Disconnected);
                            return Err(TransferError::LoginCanceled);
                        }
                    }
                }
                Err(e) => {
                    warn!("连接失败 {}: {}", self.host, e);
                    self.set_state(ConnectionState::Failed);
                    return Err(e);
                }
            }
        }
    }

    /// 先解析主机名，尽早报告 UnknownHost
    async fn resolve(&self) -> Result<()> {
        if self.host.protocol == Protocol::Local || self.host.hostname.is_empty() {
            return Ok(());
        }
        let target = (self.host.hostname.as_str(), self.host.port());
        match tokio::net::lookup_host(target).await.map(|mut addrs| addrs.next()) {
            Ok(Some(_)) => Ok(()),
            _ => Err(TransferError::UnknownHost {
                host: self.host.hostname.clone(),
            }),
        }
    }

    /// 关闭连接并清空缓存
    pub async fn close(&self) -> Result<()> {
        let mut slot = self.backend.lock().await;
        let result = match slot.take() {
            Some(backend) => backend.close().await,
            None => Ok(()),
        };
        self.cache.clear();
        self.set_state(ConnectionState::Disconnected);
        info!("已断开: {}", self.host);
        result
    }

    /// 健康检查，连接失效时透明重连
    pub async fn check(&self) -> Result<()> {
        let mut slot = self.backend.lock().await;
        if let Some(backend) = slot.as_ref() {
            if self.is_connected() {
                match backend.ping().await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        warn!("连接已失效 {}: {}, 重新连接", self.host, e);
                        if let Some(stale) = slot.take() {
                            let _ = stale.close().await;
                        }
                        self.set_state(ConnectionState::Disconnected);
                    }
                }
            }
        }
        self.connect_locked(&mut slot).await
    }


    /// 持有单飞锁并确保已连接。失败后丢弃的后端在这里被重新创建
    async fn active(&self) -> Result<tokio::sync::MutexGuard<'_, Option<Box<dyn ProtocolSession>>>> {
        let mut slot = self.backend.lock().await;
        self.connect_locked(&mut slot).await?;
        Ok(slot)
    }

    fn backend_of(slot: &Option<Box<dyn ProtocolSession>>) -> Result<&dyn ProtocolSession> {
        slot.as_deref().ok_or(TransferError::ConnectionCanceled)
    }

    /// 记录失败并失效相关缓存；致命错误丢弃当前连接
    fn finish<T>(
        &self,
        resource: &Resource,
        result: Result<T>,
        slot: &mut Option<Box<dyn ProtocolSession>>,
    ) -> Result<T> {
        if let Err(e) = &result {
            self.fail(resource, e, slot);
        }
        result
    }

    fn fail(
        &self,
        resource: &Resource,
        error: &TransferError,
        slot: &mut Option<Box<dyn ProtocolSession>>,
    ) {
        warn!("{} 操作失败 {}: {}", self.host.protocol, resource, error);
        self.cache.invalidate_path(resource);
        if error.is_fatal() {
            slot.take();
            self.set_state(ConnectionState::Failed);
        }
    }

    pub async fn capabilities(&self) -> Result<Capabilities> {
        let slot = self.active().await?;
        Ok(Self::backend_of(&slot)?.capabilities())
    }

    pub async fn checksum_algorithm(&self) -> Result<Option<HashAlgorithm>> {
        let slot = self.active().await?;
        Ok(Self::backend_of(&slot)?.checksum_algorithm())
    }

    /// 列出目录，优先使用缓存
    pub async fn list(&self, directory: &Resource) -> Result<DirectoryListing> {
        if let Some(listing) = self.cache.get(directory) {
            return Ok(listing);
        }
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.list(directory).await;
        let children = self.finish(directory, result, &mut slot)?;
        debug!("列出目录 {}: {} 个条目", directory, children.len());
        let listing = DirectoryListing::new(children);
        self.cache.put(directory, listing.clone());
        Ok(listing)
    }

    /// 忽略缓存重新列出
    pub async fn refresh(&self, directory: &Resource) -> Result<DirectoryListing> {
        self.cache.invalidate(directory);
        self.list(directory).await
    }

    pub async fn list_recursive(&self, directory: &Resource) -> Result<Vec<Resource>> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.list_recursive(directory).await;
        self.finish(directory, result, &mut slot)
    }

    /// 通过父目录的缓存列表判断资源是否存在
    pub async fn find(&self, resource: &Resource) -> Result<Option<Resource>> {
        if resource.is_root() {
            return Ok(Some(resource.clone()));
        }
        if let Some(found) = self.cache.lookup(resource) {
            return Ok(found);
        }
        let Some(parent) = resource.parent() else {
            return Ok(None);
        };
        match self.list(&parent).await {
            Ok(listing) => Ok(listing.find(&resource.reference()).cloned()),
            Err(TransferError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn attributes(&self, resource: &Resource) -> Result<Attributes> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.attributes(resource).await;
        self.finish(resource, result, &mut slot)
    }

    pub async fn read(&self, file: &Resource, offset: u64) -> Result<ByteStream> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.read(file, offset).await;
        self.finish(file, result, &mut slot)
    }

    pub async fn write(
        &self,
        file: &Resource,
        status: &TransferStatus,
    ) -> Result<StreamingBridge<Attributes>> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.write(file, status).await;
        self.finish(file, result, &mut slot)
    }

    /// 写入完成后把新属性放回父目录的缓存列表
    pub fn record_write(&self, file: &Resource, attributes: Attributes) {
        if let Some(parent) = file.parent() {
            let written = file.clone().with_attributes(attributes);
            self.cache.update(&parent, |listing| listing.put(written));
        }
    }

    /// 流式读写在会话之外失败时调用：失效缓存，致命错误丢弃当前连接
    pub async fn record_failure(&self, resource: &Resource, error: &TransferError) {
        let mut slot = self.backend.lock().await;
        self.fail(resource, error, &mut slot);
    }

    pub async fn delete(&self, resource: &Resource) -> Result<()> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.delete(resource).await;
        self.finish(resource, result, &mut slot)?;
        info!("已删除: {}", resource);
        if resource.is_directory() {
            self.cache.invalidate_path(resource);
        } else if let Some(parent) = resource.parent() {
            self.cache
                .update(&parent, |listing| drop(listing.remove(&resource.reference())));
        }
        Ok(())
    }

    pub async fn rename(&self, from: &Resource, to: &Resource) -> Result<()> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.rename(from, to).await;
        self.finish(from, result, &mut slot)?;
        info!("已重命名: {} -> {}", from, to);
        if from.is_directory() {
            self.cache.invalidate_path(from);
        } else if let Some(parent) = from.parent() {
            self.cache
                .update(&parent, |listing| drop(listing.remove(&from.reference())));
        }
        if let Some(parent) = to.parent() {
            let renamed = to.clone().with_attributes(from.attributes.clone());
            self.cache.update(&parent, |listing| listing.put(renamed));
        }
        Ok(())
    }

    pub async fn mkdir(&self, directory: &Resource) -> Result<()> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.mkdir(directory).await;
        self.finish(directory, result, &mut slot)?;
        debug!("已创建目录: {}", directory);
        if let Some(parent) = directory.parent() {
            let created = directory.clone();
            self.cache.update(&parent, |listing| listing.put(created));
        }
        Ok(())
    }

    /// 服务端复制
    pub async fn copy(&self, from: &Resource, to: &Resource) -> Result<()> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.copy(from, to).await;
        self.finish(to, result, &mut slot)?;
        self.cache.invalidate_path(to);
        Ok(())
    }

    pub async fn read_metadata(&self, resource: &Resource) -> Result<HashMap<String, String>> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.read_metadata(resource).await;
        self.finish(resource, result, &mut slot)
    }

    pub async fn write_metadata(
        &self,
        resource: &Resource,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?
            .write_metadata(resource, metadata)
            .await;
        self.finish(resource, result, &mut slot)
    }

    pub async fn symlink(&self, link: &Resource, target: &str) -> Result<()> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.symlink(link, target).await;
        self.finish(link, result, &mut slot)?;
        self.cache.invalidate_path(link);
        Ok(())
    }

    pub async fn set_timestamp(&self, resource: &Resource, modified: i64) -> Result<()> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?
            .set_timestamp(resource, modified)
            .await;
        self.finish(resource, result, &mut slot)
    }

    pub async fn set_permission(&self, resource: &Resource, mode: u32) -> Result<()> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?
            .set_permission(resource, mode)
            .await;
        self.finish(resource, result, &mut slot)
    }

    pub async fn checksum(
        &self,
        file: &Resource,
        algorithm: HashAlgorithm,
    ) -> Result<Option<Checksum>> {
        let mut slot = self.active().await?;
        let result = Self::backend_of(&slot)?.checksum(file, algorithm).await;
        self.finish(file, result, &mut slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_url() {
        let mut host = Host::new(Protocol::Sftp, "example.com");
        host.credentials = Credentials::new("ann lee", "secret");
        host.path = Some("/home/ann lee/".to_string());
        assert_eq!(host.url(), "sftp://ann%20lee@example.com:22/home/ann%20lee");

        let s3 = Host::new(Protocol::S3, "s3.amazonaws.com");
        assert_eq!(s3.url(), "s3://s3.amazonaws.com:443/");
        assert_eq!(Host::local("/tmp/x").url(), "file:///tmp/x");
    }

    #[test]
    fn test_host_deserializes_with_defaults() {
        let host: Host =
            serde_json::from_str(r#"{"protocol":"webdav","hostname":"dav.example.com"}"#).unwrap();
        assert_eq!(host.protocol, Protocol::WebDav);
        assert_eq!(host.port(), 443);
        assert_eq!(host.credentials, Credentials::default());
    }
}
