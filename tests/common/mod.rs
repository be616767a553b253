//! 集成测试共用的内存后端
//!
//! `MockFs` 是可在多个会话间共享的内存文件树，`MockSession` 在其上实现协议操作，
//! 并支持按路径注入读、写、列表失败以及错误的校验和。
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use remote_transfer::callback::{DisabledLoginCallback, LoginCallback, TransferListener};
use remote_transfer::core::checksum::calculate;
use remote_transfer::core::{
    Attributes, Checksum, DirectoryCache, HashAlgorithm, Resource, ResourceType, TransferStatus,
};
use remote_transfer::session::{
    BackendFactory, ByteStream, Capabilities, Credentials, Host, Protocol, ProtocolSession,
    Session, StreamingBridge,
};
use remote_transfer::{Result, TransferError};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Entry {
    directory: bool,
    data: Vec<u8>,
    modified: i64,
    /// 符号链接目标
    link: Option<String>,
}

impl Entry {
    fn directory() -> Self {
        Self {
            directory: true,
            data: Vec::new(),
            modified: 0,
            link: None,
        }
    }

    fn file(data: &[u8], modified: i64) -> Self {
        Self {
            directory: false,
            data: data.to_vec(),
            modified,
            link: None,
        }
    }
}

#[derive(Default)]
struct Faults {
    read: HashSet<String>,
    write: HashSet<String>,
    /// 下一次列表失败的次数
    list: usize,
    /// 下一次健康检查失败的次数
    ping: usize,
    bad_checksum: bool,
}

/// 共享的内存文件树
pub struct MockFs {
    entries: Mutex<BTreeMap<String, Entry>>,
    faults: Mutex<Faults>,
    capabilities: Mutex<Capabilities>,
    algorithm: Mutex<Option<HashAlgorithm>>,
    /// 需要的密码，None 表示不验证
    password: Mutex<Option<String>>,
    pub writes: AtomicUsize,
    pub copies: AtomicUsize,
    pub lists: AtomicUsize,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockFs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(Faults::default()),
            capabilities: Mutex::new(Capabilities {
                append: true,
                rename: true,
                copy: true,
                symlink: false,
                timestamp: true,
                permission: false,
                metadata: false,
            }),
            algorithm: Mutex::new(Some(HashAlgorithm::Sha256)),
            password: Mutex::new(None),
            writes: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn add_file(&self, path: &str, data: &[u8], modified: i64) {
        self.ensure_parents(path);
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_string(), Entry::file(data, modified));
    }

    pub fn add_dir(&self, path: &str) {
        self.ensure_parents(path);
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_string(), Entry::directory());
    }

    /// `target` 为链接指向的路径，原样保存
    pub fn add_link(&self, path: &str, target: &str) {
        self.ensure_parents(path);
        let mut entry = Entry::file(&[], 0);
        entry.link = Some(target.to_string());
        self.entries.lock().unwrap().insert(path.to_string(), entry);
    }

    pub fn link_target(&self, path: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .and_then(|e| e.link.clone())
    }

    fn ensure_parents(&self, path: &str) {
        let mut entries = self.entries.lock().unwrap();
        let mut current = String::new();
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for part in parts.iter().take(parts.len().saturating_sub(1)) {
            current.push('/');
            current.push_str(part);
            entries.entry(current.clone()).or_insert_with(Entry::directory);
        }
    }

    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .filter(|e| !e.directory && e.link.is_none())
            .map(|e| e.data.clone())
    }

    /// 读取内容，链接按绝对目标跟随
    fn content(&self, path: &str) -> Option<Vec<u8>> {
        match self.link_target(path) {
            Some(target) => self.data(&target),
            None => self.data(path),
        }
    }

    pub fn modified(&self, path: &str) -> Option<i64> {
        self.entries.lock().unwrap().get(path).map(|e| e.modified)
    }

    pub fn exists(&self, path: &str) -> bool {
        path == "/" || self.entries.lock().unwrap().contains_key(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .map(|e| e.directory)
            .unwrap_or(false)
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    pub fn fail_read(&self, path: &str) {
        self.faults.lock().unwrap().read.insert(path.to_string());
    }

    pub fn fail_write(&self, path: &str) {
        self.faults.lock().unwrap().write.insert(path.to_string());
    }

    pub fn fail_next_lists(&self, count: usize) {
        self.faults.lock().unwrap().list = count;
    }

    /// 模拟传输层仍在、应用层已失效的连接
    pub fn fail_next_pings(&self, count: usize) {
        self.faults.lock().unwrap().ping = count;
    }

    pub fn corrupt_checksums(&self) {
        self.faults.lock().unwrap().bad_checksum = true;
    }

    pub fn set_capabilities(&self, f: impl FnOnce(&mut Capabilities)) {
        f(&mut self.capabilities.lock().unwrap());
    }

    pub fn set_algorithm(&self, algorithm: Option<HashAlgorithm>) {
        *self.algorithm.lock().unwrap() = algorithm;
    }

    pub fn require_password(&self, password: &str) {
        *self.password.lock().unwrap() = Some(password.to_string());
    }

    fn resource(path: &str, entry: &Entry) -> Resource {
        let mut kind = if entry.directory {
            ResourceType::DIRECTORY
        } else {
            ResourceType::FILE
        };
        if entry.link.is_some() {
            kind |= ResourceType::SYMBOLIC_LINK;
        }
        let mut attributes = Attributes::default().with_modified(entry.modified);
        if !entry.directory {
            attributes.size = entry.data.len() as i64;
        }
        let mut resource = Resource::new(path, kind).with_attributes(attributes);
        resource.symlink_target = entry.link.clone();
        resource
    }

    fn parent_of(path: &str) -> &str {
        match path.rfind('/') {
            Some(0) | None => "/",
            Some(i) => &path[..i],
        }
    }
}

pub struct MockSession {
    fs: Arc<MockFs>,
    credentials: Credentials,
}

fn not_found(path: &str) -> TransferError {
    TransferError::NotFound {
        path: path.to_string(),
    }
}

#[async_trait]
impl ProtocolSession for MockSession {
    fn protocol(&self) -> Protocol {
        Protocol::WebDav
    }

    fn capabilities(&self) -> Capabilities {
        *self.fs.capabilities.lock().unwrap()
    }

    async fn open(&self) -> Result<()> {
        self.fs.opens.fetch_add(1, Ordering::SeqCst);
        let required = self.fs.password.lock().unwrap().clone();
        match required {
            Some(password) if self.credentials.password.as_deref() != Some(password.as_str()) => {
                Err(TransferError::LoginFailure {
                    message: "bad password".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.fs.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut faults = self.fs.faults.lock().unwrap();
        if faults.ping > 0 {
            faults.ping -= 1;
            return Err(TransferError::transport("/", "control channel closed"));
        }
        Ok(())
    }

    async fn list(&self, directory: &Resource) -> Result<Vec<Resource>> {
        self.fs.lists.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = self.fs.faults.lock().unwrap();
            if faults.list > 0 {
                faults.list -= 1;
                return Err(TransferError::transport(directory.path(), "connection reset"));
            }
        }
        if !self.fs.exists(directory.path()) {
            return Err(not_found(directory.path()));
        }
        let entries = self.fs.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(path, _)| MockFs::parent_of(path) == directory.path())
            .map(|(path, entry)| MockFs::resource(path, entry))
            .collect())
    }

    async fn attributes(&self, resource: &Resource) -> Result<Attributes> {
        let entries = self.fs.entries.lock().unwrap();
        let entry = entries
            .get(resource.path())
            .ok_or_else(|| not_found(resource.path()))?;
        Ok(MockFs::resource(resource.path(), entry).attributes)
    }

    async fn read(&self, file: &Resource, offset: u64) -> Result<ByteStream> {
        let data = self
            .fs
            .content(file.path())
            .ok_or_else(|| not_found(file.path()))?;
        let failing = self.fs.faults.lock().unwrap().read.contains(file.path());
        let start = (offset as usize).min(data.len());
        let chunks: Vec<Result<Bytes>> = data[start..]
            .chunks(16)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let mut chunks = chunks;
        if failing {
            chunks.truncate(1);
            chunks.push(Err(TransferError::transport(file.path(), "read interrupted")));
        }
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn write(
        &self,
        file: &Resource,
        status: &TransferStatus,
    ) -> Result<StreamingBridge<Attributes>> {
        let fs = self.fs.clone();
        let path = file.path().to_string();
        let append = status.resume;
        let failing = fs.faults.lock().unwrap().write.contains(&path);
        Ok(StreamingBridge::spawn(file.path(), 1, move |mut body| async move {
            if failing {
                return Err(TransferError::transport(&path, "write refused"));
            }
            let mut received = Vec::new();
            while let Some(chunk) = body.next().await {
                received.extend_from_slice(&chunk?);
            }
            fs.writes.fetch_add(1, Ordering::SeqCst);
            let mut data = if append {
                fs.data(&path).unwrap_or_default()
            } else {
                Vec::new()
            };
            data.extend_from_slice(&received);
            fs.add_file(&path, &data, chrono::Utc::now().timestamp_millis());
            let entries = fs.entries.lock().unwrap();
            let entry = entries.get(&path).ok_or_else(|| not_found(&path))?;
            Ok(MockFs::resource(&path, entry).attributes)
        }))
    }

    async fn delete(&self, resource: &Resource) -> Result<()> {
        let mut entries = self.fs.entries.lock().unwrap();
        let prefix = format!("{}/", resource.path());
        entries.retain(|path, _| path != resource.path() && !path.starts_with(&prefix));
        Ok(())
    }

    async fn rename(&self, from: &Resource, to: &Resource) -> Result<()> {
        let entry = self
            .fs
            .entries
            .lock()
            .unwrap()
            .remove(from.path())
            .ok_or_else(|| not_found(from.path()))?;
        self.fs.entries.lock().unwrap().insert(to.path().to_string(), entry);
        Ok(())
    }

    async fn mkdir(&self, directory: &Resource) -> Result<()> {
        self.fs.add_dir(directory.path());
        Ok(())
    }

    async fn copy(&self, from: &Resource, to: &Resource) -> Result<()> {
        let data = self.fs.data(from.path()).ok_or_else(|| not_found(from.path()))?;
        self.fs.copies.fetch_add(1, Ordering::SeqCst);
        self.fs.add_file(to.path(), &data, chrono::Utc::now().timestamp_millis());
        Ok(())
    }

    async fn symlink(&self, link: &Resource, target: &str) -> Result<()> {
        self.fs.add_link(link.path(), target);
        Ok(())
    }

    async fn set_timestamp(&self, resource: &Resource, modified: i64) -> Result<()> {
        let mut entries = self.fs.entries.lock().unwrap();
        let entry = entries
            .get_mut(resource.path())
            .ok_or_else(|| not_found(resource.path()))?;
        entry.modified = modified;
        Ok(())
    }

    async fn checksum(&self, file: &Resource, algorithm: HashAlgorithm) -> Result<Option<Checksum>> {
        let data = self.fs.data(file.path()).ok_or_else(|| not_found(file.path()))?;
        if self.fs.faults.lock().unwrap().bad_checksum {
            return Ok(Some(Checksum::new(algorithm, "0".repeat(64))));
        }
        Ok(Some(calculate(algorithm, &data)))
    }

    fn checksum_algorithm(&self) -> Option<HashAlgorithm> {
        *self.fs.algorithm.lock().unwrap()
    }
}

/// 每次连接都在同一棵文件树上创建新的会话
pub struct MockFactory {
    pub fs: Arc<MockFs>,
    pub created: AtomicUsize,
}

impl MockFactory {
    pub fn new(fs: Arc<MockFs>) -> Arc<Self> {
        Arc::new(Self {
            fs,
            created: AtomicUsize::new(0),
        })
    }
}

impl BackendFactory for MockFactory {
    fn create(&self, _host: &Host, credentials: &Credentials) -> Result<Box<dyn ProtocolSession>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            fs: self.fs.clone(),
            credentials: credentials.clone(),
        }))
    }
}

/// 主机名为空时不做 DNS 解析
pub fn mock_host() -> Host {
    Host::new(Protocol::WebDav, "")
}

pub fn session(fs: &Arc<MockFs>) -> Arc<Session> {
    session_with(MockFactory::new(fs.clone()), Arc::new(DisabledLoginCallback))
}

pub fn session_with(factory: Arc<MockFactory>, login: Arc<dyn LoginCallback>) -> Arc<Session> {
    Arc::new(Session::new(mock_host(), factory, login, DirectoryCache::new()))
}

pub fn file(path: &str, size: u64) -> Resource {
    Resource::file(path).with_attributes(Attributes::default().with_size(size))
}

/// 记录监听回调
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<String>>,
    pub statuses: Mutex<Vec<TransferStatus>>,
    pub progress: AtomicUsize,
}

impl TransferListener for RecordingListener {
    fn queued(&self) {
        self.events.lock().unwrap().push("queued".to_string());
    }

    fn resumed(&self) {
        self.events.lock().unwrap().push("resumed".to_string());
    }

    fn will_transfer(&self, resource: &Resource) {
        self.events
            .lock()
            .unwrap()
            .push(format!("will:{}", resource.path()));
    }

    fn did_transfer(&self, resource: &Resource, status: &TransferStatus) {
        self.events
            .lock()
            .unwrap()
            .push(format!("did:{}", resource.path()));
        self.statuses.lock().unwrap().push(status.clone());
    }

    fn bandwidth_changed(&self, rate: u64) {
        self.events.lock().unwrap().push(format!("bandwidth:{}", rate));
    }

    fn progress(&self, transferred: u64) {
        self.progress.store(transferred as usize, Ordering::SeqCst);
    }
}
