//! 传输：一组根资源上的一次上传、下载、复制或同步
//!
//! 流程：排队获取名额 → 检查连接 → 枚举根资源 → 逐个文件经过冲突过滤器
//! → 流式写入或服务端复制 → 校验、完成处理、通知监听者 → 释放名额。
//! 单个文件的失败只记录在结果中，不会中断其余文件。取消在文件之间检查。

use super::checksum::ChecksumHasher;
use super::comparator::{CompareStrategy, FileComparator, SyncAction, SyncDirection};
use super::conflict::TransferAction;
use super::filter::{filter_for, FilterContext, FilterOptions, TransferFilter};
use super::listing::ExcludePatterns;
use super::queue::{QueueEntry, TransferQueue};
use super::resource::{Attributes, Resource, ResourceType};
use super::status::TransferStatus;
use super::symlink::{SymlinkPolicy, SymlinkResolver};
use super::throttle::BandwidthThrottle;
use crate::callback::{DefaultPrompt, LoggingNotifier, Notifier, TransferListener, TransferPrompt};
use crate::error::{Result, TransferError};
use crate::session::{ByteStream, Session, StreamingBridge};
use futures::StreamExt;
use scopeguard::defer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Upload,
    Download,
    Copy,
    Sync(SyncDirection),
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Upload => write!(f, "upload"),
            TransferKind::Download => write!(f, "download"),
            TransferKind::Copy => write!(f, "copy"),
            TransferKind::Sync(direction) => write!(f, "sync({:?})", direction),
        }
    }
}

/// 传输状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Queued,
    Running,
    Complete,
    Canceled,
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Queued => write!(f, "queued"),
            TransferState::Running => write!(f, "running"),
            TransferState::Complete => write!(f, "complete"),
            TransferState::Canceled => write!(f, "canceled"),
            TransferState::Failed => write!(f, "failed"),
        }
    }
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Complete | TransferState::Canceled | TransferState::Failed
        )
    }
}

/// 根资源及其目标
///
/// 上传与下载的目标位于另一个会话；复制与同步时由调用方给出映射。
#[derive(Debug, Clone)]
pub struct TransferItem {
    pub source: Resource,
    pub target: Resource,
}

impl TransferItem {
    pub fn new(source: Resource, target: Resource) -> Self {
        Self { source, target }
    }
}

/// 单个文件的结果
#[derive(Debug)]
pub enum FileResult {
    Transferred { bytes: u64 },
    Skipped,
    /// 同步时两侧都有修改，未处理
    Conflict,
    Failed(TransferError),
    Canceled,
}

impl FileResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, FileResult::Failed(_))
    }
}

#[derive(Debug)]
pub struct FileOutcome {
    pub source: Resource,
    pub target: Resource,
    pub result: FileResult,
}

impl FileOutcome {
    fn new(item: &TransferItem, result: FileResult) -> Self {
        Self {
            source: item.source.clone(),
            target: item.target.clone(),
            result,
        }
    }
}

#[derive(Debug)]
pub struct TransferOutcome {
    pub id: Uuid,
    pub state: TransferState,
    /// 累计传输字节数
    pub transferred: u64,
    pub files: Vec<FileOutcome>,
}

impl TransferOutcome {
    fn count(&self, predicate: impl Fn(&FileResult) -> bool) -> usize {
        self.files.iter().filter(|f| predicate(&f.result)).count()
    }

    pub fn transferred_count(&self) -> usize {
        self.count(|r| matches!(r, FileResult::Transferred { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|r| matches!(r, FileResult::Skipped))
    }

    pub fn conflict_count(&self) -> usize {
        self.count(|r| matches!(r, FileResult::Conflict))
    }

    pub fn failed_count(&self) -> usize {
        self.count(FileResult::is_failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Resource, &TransferError)> {
        self.files.iter().filter_map(|f| match &f.result {
            FileResult::Failed(e) => Some((&f.source, e)),
            _ => None,
        })
    }

    /// 按目标路径查找
    pub fn file(&self, target: &str) -> Option<&FileOutcome> {
        self.files.iter().find(|f| f.target.path() == target)
    }

    pub fn summary(&self) -> String {
        format!(
            "传输 {} 个, 跳过 {} 个, 冲突 {} 个, 失败 {} 个, 共 {} 字节",
            self.transferred_count(),
            self.skipped_count(),
            self.conflict_count(),
            self.failed_count(),
            self.transferred
        )
    }
}

#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub filter: FilterOptions,
    /// 上传后比对校验和
    pub verify_checksum: bool,
    /// 源在本地一侧时的链接策略
    pub symlink_upload: SymlinkPolicy,
    pub symlink_download: SymlinkPolicy,
    pub exclude: ExcludePatterns,
    pub compare: CompareStrategy,
    /// 时间戳比较容差（秒）
    pub tolerance: i64,
    /// 字节/秒，0 表示不限速
    pub bandwidth: u64,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            filter: FilterOptions::default(),
            verify_checksum: true,
            symlink_upload: SymlinkPolicy::Recreate,
            symlink_download: SymlinkPolicy::Recreate,
            exclude: ExcludePatterns::default(),
            compare: CompareStrategy::Combined,
            tolerance: 0,
            bandwidth: 0,
        }
    }
}

/// 写入侧的失败来源
enum PumpError {
    /// 读取源失败
    Read(TransferError),
    /// 写请求未能开始
    Write(TransferError),
    /// 写请求已提前结束，真实原因在响应里
    Sink,
}

pub struct Transfer {
    id: Uuid,
    kind: TransferKind,
    roots: Vec<TransferItem>,
    source: Arc<Session>,
    target: Arc<Session>,
    options: TransferOptions,
    comparator: Arc<FileComparator>,
    queue: Arc<TransferQueue>,
    prompt: Arc<dyn TransferPrompt>,
    notifier: Arc<dyn Notifier>,
    throttle: BandwidthThrottle,
    listeners: Mutex<Vec<Arc<dyn TransferListener>>>,
    transferred: AtomicU64,
    state: Mutex<TransferState>,
    cancel: CancellationToken,
}

impl Transfer {
    /// `source` 是根资源所在的会话。同步时 `source` 为本地一侧
    pub fn new(
        kind: TransferKind,
        source: Arc<Session>,
        target: Arc<Session>,
        roots: Vec<TransferItem>,
    ) -> Self {
        let options = TransferOptions::default();
        Self {
            id: Uuid::new_v4(),
            kind,
            roots,
            source,
            target,
            comparator: Arc::new(FileComparator::new(options.compare, options.tolerance)),
            throttle: BandwidthThrottle::new(options.bandwidth),
            options,
            queue: Arc::new(TransferQueue::default()),
            prompt: Arc::new(DefaultPrompt::default()),
            notifier: Arc::new(LoggingNotifier),
            listeners: Mutex::new(Vec::new()),
            transferred: AtomicU64::new(0),
            state: Mutex::new(TransferState::Queued),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.comparator = Arc::new(FileComparator::new(options.compare, options.tolerance));
        self.throttle = BandwidthThrottle::new(options.bandwidth);
        self.options = options;
        self
    }

    pub fn with_queue(mut self, queue: Arc<TransferQueue>) -> Self {
        self.queue = queue;
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

    pub fn with_listener(self, listener: Arc<dyn TransferListener>) -> Self {
        self.add_listener(listener);
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn TransferListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn roots(&self) -> &[TransferItem] {
        &self.roots
    }

    pub fn state(&self) -> TransferState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: TransferState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            debug!("传输 {} 状态: {} -> {}", self.id, *current, state);
            *current = state;
        }
    }

    /// 累计传输字节数
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn bandwidth(&self) -> u64 {
        self.throttle.rate()
    }

    /// 调整限速，0 表示不限速
    pub fn set_bandwidth(&self, rate: u64) {
        self.throttle.set_rate(rate);
        info!("传输 {} 限速: {} B/s", self.id, rate);
        self.each_listener(|l| l.bandwidth_changed(rate));
    }

    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("取消传输: {}", self.id);
            self.cancel.cancel();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn each_listener(&self, f: impl Fn(&dyn TransferListener)) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }

    fn add_bytes(&self, bytes: u64) {
        let total = self.transferred.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.each_listener(|l| l.progress(total));
    }

    fn outcome(&self, state: TransferState, files: Vec<FileOutcome>) -> TransferOutcome {
        TransferOutcome {
            id: self.id,
            state,
            transferred: self.transferred(),
            files,
        }
    }

    /// 执行传输。`action` 为已存在目标的处理策略
    ///
    /// 连接或枚举失败返回错误；单个文件的失败记录在结果中。
    pub async fn start(&self, action: TransferAction) -> Result<TransferOutcome> {
        if !self.queue.add(self).await {
            self.set_state(TransferState::Canceled);
            info!("传输 {} 在排队时被取消", self.id);
            return Ok(self.outcome(TransferState::Canceled, Vec::new()));
        }
        let queue = self.queue.clone();
        let id = self.id;
        defer! {
            queue.remove(id);
        }

        self.set_state(TransferState::Running);
        info!(
            "开始传输 {} ({}, {} 个根资源, 策略 {})",
            self.id,
            self.kind,
            self.roots.len(),
            action
        );

        let result = self.run(action).await;
        let state = match &result {
            Ok(_) if self.is_canceled() => TransferState::Canceled,
            Ok(files) if files.iter().any(|f| f.result.is_failed()) => TransferState::Failed,
            Ok(_) => TransferState::Complete,
            Err(e) if e.is_canceled() => TransferState::Canceled,
            Err(_) => TransferState::Failed,
        };
        self.set_state(state);

        match result {
            Ok(files) => {
                let outcome = self.outcome(state, files);
                info!("传输 {} 结束 ({}): {}", self.id, state, outcome.summary());
                self.notifier
                    .notify(&format!("传输{}", state_title(state)), &outcome.summary());
                Ok(outcome)
            }
            Err(e) => {
                error!("传输 {} 失败: {}", self.id, e);
                self.notifier
                    .notify(&format!("传输{}", state_title(state)), &e.to_string());
                Err(e)
            }
        }
    }

    async fn run(&self, action: TransferAction) -> Result<Vec<FileOutcome>> {
        self.source.check().await?;
        if !Arc::ptr_eq(&self.source, &self.target) {
            self.target.check().await?;
        }

        if let TransferKind::Sync(direction) = self.kind {
            return self.synchronize(direction, action).await;
        }

        let items = self.enumerate().await?;
        debug!("传输 {} 枚举到 {} 项", self.id, items.len());
        let upload_side = self.kind == TransferKind::Upload;
        let ctx = self
            .context(self.source.clone(), self.target.clone(), upload_side)
            .await?;
        let action = self.resolve(action, &[(&ctx, &items)]).await?;
        let filter = self.filter(action)?;
        let mut files = Vec::with_capacity(items.len());
        self.process(&ctx, filter.as_ref(), &items, &mut files).await;
        Ok(files)
    }

    /// 一个方向的过滤器上下文
    async fn context(
        &self,
        source: Arc<Session>,
        target: Arc<Session>,
        upload_side: bool,
    ) -> Result<FilterContext> {
        let capabilities = target.capabilities().await?;
        let policy = if upload_side {
            self.options.symlink_upload
        } else {
            self.options.symlink_download
        };
        let roots = if Arc::ptr_eq(&source, &self.source) {
            self.roots.iter().map(|r| r.source.clone()).collect()
        } else {
            self.roots.iter().map(|r| r.target.clone()).collect()
        };
        Ok(FilterContext {
            symlinks: SymlinkResolver::new(policy, roots, capabilities.symlink),
            source,
            target,
            capabilities,
            comparator: self.comparator.clone(),
            options: self.options.filter.clone(),
        })
    }

    /// 处理 Prompt 与 Cancel，返回实际使用的过滤器
    /// 决定整个传输使用的策略。Prompt 只询问一次，冲突来自所有方向
    async fn resolve(
        &self,
        action: TransferAction,
        batches: &[(&FilterContext, &[TransferItem])],
    ) -> Result<TransferAction> {
        if action != TransferAction::Prompt {
            return Ok(action);
        }
        let mut conflicts = Vec::new();
        for (ctx, items) in batches {
            for item in items.iter().filter(|i| !i.source.is_directory()) {
                if let Some(existing) = ctx.target.find(&item.target).await? {
                    conflicts.push(existing);
                }
            }
        }
        if conflicts.is_empty() {
            return Ok(TransferAction::Overwrite);
        }
        let answer = self.prompt.prompt(&conflicts).await;
        info!("{} 个冲突, 选择策略 {}", conflicts.len(), answer);
        Ok(match answer {
            TransferAction::Prompt => TransferAction::Overwrite,
            other => other,
        })
    }

    fn filter(&self, action: TransferAction) -> Result<Box<dyn TransferFilter>> {
        match filter_for(action) {
            Some(filter) => Ok(filter),
            None => {
                self.cancel();
                Err(TransferError::ConnectionCanceled)
            }
        }
    }

    /// 展开根资源：目录在前，子项按父目录在前的顺序排列，排除规则在此生效
    async fn enumerate(&self) -> Result<Vec<TransferItem>> {
        let mut items = Vec::new();
        for root in &self.roots {
            let source = if root.source.is_file() && root.source.attributes.known_size().is_none() {
                match self.source.find(&root.source).await? {
                    Some(found) => found,
                    None => {
                        let attributes = self.source.attributes(&root.source).await?;
                        root.source.clone().with_attributes(attributes)
                    }
                }
            } else {
                root.source.clone()
            };

            if !source.is_directory() {
                if !self.options.exclude.matches(source.name()) {
                    items.push(TransferItem::new(source, root.target.clone()));
                }
                continue;
            }

            items.push(TransferItem::new(source.clone(), root.target.clone()));
            for child in self.source.list_recursive(&source).await? {
                let Some(relative) = child.relative_to(&source) else {
                    continue;
                };
                if relative.is_empty() {
                    continue;
                }
                if self.options.exclude.matches(&relative) {
                    debug!("排除: {}", child);
                    continue;
                }
                let target = root.target.child(&relative, target_kind(&child));
                items.push(TransferItem::new(child, target));
            }
        }
        Ok(items)
    }

    /// 相对路径到资源的映射，目录不存在时为空
    async fn tree(&self, session: &Session, root: &Resource) -> Result<HashMap<String, Resource>> {
        let children = match session.list_recursive(root).await {
            Ok(children) => children,
            Err(TransferError::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(children
            .into_iter()
            .filter_map(|child| {
                let relative = child.relative_to(root)?;
                if relative.is_empty() || self.options.exclude.matches(&relative) {
                    return None;
                }
                Some((relative, child))
            })
            .collect())
    }

    /// 比较两棵树并按各自方向传输。冲突只报告不处理
    async fn synchronize(
        &self,
        direction: SyncDirection,
        action: TransferAction,
    ) -> Result<Vec<FileOutcome>> {
        let mut files = Vec::new();
        let mut uploads = Vec::new();
        let mut downloads = Vec::new();

        for root in &self.roots {
            let local = self.tree(&self.source, &root.source).await?;
            let remote = self.tree(&self.target, &root.target).await?;
            let actions = self.comparator.compare_trees(&local, &remote, direction);
            let summary = FileComparator::summarize_actions(&actions);
            info!(
                "同步 {} <-> {}: 上传 {} 个, 下载 {} 个, 跳过 {} 个, 冲突 {} 个",
                root.source,
                root.target,
                summary.upload_count,
                summary.download_count,
                summary.skip_count,
                summary.conflict_count
            );

            for action in actions {
                let path = action.path().to_string();
                let local_item = |source: &Resource| {
                    TransferItem::new(source.clone(), root.target.child(&path, target_kind(source)))
                };
                let remote_item = |source: &Resource| {
                    TransferItem::new(source.clone(), root.source.child(&path, target_kind(source)))
                };
                match (&action, local.get(&path), remote.get(&path)) {
                    (SyncAction::Upload { .. }, Some(source), _) => uploads.push(local_item(source)),
                    (SyncAction::Download { .. }, _, Some(source)) => {
                        downloads.push(remote_item(source))
                    }
                    (SyncAction::Skip { .. }, Some(source), _) => {
                        files.push(FileOutcome::new(&local_item(source), FileResult::Skipped))
                    }
                    (SyncAction::Conflict { .. }, Some(source), _) => {
                        warn!("同步冲突，两侧均已修改: {}", path);
                        files.push(FileOutcome::new(&local_item(source), FileResult::Conflict))
                    }
                    (_, _, Some(source)) => {
                        files.push(FileOutcome::new(&remote_item(source), FileResult::Skipped))
                    }
                    _ => {}
                }
            }
        }

        if uploads.is_empty() && downloads.is_empty() {
            return Ok(files);
        }
        let up = self
            .context(self.source.clone(), self.target.clone(), true)
            .await?;
        let down = self
            .context(self.target.clone(), self.source.clone(), false)
            .await?;
        let action = self
            .resolve(action, &[(&up, &uploads), (&down, &downloads)])
            .await?;
        let filter = self.filter(action)?;
        self.process(&up, filter.as_ref(), &uploads, &mut files).await;
        self.process(&down, filter.as_ref(), &downloads, &mut files).await;
        Ok(files)
    }

    async fn process(
        &self,
        ctx: &FilterContext,
        filter: &dyn TransferFilter,
        items: &[TransferItem],
        files: &mut Vec<FileOutcome>,
    ) {
        for item in items {
            if self.is_canceled() {
                files.push(FileOutcome::new(item, FileResult::Canceled));
                continue;
            }
            let result = match self.transfer_item(ctx, filter, item).await {
                Ok(result) => result,
                Err(e) if e.is_canceled() => FileResult::Canceled,
                Err(e) => {
                    warn!("传输失败 {} -> {}: {}", item.source, item.target, e);
                    FileResult::Failed(e)
                }
            };
            files.push(FileOutcome::new(item, result));
        }
    }

    async fn transfer_item(
        &self,
        ctx: &FilterContext,
        filter: &dyn TransferFilter,
        item: &TransferItem,
    ) -> Result<FileResult> {
        let (source, target) = (&item.source, &item.target);
        if !filter.accept(ctx, source, target).await? {
            debug!("跳过 ({}): {}", filter.action(), source);
            return Ok(FileResult::Skipped);
        }
        let mut status = filter.prepare(ctx, source, target).await?;

        if source.is_directory() && status.symlink.is_none() {
            if !status.exists {
                self.ensure_parent(ctx, target).await?;
                ctx.target.mkdir(target).await?;
            }
            return Ok(FileResult::Transferred { bytes: 0 });
        }

        self.each_listener(|l| l.will_transfer(source));
        filter.apply(ctx, source, target, &mut status).await?;
        let written = status.target(target).clone();
        self.ensure_parent(ctx, &written).await?;

        let bytes = if let Some(link) = status.symlink.clone() {
            debug!("创建符号链接 {} -> {}", written, link);
            ctx.target.symlink(&written, &link).await?;
            0
        } else if self.server_side_copy(ctx, &status) {
            debug!("服务端复制 {} -> {}", source, written);
            ctx.target.copy(source, &written).await?;
            status.progress(status.length);
            self.add_bytes(status.length);
            status.length
        } else {
            self.stream(ctx, source, &written, &mut status).await?
        };

        status.set_complete();
        filter.complete(ctx, source, target, &status).await?;
        self.each_listener(|l| l.did_transfer(source, &status));
        Ok(FileResult::Transferred { bytes })
    }

    fn server_side_copy(&self, ctx: &FilterContext, status: &TransferStatus) -> bool {
        self.kind == TransferKind::Copy
            && Arc::ptr_eq(&ctx.source, &ctx.target)
            && ctx.capabilities.copy
            && !status.resume
    }

    /// 目标父目录不存在时创建
    async fn ensure_parent(&self, ctx: &FilterContext, target: &Resource) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = target.parent();
        while let Some(parent) = current {
            if parent.is_root() || ctx.target.find(&parent).await?.is_some() {
                break;
            }
            current = parent.parent();
            missing.push(parent);
        }
        for directory in missing.iter().rev() {
            debug!("创建父目录: {}", directory);
            ctx.target.mkdir(directory).await?;
        }
        Ok(())
    }

    /// 从源读取，经限速与校验写入目标，返回本次写入的字节数
    async fn stream(
        &self,
        ctx: &FilterContext,
        source: &Resource,
        target: &Resource,
        status: &mut TransferStatus,
    ) -> Result<u64> {
        let algorithm = if self.options.verify_checksum && !status.resume {
            ctx.target.checksum_algorithm().await?
        } else {
            None
        };
        let mut hasher = algorithm.map(ChecksumHasher::new);

        let mut input = ctx.source.read(source, status.current).await?;
        let mut bridge = ctx.target.write(target, status).await?;
        let pumped = self
            .pump(&mut input, &mut bridge, status, hasher.as_mut())
            .await;
        let response = bridge.response().await;

        let (sent, attributes) = match (pumped, response) {
            (Ok(sent), Ok(attributes)) => (sent, attributes),
            (Err(PumpError::Read(e)), _) => {
                ctx.source.record_failure(source, &e).await;
                ctx.target.cache().invalidate_path(target);
                return Err(e);
            }
            (Err(PumpError::Write(e)), _) | (_, Err(e)) => {
                ctx.target.record_failure(target, &e).await;
                return Err(e);
            }
            (Err(PumpError::Sink), Ok(_)) => {
                let e = TransferError::protocol(target.path(), "写请求未读完请求体即返回");
                ctx.target.record_failure(target, &e).await;
                return Err(e);
            }
        };

        if status.length > 0 && status.current < status.length {
            let e = TransferError::Resume {
                path: source.path().to_string(),
                expected: status.length,
                actual: status.current,
            };
            ctx.target.record_failure(target, &e).await;
            return Err(e);
        }

        if let Some(hasher) = hasher {
            let local = hasher.finish();
            let reported = attributes
                .checksum
                .clone()
                .filter(|c| c.algorithm == local.algorithm);
            let remote = match reported {
                Some(remote) => Some(remote),
                None => ctx.target.checksum(target, local.algorithm).await?,
            };
            if let Some(remote) = remote {
                if remote != local {
                    let e = TransferError::protocol(
                        target.path(),
                        format!("校验和不一致: 本地 {} 远程 {}", local.hash, remote.hash),
                    );
                    ctx.target.record_failure(target, &e).await;
                    return Err(e);
                }
                debug!("校验和一致 {}: {}", target, local.hash);
            }
            status.checksum = Some(local);
        }

        ctx.target.record_write(target, written_attributes(attributes, status));
        Ok(sent)
    }

    async fn pump(
        &self,
        input: &mut ByteStream,
        bridge: &mut StreamingBridge<Attributes>,
        status: &mut TransferStatus,
        mut hasher: Option<&mut ChecksumHasher>,
    ) -> std::result::Result<u64, PumpError> {
        let sink = bridge.sink().await.map_err(PumpError::Write)?;
        let mut sent = 0u64;
        while let Some(chunk) = input.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    sink.abort(&e).await;
                    return Err(PumpError::Read(e));
                }
            };
            let len = chunk.len() as u64;
            self.throttle.acquire(len).await;
            if let Some(hasher) = hasher.as_deref_mut() {
                hasher.update(&chunk);
            }
            if sink.write(chunk).await.is_err() {
                return Err(PumpError::Sink);
            }
            sent += len;
            status.progress(len);
            self.add_bytes(len);
        }
        sink.close();
        Ok(sent)
    }
}

impl QueueEntry for Transfer {
    fn id(&self) -> Uuid {
        self.id
    }

    fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn queued(&self) {
        self.set_state(TransferState::Queued);
        self.each_listener(|l| l.queued());
    }

    fn resumed(&self) {
        self.each_listener(|l| l.resumed());
    }
}

fn state_title(state: TransferState) -> &'static str {
    match state {
        TransferState::Complete => "完成",
        TransferState::Canceled => "已取消",
        TransferState::Failed => "失败",
        TransferState::Queued | TransferState::Running => "进行中",
    }
}

/// 目标资源的类型：链接在目标端按普通文件或目录对待
fn target_kind(source: &Resource) -> ResourceType {
    if source.is_directory() {
        ResourceType::DIRECTORY
    } else {
        ResourceType::FILE
    }
}

/// 写入后放回缓存的属性，后端未报告大小时用已传输长度补全
fn written_attributes(mut attributes: Attributes, status: &TransferStatus) -> Attributes {
    if attributes.known_size().is_none() {
        attributes.size = status.current as i64;
    }
    if attributes.checksum.is_none() {
        attributes.checksum = status.checksum.clone();
    }
    attributes
}
