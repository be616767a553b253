//! 冲突过滤器
//!
//! 每种策略对单个文件给出三步决定：`accept` 是否处理，`prepare` 计算长度与偏移，
//! `complete` 在传输后传播时间戳与权限。`apply` 在字节传输前对目标做准备。
//! 过滤器本身无状态，所需的会话与选项都在 `FilterContext` 中。

use super::comparator::{Comparison, FileComparator};
use super::conflict::{generate_conflict_name, rename_candidate, TransferAction};
use super::resource::{HashAlgorithm, Resource};
use super::status::TransferStatus;
use super::symlink::{SymlinkDecision, SymlinkResolver};
use crate::error::{Result, TransferError};
use crate::session::{Capabilities, Session};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// 续传时目标与源大小相同的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSizePolicy {
    /// 视为已完成
    Skip,
    /// 比较校验和，不同则从头覆盖
    Verify,
}

impl From<&str> for SameSizePolicy {
    fn from(s: &str) -> Self {
        match s {
            "verify" => SameSizePolicy::Verify,
            _ => SameSizePolicy::Skip,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterOptions {
    pub preserve_timestamp: bool,
    pub preserve_permission: bool,
    pub same_size: SameSizePolicy,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            preserve_timestamp: true,
            preserve_permission: false,
            same_size: SameSizePolicy::Skip,
        }
    }
}

/// 过滤器运行所需的上下文，一个传输方向一份
pub struct FilterContext {
    pub source: Arc<Session>,
    pub target: Arc<Session>,
    /// 目标会话能力
    pub capabilities: Capabilities,
    pub symlinks: SymlinkResolver,
    pub comparator: Arc<FileComparator>,
    pub options: FilterOptions,
}

impl FilterContext {
    async fn existing(&self, target: &Resource) -> Result<Option<Resource>> {
        self.target.find(target).await
    }

    /// 所有策略共用的部分：目录总是接受，链接按解析器决定
    fn accept_common(&self, source: &Resource) -> Option<bool> {
        if source.is_directory() && !source.is_symlink() {
            return Some(true);
        }
        match self.symlinks.resolve(source) {
            SymlinkDecision::Skip => {
                debug!("跳过符号链接: {}", source);
                Some(false)
            }
            _ => None,
        }
    }

    /// 基础状态：长度取源大小，标记目标是否存在，链接按需改为重建
    async fn prepare_common(&self, source: &Resource, target: &Resource) -> Result<TransferStatus> {
        let exists = self.existing(target).await?.is_some();
        let length = if source.is_file() {
            source.attributes.known_size().unwrap_or(0)
        } else {
            0
        };
        let mut status = TransferStatus::new().with_length(length).exists(exists);
        if let SymlinkDecision::Recreate { target: link } = self.symlinks.resolve(source) {
            status.symlink = Some(link);
            status.length = 0;
        }
        Ok(status)
    }

    /// 填充校验和，后端无法提供时保持原样
    async fn with_checksum(&self, session: &Session, resource: &Resource, algorithm: HashAlgorithm) -> Resource {
        if resource.attributes.checksum.is_some() {
            return resource.clone();
        }
        let mut copy = resource.clone();
        match session.checksum(resource, algorithm).await {
            Ok(checksum) => copy.attributes.checksum = checksum,
            Err(e) => debug!("无法获取校验和 {}: {}", resource, e),
        }
        copy
    }

    /// 比较源与目标（源在“本地”一侧）
    async fn compare(&self, source: &Resource, target: &Resource) -> Comparison {
        if !self.comparator.needs_checksum() && source.attributes.checksum.is_none() {
            return self.comparator.compare(source, target);
        }
        let algorithm = self
            .target
            .checksum_algorithm()
            .await
            .ok()
            .flatten()
            .unwrap_or(HashAlgorithm::Sha256);
        let source = self.with_checksum(&self.source, source, algorithm).await;
        let target = self.with_checksum(&self.target, target, algorithm).await;
        self.comparator.compare(&source, &target)
    }
}

#[async_trait]
pub trait TransferFilter: Send + Sync {
    fn action(&self) -> TransferAction;

    /// 是否处理该文件
    async fn accept(&self, ctx: &FilterContext, source: &Resource, target: &Resource) -> Result<bool>;

    /// 计算传输长度与起始偏移
    async fn prepare(
        &self,
        ctx: &FilterContext,
        source: &Resource,
        target: &Resource,
    ) -> Result<TransferStatus> {
        ctx.prepare_common(source, target).await
    }

    /// 字节传输前对目标的处理
    async fn apply(
        &self,
        _ctx: &FilterContext,
        _source: &Resource,
        _target: &Resource,
        _status: &mut TransferStatus,
    ) -> Result<()> {
        Ok(())
    }

    /// 传输后传播时间戳与权限
    async fn complete(
        &self,
        ctx: &FilterContext,
        source: &Resource,
        target: &Resource,
        status: &TransferStatus,
    ) -> Result<()> {
        if !status.complete || status.symlink.is_some() || source.is_directory() {
            return Ok(());
        }
        let written = status.target(target);
        if ctx.options.preserve_timestamp && ctx.capabilities.timestamp {
            if let Some(modified) = source.attributes.known_modified() {
                ctx.target.set_timestamp(written, modified).await?;
            }
        }
        if ctx.options.preserve_permission && ctx.capabilities.permission {
            if let Some(mode) = source.attributes.permission {
                ctx.target.set_permission(written, mode).await?;
            }
        }
        Ok(())
    }
}

/// 策略对应的过滤器，Prompt 与 Cancel 由传输本身处理
pub fn filter_for(action: TransferAction) -> Option<Box<dyn TransferFilter>> {
    match action {
        TransferAction::Overwrite => Some(Box::new(OverwriteFilter)),
        TransferAction::Resume => Some(Box::new(ResumeFilter)),
        TransferAction::Rename => Some(Box::new(RenameFilter)),
        TransferAction::RenameExisting => Some(Box::new(RenameExistingFilter)),
        TransferAction::Skip => Some(Box::new(SkipFilter)),
        TransferAction::Compare => Some(Box::new(CompareFilter)),
        TransferAction::Prompt | TransferAction::Cancel => None,
    }
}

pub struct OverwriteFilter;

#[async_trait]
impl TransferFilter for OverwriteFilter {
    fn action(&self) -> TransferAction {
        TransferAction::Overwrite
    }

    async fn accept(&self, ctx: &FilterContext, source: &Resource, _target: &Resource) -> Result<bool> {
        Ok(ctx.accept_common(source).unwrap_or(true))
    }
}

pub struct ResumeFilter;

impl ResumeFilter {
    /// 目标现有大小与源大小
    async fn sizes(ctx: &FilterContext, source: &Resource, target: &Resource) -> Result<Option<(u64, u64)>> {
        let Some(existing) = ctx.existing(target).await? else {
            return Ok(None);
        };
        let current = existing.attributes.known_size().unwrap_or(0);
        let length = source.attributes.known_size().unwrap_or(0);
        Ok(Some((current, length)))
    }

    async fn same_content(ctx: &FilterContext, source: &Resource, target: &Resource) -> bool {
        let existing = match ctx.existing(target).await {
            Ok(Some(existing)) => existing,
            _ => return false,
        };
        let algorithm = HashAlgorithm::Sha256;
        let source = ctx.with_checksum(&ctx.source, source, algorithm).await;
        let existing = ctx.with_checksum(&ctx.target, &existing, algorithm).await;
        matches!(
            (&source.attributes.checksum, &existing.attributes.checksum),
            (Some(a), Some(b)) if a == b
        )
    }
}

#[async_trait]
impl TransferFilter for ResumeFilter {
    fn action(&self) -> TransferAction {
        TransferAction::Resume
    }

    async fn accept(&self, ctx: &FilterContext, source: &Resource, target: &Resource) -> Result<bool> {
        if let Some(decision) = ctx.accept_common(source) {
            return Ok(decision);
        }
        match Self::sizes(ctx, source, target).await? {
            None => Ok(true),
            Some((current, length)) if current < length => Ok(true),
            Some((current, length)) if current == length => match ctx.options.same_size {
                SameSizePolicy::Skip => {
                    debug!("目标已完整，跳过续传: {}", target);
                    Ok(false)
                }
                SameSizePolicy::Verify => Ok(!Self::same_content(ctx, source, target).await),
            },
            Some((current, length)) => {
                debug!("目标 {} 大于源 ({} > {})，跳过续传", target, current, length);
                Ok(false)
            }
        }
    }

    async fn prepare(
        &self,
        ctx: &FilterContext,
        source: &Resource,
        target: &Resource,
    ) -> Result<TransferStatus> {
        let mut status = ctx.prepare_common(source, target).await?;
        if !status.exists || status.symlink.is_some() {
            return Ok(status);
        }
        if !ctx.capabilities.append {
            debug!("目标不支持追加写入，从头传输: {}", target);
            return Ok(status);
        }
        if let Some((current, length)) = Self::sizes(ctx, source, target).await? {
            if current < length {
                status.resume_at(current);
                info!("续传 {}: 从 {} / {} 字节开始", target, current, length);
            }
        }
        Ok(status)
    }
}

pub struct RenameFilter;

#[async_trait]
impl TransferFilter for RenameFilter {
    fn action(&self) -> TransferAction {
        TransferAction::Rename
    }

    async fn accept(&self, ctx: &FilterContext, source: &Resource, _target: &Resource) -> Result<bool> {
        Ok(ctx.accept_common(source).unwrap_or(true))
    }

    async fn prepare(
        &self,
        ctx: &FilterContext,
        source: &Resource,
        target: &Resource,
    ) -> Result<TransferStatus> {
        let mut status = ctx.prepare_common(source, target).await?;
        if !status.exists || source.is_directory() {
            return Ok(status);
        }
        let parent = target
            .parent()
            .ok_or_else(|| TransferError::protocol(target.path(), "无法重命名根目录"))?;
        let mut n = 1;
        loop {
            let candidate = parent.child(&rename_candidate(target.name(), n), target.kind());
            if ctx.existing(&candidate).await?.is_none() {
                debug!("目标已存在，改写为 {}", candidate);
                status.rename = Some(candidate);
                status.exists = false;
                return Ok(status);
            }
            n += 1;
        }
    }
}

pub struct RenameExistingFilter;

#[async_trait]
impl TransferFilter for RenameExistingFilter {
    fn action(&self) -> TransferAction {
        TransferAction::RenameExisting
    }

    async fn accept(&self, ctx: &FilterContext, source: &Resource, _target: &Resource) -> Result<bool> {
        Ok(ctx.accept_common(source).unwrap_or(true))
    }

    async fn apply(
        &self,
        ctx: &FilterContext,
        source: &Resource,
        target: &Resource,
        status: &mut TransferStatus,
    ) -> Result<()> {
        if !status.exists || source.is_directory() {
            return Ok(());
        }
        let parent = target
            .parent()
            .ok_or_else(|| TransferError::protocol(target.path(), "无法重命名根目录"))?;
        let base = generate_conflict_name(target.name(), chrono::Utc::now().timestamp());
        let mut aside = parent.child(&base, target.kind());
        let mut n = 1;
        while ctx.existing(&aside).await?.is_some() {
            aside = parent.child(&rename_candidate(&base, n), target.kind());
            n += 1;
        }
        let existing = ctx.existing(target).await?.unwrap_or_else(|| target.clone());
        ctx.target.rename(&existing, &aside).await?;
        info!("已有文件改名为 {}", aside);
        status.exists = false;
        Ok(())
    }
}

pub struct SkipFilter;

#[async_trait]
impl TransferFilter for SkipFilter {
    fn action(&self) -> TransferAction {
        TransferAction::Skip
    }

    async fn accept(&self, ctx: &FilterContext, source: &Resource, target: &Resource) -> Result<bool> {
        if let Some(decision) = ctx.accept_common(source) {
            return Ok(decision);
        }
        Ok(ctx.existing(target).await?.is_none())
    }
}

pub struct CompareFilter;

#[async_trait]
impl TransferFilter for CompareFilter {
    fn action(&self) -> TransferAction {
        TransferAction::Compare
    }

    async fn accept(&self, ctx: &FilterContext, source: &Resource, target: &Resource) -> Result<bool> {
        if let Some(decision) = ctx.accept_common(source) {
            return Ok(decision);
        }
        let Some(existing) = ctx.existing(target).await? else {
            return Ok(true);
        };
        let comparison = ctx.compare(source, &existing).await;
        match comparison {
            Comparison::LocalNewer | Comparison::Unequal => Ok(true),
            Comparison::Equal | Comparison::RemoteNewer => {
                debug!("比较结果 {:?}，不替换 {}", comparison, target);
                Ok(false)
            }
        }
    }
}

