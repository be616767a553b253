//! 比较服务与同步规划
//!
//! 三种可互换的比较策略输出 `Comparison`，供 Compare 冲突策略与目录同步共用。

use super::resource::{Attributes, Resource};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// 本地与远程哪一方更权威
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    LocalNewer,
    RemoteNewer,
    Unequal,
}

/// 比较服务
pub trait ComparisonService: Send + Sync {
    fn compare(&self, local: &Attributes, remote: &Attributes) -> Comparison;

    /// 比较前是否需要先计算校验和
    fn needs_checksum(&self) -> bool {
        false
    }
}

/// 仅比较校验和，没有“更新”的概念
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumComparison;

impl ComparisonService for ChecksumComparison {
    fn compare(&self, local: &Attributes, remote: &Attributes) -> Comparison {
        match checksums_match(local, remote) {
            Some(true) => Comparison::Equal,
            _ => Comparison::Unequal,
        }
    }

    fn needs_checksum(&self) -> bool {
        true
    }
}

/// 按修改时间比较
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampComparison {
    /// 容差（毫秒）
    pub tolerance: i64,
}

impl TimestampComparison {
    pub fn with_tolerance_seconds(seconds: i64) -> Self {
        Self {
            tolerance: seconds.saturating_mul(1000),
        }
    }
}

impl ComparisonService for TimestampComparison {
    fn compare(&self, local: &Attributes, remote: &Attributes) -> Comparison {
        match (local.known_modified(), remote.known_modified()) {
            (Some(l), Some(r)) => {
                if (l - r).abs() <= self.tolerance {
                    Comparison::Equal
                } else if l > r {
                    Comparison::LocalNewer
                } else {
                    Comparison::RemoteNewer
                }
            }
            _ => Comparison::Unequal,
        }
    }
}

/// 先比较校验和，不可用或不同时退回大小 + 时间启发式
#[derive(Debug, Clone, Copy, Default)]
pub struct CombinedComparison {
    pub timestamp: TimestampComparison,
}

impl ComparisonService for CombinedComparison {
    fn compare(&self, local: &Attributes, remote: &Attributes) -> Comparison {
        let checksum = checksums_match(local, remote);
        if checksum == Some(true) {
            return Comparison::Equal;
        }
        let content_differs = checksum == Some(false)
            || matches!(
                (local.known_size(), remote.known_size()),
                (Some(l), Some(r)) if l != r
            );

        match self.timestamp.compare(local, remote) {
            Comparison::Equal if content_differs => Comparison::Unequal,
            Comparison::Unequal
                if !content_differs
                    && local.known_size().is_some()
                    && (local.known_modified().is_none() || remote.known_modified().is_none()) =>
            {
                // 时间未知且大小一致时按相同处理
                Comparison::Equal
            }
            other => other,
        }
    }
}

/// 两边都有同算法校验和时返回是否一致
fn checksums_match(local: &Attributes, remote: &Attributes) -> Option<bool> {
    match (&local.checksum, &remote.checksum) {
        (Some(l), Some(r)) if l.algorithm == r.algorithm => Some(l.hash == r.hash),
        _ => None,
    }
}

/// 比较策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareStrategy {
    Checksum,
    Timestamp,
    Combined,
}

impl std::fmt::Display for CompareStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareStrategy::Checksum => write!(f, "checksum"),
            CompareStrategy::Timestamp => write!(f, "timestamp"),
            CompareStrategy::Combined => write!(f, "combined"),
        }
    }
}

impl From<&str> for CompareStrategy {
    fn from(s: &str) -> Self {
        match s {
            "checksum" => CompareStrategy::Checksum,
            "timestamp" => CompareStrategy::Timestamp,
            _ => CompareStrategy::Combined,
        }
    }
}

impl CompareStrategy {
    pub fn service(self, tolerance_seconds: i64) -> Box<dyn ComparisonService> {
        let timestamp = TimestampComparison::with_tolerance_seconds(tolerance_seconds);
        match self {
            CompareStrategy::Checksum => Box::new(ChecksumComparison),
            CompareStrategy::Timestamp => Box::new(timestamp),
            CompareStrategy::Combined => Box::new(CombinedComparison { timestamp }),
        }
    }
}

/// 同步方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// 只上传本地更新
    Upload,
    /// 只下载远程更新
    Download,
    /// 双向，以较新一方为准
    Mirror,
}

impl From<&str> for SyncDirection {
    fn from(s: &str) -> Self {
        match s {
            "upload" => SyncDirection::Upload,
            "download" => SyncDirection::Download,
            _ => SyncDirection::Mirror,
        }
    }
}

/// 同步动作，路径相对于同步根目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Upload { path: String, size: u64 },
    Download { path: String, size: u64 },
    Skip { path: String },
    /// 无法判定哪一方更新
    Conflict { path: String },
}

impl SyncAction {
    pub fn path(&self) -> &str {
        match self {
            SyncAction::Upload { path, .. }
            | SyncAction::Download { path, .. }
            | SyncAction::Skip { path }
            | SyncAction::Conflict { path } => path,
        }
    }

    fn order(&self) -> u8 {
        match self {
            SyncAction::Upload { .. } | SyncAction::Download { .. } => 0,
            SyncAction::Conflict { .. } => 1,
            SyncAction::Skip { .. } => 2,
        }
    }
}

/// 文件比较器
pub struct FileComparator {
    service: Box<dyn ComparisonService>,
}

impl FileComparator {
    pub fn new(strategy: CompareStrategy, tolerance_seconds: i64) -> Self {
        Self {
            service: strategy.service(tolerance_seconds),
        }
    }

    pub fn with_service(service: Box<dyn ComparisonService>) -> Self {
        Self { service }
    }

    pub fn needs_checksum(&self) -> bool {
        self.service.needs_checksum()
    }

    pub fn compare(&self, local: &Resource, remote: &Resource) -> Comparison {
        let result = self.service.compare(&local.attributes, &remote.attributes);
        debug!("比较 {} <-> {}: {:?}", local, remote, result);
        result
    }

    /// 比较两棵文件树，返回同步动作列表
    pub fn compare_trees(
        &self,
        local: &HashMap<String, Resource>,
        remote: &HashMap<String, Resource>,
        direction: SyncDirection,
    ) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        let all_paths: HashSet<&String> = local.keys().chain(remote.keys()).collect();

        for path in all_paths {
            let upload = |r: &Resource| SyncAction::Upload {
                path: path.clone(),
                size: r.attributes.known_size().unwrap_or(0),
            };
            let download = |r: &Resource| SyncAction::Download {
                path: path.clone(),
                size: r.attributes.known_size().unwrap_or(0),
            };
            let skip = || SyncAction::Skip { path: path.clone() };

            let action = match (local.get(path), remote.get(path)) {
                (Some(l), Some(r)) => {
                    // 目录在传输文件时按需创建
                    if l.is_directory() || r.is_directory() {
                        continue;
                    }
                    match (self.compare(l, r), direction) {
                        (Comparison::Equal, _) => skip(),
                        (Comparison::LocalNewer, SyncDirection::Download) => skip(),
                        (Comparison::RemoteNewer, SyncDirection::Upload) => skip(),
                        (Comparison::LocalNewer, _) => upload(l),
                        (Comparison::RemoteNewer, _) => download(r),
                        (Comparison::Unequal, SyncDirection::Upload) => upload(l),
                        (Comparison::Unequal, SyncDirection::Download) => download(r),
                        (Comparison::Unequal, SyncDirection::Mirror) => {
                            SyncAction::Conflict { path: path.clone() }
                        }
                    }
                }
                (Some(l), None) => {
                    if l.is_directory() {
                        continue;
                    }
                    match direction {
                        SyncDirection::Download => skip(),
                        _ => upload(l),
                    }
                }
                (None, Some(r)) => {
                    if r.is_directory() {
                        continue;
                    }
                    match direction {
                        SyncDirection::Upload => skip(),
                        _ => download(r),
                    }
                }
                (None, None) => continue,
            };
            actions.push(action);
        }

        // 按动作类型和路径排序，确保一致性
        actions.sort_by(|a, b| a.order().cmp(&b.order()).then_with(|| a.path().cmp(b.path())));
        actions
    }

    /// 统计同步动作
    pub fn summarize_actions(actions: &[SyncAction]) -> ActionSummary {
        let mut summary = ActionSummary::default();
        for action in actions {
            match action {
                SyncAction::Upload { size, .. } => {
                    summary.upload_count += 1;
                    summary.upload_bytes += size;
                }
                SyncAction::Download { size, .. } => {
                    summary.download_count += 1;
                    summary.download_bytes += size;
                }
                SyncAction::Skip { .. } => summary.skip_count += 1,
                SyncAction::Conflict { .. } => summary.conflict_count += 1,
            }
        }
        summary
    }
}

impl Default for FileComparator {
    fn default() -> Self {
        Self::new(CompareStrategy::Combined, 0)
    }
}

/// 动作统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSummary {
    pub upload_count: usize,
    pub upload_bytes: u64,
    pub download_count: usize,
    pub download_bytes: u64,
    pub skip_count: usize,
    pub conflict_count: usize,
}

impl ActionSummary {
    pub fn total_files(&self) -> usize {
        self.upload_count + self.download_count + self.skip_count + self.conflict_count
    }

    pub fn total_transfer_bytes(&self) -> u64 {
        self.upload_bytes + self.download_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::{Checksum, HashAlgorithm};

    fn attrs(size: u64, modified: i64, checksum: Option<&str>) -> Attributes {
        let mut a = Attributes::default().with_size(size).with_modified(modified);
        a.checksum = checksum.map(|h| Checksum::new(HashAlgorithm::Sha256, h));
        a
    }

    #[test]
    fn test_checksum_equal_and_unequal() {
        let service = ChecksumComparison;
        assert_eq!(
            service.compare(&attrs(1, 0, Some("a")), &attrs(1, 0, Some("a"))),
            Comparison::Equal
        );
        assert_eq!(
            service.compare(&attrs(1, 0, Some("a")), &attrs(1, 0, Some("b"))),
            Comparison::Unequal
        );
        assert_eq!(
            service.compare(&attrs(1, 0, None), &attrs(1, 0, Some("a"))),
            Comparison::Unequal
        );
    }

    #[test]
    fn test_timestamp_newer_and_tolerance() {
        let strict = TimestampComparison::default();
        assert_eq!(
            strict.compare(&attrs(1, 2000, None), &attrs(1, 1000, None)),
            Comparison::LocalNewer
        );
        assert_eq!(
            strict.compare(&attrs(1, 1000, None), &attrs(1, 2000, None)),
            Comparison::RemoteNewer
        );
        let tolerant = TimestampComparison::with_tolerance_seconds(2);
        assert_eq!(
            tolerant.compare(&attrs(1, 2000, None), &attrs(1, 1000, None)),
            Comparison::Equal
        );
        assert_eq!(
            strict.compare(&Attributes::default(), &attrs(1, 1000, None)),
            Comparison::Unequal
        );
    }

    #[test]
    fn test_combined_falls_back_to_timestamp() {
        let service = CombinedComparison::default();
        assert_eq!(
            service.compare(&attrs(1, 5, Some("a")), &attrs(1, 9, Some("a"))),
            Comparison::Equal
        );
        assert_eq!(
            service.compare(&attrs(1, 9, Some("a")), &attrs(1, 5, Some("b"))),
            Comparison::LocalNewer
        );
        // 时间相同但内容不同
        assert_eq!(
            service.compare(&attrs(1, 5, None), &attrs(2, 5, None)),
            Comparison::Unequal
        );
        assert_eq!(
            service.compare(&attrs(3, 5, None), &attrs(3, 5, None)),
            Comparison::Equal
        );
    }

    fn tree(entries: &[(&str, u64, i64)]) -> HashMap<String, Resource> {
        entries
            .iter()
            .map(|(p, size, modified)| {
                (
                    p.to_string(),
                    Resource::file(p).with_attributes(attrs(*size, *modified, None)),
                )
            })
            .collect()
    }

    #[test]
    fn test_compare_trees_mirror() {
        let comparator = FileComparator::new(CompareStrategy::Timestamp, 0);
        let local = tree(&[("a", 1, 10), ("b", 1, 10), ("only_local", 4, 1)]);
        let remote = tree(&[("a", 1, 10), ("b", 2, 20), ("only_remote", 8, 1)]);
        let actions = comparator.compare_trees(&local, &remote, SyncDirection::Mirror);

        assert!(actions.contains(&SyncAction::Skip { path: "a".into() }));
        assert!(actions.contains(&SyncAction::Download {
            path: "b".into(),
            size: 2
        }));
        assert!(actions.contains(&SyncAction::Upload {
            path: "only_local".into(),
            size: 4
        }));
        assert!(actions.contains(&SyncAction::Download {
            path: "only_remote".into(),
            size: 8
        }));
        // 传输动作排在跳过之前
        assert_eq!(actions.last(), Some(&SyncAction::Skip { path: "a".into() }));

        let summary = FileComparator::summarize_actions(&actions);
        assert_eq!(summary.download_count, 2);
        assert_eq!(summary.total_transfer_bytes(), 14);
        assert_eq!(summary.total_files(), 4);
    }

    #[test]
    fn test_compare_trees_upload_only() {
        let comparator = FileComparator::new(CompareStrategy::Timestamp, 0);
        let local = tree(&[("new", 1, 30), ("old", 1, 10)]);
        let remote = tree(&[("new", 1, 20), ("old", 1, 20), ("remote", 1, 1)]);
        let actions = comparator.compare_trees(&local, &remote, SyncDirection::Upload);
        let summary = FileComparator::summarize_actions(&actions);
        assert_eq!(summary.upload_count, 1);
        assert_eq!(summary.download_count, 0);
        assert_eq!(summary.skip_count, 2);
    }
}
