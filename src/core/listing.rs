//! 目录列表
//!
//! `AttributedList` 维护有序序列与引用索引（key -> 位置）的一一对应；
//! `DirectoryListing` 在其上叠加排序、过滤与隐藏集合。

use super::resource::{ReferenceKey, Resource};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

/// 有序资源序列 + 引用索引
#[derive(Debug, Clone, Default)]
pub struct AttributedList {
    items: Vec<Resource>,
    index: HashMap<ReferenceKey, usize>,
}

impl AttributedList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let mut list = Self::new();
        for resource in resources {
            list.put(resource);
        }
        list
    }

    /// 按引用键插入或替换。键冲突时记录日志，新资源胜出
    pub fn put(&mut self, resource: Resource) {
        let key = resource.reference();
        match self.index.get(&key) {
            Some(&position) => {
                if self.items[position] != resource {
                    debug!("列表中引用键冲突，使用新条目: {}", key);
                }
                self.items[position] = resource;
            }
            None => {
                self.index.insert(key, self.items.len());
                self.items.push(resource);
            }
        }
    }

    pub fn get(&self, key: &ReferenceKey) -> Option<&Resource> {
        self.index.get(key).map(|&position| &self.items[position])
    }

    pub fn contains(&self, key: &ReferenceKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn index_of(&self, key: &ReferenceKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn remove(&mut self, key: &ReferenceKey) -> Option<Resource> {
        let position = self.index.remove(key)?;
        let removed = self.items.remove(position);
        self.reindex();
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Resource] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    /// 稳定排序后按位置逐一写回并重建索引
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Resource, &Resource) -> Ordering,
    {
        let mut sorted = std::mem::take(&mut self.items);
        sorted.sort_by(compare);
        self.items = sorted;
        self.reindex();
    }

    /// 拆出不满足条件的条目
    fn drain_rejected(&mut self, filter: &ListFilter) -> Vec<Resource> {
        let (kept, rejected): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.items).into_iter().partition(|r| filter.accept(r));
        self.items = kept;
        self.reindex();
        rejected
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (position, resource) in self.items.iter().enumerate() {
            self.index.insert(resource.reference(), position);
        }
    }
}

impl<'a> IntoIterator for &'a AttributedList {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// 排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Filename { ascending: bool },
    Size { ascending: bool },
    Timestamp { ascending: bool },
    Owner { ascending: bool },
    Extension { ascending: bool },
}

impl Default for Comparator {
    fn default() -> Self {
        Comparator::Filename { ascending: true }
    }
}

impl Comparator {
    pub fn compare(&self, a: &Resource, b: &Resource) -> Ordering {
        let (ordering, ascending) = match *self {
            Comparator::Filename { ascending } => (compare_names(a, b), ascending),
            Comparator::Size { ascending } => (
                a.attributes
                    .size
                    .cmp(&b.attributes.size)
                    .then_with(|| compare_names(a, b)),
                ascending,
            ),
            Comparator::Timestamp { ascending } => (
                a.attributes
                    .modified
                    .cmp(&b.attributes.modified)
                    .then_with(|| compare_names(a, b)),
                ascending,
            ),
            Comparator::Owner { ascending } => (
                a.attributes
                    .owner
                    .cmp(&b.attributes.owner)
                    .then_with(|| compare_names(a, b)),
                ascending,
            ),
            Comparator::Extension { ascending } => (
                extension(a)
                    .cmp(&extension(b))
                    .then_with(|| compare_names(a, b)),
                ascending,
            ),
        };
        if ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

fn compare_names(a: &Resource, b: &Resource) -> Ordering {
    a.name().to_lowercase().cmp(&b.name().to_lowercase())
}

fn extension(resource: &Resource) -> String {
    let name = resource.name();
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx + 1..].to_lowercase(),
        _ => String::new(),
    }
}

/// 列表过滤器。比较时正则按其源码比较
#[derive(Debug, Clone)]
pub enum ListFilter {
    /// 不过滤
    All,
    /// 隐藏以 `.` 开头的文件
    HideDotfiles,
    /// 隐藏名称匹配正则的文件
    Regex(Regex),
    /// 隐藏路径匹配任一 glob 模式的文件
    Exclude(ExcludePatterns),
    /// 只保留名称包含关键字的条目（不区分大小写）
    Search(String),
}

impl Default for ListFilter {
    fn default() -> Self {
        ListFilter::All
    }
}

impl PartialEq for ListFilter {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ListFilter::All, ListFilter::All) => true,
            (ListFilter::HideDotfiles, ListFilter::HideDotfiles) => true,
            (ListFilter::Regex(a), ListFilter::Regex(b)) => a.as_str() == b.as_str(),
            (ListFilter::Exclude(a), ListFilter::Exclude(b)) => a == b,
            (ListFilter::Search(a), ListFilter::Search(b)) => a == b,
            _ => false,
        }
    }
}

impl ListFilter {
    pub fn accept(&self, resource: &Resource) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::HideDotfiles => !resource.name().starts_with('.'),
            ListFilter::Regex(pattern) => !pattern.is_match(resource.name()),
            ListFilter::Exclude(patterns) => !patterns.matches(resource.path()),
            ListFilter::Search(term) => resource
                .name()
                .to_lowercase()
                .contains(&term.to_lowercase()),
        }
    }
}

/// glob 风格的排除规则，支持 `*` 与 `**`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExcludePatterns {
    patterns: Vec<String>,
}

impl ExcludePatterns {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// 常见的排除模式
    pub fn defaults() -> Self {
        Self::new(
            [
                ".git/**",
                ".svn/**",
                "CVS/**",
                ".DS_Store",
                "Thumbs.db",
                "*.tmp",
                "*.temp",
                "~*",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/').to_lowercase();
        self.patterns
            .iter()
            .any(|pattern| Self::matches_pattern(&path, &pattern.to_lowercase()))
    }

    fn matches_pattern(path: &str, pattern: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);

        if let Some((prefix, suffix)) = pattern.split_once("**") {
            let prefix = prefix.trim_end_matches('/');
            let suffix = suffix.trim_start_matches('/');
            if prefix.is_empty() && suffix.is_empty() {
                return true;
            }
            // 目录规则对任意深度的同名目录生效
            let under_prefix = prefix.is_empty()
                || path == prefix
                || path.starts_with(&format!("{}/", prefix))
                || path.contains(&format!("/{}/", prefix))
                || path.ends_with(&format!("/{}", prefix));
            return under_prefix && (suffix.is_empty() || path.ends_with(suffix));
        }

        if pattern.contains('*') {
            let escaped = regex::escape(pattern).replace("\\*", ".*");
            return match Regex::new(&format!("^{}$", escaped)) {
                Ok(re) => re.is_match(name),
                Err(e) => {
                    warn!("无效的排除规则 {}: {}", pattern, e);
                    false
                }
            };
        }

        path == pattern || name == pattern
    }
}

/// 单个目录的缓存视图
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    visible: AttributedList,
    hidden: Vec<Resource>,
    comparator: Option<Comparator>,
    filter: Option<ListFilter>,
    /// 目录是否可读
    readable: bool,
}

impl DirectoryListing {
    pub fn new(resources: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            visible: AttributedList::from_resources(resources),
            hidden: Vec::new(),
            comparator: None,
            filter: None,
            readable: true,
        }
    }

    /// 不可读目录的占位列表
    pub fn unreadable() -> Self {
        Self {
            readable: false,
            ..Self::default()
        }
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn put(&mut self, resource: Resource) {
        let key = resource.reference();
        self.hidden.retain(|r| r.reference() != key);
        self.visible.put(resource);
    }

    pub fn get(&self, key: &ReferenceKey) -> Option<&Resource> {
        self.visible.get(key)
    }

    pub fn contains(&self, key: &ReferenceKey) -> bool {
        self.visible.contains(key)
    }

    pub fn index_of(&self, key: &ReferenceKey) -> Option<usize> {
        self.visible.index_of(key)
    }

    /// 在可见与隐藏条目中查找
    pub fn find(&self, key: &ReferenceKey) -> Option<&Resource> {
        self.visible
            .get(key)
            .or_else(|| self.hidden.iter().find(|r| &r.reference() == key))
    }

    pub fn remove(&mut self, key: &ReferenceKey) -> Option<Resource> {
        if let Some(removed) = self.visible.remove(key) {
            return Some(removed);
        }
        let position = self.hidden.iter().position(|r| &r.reference() == key)?;
        Some(self.hidden.remove(position))
    }

    pub fn visible(&self) -> &AttributedList {
        &self.visible
    }

    pub fn hidden(&self) -> &[Resource] {
        &self.hidden
    }

    /// 可见与隐藏的全部条目
    pub fn all(&self) -> impl Iterator<Item = &Resource> {
        self.visible.iter().chain(self.hidden.iter())
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn sort(&mut self, comparator: Comparator) {
        self.visible.sort_by(|a, b| comparator.compare(a, b));
        self.comparator = Some(comparator);
    }

    /// 幂等：比较器变化才重排，过滤器变化才重新过滤。
    /// 重新过滤前先把隐藏条目放回，保证过滤作用于完整候选集
    pub fn filter(&mut self, comparator: Comparator, filter: ListFilter) -> &AttributedList {
        let filter_changed = self.filter.as_ref() != Some(&filter);
        if filter_changed {
            for resource in std::mem::take(&mut self.hidden) {
                self.visible.put(resource);
            }
            self.hidden = self.visible.drain_rejected(&filter);
            if !self.hidden.is_empty() {
                debug!("过滤隐藏 {} 个条目", self.hidden.len());
            }
            self.filter = Some(filter);
        }
        if filter_changed || self.comparator != Some(comparator) {
            self.sort(comparator);
        }
        &self.visible
    }

    pub fn clear(&mut self) {
        self.visible.clear();
        self.hidden.clear();
        self.comparator = None;
        self.filter = None;
    }
}
