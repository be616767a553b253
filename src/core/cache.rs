//! 目录列表缓存
//!
//! 每个会话一份，以目录的引用键索引。可并发读取，
//! 只由执行列表/传输操作的任务写入。

use super::listing::DirectoryListing;
use super::resource::{ReferenceKey, Resource};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

struct CacheEntry {
    listing: DirectoryListing,
    cached_at: Instant,
}

/// 目录列表缓存
pub struct DirectoryCache {
    entries: RwLock<HashMap<ReferenceKey, CacheEntry>>,
    /// 缓存有效期，ZERO 表示永不过期
    ttl: Duration,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::ZERO,
        }
    }

    /// 设置缓存有效期（0 表示永不过期）
    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.ttl = Duration::from_secs(seconds);
        self
    }

    fn expired(&self, entry: &CacheEntry) -> bool {
        !self.ttl.is_zero() && entry.cached_at.elapsed() > self.ttl
    }

    /// 读取目录列表的副本，过期条目视为未命中
    pub fn get(&self, directory: &Resource) -> Option<DirectoryListing> {
        let key = directory.reference();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(&key) {
                Some(entry) if !self.expired(entry) => {
                    debug!(
                        "命中目录缓存 {} ({} 个条目, 缓存于 {})",
                        directory,
                        entry.listing.len(),
                        format_age(entry.cached_at.elapsed().as_secs())
                    );
                    return Some(entry.listing.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        debug!("目录缓存已过期: {}", directory);
        self.invalidate(directory);
        None
    }

    pub fn is_cached(&self, directory: &Resource) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&directory.reference())
            .is_some_and(|entry| !self.expired(entry))
    }

    /// 在缓存的父目录列表中按引用键查找
    pub fn lookup(&self, resource: &Resource) -> Option<Option<Resource>> {
        let parent = resource.parent()?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(&parent.reference())?;
        if self.expired(entry) {
            return None;
        }
        Some(entry.listing.find(&resource.reference()).cloned())
    }

    pub fn put(&self, directory: &Resource, listing: DirectoryListing) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            directory.reference(),
            CacheEntry {
                listing,
                cached_at: Instant::now(),
            },
        );
    }

    /// 修改缓存中的单个目录列表
    pub fn update<F>(&self, directory: &Resource, apply: F) -> bool
    where
        F: FnOnce(&mut DirectoryListing),
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(&directory.reference()) {
            Some(entry) => {
                apply(&mut entry.listing);
                true
            }
            None => false,
        }
    }

    pub fn invalidate(&self, directory: &Resource) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(&directory.reference()).is_some() {
            debug!("失效目录缓存: {}", directory);
        }
    }

    /// 失效资源所在目录；资源本身是目录时一并失效其下所有缓存
    pub fn invalidate_path(&self, resource: &Resource) {
        if let Some(parent) = resource.parent() {
            self.invalidate(&parent);
        }
        if resource.is_directory() {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let prefix = resource.path().to_string();
            entries.retain(|key, _| {
                let path = key.path();
                !(path == prefix || path.starts_with(&format!("{}/", prefix.trim_end_matches('/'))))
            });
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// 格式化缓存时间
pub fn format_age(age_seconds: u64) -> String {
    if age_seconds < 60 {
        format!("{}秒前", age_seconds)
    } else if age_seconds < 3600 {
        format!("{}分钟前", age_seconds / 60)
    } else if age_seconds < 86400 {
        format!("{}小时前", age_seconds / 3600)
    } else {
        format!("{}天前", age_seconds / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(paths: &[&str]) -> DirectoryListing {
        DirectoryListing::new(paths.iter().map(|p| Resource::file(p)))
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = DirectoryCache::new();
        let dir = Resource::directory("/docs");
        cache.put(&dir, listing(&["/docs/a", "/docs/b"]));

        assert!(cache.is_cached(&dir));
        assert_eq!(cache.get(&dir).unwrap().len(), 2);
        assert_eq!(
            cache.lookup(&Resource::file("/docs/a")),
            Some(Some(Resource::file("/docs/a")))
        );
        assert_eq!(cache.lookup(&Resource::file("/docs/zz")), Some(None));
        assert_eq!(cache.lookup(&Resource::file("/other/a")), None);

        cache.invalidate_path(&Resource::file("/docs/a"));
        assert!(!cache.is_cached(&dir));
    }

    #[test]
    fn test_invalidate_directory_drops_descendants() {
        let cache = DirectoryCache::new();
        cache.put(&Resource::directory("/a"), listing(&["/a/b"]));
        cache.put(&Resource::directory("/a/b"), listing(&["/a/b/c"]));
        cache.put(&Resource::directory("/ab"), listing(&["/ab/x"]));
        cache.invalidate_path(&Resource::directory("/a/b"));
        assert!(!cache.is_cached(&Resource::directory("/a")));
        assert!(!cache.is_cached(&Resource::directory("/a/b")));
        assert!(cache.is_cached(&Resource::directory("/ab")));
    }

    #[test]
    fn test_update_in_place() {
        let cache = DirectoryCache::new();
        let dir = Resource::directory("/d");
        cache.put(&dir, listing(&["/d/a"]));
        assert!(cache.update(&dir, |l| l.put(Resource::file("/d/b"))));
        assert_eq!(cache.get(&dir).unwrap().len(), 2);
        assert!(!cache.update(&Resource::directory("/none"), |_| {}));
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(5), "5秒前");
        assert_eq!(format_age(120), "2分钟前");
        assert_eq!(format_age(7200), "2小时前");
        assert_eq!(format_age(172800), "2天前");
    }
}
