//! 应用配置模块
//!
//! 配置以点分隔的键查询，例如 `queue.connections` 对应 config.json 中
//! `{"queue": {"connections": 2}}`。`TransferConfig` 汇总所有可调参数及默认值。

use crate::core::comparator::CompareStrategy;
use crate::core::conflict::TransferAction;
use crate::core::filter::{FilterOptions, SameSizePolicy};
use crate::core::listing::ExcludePatterns;
use crate::core::symlink::SymlinkPolicy;
use crate::core::transfer::{TransferKind, TransferOptions};
use crate::error::{Result, TransferError};
use crate::session::BackendOptions;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

pub const CONFIG_FILE: &str = "config.json";

/// 键值配置查询
pub trait Preferences: Send + Sync {
    fn property(&self, key: &str) -> Option<String>;

    fn integer(&self, key: &str) -> Option<i64> {
        self.property(key)?.trim().parse().ok()
    }

    fn boolean(&self, key: &str) -> Option<bool> {
        match self.property(key)?.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }

    /// 逗号分隔的列表
    fn list(&self, key: &str) -> Option<Vec<String>> {
        let value = self.property(key)?;
        Some(
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// 重新读取底层存储
    fn reload(&self) -> Result<()> {
        Ok(())
    }
}

/// 基于 config.json 的配置
pub struct JsonPreferences {
    path: PathBuf,
    root: RwLock<Value>,
}

impl JsonPreferences {
    /// 从配置目录加载，文件不存在或无法解析时视为空配置
    pub fn load(config_dir: &Path) -> Self {
        let path = config_dir.join(CONFIG_FILE);
        let root = Self::read(&path);
        Self {
            path,
            root: RwLock::new(root),
        }
    }

    pub fn from_value(value: Value) -> Self {
        Self {
            path: PathBuf::new(),
            root: RwLock::new(value),
        }
    }

    fn read(path: &Path) -> Value {
        if !path.exists() {
            return Value::Object(Default::default());
        }
        match fs::read_to_string(path).map(|content| serde_json::from_str::<Value>(&content)) {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!("配置文件格式错误 {:?}: {}", path, e);
                Value::Object(Default::default())
            }
            Err(e) => {
                warn!("无法读取配置文件 {:?}: {}", path, e);
                Value::Object(Default::default())
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let root = self.root.read().unwrap_or_else(PoisonError::into_inner);
        let mut current = &*root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current.clone())
    }

    /// 整段反序列化，例如 `log` 或 `hosts`
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lookup(key)?;
        match serde_json::from_value(value) {
            Ok(section) => Some(section),
            Err(e) => {
                warn!("配置段 {} 无效: {}", key, e);
                None
            }
        }
    }
}

impl Preferences for JsonPreferences {
    fn property(&self, key: &str) -> Option<String> {
        match self.lookup(key)? {
            Value::String(s) => Some(s),
            Value::Null => None,
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            other => Some(other.to_string()),
        }
    }

    fn integer(&self, key: &str) -> Option<i64> {
        match self.lookup(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn boolean(&self, key: &str) -> Option<bool> {
        match self.lookup(key)? {
            Value::Bool(b) => Some(b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        match self.lookup(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            Value::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        }
    }

    fn reload(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let value = Self::read(&self.path);
        *self.root.write().unwrap_or_else(PoisonError::into_inner) = value;
        debug!("已重新加载配置: {:?}", self.path);
        Ok(())
    }
}

/// 内存配置，供测试和嵌入方使用
#[derive(Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: impl ToString) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    pub fn with(self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }
}

impl Preferences for MemoryPreferences {
    fn property(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

/// 各传输类型的默认冲突策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultActions {
    pub upload: TransferAction,
    pub download: TransferAction,
    pub copy: TransferAction,
    pub sync: TransferAction,
}

/// 所有可调参数
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// 队列并发数
    pub connections: usize,
    pub actions: DefaultActions,
    pub chunk_size: u64,
    pub buffer: usize,
    /// 调用方的重试次数与初始间隔
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub bandwidth: u64,
    pub preserve_timestamp: bool,
    pub preserve_permission: bool,
    pub verify_checksum: bool,
    pub same_size: SameSizePolicy,
    pub symlink_upload: SymlinkPolicy,
    pub symlink_download: SymlinkPolicy,
    pub exclude: Vec<String>,
    pub compare: CompareStrategy,
    pub tolerance: i64,
    /// 秒
    pub timeout: u64,
    pub io_timeout: u64,
    /// 目录缓存有效期（秒），0 表示永不过期
    pub cache_ttl: u64,
}

impl TransferConfig {
    pub fn load(prefs: &dyn Preferences) -> Self {
        let integer = |key: &str, default: i64| prefs.integer(key).unwrap_or(default);
        let unsigned = |key: &str, default: u64| {
            let value = integer(key, default as i64);
            if value < 0 {
                warn!("配置 {} 不能为负数: {}, 使用默认值 {}", key, value, default);
                default
            } else {
                value as u64
            }
        };
        let boolean = |key: &str, default: bool| prefs.boolean(key).unwrap_or(default);
        let text = |key: &str, default: &str| prefs.property(key).unwrap_or_else(|| default.to_string());
        let action = |key: &str| TransferAction::from(text(key, "overwrite").as_str());

        let exclude = prefs.list("transfer.exclude").unwrap_or_else(|| {
            ExcludePatterns::defaults()
                .patterns()
                .iter()
                .map(|s| s.to_string())
                .collect()
        });

        Self {
            connections: unsigned("queue.connections", 2).max(1) as usize,
            actions: DefaultActions {
                upload: action("queue.action.upload"),
                download: action("queue.action.download"),
                copy: action("queue.action.copy"),
                sync: action("queue.action.sync"),
            },
            chunk_size: unsigned("transfer.chunk_size", 1024 * 1024).max(1),
            buffer: unsigned("transfer.buffer", 4).max(1) as usize,
            retries: unsigned("transfer.retries", 5) as u32,
            retry_delay_ms: unsigned("transfer.retry_delay_ms", 2000),
            bandwidth: unsigned("transfer.bandwidth", 0),
            preserve_timestamp: boolean("transfer.preserve.timestamp", true),
            preserve_permission: boolean("transfer.preserve.permission", false),
            verify_checksum: boolean("transfer.checksum.verify", true),
            same_size: SameSizePolicy::from(text("transfer.resume.same_size", "skip").as_str()),
            symlink_upload: SymlinkPolicy::from(text("transfer.symlink.upload", "recreate").as_str()),
            symlink_download: SymlinkPolicy::from(
                text("transfer.symlink.download", "recreate").as_str(),
            ),
            exclude,
            compare: CompareStrategy::from(text("compare.strategy", "combined").as_str()),
            tolerance: integer("compare.tolerance", 0).max(0),
            timeout: unsigned("connection.timeout", 60).max(1),
            io_timeout: unsigned("connection.io_timeout", 300).max(1),
            cache_ttl: unsigned("cache.ttl", 1800),
        }
    }

    pub fn action_for(&self, kind: TransferKind) -> TransferAction {
        match kind {
            TransferKind::Upload => self.actions.upload,
            TransferKind::Download => self.actions.download,
            TransferKind::Copy => self.actions.copy,
            TransferKind::Sync(_) => self.actions.sync,
        }
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            filter: FilterOptions {
                preserve_timestamp: self.preserve_timestamp,
                preserve_permission: self.preserve_permission,
                same_size: self.same_size,
            },
            verify_checksum: self.verify_checksum,
            symlink_upload: self.symlink_upload,
            symlink_download: self.symlink_download,
            exclude: ExcludePatterns::new(self.exclude.clone()),
            compare: self.compare,
            tolerance: self.tolerance,
            bandwidth: self.bandwidth,
        }
    }

    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            chunk_size: self.chunk_size,
            buffer: self.buffer,
            timeout: Duration::from_secs(self.timeout),
            io_timeout: Duration::from_secs(self.io_timeout),
        }
    }

    /// 第 `attempt` 次重试前的等待时间，指数退避
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(10);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::load(&MemoryPreferences::new())
    }
}

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("remote-transfer"))
        .unwrap_or_else(|| PathBuf::from(".remote-transfer"))
}

/// 确保配置目录存在
pub fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    fs::create_dir_all(config_dir).map_err(|e| {
        TransferError::Config(format!("无法创建配置目录 {:?}: {}", config_dir, e))
    })
}
