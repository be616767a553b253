//! 日志模块 - 文件日志、大小轮转与订阅器初始化

use crate::config::JsonPreferences;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "transfer.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 读取 config.json 中的 `log` 段
    pub fn load(prefs: &JsonPreferences) -> Self {
        prefs.section("log").unwrap_or_default()
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器，超限时保留一份 `.old` 备份
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        Self::with_limit(log_dir, (max_size_mb as u64) * 1024 * 1024)
    }

    /// 以字节为单位的上限
    pub fn with_limit(log_dir: &Path, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let file_path = log_dir.join(LOG_FILE);
        let writer = Self::open_file(&file_path, max_size)?;
        Ok(Self {
            file_path,
            max_size,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        if Self::oversized(file_path, max_size) {
            Self::rotate_log(file_path)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        Ok(BufWriter::new(file))
    }

    fn oversized(file_path: &Path, max_size: u64) -> bool {
        fs::metadata(file_path)
            .map(|m| m.len() > max_size)
            .unwrap_or(false)
    }

    /// 当前日志改名为 `.old`，覆盖旧备份
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(file_path, &backup_path)
    }

    fn rotate_if_needed(&self, slot: &mut Option<BufWriter<File>>) -> io::Result<()> {
        if !Self::oversized(&self.file_path, self.max_size) {
            return Ok(());
        }
        if let Some(mut w) = slot.take() {
            let _ = w.flush();
        }
        Self::rotate_log(&self.file_path)?;
        *slot = Some(Self::open_file(&self.file_path, self.max_size)?);
        Ok(())
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut slot = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let written = match slot.as_mut() {
            Some(writer) => {
                let n = writer.write(buf)?;
                writer.flush()?;
                n
            }
            None => return Err(io::Error::other("日志写入器不可用")),
        };
        self.rotate_if_needed(&mut slot)?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut slot = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = SizeRotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// 日志目录
pub fn log_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("logs")
}

/// 初始化日志系统
///
/// 文件日志经 tracing-appender 的非阻塞写入器输出，返回的 guard 需要在程序结束前保持存活。
/// debug 构建同时输出到控制台。
pub fn init_logging(log_dir: &Path, config: &LogConfig) -> Option<WorkerGuard> {
    if !config.enabled {
        // 日志已禁用，只初始化一个空的 subscriber
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return None;
    }

    let env_filter = || {
        EnvFilter::builder()
            .with_default_directive(config.tracing_level().into())
            .from_env_lossy()
    };

    let file_writer = match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
        Ok(writer) => writer,
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            eprintln!("无法创建日志文件 {:?}: {}", log_dir, e);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .try_init();
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    // 在 debug 模式下也输出到控制台
    #[cfg(debug_assertions)]
    {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false);
        let subscriber = tracing_subscriber::registry()
            .with(env_filter())
            .with(file_layer)
            .with(console_layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    #[cfg(not(debug_assertions))]
    {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter())
            .with(file_layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_config_from_section() {
        let prefs = JsonPreferences::from_value(json!({
            "log": { "enabled": false, "maxSizeMb": 1, "level": "DEBUG" }
        }));
        let config = LogConfig::load(&prefs);
        assert!(!config.enabled);
        assert_eq!(config.max_size_mb, 1);
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);

        let config = LogConfig::load(&JsonPreferences::from_value(json!({})));
        assert!(config.enabled);
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_rotation_keeps_one_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SizeRotatingWriter::with_limit(dir.path(), 16).unwrap();
        writer.write_all(b"first line that is long\n").unwrap();
        writer.write_all(b"second\n").unwrap();

        let backup = dir.path().join("transfer.log.old");
        assert!(backup.exists());
        assert_eq!(
            fs::read_to_string(&backup).unwrap(),
            "first line that is long\n"
        );
        assert_eq!(fs::read_to_string(writer.path()).unwrap(), "second\n");
    }
}
