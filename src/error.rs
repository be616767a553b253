//! 错误类型
//!
//! 会话层把底层传输错误（opendal、std::io）统一翻译为带路径的错误，
//! 调用方据此只失效受影响的缓存条目。核心内部不做重试。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// 用户或系统在完成前中止，不自动重试
    #[error("连接已取消")]
    ConnectionCanceled,

    /// 凭据输入流程被中止
    #[error("登录已取消")]
    LoginCanceled,

    /// 服务端拒绝了凭据
    #[error("登录失败: {message}")]
    LoginFailure { message: String },

    #[error("无法解析主机: {host}")]
    UnknownHost { host: String },

    /// 进行中的操作发生 I/O 错误
    #[error("传输失败 {path}: {message}")]
    Transport { path: String, message: String },

    /// 后端返回了语义上无效的响应，例如上传后校验和不一致
    #[error("协议错误 {path}: {message}")]
    Protocol { path: String, message: String },

    /// 续传时可跳过/恢复的字节数不足
    #[error("续传失败 {path}: 需要 {expected} 字节, 实际 {actual} 字节")]
    Resume {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("文件不存在: {path}")]
    NotFound { path: String },

    #[error("不支持的操作 {operation}: {path}")]
    Unsupported { operation: String, path: String },

    #[error("配置错误: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TransferError>;

impl TransferError {
    pub fn transport(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn protocol(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Protocol {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn unsupported(operation: &str, path: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.to_string(),
            path: path.into(),
        }
    }

    /// 出错的资源路径（仅路径相关的错误才有）
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Transport { path, .. }
            | Self::Protocol { path, .. }
            | Self::Resume { path, .. }
            | Self::NotFound { path }
            | Self::Unsupported { path, .. } => Some(path),
            _ => None,
        }
    }

    /// 是否属于取消类错误（不算失败）
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::ConnectionCanceled | Self::LoginCanceled)
    }

    /// 连接级的致命错误，出现后会话必须丢弃重建
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::UnknownHost { .. })
    }

    /// 把 opendal 错误翻译为带路径的错误
    pub fn from_opendal(path: &str, err: opendal::Error) -> Self {
        use opendal::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => Self::NotFound {
                path: path.to_string(),
            },
            ErrorKind::PermissionDenied => Self::LoginFailure {
                message: err.to_string(),
            },
            // opendal 不公开操作名，错误文本里已带上
            ErrorKind::Unsupported => Self::unsupported(&err.to_string(), path),
            ErrorKind::ConfigInvalid => Self::Config(err.to_string()),
            ErrorKind::IsADirectory
            | ErrorKind::NotADirectory
            | ErrorKind::AlreadyExists
            | ErrorKind::ConditionNotMatch
            | ErrorKind::IsSameFile
            | ErrorKind::RangeNotSatisfied => Self::protocol(path, err),
            _ => {
                let message = err.to_string();
                let lowered = message.to_lowercase();
                if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
                    Self::UnknownHost { host: path.to_string() }
                } else {
                    Self::transport(path, message)
                }
            }
        }
    }

    /// 把本地 I/O 错误翻译为带路径的错误
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_string(),
            },
            std::io::ErrorKind::Unsupported => Self::unsupported("io", path),
            _ => Self::transport(path, err),
        }
    }
}
