use serde::{Deserialize, Serialize};

/// 目标已存在时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferAction {
    Overwrite,
    Resume,
    Rename,
    RenameExisting,
    Skip,
    Compare,
    Prompt,
    Cancel,
}

impl std::fmt::Display for TransferAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferAction::Overwrite => write!(f, "overwrite"),
            TransferAction::Resume => write!(f, "resume"),
            TransferAction::Rename => write!(f, "rename"),
            TransferAction::RenameExisting => write!(f, "rename_existing"),
            TransferAction::Skip => write!(f, "skip"),
            TransferAction::Compare => write!(f, "compare"),
            TransferAction::Prompt => write!(f, "prompt"),
            TransferAction::Cancel => write!(f, "cancel"),
        }
    }
}

impl From<&str> for TransferAction {
    fn from(s: &str) -> Self {
        match s {
            "resume" => TransferAction::Resume,
            "rename" => TransferAction::Rename,
            "rename_existing" => TransferAction::RenameExisting,
            "skip" => TransferAction::Skip,
            "compare" => TransferAction::Compare,
            "prompt" => TransferAction::Prompt,
            "cancel" => TransferAction::Cancel,
            _ => TransferAction::Overwrite,
        }
    }
}

/// 拆分文件名为主干与扩展名（含点）。隐藏文件的前导点不算扩展名
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

/// Rename 策略的第 `n` 个候选名：`report-1.pdf`
pub fn rename_candidate(name: &str, n: u32) -> String {
    let (stem, ext) = split_extension(name);
    format!("{}-{}{}", stem, n, ext)
}

/// 为已存在的目标生成让位名称：`report_conflict_20240101_120000.pdf`
pub fn generate_conflict_name(name: &str, timestamp: i64) -> String {
    use chrono::DateTime;

    let dt = DateTime::from_timestamp(timestamp, 0)
        .map(|d| d.format("%Y%m%d_%H%M%S").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let (stem, ext) = split_extension(name);
    format!("{}_conflict_{}{}", stem, dt, ext)
}
