//! 单个文件一次传输尝试的状态

use super::resource::{Checksum, Resource};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferStatus {
    /// 需要传输的总长度
    pub length: u64,
    /// 已完成字节数，续传时从目标现有大小开始
    pub current: u64,
    /// 续传（追加写入目标）
    pub resume: bool,
    /// 目标在传输前已存在
    pub exists: bool,
    pub complete: bool,
    /// 目标改写后的路径（Rename 策略）
    pub rename: Option<Resource>,
    /// 不复制内容，改为创建指向该路径的链接
    pub symlink: Option<String>,
    /// 传输过程中计算出的校验和
    pub checksum: Option<Checksum>,
}

impl TransferStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    pub fn exists(mut self, exists: bool) -> Self {
        self.exists = exists;
        self
    }

    /// 从 `offset` 处续传
    pub fn resume_at(&mut self, offset: u64) {
        self.resume = true;
        self.current = offset.min(self.length);
    }

    /// 剩余待传输字节数
    pub fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.current)
    }

    /// 记录已传输字节，长度已知时不超过总长度
    pub fn progress(&mut self, bytes: u64) {
        self.current = self.current.saturating_add(bytes);
        if self.length > 0 {
            self.current = self.current.min(self.length);
        }
    }

    pub fn set_complete(&mut self) {
        self.complete = true;
    }

    /// 实际写入的目标
    pub fn target<'a>(&'a self, target: &'a Resource) -> &'a Resource {
        self.rename.as_ref().unwrap_or(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_seeds_current() {
        let mut status = TransferStatus::new().with_length(100).exists(true);
        status.resume_at(40);
        assert!(status.resume);
        assert_eq!(status.current, 40);
        assert_eq!(status.remaining(), 60);
    }

    #[test]
    fn test_progress_never_exceeds_length() {
        let mut status = TransferStatus::new().with_length(10);
        status.progress(8);
        status.progress(8);
        assert_eq!(status.current, 10);
        assert_eq!(status.remaining(), 0);
    }

    #[test]
    fn test_rename_target() {
        let original = Resource::file("/a.txt");
        let mut status = TransferStatus::new();
        assert_eq!(status.target(&original), &original);
        status.rename = Some(Resource::file("/a-1.txt"));
        assert_eq!(status.target(&original).path(), "/a-1.txt");
    }
}
