use super::{
    BackendOptions, ByteStream, Capabilities, Protocol, ProtocolSession, StreamingBridge,
};
use crate::core::checksum::ChecksumHasher;
use crate::core::resource::{normalize, Attributes, Checksum, HashAlgorithm, Resource, ResourceType};
use crate::core::status::TransferStatus;
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use futures::StreamExt;
use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use walkdir::WalkDir;

/// 本地文件系统，资源路径相对于根目录
pub struct LocalSession {
    base_path: PathBuf,
    options: BackendOptions,
}

impl LocalSession {
    pub fn new(path: &str, options: BackendOptions) -> Self {
        Self {
            base_path: PathBuf::from(path),
            options,
        }
    }

    fn resolve_path(&self, resource: &Resource) -> PathBuf {
        let path = resource.path().trim_start_matches('/');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    fn millis(time: std::io::Result<SystemTime>) -> i64 {
        time.ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(-1, |d| d.as_millis() as i64)
    }

    fn attributes_of(metadata: &Metadata) -> Attributes {
        let mut attributes = Attributes::default();
        if !metadata.is_dir() {
            attributes.size = metadata.len() as i64;
        }
        attributes.modified = Self::millis(metadata.modified());
        attributes.created = Self::millis(metadata.created());
        attributes.accessed = Self::millis(metadata.accessed());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            attributes.permission = Some(metadata.permissions().mode() & 0o7777);
        }
        attributes
    }

    /// 把磁盘上的条目转换为资源。符号链接目标换算为会话内的绝对路径
    fn resource_of(base: &Path, full: &Path) -> Option<Resource> {
        let relative = full.strip_prefix(base).ok()?.to_str()?.replace('\\', "/");
        let link = std::fs::symlink_metadata(full).ok()?;
        let is_link = link.file_type().is_symlink();
        // 链接按其指向的类型归类，悬空链接视为文件
        let metadata = if is_link {
            std::fs::metadata(full).unwrap_or(link)
        } else {
            link
        };

        let mut kind = if metadata.is_dir() {
            ResourceType::DIRECTORY
        } else {
            ResourceType::FILE
        };
        if is_link {
            kind |= ResourceType::SYMBOLIC_LINK;
        }
        let mut resource = Resource::new(&relative, kind);
        if is_link {
            if let Ok(target) = std::fs::read_link(full) {
                let absolute = if target.is_absolute() {
                    target
                } else {
                    full.parent().map(|p| p.join(&target)).unwrap_or(target)
                };
                let mapped = match absolute.strip_prefix(base) {
                    Ok(inside) => normalize(&inside.to_string_lossy()),
                    Err(_) => absolute.to_string_lossy().into_owned(),
                };
                resource.symlink_target = Some(mapped);
            }
        }
        Some(resource.with_attributes(Self::attributes_of(&metadata)))
    }

    fn map_io(resource: &Resource) -> impl Fn(std::io::Error) -> TransferError + '_ {
        move |e| TransferError::from_io(resource.path(), e)
    }
}

#[async_trait]
impl ProtocolSession for LocalSession {
    fn protocol(&self) -> Protocol {
        Protocol::Local
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            append: true,
            rename: true,
            copy: true,
            symlink: cfg!(unix),
            timestamp: true,
            permission: cfg!(unix),
            metadata: false,
        }
    }

    async fn open(&self) -> Result<()> {
        if !self.base_path.exists() {
            fs::create_dir_all(&self.base_path)
                .await
                .map_err(|e| TransferError::from_io(&self.base_path.to_string_lossy(), e))?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        fs::metadata(&self.base_path)
            .await
            .map(|_| ())
            .map_err(|e| TransferError::from_io(&self.base_path.to_string_lossy(), e))
    }

    async fn list(&self, directory: &Resource) -> Result<Vec<Resource>> {
        let dir = self.resolve_path(directory);
        let base = self.base_path.clone();
        let path = directory.path().to_string();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || -> Result<Vec<Resource>> {
            let entries = std::fs::read_dir(&dir).map_err(|e| TransferError::from_io(&path, e))?;
            Ok(entries
                .filter_map(|e| e.ok())
                .filter_map(|entry| Self::resource_of(&base, &entry.path()))
                .collect())
        })
        .await
        .map_err(|e| TransferError::transport(directory.path(), e))?
    }

    async fn list_recursive(&self, directory: &Resource) -> Result<Vec<Resource>> {
        let root = self.resolve_path(directory);
        let base = self.base_path.clone();
        let path = directory.path().to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<Resource>> {
            if !root.exists() {
                return Err(TransferError::NotFound { path });
            }
            Ok(WalkDir::new(&root)
                .follow_links(false)
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter_map(|entry| Self::resource_of(&base, entry.path()))
                .collect())
        })
        .await
        .map_err(|e| TransferError::transport(directory.path(), e))?
    }

    async fn attributes(&self, resource: &Resource) -> Result<Attributes> {
        let metadata = fs::metadata(self.resolve_path(resource))
            .await
            .map_err(Self::map_io(resource))?;
        Ok(Self::attributes_of(&metadata))
    }

    async fn read(&self, file: &Resource, offset: u64) -> Result<ByteStream> {
        let mut handle = fs::File::open(self.resolve_path(file))
            .await
            .map_err(Self::map_io(file))?;
        if offset > 0 {
            handle
                .seek(SeekFrom::Start(offset))
                .await
                .map_err(Self::map_io(file))?;
        }
        let path = file.path().to_string();
        let stream = ReaderStream::with_capacity(handle, self.options.chunk_size as usize)
            .map(move |chunk| chunk.map_err(|e| TransferError::from_io(&path, e)));
        Ok(stream.boxed())
    }

    async fn write(
        &self,
        file: &Resource,
        status: &TransferStatus,
    ) -> Result<StreamingBridge<Attributes>> {
        let full_path = self.resolve_path(file);
        let display = file.path().to_string();
        let append = status.resume;

        Ok(StreamingBridge::spawn(
            file.path(),
            self.options.buffer,
            move |mut body| async move {
                let err = |e| TransferError::from_io(&display, e);
                if let Some(parent) = full_path.parent() {
                    fs::create_dir_all(parent).await.map_err(err)?;
                }
                let mut handle = fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(append)
                    .truncate(!append)
                    .open(&full_path)
                    .await
                    .map_err(err)?;
                while let Some(chunk) = body.next().await {
                    handle.write_all(&chunk?).await.map_err(err)?;
                }
                handle.flush().await.map_err(err)?;
                let metadata = handle.metadata().await.map_err(err)?;
                Ok(Self::attributes_of(&metadata))
            },
        ))
    }

    async fn delete(&self, resource: &Resource) -> Result<()> {
        let full_path = self.resolve_path(resource);
        let metadata = match fs::symlink_metadata(&full_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(TransferError::from_io(resource.path(), e)),
        };
        if metadata.is_dir() {
            fs::remove_dir_all(&full_path).await
        } else {
            fs::remove_file(&full_path).await
        }
        .map_err(Self::map_io(resource))
    }

    async fn rename(&self, from: &Resource, to: &Resource) -> Result<()> {
        fs::rename(self.resolve_path(from), self.resolve_path(to))
            .await
            .map_err(Self::map_io(from))
    }

    async fn mkdir(&self, directory: &Resource) -> Result<()> {
        fs::create_dir_all(self.resolve_path(directory))
            .await
            .map_err(Self::map_io(directory))
    }

    async fn copy(&self, from: &Resource, to: &Resource) -> Result<()> {
        let target = self.resolve_path(to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(Self::map_io(to))?;
        }
        fs::copy(self.resolve_path(from), target)
            .await
            .map(|_| ())
            .map_err(Self::map_io(from))
    }

    #[cfg(unix)]
    async fn symlink(&self, link: &Resource, target: &str) -> Result<()> {
        let full_path = self.resolve_path(link);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(Self::map_io(link))?;
        }
        // 覆盖已有条目
        let _ = fs::remove_file(&full_path).await;
        fs::symlink(target, &full_path)
            .await
            .map_err(Self::map_io(link))
    }

    async fn set_timestamp(&self, resource: &Resource, modified: i64) -> Result<()> {
        if modified < 0 {
            return Ok(());
        }
        let full_path = self.resolve_path(resource);
        let path = resource.path().to_string();
        let time = UNIX_EPOCH + Duration::from_millis(modified as u64);
        tokio::task::spawn_blocking(move || {
            std::fs::File::options()
                .write(true)
                .open(&full_path)
                .and_then(|f| f.set_modified(time))
                .map_err(|e| TransferError::from_io(&path, e))
        })
        .await
        .map_err(|e| TransferError::transport(resource.path(), e))?
    }

    #[cfg(unix)]
    async fn set_permission(&self, resource: &Resource, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(
            self.resolve_path(resource),
            std::fs::Permissions::from_mode(mode),
        )
        .await
        .map_err(Self::map_io(resource))
    }

    async fn checksum(&self, file: &Resource, algorithm: HashAlgorithm) -> Result<Option<Checksum>> {
        let mut hasher = ChecksumHasher::new(algorithm);
        let mut stream = self.read(file, 0).await?;
        while let Some(chunk) = stream.next().await {
            hasher.update(&chunk?);
        }
        Ok(Some(hasher.finish()))
    }

    fn checksum_algorithm(&self) -> Option<HashAlgorithm> {
        Some(HashAlgorithm::Sha256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn session(dir: &tempfile::TempDir) -> LocalSession {
        LocalSession::new(dir.path().to_str().unwrap(), BackendOptions::default())
    }

    async fn write_all(session: &LocalSession, file: &Resource, resume: bool, data: &[u8]) -> Attributes {
        let mut status = TransferStatus::new();
        status.resume = resume;
        let mut bridge = session.write(file, &status).await.unwrap();
        let sink = bridge.sink().await.unwrap();
        sink.write(Bytes::copy_from_slice(data)).await.unwrap();
        sink.close();
        bridge.response().await.unwrap()
    }

    #[tokio::test]
    async fn test_write_list_read() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        let file = Resource::file("/docs/a.txt");

        let attributes = write_all(&session, &file, false, b"hello").await;
        assert_eq!(attributes.size, 5);

        let listing = session.list(&Resource::directory("/docs")).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path(), "/docs/a.txt");
        assert!(listing[0].is_file());

        let mut stream = session.read(&file, 1).await.unwrap();
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(data, b"ello");
    }

    #[tokio::test]
    async fn test_append_resume() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        let file = Resource::file("/a.bin");
        write_all(&session, &file, false, b"abc").await;
        let attributes = write_all(&session, &file, true, b"def").await;
        assert_eq!(attributes.size, 6);
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_recursive_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("x/y")).unwrap();
        std::fs::write(dir.path().join("x/y/z.txt"), b"z").unwrap();
        let session = session(&dir);

        let all = session.list_recursive(&Resource::root()).await.unwrap();
        let paths: Vec<&str> = all.iter().map(|r| r.path()).collect();
        assert!(paths.contains(&"/x"));
        assert!(paths.contains(&"/x/y/z.txt"));

        let err = session.list(&Resource::directory("/missing")).await.unwrap_err();
        assert!(matches!(err, TransferError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_timestamp_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        let file = Resource::file("/t.txt");
        write_all(&session, &file, false, b"abc").await;

        session.set_timestamp(&file, 1_000_000).await.unwrap();
        assert_eq!(session.attributes(&file).await.unwrap().modified, 1_000_000);

        let sum = session
            .checksum(&file, HashAlgorithm::Sha256)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            sum.hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_target_is_session_path() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        write_all(&session, &Resource::file("/data/real.txt"), false, b"x").await;
        session
            .symlink(&Resource::file("/links/l.txt"), "../data/real.txt")
            .await
            .unwrap();

        let listing = session.list(&Resource::directory("/links")).await.unwrap();
        assert!(listing[0].is_symlink());
        assert_eq!(listing[0].symlink_target.as_deref(), Some("/data/real.txt"));
    }
}
