//! 基于 opendal 的远程会话
//!
//! 各协议模块只负责构建 `Operator` 并声明方言，其余协议操作共用这里的实现。

use super::{
    BackendOptions, ByteStream, Capabilities, Credentials, Host, Protocol, ProtocolSession,
    StreamingBridge,
};
use crate::core::resource::{Attributes, Checksum, HashAlgorithm, Resource, ResourceType};
use crate::core::status::TransferStatus;
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use opendal::{layers::TimeoutLayer, Metadata, Metakey, Operator};
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::debug;

/// 协议方言
pub trait Backend: Send + Sync + 'static {
    const PROTOCOL: Protocol;
    /// 对象存储：目录以 `name/` 零字节占位对象表示
    const PLACEHOLDERS: bool = false;
    /// etag 即内容 MD5（单段上传时）
    const ETAG_CHECKSUM: bool = false;
    /// 支持 content-type 等对象元数据
    const METADATA: bool = false;

    fn build(host: &Host, credentials: &Credentials) -> Result<Operator>;
}

pub struct RemoteSession<B: Backend> {
    operator: Operator,
    options: BackendOptions,
    name: String,
    _backend: PhantomData<B>,
}

impl<B: Backend> RemoteSession<B> {
    pub fn new(host: &Host, credentials: &Credentials, options: BackendOptions) -> Result<Self> {
        // 添加超时层
        let operator = B::build(host, credentials)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(options.timeout)
                    .with_io_timeout(options.io_timeout),
            );
        let name = host.url();
        debug!("初始化{}会话: {}", B::PROTOCOL, name);
        Ok(Self {
            operator,
            options,
            name,
            _backend: PhantomData,
        })
    }

    /// 资源路径到 opendal 路径：去掉前导分隔符，目录带结尾分隔符
    fn op_path(resource: &Resource) -> String {
        if resource.is_root() {
            return "/".to_string();
        }
        let path = resource.path().trim_start_matches('/');
        if resource.is_directory() {
            format!("{}/", path)
        } else {
            path.to_string()
        }
    }

    fn attributes_of(meta: &Metadata) -> Attributes {
        let mut attributes = Attributes::default();
        if !meta.is_dir() {
            attributes.size = meta.content_length() as i64;
        }
        if let Some(modified) = meta.last_modified() {
            attributes.modified = modified.timestamp_millis();
        }
        attributes.etag = meta.etag().map(|s| s.trim_matches('"').to_string());
        attributes.version_id = meta.version().map(str::to_string);
        attributes.placeholder = B::PLACEHOLDERS && meta.is_dir();
        if B::ETAG_CHECKSUM {
            attributes.checksum = meta
                .content_md5()
                .and_then(Checksum::from_etag)
                .or_else(|| attributes.etag.as_deref().and_then(Checksum::from_etag));
        }
        if let Some(content_type) = meta.content_type() {
            attributes
                .metadata
                .insert("Content-Type".to_string(), content_type.to_string());
        }
        attributes
    }

    fn resource_of(path: &str, meta: &Metadata) -> Resource {
        let kind = if meta.is_dir() {
            ResourceType::DIRECTORY
        } else {
            ResourceType::FILE
        };
        Resource::new(path, kind).with_attributes(Self::attributes_of(meta))
    }

    fn map_err(&self, resource: &Resource) -> impl Fn(opendal::Error) -> TransferError + '_ {
        let path = resource.path().to_string();
        move |e| TransferError::from_opendal(&path, e)
    }

    async fn collect(&self, directory: &Resource, recursive: bool) -> Result<Vec<Resource>> {
        let dir_path = Self::op_path(directory);
        let mut lister = self
            .operator
            .lister_with(&dir_path)
            .recursive(recursive)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await
            .map_err(self.map_err(directory))?;

        let mut children = Vec::new();
        while let Some(entry) = lister.try_next().await.map_err(self.map_err(directory))? {
            let resource = Self::resource_of(entry.path(), entry.metadata());
            // 部分服务会把目录本身也列出来
            if resource.path() == directory.path() {
                continue;
            }
            children.push(resource);
        }
        Ok(children)
    }
}

#[async_trait]
impl<B: Backend> ProtocolSession for RemoteSession<B> {
    fn protocol(&self) -> Protocol {
        B::PROTOCOL
    }

    fn capabilities(&self) -> Capabilities {
        let cap = self.operator.info().full_capability();
        Capabilities {
            append: cap.write_can_append,
            rename: cap.rename,
            copy: cap.copy,
            symlink: false,
            timestamp: false,
            permission: false,
            metadata: B::METADATA,
        }
    }

    async fn open(&self) -> Result<()> {
        self.operator
            .check()
            .await
            .map_err(|e| TransferError::from_opendal(&self.name, e))
    }

    async fn ping(&self) -> Result<()> {
        self.operator
            .stat("/")
            .await
            .map(|_| ())
            .or_else(|e| match e.kind() {
                // 对象存储的根目录没有占位对象
                opendal::ErrorKind::NotFound => Ok(()),
                _ => Err(TransferError::from_opendal(&self.name, e)),
            })
    }

    async fn list(&self, directory: &Resource) -> Result<Vec<Resource>> {
        self.collect(directory, false).await
    }

    async fn list_recursive(&self, directory: &Resource) -> Result<Vec<Resource>> {
        let mut all = self.collect(directory, true).await?;
        // 保证父目录排在子项之前
        all.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(all)
    }

    async fn attributes(&self, resource: &Resource) -> Result<Attributes> {
        let meta = self
            .operator
            .stat(&Self::op_path(resource))
            .await
            .map_err(self.map_err(resource))?;
        Ok(Self::attributes_of(&meta))
    }

    async fn read(&self, file: &Resource, offset: u64) -> Result<ByteStream> {
        let length = match file.attributes.known_size() {
            Some(size) => size,
            None => self.attributes(file).await?.known_size().unwrap_or(0),
        };
        let operator = self.operator.clone();
        let path = Self::op_path(file);
        let display = file.path().to_string();
        let chunk = self.options.chunk_size.max(1);

        let stream = futures::stream::try_unfold(offset, move |pos| {
            let operator = operator.clone();
            let path = path.clone();
            let display = display.clone();
            async move {
                if pos >= length {
                    return Ok(None);
                }
                let end = (pos + chunk).min(length);
                let buffer = operator
                    .read_with(&path)
                    .range(pos..end)
                    .await
                    .map_err(|e| TransferError::from_opendal(&display, e))?;
                let bytes = buffer.to_bytes();
                if bytes.is_empty() {
                    return Err(TransferError::Resume {
                        path: display,
                        expected: length,
                        actual: pos,
                    });
                }
                let next = pos + bytes.len() as u64;
                Ok(Some((bytes, next)))
            }
        });
        Ok(stream.boxed())
    }

    async fn write(
        &self,
        file: &Resource,
        status: &TransferStatus,
    ) -> Result<StreamingBridge<Attributes>> {
        let operator = self.operator.clone();
        let path = Self::op_path(file);
        let display = file.path().to_string();
        let append = status.resume;

        Ok(StreamingBridge::spawn(
            file.path(),
            self.options.buffer,
            move |mut body| async move {
                let err = |e| TransferError::from_opendal(&display, e);
                let mut writer = operator
                    .writer_with(&path)
                    .append(append)
                    .await
                    .map_err(err)?;
                while let Some(chunk) = body.next().await {
                    writer.write(chunk?).await.map_err(err)?;
                }
                writer.close().await.map_err(err)?;
                let meta = operator.stat(&path).await.map_err(err)?;
                Ok(Self::attributes_of(&meta))
            },
        ))
    }

    async fn delete(&self, resource: &Resource) -> Result<()> {
        let path = Self::op_path(resource);
        let result = if resource.is_directory() {
            self.operator.remove_all(&path).await
        } else {
            self.operator.delete(&path).await
        };
        result.map_err(self.map_err(resource))
    }

    async fn rename(&self, from: &Resource, to: &Resource) -> Result<()> {
        if from.is_directory() {
            return Err(TransferError::unsupported("rename", from.path()));
        }
        self.operator
            .rename(&Self::op_path(from), &Self::op_path(to))
            .await
            .map_err(self.map_err(from))
    }

    async fn mkdir(&self, directory: &Resource) -> Result<()> {
        self.operator
            .create_dir(&Self::op_path(directory))
            .await
            .map_err(self.map_err(directory))
    }

    async fn copy(&self, from: &Resource, to: &Resource) -> Result<()> {
        if from.is_directory() {
            return Err(TransferError::unsupported("copy", from.path()));
        }
        self.operator
            .copy(&Self::op_path(from), &Self::op_path(to))
            .await
            .map_err(self.map_err(from))
    }

    async fn read_metadata(&self, resource: &Resource) -> Result<HashMap<String, String>> {
        let meta = self
            .operator
            .stat(&Self::op_path(resource))
            .await
            .map_err(self.map_err(resource))?;
        let mut metadata = HashMap::new();
        if let Some(v) = meta.content_type() {
            metadata.insert("Content-Type".to_string(), v.to_string());
        }
        if let Some(v) = meta.cache_control() {
            metadata.insert("Cache-Control".to_string(), v.to_string());
        }
        if let Some(v) = meta.content_disposition() {
            metadata.insert("Content-Disposition".to_string(), v.to_string());
        }
        Ok(metadata)
    }

    /// 对象元数据不可单独修改，只能连同内容重写一次
    async fn write_metadata(
        &self,
        resource: &Resource,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        if !B::METADATA || resource.is_directory() {
            return Err(TransferError::unsupported("write_metadata", resource.path()));
        }
        let path = Self::op_path(resource);
        let data = self
            .operator
            .read(&path)
            .await
            .map_err(self.map_err(resource))?;
        let mut write = self.operator.write_with(&path, data);
        for (key, value) in metadata {
            write = match key.to_ascii_lowercase().as_str() {
                "content-type" => write.content_type(value),
                "cache-control" => write.cache_control(value),
                "content-disposition" => write.content_disposition(value),
                _ => {
                    debug!("忽略不支持的元数据 {}: {}", key, resource);
                    write
                }
            };
        }
        write.await.map_err(self.map_err(resource))
    }

    async fn checksum(&self, file: &Resource, algorithm: HashAlgorithm) -> Result<Option<Checksum>> {
        if algorithm != HashAlgorithm::Md5 || !B::ETAG_CHECKSUM {
            return Ok(None);
        }
        Ok(self.attributes(file).await?.checksum)
    }

    fn checksum_algorithm(&self) -> Option<HashAlgorithm> {
        B::ETAG_CHECKSUM.then_some(HashAlgorithm::Md5)
    }
}
