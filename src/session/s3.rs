use super::remote::Backend;
use super::{Credentials, Host, Protocol};
use crate::error::{Result, TransferError};
use opendal::Operator;

/// S3 兼容对象存储
pub struct S3Backend;

impl Backend for S3Backend {
    const PROTOCOL: Protocol = Protocol::S3;
    const PLACEHOLDERS: bool = true;
    const ETAG_CHECKSUM: bool = true;
    const METADATA: bool = true;

    fn build(host: &Host, credentials: &Credentials) -> Result<Operator> {
        use opendal::services::S3;

        let bucket = host
            .bucket
            .as_deref()
            .ok_or_else(|| TransferError::Config("S3 会话需要 bucket".to_string()))?;
        let region = host.region.as_deref().unwrap_or("us-east-1");

        let mut builder = S3::default().bucket(bucket).region(region);

        if let Some(access_key) = credentials.username.as_deref() {
            builder = builder.access_key_id(access_key);
        }
        if let Some(secret_key) = credentials.password.as_deref() {
            builder = builder.secret_access_key(secret_key);
        }

        let endpoint = host.endpoint.clone().or_else(|| {
            (!host.hostname.is_empty()).then(|| format!("https://{}:{}", host.hostname, host.port()))
        });
        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(ref p) = host.path {
            builder = builder.root(p);
        }

        tracing::info!("初始化S3会话: bucket={}, region={}", bucket, region);
        Ok(Operator::new(builder)
            .map_err(|e| TransferError::from_opendal(bucket, e))?
            .finish())
    }
}
