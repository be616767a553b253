use super::remote::Backend;
use super::{Credentials, Host, Protocol};
use crate::error::{Result, TransferError};
use opendal::Operator;

/// OpenStack Swift 风格对象存储
pub struct SwiftBackend;

impl Backend for SwiftBackend {
    const PROTOCOL: Protocol = Protocol::Swift;
    const PLACEHOLDERS: bool = true;
    const ETAG_CHECKSUM: bool = true;
    const METADATA: bool = true;

    fn build(host: &Host, credentials: &Credentials) -> Result<Operator> {
        use opendal::services::Swift;

        let container = host
            .container
            .as_deref()
            .ok_or_else(|| TransferError::Config("Swift 会话需要 container".to_string()))?;
        let endpoint = host
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}:{}", host.hostname, host.port()));

        let mut builder = Swift::default().endpoint(&endpoint).container(container);

        if let Some(token) = credentials.token.as_deref().or(credentials.password.as_deref()) {
            builder = builder.token(token);
        }
        if let Some(ref r) = host.path {
            builder = builder.root(r);
        }

        Ok(Operator::new(builder)
            .map_err(|e| TransferError::from_opendal(container, e))?
            .finish())
    }
}
