use super::remote::Backend;
use super::{Credentials, Host, Protocol};
use crate::error::{Result, TransferError};
use opendal::Operator;

pub struct WebDavBackend;

impl Backend for WebDavBackend {
    const PROTOCOL: Protocol = Protocol::WebDav;

    fn build(host: &Host, credentials: &Credentials) -> Result<Operator> {
        use opendal::services::Webdav;

        let endpoint = host
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}:{}", host.hostname, host.port()));

        let mut builder = Webdav::default().endpoint(&endpoint);

        if let Some(username) = credentials.username.as_deref() {
            builder = builder.username(username);
        }
        if let Some(password) = credentials.password.as_deref() {
            builder = builder.password(password);
        }
        if let Some(ref r) = host.path {
            builder = builder.root(r);
        }

        tracing::info!("创建WebDAV会话: endpoint={}, root={:?}", endpoint, host.path);
        Ok(Operator::new(builder)
            .map_err(|e| TransferError::from_opendal(&endpoint, e))?
            .finish())
    }
}
