use super::remote::Backend;
use super::{Credentials, Host, Protocol};
use crate::error::{Result, TransferError};
use opendal::Operator;

/// SFTP，认证交给 OpenSSH（私钥或 agent）
pub struct SftpBackend;

impl Backend for SftpBackend {
    const PROTOCOL: Protocol = Protocol::Sftp;

    fn build(host: &Host, credentials: &Credentials) -> Result<Operator> {
        use opendal::services::Sftp;

        let endpoint = format!("ssh://{}:{}", host.hostname, host.port());
        let mut builder = Sftp::default().endpoint(&endpoint);

        if let Some(user) = credentials.username.as_deref() {
            builder = builder.user(user);
        }
        if let Some(key) = credentials.identity.as_deref() {
            builder = builder.key(key);
        }
        if let Some(ref r) = host.path {
            builder = builder.root(r);
        }

        Ok(Operator::new(builder)
            .map_err(|e| TransferError::from_opendal(&endpoint, e))?
            .finish())
    }
}
