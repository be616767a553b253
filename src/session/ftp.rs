use super::remote::Backend;
use super::{Credentials, Host, Protocol};
use crate::error::{Result, TransferError};
use opendal::Operator;

pub struct FtpBackend;

impl Backend for FtpBackend {
    const PROTOCOL: Protocol = Protocol::Ftp;

    fn build(host: &Host, credentials: &Credentials) -> Result<Operator> {
        use opendal::services::Ftp;

        let endpoint = format!("ftp://{}:{}", host.hostname, host.port());
        let mut builder = Ftp::default().endpoint(&endpoint);

        // 未提供用户名时按匿名登录
        builder = builder.user(credentials.username.as_deref().unwrap_or("anonymous"));
        if let Some(password) = credentials.password.as_deref() {
            builder = builder.password(password);
        }
        if let Some(ref r) = host.path {
            builder = builder.root(r);
        }

        Ok(Operator::new(builder)
            .map_err(|e| TransferError::from_opendal(&endpoint, e))?
            .finish())
    }
}
