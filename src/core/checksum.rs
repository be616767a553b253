//! 校验和计算
//!
//! 传输中边读边算，避免为了校验再读一遍文件。

use super::resource::{Checksum, HashAlgorithm};
use sha2::{Digest, Sha256};

/// 流式哈希器
pub enum ChecksumHasher {
    /// 与对象存储单段上传的 etag 对比
    Md5(md5::Context),
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl ChecksumHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(md5::Context::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(context) => context.consume(data),
            Self::Sha256(hasher) => hasher.update(data),
            Self::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    pub fn finish(self) -> Checksum {
        match self {
            Self::Md5(context) => {
                Checksum::new(HashAlgorithm::Md5, format!("{:x}", context.compute()))
            }
            Self::Sha256(hasher) => Checksum::new(HashAlgorithm::Sha256, hex(&hasher.finalize())),
            Self::Blake3(hasher) => {
                Checksum::new(HashAlgorithm::Blake3, hasher.finalize().to_hex().to_string())
            }
        }
    }
}

/// 计算整块数据的校验和
pub fn calculate(algorithm: HashAlgorithm, data: &[u8]) -> Checksum {
    let mut hasher = ChecksumHasher::new(algorithm);
    hasher.update(data);
    hasher.finish()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
