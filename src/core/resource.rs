//! 远程资源句柄
//!
//! `Resource` 是廉价的值对象：路径 + 类型位 + 可变属性。
//! 缓存身份由规范化路径派生（`ReferenceKey`），与属性无关。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

pub const DELIMITER: char = '/';

/// 资源类型位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceType(u8);

impl ResourceType {
    pub const FILE: Self = Self(1);
    pub const DIRECTORY: Self = Self(1 << 1);
    pub const SYMBOLIC_LINK: Self = Self(1 << 2);
    pub const VOLUME: Self = Self(1 << 3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for ResourceType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ResourceType {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// 校验和算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    Blake3,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Md5 => write!(f, "md5"),
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub hash: String,
}

impl Checksum {
    pub fn new(algorithm: HashAlgorithm, hash: impl Into<String>) -> Self {
        Self {
            algorithm,
            hash: hash.into().to_lowercase(),
        }
    }

    /// 从 etag 推断校验和：单段上传的 S3 etag 即内容的 MD5
    pub fn from_etag(etag: &str) -> Option<Self> {
        let etag = etag.trim_matches('"');
        if etag.len() == 32 && etag.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self::new(HashAlgorithm::Md5, etag))
        } else {
            None
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

/// 可变属性集合。大小与时间戳未知时为 -1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
    pub size: i64,
    /// 毫秒时间戳
    pub modified: i64,
    pub created: i64,
    pub accessed: i64,
    pub owner: Option<String>,
    pub group: Option<String>,
    /// Unix 权限位
    pub permission: Option<u32>,
    pub acl: Option<String>,
    pub checksum: Option<Checksum>,
    pub etag: Option<String>,
    pub storage_class: Option<String>,
    pub encryption: Option<String>,
    pub version_id: Option<String>,
    pub revision: Option<u64>,
    pub duplicate: bool,
    /// 对象存储中的目录占位对象
    pub placeholder: bool,
    pub metadata: HashMap<String, String>,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            size: -1,
            modified: -1,
            created: -1,
            accessed: -1,
            owner: None,
            group: None,
            permission: None,
            acl: None,
            checksum: None,
            etag: None,
            storage_class: None,
            encryption: None,
            version_id: None,
            revision: None,
            duplicate: false,
            placeholder: false,
            metadata: HashMap::new(),
        }
    }
}

impl Attributes {
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size as i64;
        self
    }

    pub fn with_modified(mut self, millis: i64) -> Self {
        self.modified = millis;
        self
    }

    /// 已知大小，未知时为 None
    pub fn known_size(&self) -> Option<u64> {
        (self.size >= 0).then_some(self.size as u64)
    }

    pub fn known_modified(&self) -> Option<i64> {
        (self.modified >= 0).then_some(self.modified)
    }
}

/// 缓存查找用的身份键：规范化路径 + 是否为目录
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceKey {
    path: String,
    directory: bool,
}

impl ReferenceKey {
    pub fn new(path: &str, directory: bool) -> Self {
        Self {
            path: normalize(path),
            directory,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.directory {
            write!(f, "[d]{}", self.path)
        } else {
            write!(f, "[f]{}", self.path)
        }
    }
}

/// 规范化绝对路径：合并分隔符、解析 `.` 与 `..`、去掉末尾分隔符
pub fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(DELIMITER) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

/// 一个文件、目录、卷或符号链接
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    path: String,
    kind: ResourceType,
    pub attributes: Attributes,
    /// 符号链接目标（绝对路径）
    pub symlink_target: Option<String>,
}

impl Resource {
    pub fn new(path: &str, kind: ResourceType) -> Self {
        Self {
            path: normalize(path),
            kind,
            attributes: Attributes::default(),
            symlink_target: None,
        }
    }

    pub fn file(path: &str) -> Self {
        Self::new(path, ResourceType::FILE)
    }

    pub fn directory(path: &str) -> Self {
        Self::new(path, ResourceType::DIRECTORY)
    }

    pub fn root() -> Self {
        Self::new("/", ResourceType::DIRECTORY | ResourceType::VOLUME)
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// 在本目录下创建子资源
    pub fn child(&self, name: &str, kind: ResourceType) -> Self {
        Self::new(&format!("{}/{}", self.path, name), kind)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> ResourceType {
        self.kind
    }

    pub fn name(&self) -> &str {
        self.path.rsplit(DELIMITER).next().unwrap_or("")
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    pub fn parent(&self) -> Option<Resource> {
        if self.is_root() {
            return None;
        }
        let parent = match self.path.rfind(DELIMITER) {
            Some(0) | None => "/",
            Some(idx) => &self.path[..idx],
        };
        let kind = if parent == "/" {
            ResourceType::DIRECTORY | ResourceType::VOLUME
        } else {
            ResourceType::DIRECTORY
        };
        Some(Resource::new(parent, kind))
    }

    pub fn is_file(&self) -> bool {
        self.kind.contains(ResourceType::FILE)
    }

    pub fn is_directory(&self) -> bool {
        self.kind.contains(ResourceType::DIRECTORY)
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.contains(ResourceType::SYMBOLIC_LINK)
    }

    pub fn is_volume(&self) -> bool {
        self.kind.contains(ResourceType::VOLUME)
    }

    pub fn reference(&self) -> ReferenceKey {
        ReferenceKey::new(&self.path, self.is_directory())
    }

    /// 相对于 `ancestor` 的路径，不在其下时返回 None
    pub fn relative_to(&self, ancestor: &Resource) -> Option<String> {
        if ancestor.is_root() {
            return Some(self.path.trim_start_matches(DELIMITER).to_string());
        }
        let rest = self.path.strip_prefix(ancestor.path())?;
        if rest.is_empty() {
            Some(String::new())
        } else {
            rest.strip_prefix(DELIMITER).map(str::to_string)
        }
    }

    /// 是否位于 `ancestor` 之下（或相同）
    pub fn is_child_of(&self, ancestor: &Resource) -> bool {
        self.relative_to(ancestor).is_some()
    }

    /// 保留类型，替换路径
    pub fn with_path(&self, path: &str) -> Self {
        let mut copy = self.clone();
        copy.path = normalize(path);
        copy
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a//b/./c/"), "/a/b/c");
        assert_eq!(normalize("/a/b/../c"), "/a/c");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("\\win\\path"), "/win/path");
    }

    #[test]
    fn test_reference_ignores_attributes() {
        let a = Resource::file("/data/a.txt").with_attributes(Attributes::default().with_size(1));
        let b = Resource::file("data//a.txt").with_attributes(Attributes::default().with_size(2));
        assert_eq!(a.reference(), b.reference());
        assert_ne!(a, b);

        let dir = Resource::directory("/data/a.txt");
        assert_ne!(a.reference(), dir.reference());
    }

    #[test]
    fn test_parent_and_name() {
        let file = Resource::file("/a/b/c.txt");
        assert_eq!(file.name(), "c.txt");
        let parent = file.parent().unwrap();
        assert_eq!(parent.path(), "/a/b");
        assert!(parent.is_directory());
        assert!(Resource::file("/x").parent().unwrap().is_root());
        assert!(Resource::root().parent().is_none());
    }

    #[test]
    fn test_relative_to() {
        let root = Resource::directory("/home/user");
        let file = Resource::file("/home/user/docs/a.txt");
        assert_eq!(file.relative_to(&root).as_deref(), Some("docs/a.txt"));
        assert_eq!(Resource::file("/home/username").relative_to(&root), None);
        assert!(file.is_child_of(&Resource::root()));
    }

    #[test]
    fn test_checksum_from_etag() {
        let sum = Checksum::from_etag("\"9E107D9D372BB6826BD81D3542A419D6\"").unwrap();
        assert_eq!(sum.algorithm, HashAlgorithm::Md5);
        assert_eq!(sum.hash, "9e107d9d372bb6826bd81d3542a419d6");
        assert!(Checksum::from_etag("abc-2").is_none());
    }
}
