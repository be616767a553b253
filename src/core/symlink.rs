//! 符号链接处理
//!
//! 每个传输方向一个策略：跟随链接复制内容、在目标重建链接、或跳过。

use super::resource::{normalize, Resource, DELIMITER};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymlinkPolicy {
    Follow,
    Recreate,
    Skip,
}

impl From<&str> for SymlinkPolicy {
    fn from(s: &str) -> Self {
        match s {
            "follow" => SymlinkPolicy::Follow,
            "skip" => SymlinkPolicy::Skip,
            _ => SymlinkPolicy::Recreate,
        }
    }
}

/// 对单个资源的处理结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymlinkDecision {
    /// 按普通文件复制内容
    Follow,
    /// 在目标创建链接，指向相对路径
    Recreate { target: String },
    Skip,
}

#[derive(Debug, Clone)]
pub struct SymlinkResolver {
    policy: SymlinkPolicy,
    roots: Vec<Resource>,
    /// 目标会话能否创建符号链接
    supported: bool,
}

impl SymlinkResolver {
    pub fn new(policy: SymlinkPolicy, roots: Vec<Resource>, supported: bool) -> Self {
        Self {
            policy,
            roots,
            supported,
        }
    }

    pub fn policy(&self) -> SymlinkPolicy {
        self.policy
    }

    pub fn resolve(&self, resource: &Resource) -> SymlinkDecision {
        if !resource.is_symlink() {
            return SymlinkDecision::Follow;
        }
        let Some(target) = resource.symlink_target.as_deref() else {
            return SymlinkDecision::Follow;
        };
        match self.policy {
            SymlinkPolicy::Follow => SymlinkDecision::Follow,
            SymlinkPolicy::Skip => SymlinkDecision::Skip,
            SymlinkPolicy::Recreate => {
                if !self.supported {
                    debug!("目标不支持符号链接，跟随复制: {}", resource);
                    return SymlinkDecision::Follow;
                }
                let absolute = Resource::file(target);
                // 指向传输范围之外的链接在目标端会悬空
                if !self.roots.iter().any(|root| absolute.is_child_of(root)) {
                    debug!("链接目标 {} 不在传输范围内，跟随复制: {}", target, resource);
                    return SymlinkDecision::Follow;
                }
                let base = resource
                    .parent()
                    .map(|p| p.path().to_string())
                    .unwrap_or_else(|| "/".to_string());
                SymlinkDecision::Recreate {
                    target: relativize(&base, absolute.path()),
                }
            }
        }
    }
}

/// 计算从目录 `base` 到 `target` 的相对路径
pub fn relativize(base: &str, target: &str) -> String {
    let base = normalize(base);
    let target = normalize(target);
    let base_parts: Vec<&str> = base.split(DELIMITER).filter(|s| !s.is_empty()).collect();
    let target_parts: Vec<&str> = target.split(DELIMITER).filter(|s| !s.is_empty()).collect();

    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; base_parts.len() - common];
    parts.extend(&target_parts[common..]);
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::ResourceType;

    fn link(path: &str, target: &str) -> Resource {
        let mut r = Resource::new(path, ResourceType::FILE | ResourceType::SYMBOLIC_LINK);
        r.symlink_target = Some(target.to_string());
        r
    }

    #[test]
    fn test_relativize() {
        assert_eq!(relativize("/a/b", "/a/b/c.txt"), "c.txt");
        assert_eq!(relativize("/a/b", "/a/c/d.txt"), "../c/d.txt");
        assert_eq!(relativize("/a/b", "/a/b"), ".");
        assert_eq!(relativize("/", "/x/y"), "x/y");
    }

    #[test]
    fn test_recreate_inside_roots() {
        let resolver = SymlinkResolver::new(
            SymlinkPolicy::Recreate,
            vec![Resource::directory("/data")],
            true,
        );
        assert_eq!(
            resolver.resolve(&link("/data/links/a", "/data/files/a")),
            SymlinkDecision::Recreate {
                target: "../files/a".into()
            }
        );
        // 范围外的链接退化为跟随
        assert_eq!(
            resolver.resolve(&link("/data/links/b", "/etc/passwd")),
            SymlinkDecision::Follow
        );
        assert_eq!(
            resolver.resolve(&Resource::file("/data/plain")),
            SymlinkDecision::Follow
        );
    }

    #[test]
    fn test_unsupported_target_follows() {
        let resolver = SymlinkResolver::new(
            SymlinkPolicy::Recreate,
            vec![Resource::directory("/data")],
            false,
        );
        assert_eq!(
            resolver.resolve(&link("/data/a", "/data/b")),
            SymlinkDecision::Follow
        );
        let skip = SymlinkResolver::new(SymlinkPolicy::Skip, vec![], true);
        assert_eq!(skip.resolve(&link("/data/a", "/data/b")), SymlinkDecision::Skip);
    }
}
