use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};

/// The wildcard block-list entry matching every image tagged `latest`.
pub const LATEST_TAG_WILDCARD: &str = "*:latest";

/// Image admission rules.
///
/// A policy is built once at startup and shared read-only by every
/// evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Policy {
    /// Image reference prefixes that are allowed. An empty list allows all
    /// registries.
    pub allowed_registries: Vec<String>,

    pub blocked_images: Vec<BlockedImage>,

    /// When set, every image must be verified by a signature oracle.
    pub require_image_signature: bool,

    pub scan_thresholds: ScanThresholds,

    /// Namespaces whose workloads are admitted without any checks.
    pub exempt_namespaces: BTreeSet<String>,
}

/// Maximum tolerated vulnerability counts per image (inclusive).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanThresholds {
    pub critical: u32,
    pub high: u32,
}

/// A block-list entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum BlockedImage {
    /// Matches any image reference ending in `:latest`.
    LatestTag,

    /// Matches a single image reference exactly.
    Exact(String),
}

// === impl Policy ===

impl Policy {
    pub fn is_exempt(&self, namespace: &str) -> bool {
        self.exempt_namespaces.contains(namespace)
    }

    pub fn is_registry_allowed(&self, image: &str) -> bool {
        self.allowed_registries.is_empty()
            || self
                .allowed_registries
                .iter()
                .any(|prefix| image.starts_with(prefix.as_str()))
    }

    pub fn is_blocked(&self, image: &str) -> bool {
        self.blocked_images.iter().any(|b| b.matches(image))
    }
}

// === impl BlockedImage ===

impl BlockedImage {
    pub fn matches(&self, image: &str) -> bool {
        match self {
            Self::LatestTag => image.ends_with(":latest"),
            Self::Exact(blocked) => blocked == image,
        }
    }
}

impl From<String> for BlockedImage {
    fn from(s: String) -> Self {
        if s == LATEST_TAG_WILDCARD {
            Self::LatestTag
        } else {
            Self::Exact(s)
        }
    }
}

impl From<&str> for BlockedImage {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<BlockedImage> for String {
    fn from(b: BlockedImage) -> Self {
        match b {
            BlockedImage::LatestTag => LATEST_TAG_WILDCARD.to_string(),
            BlockedImage::Exact(s) => s,
        }
    }
}

impl fmt::Display for BlockedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LatestTag => LATEST_TAG_WILDCARD.fmt(f),
            Self::Exact(s) => s.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registries_allow_everything() {
        let policy = Policy::default();
        assert!(policy.is_registry_allowed("docker.io/library/nginx:1.25"));
        assert!(policy.is_registry_allowed(""));
    }

    #[test]
    fn registries_match_by_prefix() {
        let policy = Policy {
            allowed_registries: vec!["registry.example.com/".into(), "gcr.io/acme/".into()],
            ..Default::default()
        };
        assert!(policy.is_registry_allowed("registry.example.com/app:1.0"));
        assert!(policy.is_registry_allowed("gcr.io/acme/tool@sha256:abcd"));
        assert!(!policy.is_registry_allowed("gcr.io/other/tool:1"));
        assert!(!policy.is_registry_allowed("evil.com/registry.example.com/app:1.0"));
    }

    #[test]
    fn blocked_images_match_exactly() {
        let policy = Policy {
            blocked_images: vec!["docker.io/library/busybox:1.36".into()],
            ..Default::default()
        };
        assert!(policy.is_blocked("docker.io/library/busybox:1.36"));
        assert!(!policy.is_blocked("docker.io/library/busybox:1.36.1"));
        assert!(!policy.is_blocked("docker.io/library/BusyBox:1.36"));
        assert!(!policy.is_blocked("docker.io/library/busybox:latest"));
    }

    #[test]
    fn latest_wildcard_matches_suffix() {
        let policy = Policy {
            blocked_images: vec![LATEST_TAG_WILDCARD.into()],
            ..Default::default()
        };
        assert_eq!(policy.blocked_images, vec![BlockedImage::LatestTag]);
        assert!(policy.is_blocked("registry.example.com/app:latest"));
        assert!(!policy.is_blocked("registry.example.com/app:latest-rc1"));
        assert!(!policy.is_blocked("registry.example.com/app"));
    }

    #[test]
    fn deserializes_camel_case() {
        let policy: Policy = serde_yaml::from_str(
            r#"
allowedRegistries:
  - registry.example.com/
blockedImages:
  - "*:latest"
  - registry.example.com/legacy:0.1
requireImageSignature: true
scanThresholds:
  critical: 0
  high: 2
exemptNamespaces:
  - kube-system
"#,
        )
        .expect("policy must parse");

        assert_eq!(
            policy,
            Policy {
                allowed_registries: vec!["registry.example.com/".into()],
                blocked_images: vec![
                    BlockedImage::LatestTag,
                    BlockedImage::Exact("registry.example.com/legacy:0.1".into()),
                ],
                require_image_signature: true,
                scan_thresholds: ScanThresholds {
                    critical: 0,
                    high: 2
                },
                exempt_namespaces: maplit::btreeset!["kube-system".to_string()],
            }
        );
    }

    #[test]
    fn rejects_negative_thresholds() {
        let res = serde_yaml::from_str::<Policy>("scanThresholds: {critical: -1, high: 0}");
        assert!(res.is_err());
    }
}
