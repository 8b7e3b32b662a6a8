//! Loads and validates the admission policy file.

use crate::core::{policy::LATEST_TAG_WILDCARD, BlockedImage, Policy};
use anyhow::{Context, Result};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("allowedRegistries[{0}] must not be empty")]
    EmptyRegistry(usize),

    #[error("blockedImages[{0}] must not be empty")]
    EmptyBlockedImage(usize),

    #[error(
        "blockedImages[{index}] uses an unsupported wildcard '{pattern}'; only '{}' is supported",
        LATEST_TAG_WILDCARD
    )]
    UnsupportedWildcard { index: usize, pattern: String },
}

/// Reads a policy from a YAML file.
pub fn load(path: impl AsRef<Path>) -> Result<Policy> {
    let path = path.as_ref();
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read policy from {}", path.display()))?;
    parse(&yaml).with_context(|| format!("invalid policy in {}", path.display()))
}

pub fn parse(yaml: &str) -> Result<Policy> {
    let policy = serde_yaml::from_str::<Policy>(yaml)?;
    validate(&policy)?;
    Ok(policy)
}

pub fn validate(policy: &Policy) -> Result<(), PolicyError> {
    for (i, registry) in policy.allowed_registries.iter().enumerate() {
        // An empty prefix would silently allow every registry.
        if registry.is_empty() {
            return Err(PolicyError::EmptyRegistry(i));
        }
    }

    for (index, blocked) in policy.blocked_images.iter().enumerate() {
        if let BlockedImage::Exact(pattern) = blocked {
            if pattern.is_empty() {
                return Err(PolicyError::EmptyBlockedImage(index));
            }
            if pattern.starts_with('*') {
                return Err(PolicyError::UnsupportedWildcard {
                    index,
                    pattern: pattern.clone(),
                });
            }
        }
    }

    Ok(())
}
