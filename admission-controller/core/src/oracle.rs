use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Vulnerability counts reported for an image.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VulnerabilityCounts {
    pub critical: u32,
    pub high: u32,
}

/// Identifies which oracle produced an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OracleKind {
    Signature,
    Vulnerability,
}

/// Indicates that an oracle could not produce an answer.
///
/// This is never a check result: an unreachable oracle says nothing about
/// whether the image is signed or vulnerable.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("{kind} oracle timed out after {timeout:?} checking {image}")]
    Timeout {
        kind: OracleKind,
        image: String,
        timeout: Duration,
    },

    #[error("{kind} oracle unavailable checking {image}: {source}")]
    Unavailable {
        kind: OracleKind,
        image: String,
        #[source]
        source: BoxError,
    },

    #[error("{kind} oracle returned an invalid response for {image}: {reason}")]
    InvalidResponse {
        kind: OracleKind,
        image: String,
        reason: String,
    },
}

/// Verifies image signatures against a trust anchor.
#[async_trait::async_trait]
pub trait SignatureOracle: Send + Sync {
    async fn is_signed(&self, image: &str) -> Result<bool, OracleError>;
}

/// Looks up known vulnerabilities for an image.
#[async_trait::async_trait]
pub trait VulnerabilityOracle: Send + Sync {
    async fn scan(&self, image: &str) -> Result<VulnerabilityCounts, OracleError>;
}

// === impl OracleKind ===

impl OracleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Vulnerability => "vulnerability",
        }
    }
}

impl fmt::Display for OracleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl OracleError ===

impl OracleError {
    pub fn kind(&self) -> OracleKind {
        match self {
            Self::Timeout { kind, .. }
            | Self::Unavailable { kind, .. }
            | Self::InvalidResponse { kind, .. } => *kind,
        }
    }

    pub fn image(&self) -> &str {
        match self {
            Self::Timeout { image, .. }
            | Self::Unavailable { image, .. }
            | Self::InvalidResponse { image, .. } => image,
        }
    }
}

#[async_trait::async_trait]
impl<O: SignatureOracle + ?Sized> SignatureOracle for Arc<O> {
    async fn is_signed(&self, image: &str) -> Result<bool, OracleError> {
        (**self).is_signed(image).await
    }
}

#[async_trait::async_trait]
impl<O: VulnerabilityOracle + ?Sized> VulnerabilityOracle for Arc<O> {
    async fn scan(&self, image: &str) -> Result<VulnerabilityCounts, OracleError> {
        (**self).scan(image).await
    }
}
