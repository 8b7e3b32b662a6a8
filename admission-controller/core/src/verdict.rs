use std::fmt;

/// The outcome of evaluating a single workload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied(Violation),
}

/// The first policy rule a workload was found to violate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    DisallowedRegistry {
        container: String,
        image: String,
    },
    BlockedImage {
        container: String,
        image: String,
    },
    UnsignedImage {
        container: String,
        image: String,
    },
    CriticalVulnerabilities {
        container: String,
        found: u32,
        threshold: u32,
    },
    HighVulnerabilities {
        container: String,
        found: u32,
        threshold: u32,
    },
}

// === impl Verdict ===

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Self::Allowed => None,
            Self::Denied(v) => Some(v),
        }
    }

    /// A human-readable reason, present only for denials.
    pub fn reason(&self) -> Option<String> {
        self.violation().map(ToString::to_string)
    }
}

impl From<Violation> for Verdict {
    fn from(v: Violation) -> Self {
        Self::Denied(v)
    }
}

// === impl Violation ===

impl Violation {
    pub fn container(&self) -> &str {
        match self {
            Self::DisallowedRegistry { container, .. }
            | Self::BlockedImage { container, .. }
            | Self::UnsignedImage { container, .. }
            | Self::CriticalVulnerabilities { container, .. }
            | Self::HighVulnerabilities { container, .. } => container,
        }
    }

    /// A short, stable name for the violated rule, suitable for logs and
    /// metric labels.
    pub fn rule(&self) -> &'static str {
        match self {
            Self::DisallowedRegistry { .. } => "registry",
            Self::BlockedImage { .. } => "blocked",
            Self::UnsignedImage { .. } => "signature",
            Self::CriticalVulnerabilities { .. } | Self::HighVulnerabilities { .. } => {
                "vulnerabilities"
            }
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DisallowedRegistry { container, image } => write!(
                f,
                "Container {container} uses image from disallowed registry: {image}"
            ),
            Self::BlockedImage { container, image } => {
                write!(f, "Container {container} uses blocked image: {image}")
            }
            Self::UnsignedImage { container, image } => {
                write!(f, "Container {container} uses unsigned image: {image}")
            }
            Self::CriticalVulnerabilities {
                container,
                found,
                threshold,
            } => write!(
                f,
                "Container {container} image has {found} critical vulnerabilities (threshold: {threshold})"
            ),
            Self::HighVulnerabilities {
                container,
                found,
                threshold,
            } => write!(
                f,
                "Container {container} image has {found} high vulnerabilities (threshold: {threshold})"
            ),
        }
    }
}
