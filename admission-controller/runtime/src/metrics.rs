use crate::core::{OracleError, OracleKind};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct AdmissionMetrics {
    decisions: Family<DecisionLabels, Counter>,
    bypassed: Family<BypassLabels, Counter>,
}

#[derive(Clone, Debug, Default)]
pub struct OracleMetrics {
    requests: Family<OracleLabels, Counter>,
}

/// How an admission request was resolved.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    Allowed,
    Denied,
    Exempt,
    Invalid,
    OracleError,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct DecisionLabels {
    result: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct BypassLabels {
    oracle: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OracleLabels {
    oracle: &'static str,
    outcome: &'static str,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let decisions = Family::<DecisionLabels, Counter>::default();
        reg.register(
            "decisions",
            "Total number of admission requests by result",
            decisions.clone(),
        );

        let bypassed = Family::<BypassLabels, Counter>::default();
        reg.register(
            "oracle_failures_bypassed",
            "Total number of oracle failures treated as passing checks in fail-open mode",
            bypassed.clone(),
        );

        Self {
            decisions,
            bypassed,
        }
    }

    pub(crate) fn record(&self, decision: Decision) {
        self.decisions
            .get_or_create(&DecisionLabels {
                result: decision.as_str(),
            })
            .inc();
    }

    pub(crate) fn record_bypass(&self, kind: OracleKind) {
        self.bypassed
            .get_or_create(&BypassLabels {
                oracle: kind.as_str(),
            })
            .inc();
    }
}

// === impl Decision ===

impl Decision {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::Exempt => "exempt",
            Self::Invalid => "invalid",
            Self::OracleError => "oracle_error",
        }
    }
}

// === impl OracleMetrics ===

impl OracleMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let requests = Family::<OracleLabels, Counter>::default();
        reg.register(
            "oracle_requests",
            "Total number of oracle lookups by oracle and outcome",
            requests.clone(),
        );
        Self { requests }
    }

    pub(crate) fn record<T>(&self, kind: OracleKind, res: &Result<T, OracleError>) {
        let outcome = match res {
            Ok(_) => "ok",
            Err(OracleError::Timeout { .. }) => "timeout",
            Err(OracleError::Unavailable { .. }) => "unavailable",
            Err(OracleError::InvalidResponse { .. }) => "invalid_response",
        };
        self.requests
            .get_or_create(&OracleLabels {
                oracle: kind.as_str(),
                outcome,
            })
            .inc();
    }
}
