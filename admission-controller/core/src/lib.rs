#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod engine;
pub mod oracle;
pub mod policy;
mod verdict;
mod workload;


pub use self::{
    engine::evaluate,
    oracle::{OracleError, OracleKind, SignatureOracle, VulnerabilityCounts, VulnerabilityOracle},
    policy::{BlockedImage, Policy, ScanThresholds},
    verdict::{Verdict, Violation},
    workload::{Container, Workload},
};
