#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use image_admission_controller_core as core;

mod admission;
mod args;
pub mod config;
mod metrics;
mod oracle;
mod workload;

pub use self::{
    admission::{Admission, OracleFailureMode},
    args::Args,
    metrics::{AdmissionMetrics, OracleMetrics},
    oracle::{HttpOracle, Unconfigured},
};
