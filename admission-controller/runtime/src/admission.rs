use crate::{
    core::{
        self, OracleError, Policy, SignatureOracle, VulnerabilityCounts, VulnerabilityOracle,
    },
    metrics::{AdmissionMetrics, Decision},
    workload::{self, PodTemplate},
};
use anyhow::{anyhow, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use k8s_openapi::api::{
    apps::v1::{
        DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec, ReplicaSet, ReplicaSetSpec,
        StatefulSet, StatefulSetSpec,
    },
    batch::v1::{CronJob, CronJobSpec, Job, JobSpec},
    core::v1::{Pod, PodSpec},
};
use kube::{
    core::{admission::Operation, DynamicObject},
    Resource, ResourceExt,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Clone)]
pub struct Admission {
    policy: Arc<Policy>,
    signatures: Arc<dyn SignatureOracle>,
    vulnerabilities: Arc<dyn VulnerabilityOracle>,
    metrics: AdmissionMetrics,
}

/// Determines how a check is resolved when an oracle cannot answer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OracleFailureMode {
    /// Deny the workload.
    #[default]
    FailClosed,

    /// Treat the failed check as passed and keep evaluating the workload.
    FailOpen,
}

/// Wraps an oracle so that its failures pass the check they back.
struct FailOpen<O: ?Sized> {
    inner: Arc<O>,
    metrics: AdmissionMetrics,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        match (req.method(), req.uri().path()) {
            (m, "/health") if *m == http::Method::GET => {
                return Box::pin(future::ok(health_response()))
            }
            (m, "/" | "/validate") if *m == http::Method::POST => {}
            _ => {
                return Box::pin(future::ok(
                    Response::builder()
                        .status(http::StatusCode::NOT_FOUND)
                        .body(Body::default())
                        .expect("not found response must be valid"),
                ))
            }
        }

        let admission = self.clone();
        Box::pin(async move {
            let bytes = req.into_body().collect().await?.to_bytes();
            json_response(admission.review(&bytes).await)
        })
    }
}

impl Admission {
    pub fn new(
        policy: Arc<Policy>,
        signatures: Arc<dyn SignatureOracle>,
        vulnerabilities: Arc<dyn VulnerabilityOracle>,
        failure_mode: OracleFailureMode,
        metrics: AdmissionMetrics,
    ) -> Self {
        let (signatures, vulnerabilities) = match failure_mode {
            OracleFailureMode::FailClosed => (signatures, vulnerabilities),
            OracleFailureMode::FailOpen => (
                Arc::new(FailOpen::new(signatures, metrics.clone())) as Arc<dyn SignatureOracle>,
                Arc::new(FailOpen::new(vulnerabilities, metrics.clone()))
                    as Arc<dyn VulnerabilityOracle>,
            ),
        };
        Self {
            policy,
            signatures,
            vulnerabilities,
            metrics,
        }
    }

    /// Handles a serialized `AdmissionReview`, returning the review to send
    /// back to the API server.
    async fn review(self, body: &[u8]) -> AdmissionReview {
        let review: AdmissionReview = match serde_json::from_slice(body) {
            Ok(review) => review,
            Err(error) => {
                warn!(%error, "Failed to parse request body");
                self.metrics.record(Decision::Invalid);
                return AdmissionResponse::invalid(error).into_review();
            }
        };
        trace!(?review);

        let rsp = match review.try_into() {
            Ok(req) => {
                debug!(?req);
                self.admit(req).await
            }
            Err(error) => {
                warn!(%error, "Invalid admission request");
                self.metrics.record(Decision::Invalid);
                AdmissionResponse::invalid(error)
            }
        };
        debug!(?rsp);
        rsp.into_review()
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        if matches!(req.operation, Operation::Delete | Operation::Connect) {
            self.metrics.record(Decision::Allowed);
            return AdmissionResponse::from(&req);
        }

        // Exempt workloads are admitted before their objects are parsed.
        let ns = namespace(&req);
        if self.policy.is_exempt(&ns) {
            debug!(%ns, name = %req.name, "Exempt namespace");
            self.metrics.record(Decision::Exempt);
            return AdmissionResponse::from(&req);
        }

        if is_kind::<Pod>(&req) {
            return self.admit_spec::<PodSpec>(ns, req).await;
        }

        if is_kind::<Deployment>(&req) {
            return self.admit_spec::<DeploymentSpec>(ns, req).await;
        }

        if is_kind::<StatefulSet>(&req) {
            return self.admit_spec::<StatefulSetSpec>(ns, req).await;
        }

        if is_kind::<DaemonSet>(&req) {
            return self.admit_spec::<DaemonSetSpec>(ns, req).await;
        }

        if is_kind::<ReplicaSet>(&req) {
            return self.admit_spec::<ReplicaSetSpec>(ns, req).await;
        }

        if is_kind::<Job>(&req) {
            return self.admit_spec::<JobSpec>(ns, req).await;
        }

        if is_kind::<CronJob>(&req) {
            return self.admit_spec::<CronJobSpec>(ns, req).await;
        }

        self.metrics.record(Decision::Invalid);
        AdmissionResponse::invalid(format_args!(
            "unsupported resource type: {}.{}.{}",
            req.kind.group, req.kind.version, req.kind.kind
        ))
    }

    async fn admit_spec<T>(self, ns: String, req: AdmissionRequest) -> AdmissionResponse
    where
        T: PodTemplate,
    {
        let rsp = AdmissionResponse::from(&req);

        let kind = req.kind.kind.clone();
        let name = req.name.clone();
        let spec = match parse_pod_spec::<T>(req) {
            Ok(spec) => spec,
            Err(error) => {
                info!(%error, %ns, %name, "Failed to parse {} object", kind);
                self.metrics.record(Decision::Denied);
                return rsp.deny(format!("Failed to parse {kind} object: {error}"));
            }
        };

        let workload = workload::from_pod_spec(ns.clone(), spec);
        let res = core::evaluate(
            &self.policy,
            &workload,
            &*self.signatures,
            &*self.vulnerabilities,
        )
        .await;

        match res {
            Ok(core::Verdict::Allowed) => {
                self.metrics.record(Decision::Allowed);
                rsp
            }
            Ok(core::Verdict::Denied(violation)) => {
                info!(%ns, %name, %kind, rule = violation.rule(), "Denied: {violation}");
                self.metrics.record(Decision::Denied);
                rsp.deny(violation)
            }
            // Only reachable when failing closed.
            Err(error) => {
                warn!(%error, %ns, %name, %kind, "Oracle failed; denying");
                self.metrics.record(Decision::OracleError);
                rsp.deny(format!("Unable to verify image: {error}"))
            }
        }
    }
}

// === impl OracleFailureMode ===

impl std::str::FromStr for OracleFailureMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fail-closed" => Ok(Self::FailClosed),
            "fail-open" => Ok(Self::FailOpen),
            s => Err(anyhow!(
                "invalid oracle failure mode: {s} (expected fail-closed or fail-open)"
            )),
        }
    }
}

// === impl FailOpen ===

impl<O: ?Sized> FailOpen<O> {
    fn new(inner: Arc<O>, metrics: AdmissionMetrics) -> Self {
        Self { inner, metrics }
    }

    fn bypass(&self, error: OracleError) {
        warn!(%error, "Oracle failed; treating check as passed");
        self.metrics.record_bypass(error.kind());
    }
}

#[async_trait::async_trait]
impl SignatureOracle for FailOpen<dyn SignatureOracle> {
    async fn is_signed(&self, image: &str) -> Result<bool, OracleError> {
        match self.inner.is_signed(image).await {
            Err(error) => {
                self.bypass(error);
                Ok(true)
            }
            res => res,
        }
    }
}

#[async_trait::async_trait]
impl VulnerabilityOracle for FailOpen<dyn VulnerabilityOracle> {
    async fn scan(&self, image: &str) -> Result<VulnerabilityCounts, OracleError> {
        match self.inner.scan(image).await {
            Err(error) => {
                self.bypass(error);
                Ok(VulnerabilityCounts::default())
            }
            res => res,
        }
    }
}

/// The namespace a request targets, falling back to the object's namespace.
fn namespace(req: &AdmissionRequest) -> String {
    req.namespace
        .clone()
        .or_else(|| req.object.as_ref().and_then(|obj| obj.namespace()))
        .unwrap_or_else(|| "default".to_string())
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn health_response() -> Response<Body> {
    Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Body::from("OK"))
        .expect("health response must be valid")
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn parse_pod_spec<T: PodTemplate>(req: AdmissionRequest) -> Result<PodSpec> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;

    let spec = {
        let data = obj
            .data
            .get("spec")
            .cloned()
            .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
        serde_json::from_value::<T>(data)?
    };

    spec.into_pod_spec()
        .ok_or_else(|| anyhow!("object has no pod template spec"))
}
