use crate::{
    oracle::{OracleError, SignatureOracle, VulnerabilityOracle},
    policy::Policy,
    verdict::{Verdict, Violation},
    workload::{Container, Workload},
};
use tracing::{debug, trace};

/// Evaluates a workload against `policy`.
///
/// Containers are checked in order, and each container's image is checked
/// against the registry allow-list, the block-list, the signature requirement
/// and the vulnerability thresholds, in that order. The first violation
/// determines the verdict. Workloads in exempt namespaces are allowed without
/// consulting either oracle.
///
/// Oracle failures are returned as errors so that the caller can decide
/// whether they fail open or closed.
pub async fn evaluate<S, V>(
    policy: &Policy,
    workload: &Workload,
    signatures: &S,
    vulnerabilities: &V,
) -> Result<Verdict, OracleError>
where
    S: SignatureOracle + ?Sized,
    V: VulnerabilityOracle + ?Sized,
{
    if policy.is_exempt(&workload.namespace) {
        debug!(ns = %workload.namespace, "Namespace is exempt");
        return Ok(Verdict::Allowed);
    }

    for container in &workload.containers {
        if let Some(violation) =
            check_container(policy, container, signatures, vulnerabilities).await?
        {
            debug!(ns = %workload.namespace, %violation, "Denied");
            return Ok(Verdict::Denied(violation));
        }
    }

    Ok(Verdict::Allowed)
}

async fn check_container<S, V>(
    policy: &Policy,
    Container { name, image }: &Container,
    signatures: &S,
    vulnerabilities: &V,
) -> Result<Option<Violation>, OracleError>
where
    S: SignatureOracle + ?Sized,
    V: VulnerabilityOracle + ?Sized,
{
    trace!(container = %name, %image, "Checking");

    if !policy.is_registry_allowed(image) {
        return Ok(Some(Violation::DisallowedRegistry {
            container: name.clone(),
            image: image.clone(),
        }));
    }

    if policy.is_blocked(image) {
        return Ok(Some(Violation::BlockedImage {
            container: name.clone(),
            image: image.clone(),
        }));
    }

    if policy.require_image_signature && !signatures.is_signed(image).await? {
        return Ok(Some(Violation::UnsignedImage {
            container: name.clone(),
            image: image.clone(),
        }));
    }

    let counts = vulnerabilities.scan(image).await?;
    let thresholds = policy.scan_thresholds;
    if counts.critical > thresholds.critical {
        return Ok(Some(Violation::CriticalVulnerabilities {
            container: name.clone(),
            found: counts.critical,
            threshold: thresholds.critical,
        }));
    }
    if counts.high > thresholds.high {
        return Ok(Some(Violation::HighVulnerabilities {
            container: name.clone(),
            found: counts.high,
            threshold: thresholds.high,
        }));
    }

    Ok(None)
}
