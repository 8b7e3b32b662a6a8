use crate::{
    config,
    core::{SignatureOracle, VulnerabilityOracle},
    Admission, AdmissionMetrics, HttpOracle, OracleFailureMode, OracleMetrics, Unconfigured,
};
use anyhow::{bail, Result};
use clap::Parser;
use hyper::Uri;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tokio::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
    name = "image-admission-controller",
    about = "Admits workloads whose container images satisfy an image policy"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "image_admission=info,warn",
        env = "IMAGE_ADMISSION_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Path to the YAML image policy.
    #[clap(long, default_value = "/etc/webhook/config/config.yaml")]
    policy_path: PathBuf,

    /// Base URL of the signature verification service.
    ///
    /// Required when the policy requires image signatures. Only plaintext
    /// `http://` URLs are supported.
    #[clap(long)]
    signature_oracle_url: Option<Uri>,

    /// Base URL of the vulnerability scanning service.
    ///
    /// Only plaintext `http://` URLs are supported.
    #[clap(long)]
    vulnerability_oracle_url: Uri,

    /// Time allowed for each oracle lookup, in milliseconds.
    #[clap(long, default_value = "2000")]
    oracle_timeout_ms: u64,

    /// Whether workloads are denied (fail-closed) or admitted (fail-open)
    /// when an oracle cannot be reached.
    #[clap(long, default_value = "fail-closed")]
    oracle_failure_mode: OracleFailureMode,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            policy_path,
            signature_oracle_url,
            vulnerability_oracle_url,
            oracle_timeout_ms,
            oracle_failure_mode,
        } = self;

        let policy = Arc::new(config::load(&policy_path)?);

        let mut prom = <Registry>::default();
        let reg = prom.sub_registry_with_prefix("image_admission");
        let admission_metrics = AdmissionMetrics::register(reg);
        let oracle_metrics = OracleMetrics::register(reg);

        let timeout = Duration::from_millis(oracle_timeout_ms);
        let signatures: Arc<dyn SignatureOracle> = match signature_oracle_url {
            Some(url) => Arc::new(HttpOracle::new(url, timeout, oracle_metrics.clone())?),
            None if policy.require_image_signature => {
                bail!("--signature-oracle-url is required when the policy requires image signatures")
            }
            None => Arc::new(Unconfigured),
        };
        let vulnerabilities: Arc<dyn VulnerabilityOracle> = Arc::new(HttpOracle::new(
            vulnerability_oracle_url,
            timeout,
            oracle_metrics,
        )?);

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_server(server)
            .build()
            .await?;

        info!(
            path = %policy_path.display(),
            allowed_registries = policy.allowed_registries.len(),
            blocked_images = policy.blocked_images.len(),
            require_image_signature = policy.require_image_signature,
            critical_threshold = policy.scan_thresholds.critical,
            high_threshold = policy.scan_thresholds.high,
            exempt_namespaces = policy.exempt_namespaces.len(),
            failure_mode = ?oracle_failure_mode,
            "Loaded image policy"
        );

        let admission = Admission::new(
            policy,
            signatures,
            vulnerabilities,
            oracle_failure_mode,
            admission_metrics,
        );
        let runtime = runtime.spawn_server(admission);

        // Serve until the shutdown signal fires and in-flight reviews drain.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
