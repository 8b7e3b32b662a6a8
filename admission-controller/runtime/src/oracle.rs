use crate::{
    core::{
        oracle::BoxError, OracleError, OracleKind, SignatureOracle, VulnerabilityCounts,
        VulnerabilityOracle,
    },
    metrics::OracleMetrics,
};
use anyhow::{bail, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{header, http, Request, Uri};
use hyper_util::rt::TokioIo;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{net::TcpStream, time};
use tracing::{debug, trace};

/// Resolves oracle lookups against a JSON-over-HTTP service.
///
/// Signatures are verified with `POST {base}/verify` and vulnerabilities are
/// looked up with `POST {base}/scan`. Both take `{"image": "<ref>"}`.
///
/// Connections are plaintext HTTP/1.1; `https` base URLs are rejected.
#[derive(Clone, Debug)]
pub struct HttpOracle {
    host: String,
    port: u16,
    authority: String,
    base_path: String,
    timeout: time::Duration,
    metrics: OracleMetrics,
}

/// Stands in for an oracle that was not configured. Every lookup fails.
#[derive(Copy, Clone, Debug, Default)]
pub struct Unconfigured;

#[derive(Serialize)]
struct ImageRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SignatureResponse {
    signed: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScanResponse {
    critical: u32,
    high: u32,
}

// === impl HttpOracle ===

impl HttpOracle {
    pub fn new(base: Uri, timeout: time::Duration, metrics: OracleMetrics) -> Result<Self> {
        match base.scheme_str() {
            Some("http") | None => {}
            Some(scheme) => bail!("unsupported oracle URL scheme: {scheme}"),
        }
        let Some(authority) = base.authority() else {
            bail!("oracle URL must include a host: {base}");
        };

        Ok(Self {
            host: authority.host().to_string(),
            port: authority.port_u16().unwrap_or(80),
            authority: authority.to_string(),
            base_path: base.path().trim_end_matches('/').to_string(),
            timeout,
            metrics,
        })
    }

    async fn lookup<T>(&self, kind: OracleKind, path: &str, image: &str) -> Result<T, OracleError>
    where
        T: DeserializeOwned,
    {
        let res = match time::timeout(self.timeout, self.post(kind, path, image)).await {
            Ok(res) => res,
            Err(_) => Err(OracleError::Timeout {
                kind,
                image: image.to_string(),
                timeout: self.timeout,
            }),
        };
        self.metrics.record(kind, &res);
        res
    }

    async fn post<T>(&self, kind: OracleKind, path: &str, image: &str) -> Result<T, OracleError>
    where
        T: DeserializeOwned,
    {
        let unavailable = |source: BoxError| {
            OracleError::Unavailable {
                kind,
                image: image.to_string(),
                source,
            }
        };
        let invalid = |reason: String| OracleError::InvalidResponse {
            kind,
            image: image.to_string(),
            reason,
        };

        let io = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| unavailable(e.into()))?;
        let (mut tx, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
            .await
            .map_err(|e| unavailable(e.into()))?;
        tokio::spawn(async move {
            if let Err(error) = conn.await {
                debug!(%error, "Oracle connection failed");
            }
        });

        let body = serde_json::to_vec(&ImageRequest { image }).map_err(|e| unavailable(e.into()))?;
        let req = Request::builder()
            .method(http::Method::POST)
            .uri(format!("{}{}", self.base_path, path))
            .header(header::HOST, self.authority.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| unavailable(e.into()))?;
        trace!(?req, %image);

        let rsp = tx.send_request(req).await.map_err(|e| unavailable(e.into()))?;
        let status = rsp.status();
        let bytes = rsp
            .into_body()
            .collect()
            .await
            .map_err(|e| unavailable(e.into()))?
            .to_bytes();
        if !status.is_success() {
            return Err(invalid(format!("unexpected status {status}")));
        }

        serde_json::from_slice(&bytes).map_err(|e| invalid(e.to_string()))
    }
}

#[async_trait::async_trait]
impl SignatureOracle for HttpOracle {
    async fn is_signed(&self, image: &str) -> Result<bool, OracleError> {
        let SignatureResponse { signed } =
            self.lookup(OracleKind::Signature, "/verify", image).await?;
        Ok(signed)
    }
}

#[async_trait::async_trait]
impl VulnerabilityOracle for HttpOracle {
    async fn scan(&self, image: &str) -> Result<VulnerabilityCounts, OracleError> {
        let ScanResponse { critical, high } =
            self.lookup(OracleKind::Vulnerability, "/scan", image).await?;
        Ok(VulnerabilityCounts { critical, high })
    }
}

// === impl Unconfigured ===

#[async_trait::async_trait]
impl SignatureOracle for Unconfigured {
    async fn is_signed(&self, image: &str) -> Result<bool, OracleError> {
        Err(OracleError::Unavailable {
            kind: OracleKind::Signature,
            image: image.to_string(),
            source: "no signature oracle configured".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    /// Serves a single HTTP/1.1 response on a local port, returning the base
    /// URL and a handle resolving to the raw request.
    async fn serve_once(
        status: u16,
        body: &'static str,
    ) -> (Uri, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut io, _) = listener.accept().await.unwrap();
            let mut req = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = io.read(&mut buf).await.unwrap();
                req.extend_from_slice(&buf[..n]);
                if n == 0 || is_complete(&req) {
                    break;
                }
            }
            let rsp = format!(
                "HTTP/1.1 {status} Test\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            io.write_all(rsp.as_bytes()).await.unwrap();
            io.shutdown().await.unwrap();
            String::from_utf8(req).unwrap()
        });
        let uri = format!("http://{addr}/oracle").parse().unwrap();
        (uri, handle)
    }

    fn is_complete(req: &[u8]) -> bool {
        let req = String::from_utf8_lossy(req);
        let Some((head, body)) = req.split_once("\r\n\r\n") else {
            return false;
        };
        let len = head
            .lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= len
    }

    fn mk_oracle(uri: Uri, timeout: time::Duration) -> HttpOracle {
        HttpOracle::new(uri, timeout, OracleMetrics::default()).unwrap()
    }

    #[tokio::test]
    async fn verifies_signatures() {
        let (uri, req) = serve_once(200, r#"{"signed":true}"#).await;
        let oracle = mk_oracle(uri, time::Duration::from_secs(5));

        let signed = oracle
            .is_signed("registry.example.com/app:1.0")
            .await
            .expect("oracle must respond");
        assert!(signed);

        let req = req.await.unwrap();
        assert!(req.starts_with("POST /oracle/verify HTTP/1.1\r\n"), "{req}");
        assert!(
            req.ends_with(r#"{"image":"registry.example.com/app:1.0"}"#),
            "{req}"
        );
    }

    #[tokio::test]
    async fn scans_images() {
        let (uri, req) = serve_once(200, r#"{"critical":1,"high":7}"#).await;
        let oracle = mk_oracle(uri, time::Duration::from_secs(5));

        let counts = oracle
            .scan("registry.example.com/app:1.0")
            .await
            .expect("oracle must respond");
        assert_eq!(
            counts,
            VulnerabilityCounts {
                critical: 1,
                high: 7
            }
        );
        assert!(req.await.unwrap().starts_with("POST /oracle/scan "));
    }

    #[tokio::test]
    async fn error_status_is_invalid_response() {
        let (uri, _req) = serve_once(503, r#"{"error":"overloaded"}"#).await;
        let oracle = mk_oracle(uri, time::Duration::from_secs(5));

        let err = oracle.scan("registry.example.com/app:1.0").await.unwrap_err();
        assert!(
            matches!(err, OracleError::InvalidResponse { kind: OracleKind::Vulnerability, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let (uri, _req) = serve_once(200, r#"{"signed":"yes"}"#).await;
        let oracle = mk_oracle(uri, time::Duration::from_secs(5));

        let err = oracle
            .is_signed("registry.example.com/app:1.0")
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::InvalidResponse { .. }), "{err}");
    }

    #[tokio::test]
    async fn unresponsive_oracle_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_io, _) = listener.accept().await.unwrap();
            futures::future::pending::<()>().await;
        });

        let timeout = time::Duration::from_millis(50);
        let oracle = mk_oracle(format!("http://{addr}").parse().unwrap(), timeout);
        let err = oracle.is_signed("registry.example.com/app:1.0").await.unwrap_err();
        match err {
            OracleError::Timeout {
                kind,
                image,
                timeout: t,
            } => {
                assert_eq!(kind, OracleKind::Signature);
                assert_eq!(image, "registry.example.com/app:1.0");
                assert_eq!(t, timeout);
            }
            err => panic!("unexpected error: {err}"),
        }
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let oracle = mk_oracle(
            format!("http://{addr}").parse().unwrap(),
            time::Duration::from_secs(5),
        );

        let err = oracle.scan("registry.example.com/app:1.0").await.unwrap_err();
        assert!(matches!(err, OracleError::Unavailable { .. }), "{err}");
    }

    #[test]
    fn rejects_https_urls() {
        let res = HttpOracle::new(
            "https://scanner.example.com".parse().unwrap(),
            time::Duration::from_secs(1),
            OracleMetrics::default(),
        );
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn unconfigured_signature_oracle_is_unavailable() {
        let err = Unconfigured
            .is_signed("registry.example.com/app:1.0")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), OracleKind::Signature);
        assert!(matches!(err, OracleError::Unavailable { .. }));
    }
}
