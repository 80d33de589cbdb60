use crate::error::{MirrorError, Result};
use crate::types::{Mirror, ProbeOutcome, Protocol};
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

// 单次探测超时, 慢源只会拖慢它所在的那一轮
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(7);

/// Prober: 对单个镜像执行一次计时请求
///
/// Implementations must not fail: network errors are folded into the
/// returned [`ProbeOutcome`], and no shared state is touched.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn measure(&self, mirror: &Mirror) -> ProbeOutcome;
}

/// Probes HTTP(S) mirrors with a GET and FTP mirrors by reading the greeting.
#[derive(Debug, Clone)]
pub struct NetworkProber {
    client: Client,
    timeout: Duration,
}

impl NetworkProber {
    /// A zero timeout would fail every probe, so it is rejected.
    pub fn new(timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(MirrorError::InvalidTimeout(timeout));
        }
        Ok(Self::with_timeout(timeout))
    }

    fn with_timeout(timeout: Duration) -> Self {
        // 构建 Client, 强制设置超时
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, timeout }
    }

    #[cfg(test)]
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn measure_http(&self, mirror: &Mirror) -> ProbeOutcome {
        let start = Instant::now();

        let response = match self.client.get(mirror.url().clone()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(url = %mirror.url(), error = %e, "request failed");
                return ProbeOutcome::Failed(start.elapsed());
            }
        };
        let status = response.status();

        // The exchange is finished once the body is drained
        match response.bytes().await {
            Ok(_) => {
                let elapsed = start.elapsed();
                debug!(url = %mirror.url(), %status, ?elapsed, "mirror responded");
                ProbeOutcome::Reached(elapsed)
            }
            Err(e) => {
                debug!(url = %mirror.url(), error = %e, "failed to read body");
                ProbeOutcome::Failed(start.elapsed())
            }
        }
    }

    async fn measure_ftp(&self, mirror: &Mirror) -> ProbeOutcome {
        let start = Instant::now();

        let Some(host) = mirror.url().host_str() else {
            return ProbeOutcome::Failed(start.elapsed());
        };
        let port = mirror.url().port().unwrap_or(Protocol::Ftp.port());

        let exchange = async {
            let stream = TcpStream::connect((host, port)).await?;
            let mut greeting = String::new();
            let read = BufReader::new(stream).read_line(&mut greeting).await?;
            Ok::<_, std::io::Error>(read > 0)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(true)) => {
                let elapsed = start.elapsed();
                debug!(url = %mirror.url(), ?elapsed, "ftp greeting received");
                ProbeOutcome::Reached(elapsed)
            }
            Ok(Ok(false)) => {
                debug!(url = %mirror.url(), "ftp server closed without greeting");
                ProbeOutcome::Failed(start.elapsed())
            }
            Ok(Err(e)) => {
                debug!(url = %mirror.url(), error = %e, "ftp connection failed");
                ProbeOutcome::Failed(start.elapsed())
            }
            Err(_) => {
                debug!(url = %mirror.url(), "ftp probe timed out");
                ProbeOutcome::Failed(start.elapsed())
            }
        }
    }
}

impl Default for NetworkProber {
    fn default() -> Self {
        Self::with_timeout(PROBE_TIMEOUT)
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn measure(&self, mirror: &Mirror) -> ProbeOutcome {
        // Both the protocol tag and the URL scheme must be probeable
        let scheme = mirror.url().scheme().parse::<Protocol>();

        match (mirror.protocol(), scheme) {
            (Protocol::Rsync, _) | (_, Ok(Protocol::Rsync)) | (_, Err(_)) => {
                warn!(url = %mirror.url(), protocol = %mirror.protocol(), "unsupported protocol, skipping probe");
                ProbeOutcome::Unsupported
            }
            (Protocol::Http | Protocol::Https, _) => self.measure_http(mirror).await,
            (Protocol::Ftp, _) => self.measure_ftp(mirror).await,
        }
    }
}
