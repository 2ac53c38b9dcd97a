//! Built-in readiness probes for the database and cache.
//!
//! Used when `CARE_READINESS_MODE=tcp`; the default mode delegates to the
//! external wait scripts instead.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ReadinessConfig;
use crate::error::StepError;

/// External dependency gated on before any mutating step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    Database,
    Redis,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::Database => "database",
            Dependency::Redis => "redis",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Dependency::Database => 5432,
            Dependency::Redis => 6379,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host and port of a dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Extract host and port from a connection URL.
    pub fn from_url(raw: &str, default_port: u16) -> Result<Self, StepError> {
        let url = Url::parse(raw)
            .map_err(|e| StepError::InvalidUrl(format!("cannot parse connection url: {e}")))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| StepError::InvalidUrl(format!("{} url has no host", url.scheme())))?;

        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port: url.port().unwrap_or(default_port),
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Reachable,
    Unreachable,
}

/// Retry policy for the TCP probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbePolicy {
    pub attempts: u32,
    pub interval: Duration,
    pub connect_timeout: Duration,
}

impl From<&ReadinessConfig> for ProbePolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            interval: config.interval,
            connect_timeout: config.connect_timeout,
        }
    }
}

/// Block until the endpoint accepts a TCP connection or attempts run out.
///
/// Returns the number of attempts used.
pub async fn wait_for_tcp(
    dependency: Dependency,
    endpoint: &Endpoint,
    policy: ProbePolicy,
) -> Result<u32, StepError> {
    info!(
        dependency = %dependency,
        target = %endpoint,
        attempts = policy.attempts,
        interval_seconds = policy.interval.as_secs(),
        "waiting for dependency"
    );

    for attempt in 1..=policy.attempts {
        match check_tcp(endpoint, policy.connect_timeout).await {
            ProbeStatus::Reachable => {
                info!(dependency = %dependency, attempt, "dependency reachable");
                return Ok(attempt);
            }
            ProbeStatus::Unreachable => {
                debug!(dependency = %dependency, attempt, "dependency not reachable yet");
                if attempt < policy.attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }

    warn!(dependency = %dependency, target = %endpoint, "dependency never became reachable");
    Err(StepError::DependencyUnavailable {
        dependency: dependency.to_string(),
        target: endpoint.to_string(),
        attempts: policy.attempts,
    })
}

/// Single TCP connect attempt.
pub async fn check_tcp(endpoint: &Endpoint, check_timeout: Duration) -> ProbeStatus {
    let target = (endpoint.host.as_str(), endpoint.port);

    match timeout(check_timeout, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => {
            debug!(target = %endpoint, "tcp probe succeeded");
            ProbeStatus::Reachable
        }
        Ok(Err(e)) => {
            debug!(target = %endpoint, error = %e, "tcp probe failed: connection error");
            ProbeStatus::Unreachable
        }
        Err(_) => {
            debug!(target = %endpoint, "tcp probe failed: timeout");
            ProbeStatus::Unreachable
        }
    }
}
